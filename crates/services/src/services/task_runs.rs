use db::models::{
    contributor::Contributor,
    project::Project,
    task::{Task, TaskState},
    task_run::{CreateTaskRun, TaskRun},
};
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::services::{
    jobs::{Job, JobError, JobQueue},
    scheduler::update_task_state,
    webhook::WebhookPayload,
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Queue(#[from] JobError),
    #[error("Task not found")]
    TaskNotFound,
    #[error("This task does not belong to {0}")]
    WrongProject(String),
    #[error("You have to sign in to participate in this project")]
    SignInRequired,
    #[error("You have already participated in this task")]
    AlreadyAnswered,
}

/// Stores one answer and recomputes the task state. A `task_completed`
/// webhook is queued when this answer completed the task.
pub async fn submit(
    pool: &SqlitePool,
    jobs: &JobQueue,
    project: &Project,
    task_id: i64,
    contributor: Contributor,
    info: Value,
) -> Result<TaskRun, SubmitError> {
    let task = Task::find_by_id(pool, task_id)
        .await?
        .ok_or(SubmitError::TaskNotFound)?;
    if task.project_id != project.id {
        return Err(SubmitError::WrongProject(project.short_name.clone()));
    }
    if contributor.is_anonymous() && !project.allow_anonymous_contributors {
        return Err(SubmitError::SignInRequired);
    }
    if TaskRun::exists_for(pool, task.id, &contributor).await? {
        return Err(SubmitError::AlreadyAnswered);
    }

    let data = CreateTaskRun {
        project_id: project.id,
        task_id: task.id,
        contributor,
        info,
    };
    // The unique indexes catch a concurrent answer that slipped past the check.
    let run = match TaskRun::create(pool, &data).await {
        Ok(run) => run,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(SubmitError::AlreadyAnswered);
        }
        Err(e) => return Err(e.into()),
    };

    let state = update_task_state(pool, &task).await?;
    if state == TaskState::Completed
        && task.state != TaskState::Completed
        && let Some(url) = project.webhook.clone()
    {
        jobs.enqueue(Job::Webhook {
            url,
            payload: WebhookPayload::task_completed(&project.short_name, project.id, task.id),
        })?;
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use db::{
        DBService,
        models::{
            project::{CreateProject, UpdateProject},
            task::CreateTask,
            user::{CreateUser, User},
        },
    };
    use serde_json::json;

    use super::*;

    async fn setup(pool: &SqlitePool, short_name: &str) -> (Project, Task) {
        let owner = match User::find_by_name(pool, "owner").await.unwrap() {
            Some(user) => user,
            None => User::create(
                pool,
                &CreateUser {
                    name: "owner".into(),
                    fullname: "Owner".into(),
                    email_addr: "owner@example.com".into(),
                    passwd_hash: None,
                    info: None,
                },
            )
            .await
            .unwrap(),
        };
        let project = Project::create(
            pool,
            &CreateProject {
                name: short_name.to_uppercase(),
                short_name: short_name.into(),
                description: String::new(),
                long_description: String::new(),
                owner_id: owner.id,
                category_id: None,
                hidden: false,
                info: json!({}),
            },
        )
        .await
        .unwrap();
        let mut data = CreateTask::with_info(json!({}));
        data.n_answers = Some(1);
        let task = Task::create(pool, project.id, &data).await.unwrap();
        (project, task)
    }

    #[tokio::test]
    async fn one_answer_per_contributor() {
        let db = DBService::new_in_memory().await.unwrap();
        let (jobs, _rx) = JobQueue::new();
        let (project, task) = setup(&db.pool, "birds").await;
        let ip = Contributor::Anonymous("10.0.0.1".into());

        submit(&db.pool, &jobs, &project, task.id, ip.clone(), json!({"answer": "yes"}))
            .await
            .unwrap();
        let err = submit(&db.pool, &jobs, &project, task.id, ip, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::AlreadyAnswered));
        let task = Task::find_by_id(&db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn concurrent_answers_store_one_run() {
        let db = DBService::new_in_memory().await.unwrap();
        let (jobs, _rx) = JobQueue::new();
        let (project, task) = setup(&db.pool, "birds").await;
        let ip = Contributor::Anonymous("9.9.9.9".into());

        let (first, second) = tokio::join!(
            submit(&db.pool, &jobs, &project, task.id, ip.clone(), json!({"n": 1})),
            submit(&db.pool, &jobs, &project, task.id, ip.clone(), json!({"n": 2})),
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(SubmitError::AlreadyAnswered)))
        );
        assert_eq!(TaskRun::count_by_task(&db.pool, task.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_rows_are_rejected_by_the_database() {
        let db = DBService::new_in_memory().await.unwrap();
        let (project, task) = setup(&db.pool, "birds").await;
        let data = CreateTaskRun {
            project_id: project.id,
            task_id: task.id,
            contributor: Contributor::Anonymous("9.9.9.9".into()),
            info: json!({}),
        };
        TaskRun::create(&db.pool, &data).await.unwrap();
        match TaskRun::create(&db.pool, &data).await {
            Err(sqlx::Error::Database(e)) => assert!(e.is_unique_violation()),
            other => panic!("expected a unique violation, got {other:?}"),
        }

        // A different volunteer on the same task is fine.
        let other = CreateTaskRun {
            contributor: Contributor::Anonymous("9.9.9.10".into()),
            ..data
        };
        TaskRun::create(&db.pool, &other).await.unwrap();
    }

    #[tokio::test]
    async fn task_must_belong_to_project() {
        let db = DBService::new_in_memory().await.unwrap();
        let (jobs, _rx) = JobQueue::new();
        let (birds, _) = setup(&db.pool, "birds").await;
        let (_, fish_task) = setup(&db.pool, "fish").await;
        let err = submit(
            &db.pool,
            &jobs,
            &birds,
            fish_task.id,
            Contributor::Anonymous("10.0.0.1".into()),
            json!({}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "This task does not belong to birds");
    }

    #[tokio::test]
    async fn anonymous_answers_can_be_disallowed() {
        let db = DBService::new_in_memory().await.unwrap();
        let (jobs, _rx) = JobQueue::new();
        let (project, task) = setup(&db.pool, "birds").await;
        let mut data = UpdateProject::from_project(&project);
        data.allow_anonymous_contributors = false;
        let project = Project::update(&db.pool, project.id, &data).await.unwrap();

        let err = submit(
            &db.pool,
            &jobs,
            &project,
            task.id,
            Contributor::Anonymous("10.0.0.1".into()),
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SubmitError::SignInRequired));
    }

    #[tokio::test]
    async fn completion_queues_webhook() {
        let db = DBService::new_in_memory().await.unwrap();
        let (jobs, mut rx) = JobQueue::new();
        let (project, task) = setup(&db.pool, "birds").await;
        let mut data = UpdateProject::from_project(&project);
        data.webhook = Some("http://hooks.example.com/done".into());
        let project = Project::update(&db.pool, project.id, &data).await.unwrap();

        let owner = User::find_by_name(&db.pool, "owner").await.unwrap().unwrap();
        submit(&db.pool, &jobs, &project, task.id, Contributor::User(owner.id), json!({}))
            .await
            .unwrap();
        match rx.try_recv().unwrap() {
            Job::Webhook { url, payload } => {
                assert_eq!(url, "http://hooks.example.com/done");
                assert_eq!(payload.event, "task_completed");
                assert_eq!(payload.task_id, task.id);
                assert_eq!(payload.project_short_name, "birds");
            }
            other => panic!("unexpected job {other:?}"),
        }
    }
}
