use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, Type, types::Json};
use thiserror::Error;
use ts_rs::TS;

use super::{
    contributor::Contributor,
    filters::{FieldFilter, Viewer, push_filters, push_visibility},
    project::Project,
};

pub const DEFAULT_N_ANSWERS: i64 = 30;
pub const MAX_N_ANSWERS: i64 = 1000;

/// Columns the REST list endpoint may filter on.
pub const FILTERABLE: &[&str] = &[
    "id",
    "project_id",
    "state",
    "quorum",
    "calibration",
    "priority_0",
    "n_answers",
];

const TASK_COLUMNS: &str =
    "t.id AS id, t.project_id AS project_id, t.state AS state, t.quorum AS quorum, \
     t.calibration AS calibration, t.priority_0 AS priority_0, t.n_answers AS n_answers, \
     t.info AS info, t.created_at AS created_at";

const RETURNING_COLUMNS: &str =
    "id, project_id, state, quorum, calibration, priority_0, n_answers, info, created_at";

const RUN_COUNT: &str = "(SELECT COUNT(*) FROM task_runs r WHERE r.task_id = t.id)";

#[derive(Debug, Error, PartialEq)]
pub enum TaskFieldError {
    #[error("Priority must be a value between 0.0 and 1.0")]
    Priority,
    #[error("Redundancy must be a value between 1 and 1,000")]
    Redundancy,
}

pub fn check_priority(priority_0: f64) -> Result<(), TaskFieldError> {
    if (0.0..=1.0).contains(&priority_0) {
        Ok(())
    } else {
        Err(TaskFieldError::Priority)
    }
}

pub fn check_n_answers(n_answers: i64) -> Result<(), TaskFieldError> {
    if (1..=MAX_N_ANSWERS).contains(&n_answers) {
        Ok(())
    } else {
        Err(TaskFieldError::Redundancy)
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "task_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Ongoing,
    Completed,
}

impl TaskState {
    pub fn for_counts(n_task_runs: i64, n_answers: i64) -> Self {
        if n_task_runs >= n_answers {
            TaskState::Completed
        } else {
            TaskState::Ongoing
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: i64,
    pub project_id: i64, // Foreign key to Project
    pub state: TaskState,
    pub quorum: i64,
    pub calibration: i64,
    pub priority_0: f64,
    pub n_answers: i64,
    #[sqlx(json)]
    #[ts(type = "unknown")]
    pub info: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, TS)]
pub struct TaskWithRunCount {
    #[sqlx(flatten)]
    #[serde(flatten)]
    #[ts(flatten)]
    pub task: Task,
    pub n_task_runs: i64,
}

impl TaskWithRunCount {
    /// Share of the required answers already collected, in percent, capped at 100.
    pub fn pct_status(&self) -> i64 {
        if self.task.n_answers <= 0 {
            return 100;
        }
        (self.n_task_runs * 100 / self.task.n_answers).min(100)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, TS)]
pub struct CreateTask {
    pub state: Option<TaskState>,
    #[serde(default)]
    pub quorum: i64,
    #[serde(default)]
    pub calibration: i64,
    #[serde(default)]
    pub priority_0: f64,
    pub n_answers: Option<i64>,
    #[ts(type = "unknown")]
    pub info: Value,
}

impl CreateTask {
    pub fn with_info(info: Value) -> Self {
        Self {
            state: None,
            quorum: 0,
            calibration: 0,
            priority_0: 0.0,
            n_answers: None,
            info,
        }
    }

    pub fn validate(&self) -> Result<(), TaskFieldError> {
        check_priority(self.priority_0)?;
        check_n_answers(self.n_answers.unwrap_or(DEFAULT_N_ANSWERS))
    }
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct UpdateTask {
    pub state: Option<TaskState>,
    pub quorum: Option<i64>,
    pub calibration: Option<i64>,
    pub priority_0: Option<f64>,
    pub n_answers: Option<i64>,
    #[ts(type = "unknown")]
    pub info: Option<Value>,
}

impl UpdateTask {
    pub fn validate(&self) -> Result<(), TaskFieldError> {
        if let Some(priority_0) = self.priority_0 {
            check_priority(priority_0)?;
        }
        if let Some(n_answers) = self.n_answers {
            check_n_answers(n_answers)?;
        }
        Ok(())
    }
}

/// Order in which the scheduler walks candidate tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrder {
    /// Highest `priority_0` first, then oldest.
    PriorityFirst,
    /// Fewest task runs first, then oldest.
    FewestRunsFirst,
}

impl Task {
    pub async fn parent_project(&self, pool: &SqlitePool) -> Result<Option<Project>, sqlx::Error> {
        Project::find_by_id(pool, self.project_id).await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id_and_project_id(
        pool: &SqlitePool,
        id: i64,
        project_id: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ? AND t.project_id = ?"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.project_id = ? ORDER BY t.id ASC"
        ))
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_project_id_with_run_count(
        pool: &SqlitePool,
        project_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskWithRunCount>, sqlx::Error> {
        sqlx::query_as::<_, TaskWithRunCount>(&format!(
            "SELECT {TASK_COLUMNS}, {RUN_COUNT} AS n_task_runs
               FROM tasks t
              WHERE t.project_id = ?
              ORDER BY t.id ASC
              LIMIT ? OFFSET ?"
        ))
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn find_filtered(
        pool: &SqlitePool,
        filters: &[FieldFilter],
        viewer: Viewer,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TASK_COLUMNS} FROM tasks t WHERE 1 = 1"
        ));
        push_visibility(&mut qb, "t.project_id", viewer);
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY t.id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        qb.build_query_as::<Task>().fetch_all(pool).await
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_project(pool: &SqlitePool, project_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(pool)
            .await
    }

    pub async fn count_completed_by_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = ? AND state = 'completed'")
            .bind(project_id)
            .fetch_one(pool)
            .await
    }

    pub async fn create(
        pool: &SqlitePool,
        project_id: i64,
        data: &CreateTask,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks (project_id, state, quorum, calibration, priority_0, n_answers, info)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(project_id)
        .bind(data.state.unwrap_or(TaskState::Ongoing))
        .bind(data.quorum)
        .bind(data.calibration)
        .bind(data.priority_0)
        .bind(data.n_answers.unwrap_or(DEFAULT_N_ANSWERS))
        .bind(Json(&data.info))
        .fetch_one(pool)
        .await
    }

    /// Inserts a batch in a single transaction. Either every task is stored or none.
    pub async fn create_many(
        pool: &SqlitePool,
        project_id: i64,
        tasks: &[CreateTask],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut inserted = 0;
        for data in tasks {
            let result = sqlx::query(
                "INSERT INTO tasks (project_id, state, quorum, calibration, priority_0, n_answers, info)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(project_id)
            .bind(data.state.unwrap_or(TaskState::Ongoing))
            .bind(data.quorum)
            .bind(data.calibration)
            .bind(data.priority_0)
            .bind(data.n_answers.unwrap_or(DEFAULT_N_ANSWERS))
            .bind(Json(&data.info))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        data: &UpdateTask,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks
                SET state = COALESCE(?, state),
                    quorum = COALESCE(?, quorum),
                    calibration = COALESCE(?, calibration),
                    priority_0 = COALESCE(?, priority_0),
                    n_answers = COALESCE(?, n_answers),
                    info = COALESCE(?, info)
              WHERE id = ?
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(data.state)
        .bind(data.quorum)
        .bind(data.calibration)
        .bind(data.priority_0)
        .bind(data.n_answers)
        .bind(data.info.as_ref().map(Json))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Removes every task of a project; their task runs go with them.
    pub async fn delete_by_project(pool: &SqlitePool, project_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE project_id = ?")
            .bind(project_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// The `info` of every task in the project, used to skip duplicates on import.
    pub async fn infos_by_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Value>, sqlx::Error> {
        let rows: Vec<Json<Value>> =
            sqlx::query_scalar("SELECT info FROM tasks WHERE project_id = ? ORDER BY id ASC")
                .bind(project_id)
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|Json(info)| info).collect())
    }

    /// Recomputes `state` from the number of task runs and returns the new state.
    pub async fn refresh_state(pool: &SqlitePool, id: i64) -> Result<TaskState, sqlx::Error> {
        sqlx::query_scalar(&format!(
            "UPDATE tasks AS t
                SET state = CASE WHEN {RUN_COUNT} >= t.n_answers THEN 'completed' ELSE 'ongoing' END
              WHERE t.id = ?
             RETURNING state"
        ))
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Sets the redundancy of every task in the project and recomputes their
    /// states.
    pub async fn set_n_answers_for_project(
        pool: &SqlitePool,
        project_id: i64,
        n_answers: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(&format!(
            "UPDATE tasks AS t
                SET n_answers = ?,
                    state = CASE WHEN {RUN_COUNT} >= ? THEN 'completed' ELSE 'ongoing' END
              WHERE t.project_id = ?"
        ))
        .bind(n_answers)
        .bind(n_answers)
        .bind(project_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Sets `priority_0` on the listed tasks of a project. Ids from other
    /// projects are ignored; the number of updated rows is returned.
    pub async fn set_priority(
        pool: &SqlitePool,
        project_id: i64,
        task_ids: &[i64],
        priority_0: f64,
    ) -> Result<u64, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE tasks SET priority_0 = ");
        qb.push_bind(priority_0)
            .push(" WHERE project_id = ")
            .push_bind(project_id)
            .push(" AND id IN (");
        let mut ids = qb.separated(", ");
        for id in task_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
        let result = qb.build().execute(pool).await?;
        Ok(result.rows_affected())
    }

    /// Ongoing tasks of the project that still need answers and that the
    /// contributor has not answered yet.
    pub async fn find_candidates(
        pool: &SqlitePool,
        project_id: i64,
        contributor: &Contributor,
        order: CandidateOrder,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TASK_COLUMNS} FROM tasks t
              WHERE t.state = 'ongoing'
                AND {RUN_COUNT} < t.n_answers
                AND t.project_id = "
        ));
        qb.push_bind(project_id);
        match contributor {
            Contributor::User(user_id) => {
                qb.push(" AND NOT EXISTS (SELECT 1 FROM task_runs r WHERE r.task_id = t.id AND r.user_id = ")
                    .push_bind(*user_id)
                    .push(")");
            }
            Contributor::Anonymous(ip) => {
                qb.push(" AND NOT EXISTS (SELECT 1 FROM task_runs r WHERE r.task_id = t.id AND r.user_id IS NULL AND r.user_ip = ")
                    .push_bind(ip.clone())
                    .push(")");
            }
        }
        match order {
            CandidateOrder::PriorityFirst => qb.push(" ORDER BY t.priority_0 DESC, t.id ASC"),
            CandidateOrder::FewestRunsFirst => {
                qb.push(format!(" ORDER BY {RUN_COUNT} ASC, t.id ASC"))
            }
        };
        qb.push(" LIMIT ")
            .push_bind(limit.unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(offset);
        qb.build_query_as::<Task>().fetch_all(pool).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        DBService,
        models::{
            task_run::{CreateTaskRun, TaskRun},
            test_support,
        },
    };

    async fn answer(pool: &SqlitePool, task: &Task, contributor: Contributor) {
        TaskRun::create(
            pool,
            &CreateTaskRun {
                project_id: task.project_id,
                task_id: task.id,
                contributor,
                info: json!({"answer": "yes"}),
            },
        )
        .await
        .unwrap();
        Task::refresh_state(pool, task.id).await.unwrap();
    }

    #[test]
    fn priority_and_redundancy_ranges() {
        let mut data = CreateTask::with_info(json!({}));
        assert_eq!(data.validate(), Ok(()));
        data.priority_0 = 3.0;
        assert_eq!(data.validate(), Err(TaskFieldError::Priority));
        data.priority_0 = 1.0;
        data.n_answers = Some(0);
        assert_eq!(data.validate(), Err(TaskFieldError::Redundancy));
        data.n_answers = Some(MAX_N_ANSWERS);
        assert_eq!(data.validate(), Ok(()));

        assert_eq!(UpdateTask::default().validate(), Ok(()));
        let update = UpdateTask {
            n_answers: Some(-2),
            ..Default::default()
        };
        assert_eq!(update.validate(), Err(TaskFieldError::Redundancy));
        let update = UpdateTask {
            priority_0: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(update.validate(), Err(TaskFieldError::Priority));
    }

    #[tokio::test]
    async fn create_many_defaults() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;
        let batch = vec![
            CreateTask::with_info(json!({"a": 1})),
            CreateTask::with_info(json!({"a": 2})),
        ];
        assert_eq!(Task::create_many(&db.pool, project.id, &batch).await.unwrap(), 2);
        let tasks = Task::find_by_project_id(&db.pool, project.id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].n_answers, DEFAULT_N_ANSWERS);
        assert_eq!(tasks[0].state, TaskState::Ongoing);
        assert_eq!(
            Task::infos_by_project(&db.pool, project.id).await.unwrap(),
            vec![json!({"a": 1}), json!({"a": 2})]
        );
    }

    #[tokio::test]
    async fn state_follows_redundancy() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;
        let mut data = CreateTask::with_info(json!({}));
        data.n_answers = Some(2);
        let task = Task::create(&db.pool, project.id, &data).await.unwrap();

        answer(&db.pool, &task, Contributor::Anonymous("127.0.0.1".into())).await;
        let task = Task::find_by_id(&db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Ongoing);

        answer(&db.pool, &task, Contributor::User(owner.id)).await;
        let task = Task::find_by_id(&db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);

        Task::set_n_answers_for_project(&db.pool, project.id, 3)
            .await
            .unwrap();
        let task = Task::find_by_id(&db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Ongoing);
        assert_eq!(task.n_answers, 3);
    }

    #[tokio::test]
    async fn candidates_skip_answered_and_follow_order() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;
        let first = Task::create(&db.pool, project.id, &CreateTask::with_info(json!({"n": 1})))
            .await
            .unwrap();
        let second = Task::create(&db.pool, project.id, &CreateTask::with_info(json!({"n": 2})))
            .await
            .unwrap();

        let me = Contributor::Anonymous("10.0.0.1".into());
        let found = Task::find_candidates(
            &db.pool,
            project.id,
            &me,
            CandidateOrder::PriorityFirst,
            Some(1),
            0,
        )
        .await
        .unwrap();
        assert_eq!(found[0].id, first.id);

        Task::set_priority(&db.pool, project.id, &[second.id], 1.0)
            .await
            .unwrap();
        let found = Task::find_candidates(&db.pool, project.id, &me, CandidateOrder::PriorityFirst, None, 0)
            .await
            .unwrap();
        assert_eq!(found[0].id, second.id);

        answer(&db.pool, &first, Contributor::Anonymous("10.0.0.2".into())).await;
        let found = Task::find_candidates(&db.pool, project.id, &me, CandidateOrder::FewestRunsFirst, None, 0)
            .await
            .unwrap();
        assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        answer(&db.pool, &second, me.clone()).await;
        let found = Task::find_candidates(&db.pool, project.id, &me, CandidateOrder::FewestRunsFirst, None, 0)
            .await
            .unwrap();
        assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id]);
    }

    #[tokio::test]
    async fn set_priority_ignores_foreign_tasks() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let mine = test_support::project(&db.pool, owner.id, "mine").await;
        let other = test_support::project(&db.pool, owner.id, "other").await;
        let task = Task::create(&db.pool, other.id, &CreateTask::with_info(json!({})))
            .await
            .unwrap();
        let updated = Task::set_priority(&db.pool, mine.id, &[task.id], 0.5)
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn pct_status_is_capped() {
        let task = Task {
            id: 1,
            project_id: 1,
            state: TaskState::Completed,
            quorum: 0,
            calibration: 0,
            priority_0: 0.0,
            n_answers: 2,
            info: json!({}),
            created_at: Utc::now(),
        };
        let with_runs = TaskWithRunCount {
            task,
            n_task_runs: 5,
        };
        assert_eq!(with_runs.pct_status(), 100);
    }
}
