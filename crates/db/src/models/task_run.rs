use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, types::Json};
use ts_rs::TS;

use super::{
    contributor::Contributor,
    filters::{FieldFilter, Viewer, push_filters, push_visibility},
};

/// Columns the REST list endpoint may filter on.
pub const FILTERABLE: &[&str] = &["id", "project_id", "task_id", "user_id", "user_ip"];

const TASK_RUN_COLUMNS: &str =
    "id, project_id, task_id, user_id, user_ip, info, created_at, finish_time";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct TaskRun {
    pub id: i64,
    pub project_id: i64,
    pub task_id: i64,
    pub user_id: Option<i64>,
    pub user_ip: Option<String>,
    #[sqlx(json)]
    #[ts(type = "unknown")]
    pub info: Value,
    pub created_at: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
}

impl TaskRun {
    pub fn contributor(&self) -> Contributor {
        match (self.user_id, &self.user_ip) {
            (Some(user_id), _) => Contributor::User(user_id),
            (None, ip) => Contributor::Anonymous(ip.clone().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateTaskRun {
    pub project_id: i64,
    pub task_id: i64,
    pub contributor: Contributor,
    pub info: Value,
}

/// Distinct contributors of a project, split by kind.
#[derive(Debug, Clone, Copy, Default, FromRow, Serialize, TS)]
pub struct VolunteerCounts {
    pub n_anonymous: i64,
    pub n_authenticated: i64,
}

impl TaskRun {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskRun>(&format!(
            "SELECT {TASK_RUN_COLUMNS} FROM task_runs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_task_id(
        pool: &SqlitePool,
        task_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskRun>(&format!(
            "SELECT {TASK_RUN_COLUMNS} FROM task_runs WHERE task_id = ? ORDER BY id ASC"
        ))
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskRun>(&format!(
            "SELECT {TASK_RUN_COLUMNS} FROM task_runs WHERE project_id = ? ORDER BY id ASC"
        ))
        .bind(project_id)
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
            "SELECT {TASK_RUN_COLUMNS} FROM task_runs WHERE 1 = 1"
        ));
        push_visibility(&mut qb, "project_id", viewer);
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        qb.build_query_as::<TaskRun>().fetch_all(pool).await
    }

    pub async fn create(pool: &SqlitePool, data: &CreateTaskRun) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TaskRun>(&format!(
            "INSERT INTO task_runs (project_id, task_id, user_id, user_ip, info)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {TASK_RUN_COLUMNS}"
        ))
        .bind(data.project_id)
        .bind(data.task_id)
        .bind(data.contributor.user_id())
        .bind(data.contributor.user_ip())
        .bind(Json(&data.info))
        .fetch_one(pool)
        .await
    }

    pub async fn update_info(
        pool: &SqlitePool,
        id: i64,
        info: &Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskRun>(&format!(
            "UPDATE task_runs SET info = ? WHERE id = ? RETURNING {TASK_RUN_COLUMNS}"
        ))
        .bind(Json(info))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM task_runs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Whether this contributor already answered the task.
    pub async fn exists_for(
        pool: &SqlitePool,
        task_id: i64,
        contributor: &Contributor,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = match contributor {
            Contributor::User(user_id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM task_runs WHERE task_id = ? AND user_id = ?")
                    .bind(task_id)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await?
            }
            Contributor::Anonymous(ip) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM task_runs WHERE task_id = ? AND user_id IS NULL AND user_ip = ?",
                )
                .bind(task_id)
                .bind(ip)
                .fetch_one(pool)
                .await?
            }
        };
        Ok(count > 0)
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM task_runs")
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_project(pool: &SqlitePool, project_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM task_runs WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_task(pool: &SqlitePool, task_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM task_runs WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_user(pool: &SqlitePool, user_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM task_runs WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    pub async fn volunteers_by_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<VolunteerCounts, sqlx::Error> {
        sqlx::query_as::<_, VolunteerCounts>(
            "SELECT COUNT(DISTINCT CASE WHEN user_id IS NULL THEN user_ip END) AS n_anonymous,
                    COUNT(DISTINCT user_id) AS n_authenticated
               FROM task_runs
              WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_one(pool)
        .await
    }

    /// Distinct anonymous contributors across the whole platform.
    pub async fn count_anonymous_contributors(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_ip) FROM task_runs WHERE user_id IS NULL",
        )
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        DBService,
        models::{
            task::{CreateTask, Task},
            test_support,
        },
    };

    #[tokio::test]
    async fn contributors_are_told_apart() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;
        let task = Task::create(&db.pool, project.id, &CreateTask::with_info(json!({})))
            .await
            .unwrap();

        let anon = Contributor::Anonymous("127.0.0.1".into());
        let run = TaskRun::create(
            &db.pool,
            &CreateTaskRun {
                project_id: project.id,
                task_id: task.id,
                contributor: anon.clone(),
                info: json!("yes"),
            },
        )
        .await
        .unwrap();
        assert_eq!(run.contributor(), anon);
        assert!(TaskRun::exists_for(&db.pool, task.id, &anon).await.unwrap());
        assert!(
            !TaskRun::exists_for(&db.pool, task.id, &Contributor::User(owner.id))
                .await
                .unwrap()
        );

        TaskRun::create(
            &db.pool,
            &CreateTaskRun {
                project_id: project.id,
                task_id: task.id,
                contributor: Contributor::User(owner.id),
                info: json!("no"),
            },
        )
        .await
        .unwrap();

        let counts = TaskRun::volunteers_by_project(&db.pool, project.id)
            .await
            .unwrap();
        assert_eq!(counts.n_anonymous, 1);
        assert_eq!(counts.n_authenticated, 1);
        assert_eq!(TaskRun::count_by_task(&db.pool, task.id).await.unwrap(), 2);
        assert_eq!(TaskRun::count_anonymous_contributors(&db.pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn runs_go_with_their_task() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;
        let task = Task::create(&db.pool, project.id, &CreateTask::with_info(json!({})))
            .await
            .unwrap();
        TaskRun::create(
            &db.pool,
            &CreateTaskRun {
                project_id: project.id,
                task_id: task.id,
                contributor: Contributor::User(owner.id),
                info: json!({}),
            },
        )
        .await
        .unwrap();
        Task::delete_by_project(&db.pool, project.id).await.unwrap();
        assert_eq!(TaskRun::count(&db.pool).await.unwrap(), 0);
    }
}
