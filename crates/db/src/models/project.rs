use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, types::Json};
use thiserror::Error;
use ts_rs::TS;

use super::filters::{FieldFilter, Viewer, push_filters, push_visibility};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Project not found")]
    ProjectNotFound,
    #[error("Project with this name already exists")]
    NameExists,
    #[error("Project with this short name already exists")]
    ShortNameExists,
}

const PROJECT_COLUMNS: &str = "p.id AS id, p.name AS name, p.short_name AS short_name, \
    p.description AS description, p.long_description AS long_description, \
    p.owner_id AS owner_id, p.category_id AS category_id, p.hidden AS hidden, \
    p.featured AS featured, p.allow_anonymous_contributors AS allow_anonymous_contributors, \
    p.webhook AS webhook, p.passwd_hash AS passwd_hash, p.info AS info, \
    p.created_at AS created_at, p.updated_at AS updated_at";

const RETURNING_COLUMNS: &str = "id, name, short_name, description, long_description, owner_id, \
    category_id, hidden, featured, allow_anonymous_contributors, webhook, passwd_hash, info, \
    created_at, updated_at";

const SUMMARY_COUNTS: &str = "(SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id) AS n_tasks, \
    (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id AND t.state = 'completed') AS n_completed_tasks, \
    (SELECT COUNT(DISTINCT COALESCE('user:' || r.user_id, 'ip:' || r.user_ip)) \
       FROM task_runs r WHERE r.project_id = p.id) AS n_volunteers";

const PUBLISHED: &str = "EXISTS (SELECT 1 FROM tasks t WHERE t.project_id = p.id) \
    AND COALESCE(json_extract(p.info, '$.task_presenter'), '') <> ''";

/// Columns the REST list endpoint may filter on.
pub const FILTERABLE: &[&str] = &[
    "id",
    "name",
    "short_name",
    "owner_id",
    "category_id",
    "hidden",
    "featured",
    "allow_anonymous_contributors",
];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub long_description: String,
    pub owner_id: i64,
    pub category_id: Option<i64>,
    pub hidden: bool,
    pub featured: bool,
    pub allow_anonymous_contributors: bool,
    pub webhook: Option<String>,
    #[serde(skip_serializing)]
    #[ts(skip)]
    pub passwd_hash: Option<String>,
    #[sqlx(json)]
    #[ts(type = "Record<string, unknown>")]
    pub info: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A project with the counters shown in listings.
#[derive(Debug, Clone, FromRow, Serialize, TS)]
pub struct ProjectSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    #[ts(flatten)]
    pub project: Project,
    pub n_tasks: i64,
    pub n_completed_tasks: i64,
    pub n_volunteers: i64,
}

impl ProjectSummary {
    /// Percentage of completed tasks, 0 for a project without tasks.
    pub fn overall_progress(&self) -> i64 {
        if self.n_tasks == 0 {
            0
        } else {
            self.n_completed_tasks * 100 / self.n_tasks
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateProject {
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub long_description: String,
    pub owner_id: i64,
    pub category_id: Option<i64>,
    #[serde(default)]
    pub hidden: bool,
    #[ts(type = "Record<string, unknown>")]
    pub info: Value,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateProject {
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub long_description: String,
    pub category_id: Option<i64>,
    pub hidden: bool,
    pub allow_anonymous_contributors: bool,
    pub webhook: Option<String>,
}

impl UpdateProject {
    pub fn from_project(project: &Project) -> Self {
        Self {
            name: project.name.clone(),
            short_name: project.short_name.clone(),
            description: project.description.clone(),
            long_description: project.long_description.clone(),
            category_id: project.category_id,
            hidden: project.hidden,
            allow_anonymous_contributors: project.allow_anonymous_contributors,
            webhook: project.webhook.clone(),
        }
    }
}

impl Project {
    pub fn needs_password(&self) -> bool {
        self.passwd_hash.is_some()
    }

    pub fn info_str(&self, key: &str) -> Option<&str> {
        self.info.get(key).and_then(Value::as_str)
    }

    pub fn task_presenter(&self) -> Option<&str> {
        self.info_str("task_presenter").filter(|s| !s.is_empty())
    }

    pub fn tutorial(&self) -> Option<&str> {
        self.info_str("tutorial").filter(|s| !s.is_empty())
    }

    /// Scheduler name stored in `info.sched`, if any.
    pub fn sched(&self) -> Option<&str> {
        self.info_str("sched")
    }

    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.owner_id == user_id
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_short_name(
        pool: &SqlitePool,
        short_name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.short_name = ?"
        ))
        .bind(short_name)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_summary(
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<ProjectSummary>, sqlx::Error> {
        sqlx::query_as::<_, ProjectSummary>(&format!(
            "SELECT {PROJECT_COLUMNS}, {SUMMARY_COUNTS} FROM projects p WHERE p.id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    async fn column_taken(
        pool: &SqlitePool,
        column: &str,
        value: &str,
        except_id: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM projects WHERE ");
        qb.push(column).push(" = ").push_bind(value.to_string());
        if let Some(id) = except_id {
            qb.push(" AND id <> ").push_bind(id);
        }
        let count: i64 = qb.build_query_scalar().fetch_one(pool).await?;
        Ok(count > 0)
    }

    pub async fn name_taken(
        pool: &SqlitePool,
        name: &str,
        except_id: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        Self::column_taken(pool, "name", name, except_id).await
    }

    pub async fn short_name_taken(
        pool: &SqlitePool,
        short_name: &str,
        except_id: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        Self::column_taken(pool, "short_name", short_name, except_id).await
    }

    pub async fn create(pool: &SqlitePool, data: &CreateProject) -> Result<Self, ProjectError> {
        if Self::name_taken(pool, &data.name, None).await? {
            return Err(ProjectError::NameExists);
        }
        if Self::short_name_taken(pool, &data.short_name, None).await? {
            return Err(ProjectError::ShortNameExists);
        }
        let project = sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects (name, short_name, description, long_description, owner_id, category_id, hidden, info)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(&data.name)
        .bind(&data.short_name)
        .bind(&data.description)
        .bind(&data.long_description)
        .bind(data.owner_id)
        .bind(data.category_id)
        .bind(data.hidden)
        .bind(Json(&data.info))
        .fetch_one(pool)
        .await?;
        Ok(project)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        data: &UpdateProject,
    ) -> Result<Self, ProjectError> {
        if Self::name_taken(pool, &data.name, Some(id)).await? {
            return Err(ProjectError::NameExists);
        }
        if Self::short_name_taken(pool, &data.short_name, Some(id)).await? {
            return Err(ProjectError::ShortNameExists);
        }
        sqlx::query_as::<_, Project>(&format!(
            "UPDATE projects
                SET name = ?, short_name = ?, description = ?, long_description = ?,
                    category_id = ?, hidden = ?, allow_anonymous_contributors = ?, webhook = ?,
                    updated_at = datetime('now', 'subsec')
              WHERE id = ?
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(&data.name)
        .bind(&data.short_name)
        .bind(&data.description)
        .bind(&data.long_description)
        .bind(data.category_id)
        .bind(data.hidden)
        .bind(data.allow_anonymous_contributors)
        .bind(&data.webhook)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ProjectError::ProjectNotFound)
    }

    pub async fn update_info(pool: &SqlitePool, id: i64, info: &Value) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE projects SET info = ?, updated_at = datetime('now', 'subsec') WHERE id = ?",
        )
        .bind(Json(info))
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_password(
        pool: &SqlitePool,
        id: i64,
        passwd_hash: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE projects SET passwd_hash = ? WHERE id = ?")
            .bind(passwd_hash)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_featured(pool: &SqlitePool, id: i64, featured: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE projects SET featured = ? WHERE id = ?")
            .bind(featured)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(pool)
            .await
    }

    /// Published, non-hidden projects, optionally restricted to a category.
    pub async fn find_published(
        pool: &SqlitePool,
        category_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ProjectSummary>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {PROJECT_COLUMNS}, {SUMMARY_COUNTS} FROM projects p WHERE p.hidden = 0 AND {PUBLISHED}"
        ));
        if let Some(category_id) = category_id {
            qb.push(" AND p.category_id = ").push_bind(category_id);
        }
        qb.push(" ORDER BY p.id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        qb.build_query_as::<ProjectSummary>().fetch_all(pool).await
    }

    pub async fn count_published(
        pool: &SqlitePool,
        category_id: Option<i64>,
    ) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT COUNT(*) FROM projects p WHERE p.hidden = 0 AND {PUBLISHED}"
        ));
        if let Some(category_id) = category_id {
            qb.push(" AND p.category_id = ").push_bind(category_id);
        }
        qb.build_query_scalar().fetch_one(pool).await
    }

    pub async fn find_featured(pool: &SqlitePool) -> Result<Vec<ProjectSummary>, sqlx::Error> {
        sqlx::query_as::<_, ProjectSummary>(&format!(
            "SELECT {PROJECT_COLUMNS}, {SUMMARY_COUNTS} FROM projects p
              WHERE p.featured = 1 AND p.hidden = 0 AND {PUBLISHED}
              ORDER BY p.id ASC"
        ))
        .fetch_all(pool)
        .await
    }

    /// Projects that are not published yet: no tasks or no task presenter.
    pub async fn find_drafts(
        pool: &SqlitePool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ProjectSummary>, sqlx::Error> {
        sqlx::query_as::<_, ProjectSummary>(&format!(
            "SELECT {PROJECT_COLUMNS}, {SUMMARY_COUNTS} FROM projects p
              WHERE p.hidden = 0 AND NOT ({PUBLISHED})
              ORDER BY p.id ASC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count_drafts(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM projects p WHERE p.hidden = 0 AND NOT ({PUBLISHED})"
        ))
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_owner(pool: &SqlitePool, owner_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.owner_id = ? ORDER BY p.id ASC"
        ))
        .bind(owner_id)
        .fetch_all(pool)
        .await
    }

    /// Non-hidden projects the user submitted at least one task run to.
    pub async fn find_contributed_by(
        pool: &SqlitePool,
        user_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p
              WHERE p.hidden = 0
                AND EXISTS (SELECT 1 FROM task_runs r WHERE r.project_id = p.id AND r.user_id = ?)
              ORDER BY p.id ASC"
        ))
        .bind(user_id)
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
            "SELECT {PROJECT_COLUMNS} FROM projects p WHERE 1 = 1"
        ));
        push_visibility(&mut qb, "p.id", viewer);
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY p.id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        qb.build_query_as::<Project>().fetch_all(pool).await
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
    async fn duplicate_names_are_rejected() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        test_support::project(&db.pool, owner.id, "sampleapp").await;

        let mut data = test_support::create_project(owner.id, "other");
        data.name = "sampleapp project".into();
        assert!(matches!(
            Project::create(&db.pool, &data).await,
            Err(ProjectError::NameExists)
        ));

        let mut data = test_support::create_project(owner.id, "sampleapp");
        data.name = "Another".into();
        assert!(matches!(
            Project::create(&db.pool, &data).await,
            Err(ProjectError::ShortNameExists)
        ));
    }

    #[tokio::test]
    async fn published_needs_tasks_and_presenter() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;

        assert_eq!(Project::count_published(&db.pool, None).await.unwrap(), 0);
        assert_eq!(Project::count_drafts(&db.pool).await.unwrap(), 1);

        Task::create(&db.pool, project.id, &CreateTask::with_info(json!({"q": 1})))
            .await
            .unwrap();
        assert_eq!(Project::count_published(&db.pool, None).await.unwrap(), 0);

        Project::update_info(&db.pool, project.id, &json!({"task_presenter": "<div/>"}))
            .await
            .unwrap();
        assert_eq!(Project::count_published(&db.pool, None).await.unwrap(), 1);
        assert_eq!(Project::count_drafts(&db.pool).await.unwrap(), 0);

        let listed = Project::find_published(&db.pool, None, 10, 0).await.unwrap();
        assert_eq!(listed[0].n_tasks, 1);
        assert_eq!(listed[0].overall_progress(), 0);
    }

    #[tokio::test]
    async fn hidden_projects_only_visible_to_owner() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let other = test_support::user(&db.pool, "tester").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;
        let mut update = UpdateProject::from_project(&project);
        update.hidden = true;
        Project::update(&db.pool, project.id, &update).await.unwrap();

        for (viewer, expected) in [
            (Viewer::Anonymous, 0),
            (Viewer::User(other.id), 0),
            (Viewer::User(owner.id), 1),
            (Viewer::Admin, 1),
        ] {
            let found = Project::find_filtered(&db.pool, &[], viewer, 20, 0)
                .await
                .unwrap();
            assert_eq!(found.len(), expected, "{viewer:?}");
        }
    }

    #[tokio::test]
    async fn needs_password_follows_hash() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = test_support::user(&db.pool, "johndoe").await;
        let project = test_support::project(&db.pool, owner.id, "sampleapp").await;
        assert!(!project.needs_password());
        Project::set_password(&db.pool, project.id, Some("hash")).await.unwrap();
        let project = Project::find_by_id(&db.pool, project.id).await.unwrap().unwrap();
        assert!(project.needs_password());
    }
}
