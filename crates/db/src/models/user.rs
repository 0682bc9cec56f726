use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool, types::Json};
use ts_rs::TS;

const USER_COLUMNS: &str = "id, name, fullname, email_addr, passwd_hash, api_key, admin, ckan_api, info, created_at";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub fullname: String,
    pub email_addr: String,
    #[serde(skip_serializing)]
    #[ts(skip)]
    pub passwd_hash: Option<String>, // None for accounts created through a third-party sign-in
    pub api_key: String,
    pub admin: bool,
    pub ckan_api: Option<String>,
    #[sqlx(json)]
    #[ts(type = "Record<string, unknown>")]
    pub info: Value,
    pub created_at: DateTime<Utc>,
}

/// What other people get to see about a user.
#[derive(Debug, Clone, Serialize, TS)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub fullname: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            fullname: user.fullname.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, TS)]
pub struct UserTaskRunCount {
    pub id: i64,
    pub name: String,
    pub fullname: String,
    pub n_task_runs: i64,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateUser {
    pub name: String,
    pub fullname: String,
    pub email_addr: String,
    pub passwd_hash: Option<String>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    pub info: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateProfile {
    pub name: String,
    pub fullname: String,
    pub email_addr: String,
}

impl User {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE name = ?"))
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_email(
        pool: &SqlitePool,
        email_addr: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email_addr = ?"
        ))
        .bind(email_addr)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_api_key(
        pool: &SqlitePool,
        api_key: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE api_key = ?"))
            .bind(api_key)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id ASC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await
    }

    /// Inserts a user with a fresh API key. The very first account becomes admin.
    pub async fn create(pool: &SqlitePool, data: &CreateUser) -> Result<Self, sqlx::Error> {
        let info = data.info.clone().unwrap_or_else(|| serde_json::json!({}));
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, fullname, email_addr, passwd_hash, api_key, admin, info)
             VALUES (?, ?, ?, ?, ?, (SELECT COUNT(*) = 0 FROM users), ?)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&data.name)
        .bind(&data.fullname)
        .bind(&data.email_addr)
        .bind(&data.passwd_hash)
        .bind(utils::new_api_key())
        .bind(Json(&info))
        .fetch_one(pool)
        .await
    }

    pub async fn update_profile(
        pool: &SqlitePool,
        id: i64,
        data: &UpdateProfile,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = ?, fullname = ?, email_addr = ? WHERE id = ?
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&data.name)
        .bind(&data.fullname)
        .bind(&data.email_addr)
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn update_password(
        pool: &SqlitePool,
        id: i64,
        passwd_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET passwd_hash = ? WHERE id = ?")
            .bind(passwd_hash)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_ckan_api(
        pool: &SqlitePool,
        id: i64,
        ckan_api: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET ckan_api = ? WHERE id = ?")
            .bind(ckan_api)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn reset_api_key(pool: &SqlitePool, id: i64) -> Result<String, sqlx::Error> {
        let api_key = utils::new_api_key();
        sqlx::query("UPDATE users SET api_key = ? WHERE id = ?")
            .bind(&api_key)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(api_key)
    }

    pub async fn set_admin(pool: &SqlitePool, id: i64, admin: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET admin = ? WHERE id = ?")
            .bind(admin)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Users ordered by the number of task runs they submitted.
    pub async fn leaderboard(
        pool: &SqlitePool,
        limit: i64,
    ) -> Result<Vec<UserTaskRunCount>, sqlx::Error> {
        sqlx::query_as::<_, UserTaskRunCount>(
            "SELECT u.id, u.name, u.fullname, COUNT(r.id) AS n_task_runs
               FROM users u
               LEFT JOIN task_runs r ON r.user_id = u.id
              GROUP BY u.id
              ORDER BY n_task_runs DESC, u.id ASC
              LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Top contributors of a single project.
    pub async fn top_contributors(
        pool: &SqlitePool,
        project_id: i64,
        limit: i64,
    ) -> Result<Vec<UserTaskRunCount>, sqlx::Error> {
        sqlx::query_as::<_, UserTaskRunCount>(
            "SELECT u.id, u.name, u.fullname, COUNT(r.id) AS n_task_runs
               FROM users u
               JOIN task_runs r ON r.user_id = u.id
              WHERE r.project_id = ?
              GROUP BY u.id
              ORDER BY n_task_runs DESC, u.id ASC
              LIMIT ?",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub fn info_str(&self, key: &str) -> Option<&str> {
        self.info.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DBService, models::test_support};

    #[tokio::test]
    async fn first_user_is_admin() {
        let db = DBService::new_in_memory().await.unwrap();
        let first = test_support::user(&db.pool, "johndoe").await;
        let second = test_support::user(&db.pool, "tester").await;
        assert!(first.admin);
        assert!(!second.admin);
        assert_ne!(first.api_key, second.api_key);
        assert_eq!(User::count(&db.pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn lookups() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = test_support::user(&db.pool, "johndoe").await;
        let by_email = User::find_by_email(&db.pool, "johndoe@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
        let by_key = User::find_by_api_key(&db.pool, &user.api_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.name, "johndoe");
        assert!(User::find_by_name(&db.pool, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let db = DBService::new_in_memory().await.unwrap();
        test_support::user(&db.pool, "johndoe").await;
        let err = User::create(
            &db.pool,
            &CreateUser {
                name: "other".into(),
                fullname: "Other".into(),
                email_addr: "johndoe@example.com".into(),
                passwd_hash: None,
                info: None,
            },
        )
        .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn reset_api_key_changes_it() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = test_support::user(&db.pool, "johndoe").await;
        let key = User::reset_api_key(&db.pool, user.id).await.unwrap();
        assert_ne!(key, user.api_key);
        let reloaded = User::find_by_id(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.api_key, key);
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: 1,
            name: "johndoe".into(),
            fullname: "John Doe".into(),
            email_addr: "johndoe@example.com".into(),
            passwd_hash: Some("secret".into()),
            api_key: "key".into(),
            admin: false,
            ckan_api: None,
            info: serde_json::json!({}),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwd_hash").is_none());
    }
}
