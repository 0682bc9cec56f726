use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use ts_rs::TS;

use super::filters::{FieldFilter, push_filters};

pub const DEFAULT_CATEGORY_NAME: &str = "Thinking";
pub const DEFAULT_CATEGORY_SHORT_NAME: &str = "thinking";

/// Columns the REST list endpoint may filter on.
pub const FILTERABLE: &[&str] = &["id", "name", "short_name"];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateCategory {
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub description: Option<String>,
}

impl Category {
    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "SELECT id, name, short_name, description, created_at FROM categories ORDER BY name ASC",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "SELECT id, name, short_name, description, created_at FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_short_name(
        pool: &SqlitePool,
        short_name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "SELECT id, name, short_name, description, created_at FROM categories WHERE short_name = ?",
        )
        .bind(short_name)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_filtered(
        pool: &SqlitePool,
        filters: &[FieldFilter],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, name, short_name, description, created_at FROM categories WHERE 1 = 1",
        );
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        qb.build_query_as::<Category>().fetch_all(pool).await
    }

    pub async fn create(pool: &SqlitePool, data: &CreateCategory) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, short_name, description) VALUES (?, ?, ?)
             RETURNING id, name, short_name, description, created_at",
        )
        .bind(&data.name)
        .bind(&data.short_name)
        .bind(&data.description)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        data: &UpdateCategory,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "UPDATE categories
                SET name = COALESCE(?, name),
                    short_name = COALESCE(?, short_name),
                    description = COALESCE(?, description)
              WHERE id = ?
             RETURNING id, name, short_name, description, created_at",
        )
        .bind(&data.name)
        .bind(&data.short_name)
        .bind(&data.description)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// The first category, creating the default one when the table is empty.
    pub async fn ensure_default(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        if let Some(category) = sqlx::query_as::<_, Category>(
            "SELECT id, name, short_name, description, created_at FROM categories ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(pool)
        .await?
        {
            return Ok(category);
        }
        tracing::info!("Creating default category '{}'", DEFAULT_CATEGORY_NAME);
        Self::create(
            pool,
            &CreateCategory {
                name: DEFAULT_CATEGORY_NAME.to_string(),
                short_name: DEFAULT_CATEGORY_SHORT_NAME.to_string(),
                description: "Volunteer Thinking projects".to_string(),
            },
        )
        .await
    }
}
