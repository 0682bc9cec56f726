use sqlx::SqlitePool;

use super::contributor::Contributor;

/// Records which contributors were already shown a project's tutorial.
pub struct TutorialView;

impl TutorialView {
    pub async fn has_seen(
        pool: &SqlitePool,
        project_id: i64,
        contributor: &Contributor,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tutorial_views WHERE project_id = ? AND contributor = ?",
        )
        .bind(project_id)
        .bind(contributor.key())
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn record(
        pool: &SqlitePool,
        project_id: i64,
        contributor: &Contributor,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO tutorial_views (project_id, contributor) VALUES (?, ?)")
            .bind(project_id)
            .bind(contributor.key())
            .execute(pool)
            .await?;
        Ok(())
    }
}
