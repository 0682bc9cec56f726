use db::models::{
    project::Project,
    task::Task,
    task_run::TaskRun,
    user::{User, UserTaskRunCount},
};
use serde::Serialize;
use sqlx::SqlitePool;
use ts_rs::TS;

use crate::services::scheduler::overall_progress;

const TOP_CONTRIBUTORS: i64 = 10;

#[derive(Debug, Clone, Serialize, TS)]
pub struct ProjectStats {
    pub n_tasks: i64,
    pub n_completed_tasks: i64,
    pub n_task_runs: i64,
    pub overall_progress: i64,
    pub n_anonymous_volunteers: i64,
    pub n_authenticated_volunteers: i64,
    pub top_contributors: Vec<UserTaskRunCount>,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct GlobalStats {
    pub n_users: i64,
    pub n_projects: i64,
    pub n_tasks: i64,
    pub n_task_runs: i64,
    pub n_anonymous_contributors: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct LeaderboardEntry {
    pub rank: usize,
    #[serde(flatten)]
    #[ts(flatten)]
    pub user: UserTaskRunCount,
}

pub async fn project_stats(pool: &SqlitePool, project: &Project) -> Result<ProjectStats, sqlx::Error> {
    let volunteers = TaskRun::volunteers_by_project(pool, project.id).await?;
    Ok(ProjectStats {
        n_tasks: Task::count_by_project(pool, project.id).await?,
        n_completed_tasks: Task::count_completed_by_project(pool, project.id).await?,
        n_task_runs: TaskRun::count_by_project(pool, project.id).await?,
        overall_progress: overall_progress(pool, project.id).await?,
        n_anonymous_volunteers: volunteers.n_anonymous,
        n_authenticated_volunteers: volunteers.n_authenticated,
        top_contributors: User::top_contributors(pool, project.id, TOP_CONTRIBUTORS).await?,
    })
}

pub async fn global_stats(pool: &SqlitePool) -> Result<GlobalStats, sqlx::Error> {
    Ok(GlobalStats {
        n_users: User::count(pool).await?,
        n_projects: Project::count(pool).await?,
        n_tasks: Task::count(pool).await?,
        n_task_runs: TaskRun::count(pool).await?,
        n_anonymous_contributors: TaskRun::count_anonymous_contributors(pool).await?,
    })
}

pub async fn leaderboard(pool: &SqlitePool, limit: i64) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
    Ok(User::leaderboard(pool, limit)
        .await?
        .into_iter()
        .enumerate()
        .map(|(i, user)| LeaderboardEntry { rank: i + 1, user })
        .collect())
}
