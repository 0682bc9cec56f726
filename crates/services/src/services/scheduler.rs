use db::models::{
    contributor::Contributor,
    project::Project,
    task::{CandidateOrder, Task, TaskState},
    tutorial_view::TutorialView,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use strum_macros::{Display, EnumString, VariantNames};
use ts_rs::TS;

/// Strategy used to pick the next task for a contributor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerKind {
    /// Depth first: highest priority, then oldest task.
    Default,
    /// Spread answers: the task with the fewest runs first.
    BreadthFirst,
    Random,
}

impl SchedulerKind {
    /// The project's `info.sched`, falling back to `fallback` when unset or unknown.
    pub fn for_project(project: &Project, fallback: SchedulerKind) -> Self {
        project
            .sched()
            .and_then(|name| name.parse().ok())
            .unwrap_or(fallback)
    }
}

/// What a contributor gets when asking for work.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextTask {
    /// First visit to a project with a tutorial.
    Tutorial { tutorial: String },
    Task { task: Task },
    /// Nothing left for this contributor. `needs_volunteers` is true while
    /// the project is below 100% so the client can ask them to spread the word.
    Exhausted {
        overall_progress: i64,
        needs_volunteers: bool,
    },
}

/// Next task for `contributor`, skipping `offset` candidates. `None` when
/// the contributor has answered everything still open.
pub async fn new_task(
    pool: &SqlitePool,
    project: &Project,
    contributor: &Contributor,
    kind: SchedulerKind,
    offset: i64,
) -> Result<Option<Task>, sqlx::Error> {
    let task = match kind {
        SchedulerKind::Default => {
            Task::find_candidates(
                pool,
                project.id,
                contributor,
                CandidateOrder::PriorityFirst,
                Some(1),
                offset,
            )
            .await?
            .pop()
        }
        SchedulerKind::BreadthFirst => {
            Task::find_candidates(
                pool,
                project.id,
                contributor,
                CandidateOrder::FewestRunsFirst,
                Some(1),
                offset,
            )
            .await?
            .pop()
        }
        SchedulerKind::Random => {
            let candidates = Task::find_candidates(
                pool,
                project.id,
                contributor,
                CandidateOrder::PriorityFirst,
                None,
                0,
            )
            .await?;
            candidates.choose(&mut rand::thread_rng()).cloned()
        }
    };
    tracing::debug!(
        "Scheduler {} picked {:?} for {} on project {}",
        kind,
        task.as_ref().map(|t| t.id),
        contributor.key(),
        project.short_name
    );
    Ok(task)
}

/// `new_task` plus the tutorial on a contributor's first visit and the
/// progress report once nothing is left.
pub async fn next_for_contributor(
    pool: &SqlitePool,
    project: &Project,
    contributor: &Contributor,
    fallback: SchedulerKind,
    offset: i64,
) -> Result<NextTask, sqlx::Error> {
    if let Some(tutorial) = project.tutorial()
        && !TutorialView::has_seen(pool, project.id, contributor).await?
    {
        TutorialView::record(pool, project.id, contributor).await?;
        return Ok(NextTask::Tutorial {
            tutorial: tutorial.to_string(),
        });
    }

    let kind = SchedulerKind::for_project(project, fallback);
    match new_task(pool, project, contributor, kind, offset).await? {
        Some(task) => Ok(NextTask::Task { task }),
        None => {
            let overall_progress = overall_progress(pool, project.id).await?;
            Ok(NextTask::Exhausted {
                overall_progress,
                needs_volunteers: overall_progress < 100,
            })
        }
    }
}

/// Percentage of completed tasks in the project.
pub async fn overall_progress(pool: &SqlitePool, project_id: i64) -> Result<i64, sqlx::Error> {
    let n_tasks = Task::count_by_project(pool, project_id).await?;
    if n_tasks == 0 {
        return Ok(0);
    }
    let completed = Task::count_completed_by_project(pool, project_id).await?;
    Ok(completed * 100 / n_tasks)
}

/// Recomputes a task's state after a task run was added.
pub async fn update_task_state(pool: &SqlitePool, task: &Task) -> Result<TaskState, sqlx::Error> {
    let state = Task::refresh_state(pool, task.id).await?;
    if state != task.state {
        tracing::info!("Task {} is now {:?}", task.id, state);
    }
    Ok(state)
}
