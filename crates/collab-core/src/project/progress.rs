use serde::Serialize;

use collab_db::queries::tasks::ProjectProgress;

/// Percentage of completed tasks, rounded to the nearest whole number.
/// A project with no top-level tasks is at 0.
pub fn progress_percent(completed: i64, total: i64) -> u8 {
    if total <= 0 {
        return 0;
    }
    let completed = completed.clamp(0, total);
    ((completed as f64 * 100.0 / total as f64).round()) as u8
}

/// Status counts over the top-level task list, plus the completion
/// percentage shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub todo: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub blocked: i64,
    pub total: i64,
    pub percent: u8,
}

impl From<ProjectProgress> for ProgressSummary {
    fn from(p: ProjectProgress) -> Self {
        Self {
            percent: progress_percent(p.completed, p.total),
            todo: p.todo,
            in_progress: p.in_progress,
            completed: p.completed,
            blocked: p.blocked,
            total: p.total,
        }
    }
}
