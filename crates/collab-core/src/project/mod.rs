//! Project and task services used by the HTTP layer.

pub mod progress;
pub mod service;
pub mod tasks;
pub mod tree;

pub use progress::{ProgressSummary, progress_percent};
pub use service::{
    CreateProjectRequest, ProjectDetail, ProjectSummary, create_project, create_project_with_ai,
    delete_project, get_project_detail, list_projects, visible_project,
};
pub use tasks::{
    Assignee, CreateTaskRequest, TaskDetail, TaskEdit, create_task, get_task_detail, list_tasks,
    update_task,
};
pub use tree::{TaskNode, build_task_tree};
