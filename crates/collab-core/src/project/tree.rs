//! Assembles the nested task tree returned by the project detail view.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use collab_db::models::{Task, TaskDependency};

/// A task with its dependency ids and populated subtasks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    #[serde(flatten)]
    pub task: Task,
    pub dependencies: Vec<Uuid>,
    pub subtasks: Vec<TaskNode>,
}

/// Build the tree for one project.
///
/// `tasks` are all of the project's tasks at every depth, `top_level` the
/// project's ordered top-level list. Parentless tasks missing from that list
/// are appended after it in position order.
pub fn build_task_tree(
    tasks: Vec<Task>,
    edges: Vec<TaskDependency>,
    top_level: &[Uuid],
) -> Vec<TaskNode> {
    let mut dependencies: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges {
        dependencies.entry(edge.task_id).or_default().push(edge.depends_on);
    }

    let mut children: HashMap<Uuid, Vec<Task>> = HashMap::new();
    let mut roots: HashMap<Uuid, Task> = HashMap::new();
    let mut stray_roots = Vec::new();
    for task in tasks {
        match task.parent_id {
            Some(parent) => children.entry(parent).or_default().push(task),
            None if top_level.contains(&task.id) => {
                roots.insert(task.id, task);
            }
            None => stray_roots.push(task),
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|t| t.position);
    }
    stray_roots.sort_by_key(|t| t.position);

    top_level
        .iter()
        .filter_map(|id| roots.remove(id))
        .chain(stray_roots)
        .map(|task| attach(task, &mut children, &mut dependencies))
        .collect()
}

fn attach(
    task: Task,
    children: &mut HashMap<Uuid, Vec<Task>>,
    dependencies: &mut HashMap<Uuid, Vec<Uuid>>,
) -> TaskNode {
    let subtasks = children
        .remove(&task.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| attach(child, children, dependencies))
        .collect();

    TaskNode {
        dependencies: dependencies.remove(&task.id).unwrap_or_default(),
        subtasks,
        task,
    }
}
