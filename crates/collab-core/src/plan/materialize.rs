//! Tree materializer: persists a parsed plan as task records.
//!
//! Each sibling batch is written in two passes. The first pass creates every
//! task of the batch so that all sibling names are known. The second pass
//! walks the batch in order, resolving each task's dependency names and then
//! materializing that task's subtasks before moving on to the next sibling.
//! The walk keeps one [`Frame`] per open batch on an explicit stack.
//!
//! A dependency name resolves against the task's own batch first and then
//! against every task created earlier in the same plan. Names that match
//! neither are dropped.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use collab_db::models::TaskStatus;
use collab_db::queries::tasks::{self, NewTask};

use super::parser::TaskSpec;

/// Values for one task row created by the materializer.
#[derive(Debug, Clone, Copy)]
pub struct TaskDraft<'a> {
    pub name: &'a str,
    pub duration: Option<i32>,
    pub parent_id: Option<Uuid>,
    /// Index within the sibling batch.
    pub position: i32,
}

/// Where materialized tasks are written.
#[async_trait]
pub trait TaskSink: Send {
    /// Create a task with no dependencies and return its id.
    async fn create_task(&mut self, draft: &TaskDraft<'_>) -> Result<Uuid>;

    /// Replace the dependency list of an already created task.
    async fn set_dependencies(&mut self, task_id: Uuid, depends_on: &[Uuid]) -> Result<()>;
}

/// A task record produced by [`materialize_plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedTask {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub dependencies: Vec<Uuid>,
    pub subtasks: Vec<Uuid>,
}

/// Name-to-id lookup. The materializer keeps one per sibling batch and one
/// for the whole plan.
#[derive(Debug, Default)]
pub struct NameIndex {
    ids: HashMap<String, Uuid>,
}

impl NameIndex {
    /// Register `name`. Returns `false` (and keeps the earlier id) when the
    /// name is already taken.
    pub fn insert(&mut self, name: &str, id: Uuid) -> bool {
        if self.ids.contains_key(name) {
            return false;
        }
        self.ids.insert(name.to_string(), id);
        true
    }

    pub fn get(&self, name: &str) -> Option<Uuid> {
        self.ids.get(name).copied()
    }

    /// Resolve dependency names for the task `own_id`, looking in `self`
    /// first and in `earlier` second. Unknown names and references to the
    /// task itself are dropped; the result has no duplicates and keeps
    /// first-seen order.
    pub fn resolve(&self, earlier: &NameIndex, own_id: Uuid, names: &[String]) -> Vec<Uuid> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            match self.get(name).or_else(|| earlier.get(name)) {
                Some(id) if id != own_id && !resolved.contains(&id) => resolved.push(id),
                Some(_) => {}
                None => debug!(dependency = %name, "dropping unresolved dependency"),
            }
        }
        resolved
    }
}

/// A sibling batch whose first pass is done.
struct Frame<'p> {
    specs: &'p [TaskSpec],
    /// Slot in the output of the batch's first task.
    first: usize,
    /// Next sibling awaiting its second pass.
    next: usize,
    siblings: NameIndex,
}

/// Persist `specs` through `sink` and return every created task, flattened
/// in creation order.
pub async fn materialize_plan<S>(sink: &mut S, specs: &[TaskSpec]) -> Result<Vec<MaterializedTask>>
where
    S: TaskSink + ?Sized,
{
    let mut created: Vec<MaterializedTask> = Vec::new();
    let mut generation = NameIndex::default();
    let mut stack: Vec<Frame<'_>> = Vec::new();

    if !specs.is_empty() {
        let frame = create_batch(sink, specs, None, &mut created, &mut generation).await?;
        stack.push(frame);
    }

    while let Some(frame) = stack.last_mut() {
        if frame.next == frame.specs.len() {
            stack.pop();
            continue;
        }

        let specs = frame.specs;
        let spec = &specs[frame.next];
        let slot = frame.first + frame.next;
        frame.next += 1;

        let id = created[slot].id;
        let deps = frame.siblings.resolve(&generation, id, &spec.dependencies);
        if !deps.is_empty() {
            sink.set_dependencies(id, &deps).await?;
        }
        created[slot].dependencies = deps;

        if !spec.subtasks.is_empty() {
            let child =
                create_batch(sink, &spec.subtasks, Some(slot), &mut created, &mut generation)
                    .await?;
            stack.push(child);
        }
    }

    Ok(created)
}

/// First pass over one sibling batch: create every task, index the names and
/// record the batch as the parent's subtasks.
async fn create_batch<'p, S>(
    sink: &mut S,
    specs: &'p [TaskSpec],
    parent: Option<usize>,
    created: &mut Vec<MaterializedTask>,
    generation: &mut NameIndex,
) -> Result<Frame<'p>>
where
    S: TaskSink + ?Sized,
{
    let parent_id = parent.map(|slot| created[slot].id);
    let first = created.len();
    let mut siblings = NameIndex::default();

    for (position, spec) in specs.iter().enumerate() {
        let id = sink
            .create_task(&TaskDraft {
                name: &spec.name,
                duration: spec.duration,
                parent_id,
                position: position as i32,
            })
            .await?;

        if !siblings.insert(&spec.name, id) {
            warn!(
                task = %spec.name,
                "duplicate sibling task name; dependencies resolve to the first one"
            );
        }
        generation.insert(&spec.name, id);

        created.push(MaterializedTask {
            id,
            name: spec.name.clone(),
            parent_id,
            dependencies: Vec::new(),
            subtasks: Vec::new(),
        });
    }

    if let Some(parent) = parent {
        created[parent].subtasks = created[first..].iter().map(|t| t.id).collect();
    }

    Ok(Frame {
        specs,
        first,
        next: 0,
        siblings,
    })
}

/// IDs of the tasks without a parent, in creation order.
pub fn top_level_ids(tasks: &[MaterializedTask]) -> Vec<Uuid> {
    tasks
        .iter()
        .filter(|t| t.parent_id.is_none())
        .map(|t| t.id)
        .collect()
}

// ---------------------------------------------------------------------------
// Postgres sink
// ---------------------------------------------------------------------------

/// [`TaskSink`] writing into the `tasks` table on one connection (usually an
/// open transaction).
pub struct PgTaskSink<'c> {
    conn: &'c mut PgConnection,
    project_id: Uuid,
    owner_id: Uuid,
    team_id: Option<Uuid>,
}

impl<'c> PgTaskSink<'c> {
    pub fn new(
        conn: &'c mut PgConnection,
        project_id: Uuid,
        owner_id: Uuid,
        team_id: Option<Uuid>,
    ) -> Self {
        Self {
            conn,
            project_id,
            owner_id,
            team_id,
        }
    }
}

#[async_trait]
impl TaskSink for PgTaskSink<'_> {
    async fn create_task(&mut self, draft: &TaskDraft<'_>) -> Result<Uuid> {
        let task = tasks::insert_task(
            &mut *self.conn,
            &NewTask {
                project_id: self.project_id,
                team_id: self.team_id,
                owner_id: self.owner_id,
                parent_id: draft.parent_id,
                position: draft.position,
                name: draft.name,
                duration: draft.duration,
                description: "",
                status: TaskStatus::Todo,
                priority: None,
                assignee: None,
            },
        )
        .await?;
        Ok(task.id)
    }

    async fn set_dependencies(&mut self, task_id: Uuid, depends_on: &[Uuid]) -> Result<()> {
        tasks::set_task_dependencies(self.conn, task_id, depends_on).await
    }
}
