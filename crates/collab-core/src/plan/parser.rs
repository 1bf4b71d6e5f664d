//! Plan parser: turns the completion payload into an ordered tree of
//! [`TaskSpec`].
//!
//! Three top-level shapes are accepted: a bare array of tasks, an object with
//! a `tasks` array, or an object with a `roadmap` array. Anything else is a
//! [`PlanFormatError`]; an empty task array is a valid, empty plan.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Deepest subtask nesting accepted from a generated plan.
pub const MAX_DEPTH: usize = 16;

/// One task of a generated plan, with its nested subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSpec {
    pub name: String,
    /// Duration in whole days, when the model gave a usable number.
    pub duration: Option<i32>,
    /// Names of tasks that must precede this one: siblings first, then any
    /// task materialized earlier in the same plan.
    pub dependencies: Vec<String>,
    pub subtasks: Vec<TaskSpec>,
}

impl TaskSpec {
    /// Number of specs in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.subtasks.iter().map(TaskSpec::count).sum::<usize>()
    }
}

#[derive(Debug, Error)]
pub enum PlanFormatError {
    #[error("plan is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(
        "plan has no task list (expected an array, or an object with a \"tasks\" or \"roadmap\" array)"
    )]
    UnrecognizedShape,

    #[error("task at {path} is not an object")]
    TaskNotObject { path: String },

    #[error("task at {path} has no name")]
    MissingName { path: String },

    #[error("\"subtasks\" of task at {path} is not an array")]
    SubtasksNotArray { path: String },

    #[error("plan nests subtasks deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// Parse a raw completion payload into the plan's top-level task specs.
pub fn parse_plan(raw: &str) -> Result<Vec<TaskSpec>, PlanFormatError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;

    let tasks = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => match (obj.get("tasks"), obj.get("roadmap")) {
            (Some(Value::Array(items)), _) => items,
            (_, Some(Value::Array(items))) => items,
            _ => return Err(PlanFormatError::UnrecognizedShape),
        },
        _ => return Err(PlanFormatError::UnrecognizedShape),
    };

    parse_batch(tasks, "tasks", 0)
}

/// Models in JSON mode occasionally still wrap the document in a markdown
/// fence.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_batch(items: &[Value], path: &str, depth: usize) -> Result<Vec<TaskSpec>, PlanFormatError> {
    if depth > MAX_DEPTH {
        return Err(PlanFormatError::TooDeep);
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let item_path = format!("{path}[{i}]");
            let obj = item.as_object().ok_or_else(|| PlanFormatError::TaskNotObject {
                path: item_path.clone(),
            })?;
            parse_task(obj, &item_path, depth)
        })
        .collect()
}

fn parse_task(obj: &Map<String, Value>, path: &str, depth: usize) -> Result<TaskSpec, PlanFormatError> {
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| PlanFormatError::MissingName {
            path: path.to_string(),
        })?;

    let dependencies = match obj.get("dependencies") {
        Some(Value::Array(deps)) => deps
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect(),
        // A lone string is treated as a one-element list.
        Some(Value::String(dep)) if !dep.trim().is_empty() => vec![dep.trim().to_string()],
        _ => Vec::new(),
    };

    let subtasks = match obj.get("subtasks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => parse_batch(items, &format!("{path}.subtasks"), depth + 1)?,
        Some(_) => {
            return Err(PlanFormatError::SubtasksNotArray {
                path: path.to_string(),
            });
        }
    };

    Ok(TaskSpec {
        name: name.to_string(),
        duration: obj.get("duration").and_then(parse_duration),
        dependencies,
        subtasks,
    })
}

/// Days as a non-negative whole number. Accepts numbers and strings that
/// start with a number ("3", "2.5", "4 days").
fn parse_duration(value: &Value) -> Option<i32> {
    let days = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(s.len());
            s[..end].parse::<f64>().ok()?
        }
        _ => return None,
    };

    if !days.is_finite() || days < 0.0 || days > i32::MAX as f64 {
        return None;
    }
    Some(days.round() as i32)
}
