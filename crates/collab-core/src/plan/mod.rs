//! AI plan pipeline: prompt and completion request, plan parsing, and tree
//! materialization.

pub mod generate;
pub mod materialize;
pub mod parser;

pub use generate::{
    ChatCompletionsClient, CompletionClient, GenerationError, LlmConfig, build_plan_prompt,
};
pub use materialize::{
    MaterializedTask, NameIndex, PgTaskSink, TaskDraft, TaskSink, materialize_plan, top_level_ids,
};
pub use parser::{PlanFormatError, TaskSpec, parse_plan};
