//! Domain logic for collab: the AI plan pipeline (prompt, parse,
//! materialize), project/task/team/user services and bearer tokens.

pub mod error;
pub mod plan;
pub mod project;
pub mod team;
pub mod token;
pub mod user;

pub use error::ProjectError;
