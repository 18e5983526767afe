//! Core data model: tasks and the dependency DAG.

pub mod dag;
pub mod task;

pub use dag::TaskDAG;
pub use task::{HandoffDocument, Task, TaskStatus, TaskUsage};
