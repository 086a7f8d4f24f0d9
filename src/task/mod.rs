//! Task module - the task record, the shared board, and the per-worker lifecycle.
//!
//! - [`Task`] is the wire/record type for a unit of work.
//! - [`TaskBoard`] reads and writes every worker's queue (coordinator view).
//! - [`TaskLifecycle`] owns one worker's queue → active → terminal transitions.

mod board;
mod lifecycle;
pub mod task;

pub use board::{BoardOverview, TaskBoard, TaskSummary, WorkerSummary};
pub use lifecycle::{ActiveTask, Finalization, Outcome, TaskLifecycle, Transition};
pub use task::{Task, TaskError, TaskStatus};
