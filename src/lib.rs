//! # HIVE Worker
//!
//! Autonomous task worker ("drone") for a HIVE multi-agent setup.
//!
//! A worker polls its own queue on a shared store, moves one task at a time
//! into its active slot, and drives a language model with a small set of
//! workspace tools until the model ends its turn. The outcome lands in the
//! completed or failed index and the loop picks up the next task.
//!
//! ## Architecture
//!
//! ```text
//!    ┌──────────────┐   dequeue / finalize   ┌──────────────────┐
//!    │    Worker    │ ─────────────────────► │  TaskLifecycle   │
//!    │  (poll loop) │                        │  (queue → active │
//!    └──────┬───────┘                        │   → terminal)    │
//!           │ run(task)                      └────────┬─────────┘
//!           ▼                                         │
//!    ┌──────────────┐   send(history, tools)          ▼
//!    │  AgentLoop   │ ──────────────► Backend   ┌───────────┐
//!    │              │                 (api /    │ TaskStore │
//!    │              │ ──► ToolRegistry cli /    │ (sqlite / │
//!    └──────────────┘     (files, bash, bedrock)│  memory)  │
//!                          search, hive_*)      └───────────┘
//! ```
//!
//! ## Modules
//! - `backend`: model transports behind one `Backend` trait
//! - `tools`: tool registry, path resolution and the built-in tools
//! - `agent`: the per-task tool-use loop
//! - `task`: task records, the shared board and the per-worker lifecycle
//! - `store`: atomic list/set/hash primitives over SQLite or memory
//! - `activity`: the per-task activity log
//! - `worker`: the long-running poll loop

pub mod activity;
pub mod agent;
pub mod backend;
pub mod config;
pub mod store;
pub mod task;
pub mod tools;
pub mod worker;

pub use config::Config;
