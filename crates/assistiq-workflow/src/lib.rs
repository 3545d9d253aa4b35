//! Durable workflow orchestration adapter.
//!
//! The triage pipelines run as named workflows on an external durable engine.
//! This crate fixes the contract that the rest of the system programs
//! against: typed start options with id-reuse semantics, server-side retry
//! policies expressed as [`ActivityOptions`], and a registry of workflow
//! handlers that re-inflate their JSON inputs into typed records.
//!
//! [`InProcessEngine`] is the bundled [`WorkflowClient`] binding. It gives
//! exactly-one-latest execution per workflow id, per-activity timeout and
//! retry, and cancellation, without durable replay. A durable engine
//! implements the same trait out of tree; callers fall back to direct
//! activity invocation when `start_workflow` fails.

pub mod client;
pub mod registry;
pub mod retry;
pub mod runner;

pub use client::{EngineError, IdReusePolicy, StartOptions, WorkflowClient, WorkflowHandle};
pub use registry::{WorkflowHandler, WorkflowRegistry};
pub use retry::{run_activity, ActivityFailure, ActivityOptions, RetryPolicy};
pub use runner::InProcessEngine;

/// Default task queue the workers listen on.
pub const DEFAULT_TASK_QUEUE: &str = "assistiq-task-queue";
