//! Tool-calling orchestrator
//!
//! Drives a model through tool calls until it produces a grounded answer,
//! waiting on asynchronous tasks the answer refers to.

pub mod config;
pub mod engine;
pub mod session;
pub mod tasks;

pub use config::OrchestratorConfig;
pub use engine::{Orchestrator, OrchestratorOutcome, Termination, TransportFactory};
pub use session::{DebugEvent, DebugKind, PendingTask, Session, TaskStatus};
pub use tasks::{TaskDetector, TaskRef};
