//! Executor capability, registry and reference executors
//!
//! - [`Executor`] is the capability an execution backend implements
//! - [`ExecutorRegistry`] dispatches an action to the first matching executor
//! - [`HttpExecutor`] and [`CommandExecutor`] are reference backends

mod command;
mod context;
mod definition;
mod http;
mod registry;
mod result;

pub use command::CommandExecutor;
pub use context::ExecutionContext;
pub use definition::{ExecutionHooks, Executor};
pub use http::{HttpExecutor, HttpExecutorConfig};
pub use registry::{ExecutorRegistry, EXECUTOR_METADATA_KEY};
pub use result::{codes, ExecutionError, ExecutionResult, ExecutionStatus};
