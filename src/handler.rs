//! Defines the trait a worker invokes for every task it receives.

use crate::task::{TaskResult, WorkerTask};
use async_trait::async_trait;
use std::sync::Arc;

/// Error type task handlers fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes crawl tasks delivered to a [`Worker`](crate::worker::Worker).
///
/// A worker with a prefetch count above 1 calls `handle_task` concurrently, so
/// implementations must not rely on shared mutable state between calls.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// A pre-existing execution context handed to every invocation,
    /// e.g. a shared browser instance. Use `()` when there is none.
    type Context: Send + Sync + 'static;

    /// Runs a single task and produces the result to reply with.
    ///
    /// Returning `Err` rejects the message without a reply. A handler still
    /// running when the worker's message timeout elapses is abandoned, not
    /// cancelled; its eventual result is dropped.
    async fn handle_task(
        &self,
        task: WorkerTask,
        context: Option<Arc<Self::Context>>,
    ) -> Result<TaskResult, HandlerError>;

    /// A name for the handler, used for logging and identification.
    fn handler_name(&self) -> &str;
}
