//! # Aragog AMQP
//! Request/reply dispatch of crawl tasks over RabbitMQ: producers publish
//! prioritized tasks, workers answer them under a deadline, and replies are
//! correlated back to their request id.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod log_context;
pub mod management;
pub mod producer;
pub mod task;
pub mod topology;
pub mod validator;
pub mod worker;

// Re-export key components for easy access
pub use config::{connect, ClientOptions, ConnectionParams, WorkerConfig, DEFAULT_EXCHANGE};
pub use dispatch::{Aragog, CompletionStream, QueueCompletion, TaskType};
pub use error::{AragogError, Result};
pub use handler::{HandlerError, TaskHandler};
pub use log_context::LogContext;
pub use management::{ConsumerInfo, ManagementApi, QueueInfo};
pub use producer::{Producer, ReplySubscription, SubscriptionHandle, TaskCompletion};
pub use task::{
    Auth, Cookie, ErrorCode, Method, RequireHeaders, ResultData, SameSite, Task, TaskData,
    TaskEnvelope, TaskResult, WorkerTask,
};
pub use topology::{QueueBinding, MAX_PRIORITY};
pub use worker::Worker;
