//! Exchange, task queue and reply queue declarations shared by both sides.

use crate::error::Result;
use crate::log_context::LogContext;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};

/// Highest message priority the task queues are declared with.
pub const MAX_PRIORITY: u8 = 10;

/// Identifies one logical task channel, e.g. the `headless` queue of app `crawler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub app: String,
    pub queue_name: String,
    pub exchange_name: String,
    /// Whether replies go to a shared durable queue rather than an exclusive one.
    pub durable: bool,
}

impl QueueBinding {
    pub fn new(
        app: impl Into<String>,
        queue_name: impl Into<String>,
        exchange_name: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            queue_name: queue_name.into(),
            exchange_name: exchange_name.into(),
            durable: false,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Key tasks are published with: `{app}.{queue}`.
    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.app, self.queue_name)
    }

    /// Key the task queue is bound with: `#.{queue}`, so every app's tasks
    /// for a queue converge on it.
    pub fn binding_key(&self) -> String {
        binding_key(&self.queue_name)
    }

    /// Name of the durable reply queue: `{app}_{queue}_result`.
    pub fn shared_reply_queue(&self) -> String {
        format!("{}_{}_result", self.app, self.queue_name)
    }
}

pub fn binding_key(queue_name: &str) -> String {
    format!("#.{}", queue_name)
}

fn priority_queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert("x-max-priority".into(), AMQPValue::LongInt(MAX_PRIORITY.into()));
    arguments
}

/// Declares the topic exchange and the durable priority task queue, and binds them.
pub(crate) async fn declare_task_queue(
    channel: &Channel,
    exchange_name: &str,
    queue_name: &str,
    log: &LogContext,
) -> Result<()> {
    log.debug(format_args!("assert exchange '{}'", exchange_name));
    channel
        .exchange_declare(
            exchange_name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;

    log.debug(format_args!("assert queue '{}'", queue_name));
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions { durable: true, ..Default::default() },
            priority_queue_arguments(),
        )
        .await?;

    let key = binding_key(queue_name);
    channel
        .queue_bind(
            queue_name,
            exchange_name,
            &key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    log.debug(format_args!(
        "queue '{}' bound to exchange '{}' with key '{}'",
        queue_name, exchange_name, key
    ));
    Ok(())
}

/// Declares the queue replies are delivered to and returns its name.
///
/// Non-durable bindings get an exclusive, server-named queue that disappears
/// with the connection; durable ones share `{app}_{queue}_result`.
pub(crate) async fn declare_reply_queue(
    channel: &Channel,
    binding: &QueueBinding,
    log: &LogContext,
) -> Result<String> {
    let queue = if binding.durable {
        channel
            .queue_declare(
                &binding.shared_reply_queue(),
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?
    } else {
        channel
            .queue_declare(
                "",
                QueueDeclareOptions { exclusive: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?
    };
    let name = queue.name().as_str().to_string();
    log.debug(format_args!("reply queue '{}' (durable: {})", name, binding.durable));
    Ok(name)
}
