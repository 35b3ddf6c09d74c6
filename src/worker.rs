//! The task worker: consumes a priority task queue, runs the handler under a
//! deadline and replies to the producer.

use crate::config::WorkerConfig;
use crate::error::{AragogError, Result};
use crate::handler::TaskHandler;
use crate::log_context::LogContext;
use crate::task::{now_millis, ErrorCode, Task, TaskResult, WorkerTask};
use crate::topology;
use crate::validator;
use futures_util::TryStreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Consumes tasks from one queue and answers them with a [`TaskHandler`].
///
/// At most `prefetch_count` deliveries are outstanding at once; the broker
/// withholds the rest, highest priority first.
pub struct Worker<H: TaskHandler> {
    connection: Arc<Connection>,
    handler: Arc<H>,
    context: Option<Arc<H::Context>>,
    config: WorkerConfig,
    channel: Option<Channel>,
    consuming: AtomicBool,
    log: LogContext,
}

impl<H: TaskHandler + 'static> Worker<H> {
    pub fn new(connection: Arc<Connection>, config: WorkerConfig, handler: Arc<H>) -> Self {
        let log = LogContext::new("aragog::worker").tag(&config.queue_name);
        Self {
            connection,
            handler,
            context: None,
            config,
            channel: None,
            consuming: AtomicBool::new(false),
            log,
        }
    }

    /// Passes an existing execution context to every handler invocation.
    pub fn with_context(mut self, context: Arc<H::Context>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Opens the worker's channel, declares the task queue and applies the prefetch bound.
    pub async fn init(&mut self) -> Result<()> {
        if self.channel.is_some() {
            return Ok(());
        }
        self.log.debug(format_args!("create channel..."));
        let channel = self.connection.create_channel().await?;
        topology::declare_task_queue(
            &channel,
            &self.config.exchange_name,
            &self.config.queue_name,
            &self.log,
        )
        .await?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;
        self.log.info(format_args!(
            "QoS prefetch count set to {}",
            self.config.prefetch_count
        ));

        self.channel = Some(channel);
        Ok(())
    }

    /// Consumes deliveries until the consumer is cancelled or the channel fails.
    ///
    /// Handler failures, timeouts and reply errors reject the message and are
    /// passed to `on_error`; they never end the loop. Only transport errors on
    /// the consumer itself are returned.
    ///
    /// A worker runs one consumer at a time: a call made while another is still
    /// running fails with [`AragogError::AlreadyConsuming`].
    pub async fn consume<F>(&self, on_error: F) -> Result<()>
    where
        F: Fn(AragogError) + Send + Sync + 'static,
    {
        let channel = self.channel.as_ref().ok_or(AragogError::Uninitialized)?;
        let _slot = ConsumeSlot::claim(&self.consuming)?;

        let consumer = channel
            .basic_consume(
                &self.config.queue_name,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        self.log.info(format_args!(
            "consumer '{}' started with handler '{}', waiting for tasks...",
            consumer.tag().as_str(),
            self.handler.handler_name()
        ));

        let processor = DeliveryProcessor {
            channel: channel.clone(),
            handler: self.handler.clone(),
            context: self.context.clone(),
            message_timeout: self.config.message_timeout,
            log: self.log.clone(),
        };
        let on_error = Arc::new(on_error);

        consumer
            .try_for_each_concurrent(None, move |delivery| {
                let processor = processor.clone();
                let on_error = on_error.clone();
                async move {
                    processor.process(delivery, on_error.as_ref()).await;
                    Ok::<(), lapin::Error>(())
                }
            })
            .await?;

        self.log.info(format_args!("consumer stopped"));
        Ok(())
    }
}

/// Marks a worker as consuming until dropped, including when the consume
/// future is dropped mid-flight.
struct ConsumeSlot<'a>(&'a AtomicBool);

impl<'a> ConsumeSlot<'a> {
    fn claim(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(AragogError::AlreadyConsuming);
        }
        Ok(Self(flag))
    }
}

impl Drop for ConsumeSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct DeliveryProcessor<H: TaskHandler> {
    channel: Channel,
    handler: Arc<H>,
    context: Option<Arc<H::Context>>,
    message_timeout: Duration,
    log: LogContext,
}

impl<H: TaskHandler> Clone for DeliveryProcessor<H> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            handler: self.handler.clone(),
            context: self.context.clone(),
            message_timeout: self.message_timeout,
            log: self.log.clone(),
        }
    }
}

impl<H: TaskHandler + 'static> DeliveryProcessor<H> {
    async fn process<F: Fn(AragogError)>(&self, delivery: Delivery, on_error: &F) {
        let delivery_tag = delivery.delivery_tag;
        if let Err(error) = self.handle(&delivery).await {
            self.log.error(format_args!(
                "task execution failed, rejecting delivery {}: {}",
                delivery_tag, error
            ));
            if let Err(e) = delivery.reject(BasicRejectOptions { requeue: false }).await {
                self.log.error(format_args!("failed to reject delivery {}: {}", delivery_tag, e));
            }
            on_error(error);
        }
    }

    /// Runs one delivery to completion: on success the reply has been sent and
    /// the delivery acked. Any error leaves the delivery for the caller to reject.
    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let properties = &delivery.properties;
        let correlation_id = properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
            .ok_or(AragogError::MissingProperty("correlationId"))?;
        let reply_to = properties
            .reply_to()
            .as_ref()
            .map(|queue| queue.as_str().to_string())
            .ok_or(AragogError::MissingProperty("replyTo"))?;

        let body: Value = serde_json::from_slice(&delivery.data)?;
        let app_name = body
            .get("appName")
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        let log = self.log.tag(app_name).tag(&correlation_id);
        log.info(format_args!("received: {}", body));

        let started = now_millis();
        let result = match prepare_task(body, &correlation_id) {
            Ok(task) => {
                run_with_deadline(
                    self.handler.clone(),
                    task,
                    self.context.clone(),
                    self.message_timeout,
                )
                .await?
            }
            Err(error) => {
                log.warn(format_args!("invalid task: {}", error));
                TaskResult::failure(ErrorCode::InvalidParams, error.to_string(), started)
            }
        };

        let payload = serde_json::to_vec(&result)?;
        log.info(format_args!("reply to {}", reply_to));
        self.channel
            .basic_publish(
                "",
                &reply_to,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_correlation_id(correlation_id.into()),
            )
            .await?;
        delivery.ack(BasicAckOptions::default()).await?;
        log.debug(format_args!("reply success"));
        Ok(())
    }
}

/// Checks a received task body and tags it with its correlation id.
fn prepare_task(body: Value, task_id: &str) -> Result<WorkerTask> {
    validator::check_task_input(&body)?;
    let task: Task =
        serde_json::from_value(body).map_err(|e| AragogError::Validation(e.to_string()))?;
    Ok(WorkerTask {
        task_id: task_id.to_string(),
        task,
    })
}

/// Runs the handler on its own task and waits at most `deadline` for it.
///
/// On timeout the handler task is detached and keeps running; its result is
/// dropped. A panicking handler is reported as a handler error.
async fn run_with_deadline<H: TaskHandler + 'static>(
    handler: Arc<H>,
    task: WorkerTask,
    context: Option<Arc<H::Context>>,
    deadline: Duration,
) -> Result<TaskResult> {
    let execution = tokio::spawn(async move { handler.handle_task(task, context).await });
    match tokio::time::timeout(deadline, execution).await {
        Ok(Ok(Ok(result))) => Ok(result),
        Ok(Ok(Err(error))) => Err(AragogError::Handler(error)),
        Ok(Err(join_error)) => Err(AragogError::Handler(Box::new(join_error))),
        Err(_) => Err(AragogError::Timeout {
            millis: deadline.as_millis() as u64,
        }),
    }
}
