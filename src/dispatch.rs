//! Client facade: routes tasks to per-type producers and merges their replies.

use crate::config::{self, ClientOptions, ConnectionParams};
use crate::error::{AragogError, Result};
use crate::log_context::LogContext;
use crate::management::{ConsumerInfo, ManagementApi, QueueInfo};
use crate::producer::{Producer, SubscriptionHandle, TaskCompletion};
use crate::task::TaskEnvelope;
use crate::topology::QueueBinding;
use crate::validator;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use lapin::Connection;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// The task queues a default client dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Render the page in a headless browser.
    Headless,
    /// Fetch the page source over HTTP.
    Source,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::Headless, TaskType::Source];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Headless => "headless",
            TaskType::Source => "source",
        }
    }
}

impl AsRef<str> for TaskType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = AragogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "headless" => Ok(TaskType::Headless),
            "source" => Ok(TaskType::Source),
            other => Err(AragogError::UnknownTaskType(other.to_string())),
        }
    }
}

/// A completion tagged with the queue whose producer received it.
#[derive(Debug)]
pub struct QueueCompletion {
    pub queue: String,
    pub completion: TaskCompletion,
}

/// All producers' reply streams merged into one.
pub struct CompletionStream {
    handles: Vec<SubscriptionHandle>,
    inner: BoxStream<'static, QueueCompletion>,
}

impl CompletionStream {
    /// Cancels every underlying reply consumer.
    pub async fn cancel(&self) -> Result<()> {
        for handle in &self.handles {
            handle.cancel().await?;
        }
        Ok(())
    }
}

impl Stream for CompletionStream {
    type Item = QueueCompletion;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

/// Routes crawl tasks to named task queues over one shared connection.
pub struct Aragog {
    connection: Arc<Connection>,
    producers: Vec<Producer>,
    management: Option<ManagementApi>,
    closed: AtomicBool,
    log: LogContext,
}

impl Aragog {
    /// Connects and initialises one producer per [`TaskType`].
    pub async fn connect(params: ConnectionParams, options: ClientOptions) -> Result<Self> {
        params.validate()?;
        let connection = Arc::new(config::connect(&params).await?);

        let mut producers = Vec::with_capacity(TaskType::ALL.len());
        for task_type in TaskType::ALL {
            let binding = QueueBinding::new(
                params.app_name.clone(),
                task_type.as_str(),
                options.exchange_name.clone(),
            )
            .durable(options.durable);
            let mut producer = Producer::new(connection.clone(), binding);
            producer.init().await?;
            producers.push(producer);
        }

        let management = ManagementApi::new(&params, &options)?;
        Ok(Self::from_producers(connection, producers, Some(management)))
    }

    /// Builds a facade over already initialised producers, one per queue name.
    pub fn from_producers(
        connection: Arc<Connection>,
        producers: Vec<Producer>,
        management: Option<ManagementApi>,
    ) -> Self {
        Self {
            connection,
            producers,
            management,
            closed: AtomicBool::new(false),
            log: LogContext::new("aragog::dispatch"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(AragogError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn producer(&self, task_type: &str) -> Result<&Producer> {
        self.producers
            .iter()
            .find(|producer| producer.binding().queue_name == task_type)
            .ok_or_else(|| AragogError::UnknownTaskType(task_type.to_string()))
    }

    /// Validates a task and publishes it to the queue named by `task_type`.
    pub async fn add_task(&self, task_type: impl AsRef<str>, envelope: &TaskEnvelope) -> Result<()> {
        self.ensure_open()?;
        validator::check_send_input(&serde_json::to_value(envelope)?)?;
        let task_type = task_type.as_ref();
        let producer = self.producer(task_type)?;
        producer.send(envelope).await?;
        self.log
            .tag(task_type)
            .debug(format_args!("task {} queued", envelope.id));
        Ok(())
    }

    /// Subscribes to every producer's replies and returns them as one stream.
    ///
    /// Only one merged stream is active at a time; calling this again before
    /// [`CompletionStream::cancel`] fails with [`AragogError::AlreadySubscribed`].
    /// If any producer cannot subscribe, the subscriptions already made are
    /// cancelled so a later call can start over.
    pub async fn on_completed(&self) -> Result<CompletionStream> {
        self.ensure_open()?;
        let mut handles = Vec::with_capacity(self.producers.len());
        let mut streams = Vec::with_capacity(self.producers.len());
        for producer in &self.producers {
            let queue = producer.binding().queue_name.clone();
            let subscription = match producer.subscribe().await {
                Ok(subscription) => subscription,
                Err(error) => {
                    self.unwind(&handles).await;
                    return Err(error);
                }
            };
            let (handle, completions) = subscription.into_parts();
            handles.push(handle);
            streams.push(
                completions
                    .map(move |completion| QueueCompletion {
                        queue: queue.clone(),
                        completion,
                    })
                    .boxed(),
            );
        }
        Ok(CompletionStream {
            handles,
            inner: stream::select_all(streams).boxed(),
        })
    }

    async fn unwind(&self, handles: &[SubscriptionHandle]) {
        for handle in handles {
            if let Err(e) = handle.cancel().await {
                self.log.warn(format_args!(
                    "failed to cancel reply consumer '{}': {}",
                    handle.consumer_tag(),
                    e
                ));
            }
        }
    }

    fn management(&self) -> Result<&ManagementApi> {
        self.management.as_ref().ok_or_else(|| {
            AragogError::InvalidConnectParam("management API is not configured".to_string())
        })
    }

    /// Broker-side state of the task queue for `task_type`.
    pub async fn queue_info(&self, task_type: impl AsRef<str>) -> Result<QueueInfo> {
        self.ensure_open()?;
        let queue = self.producer(task_type.as_ref())?.binding().queue_name.clone();
        self.management()?.queue_info(&queue).await
    }

    /// Consumers currently attached in the vhost, i.e. the running workers.
    pub async fn server_info(&self) -> Result<Vec<ConsumerInfo>> {
        self.ensure_open()?;
        self.management()?.consumers().await
    }

    /// Closes the shared connection. Every later call fails with `ConnectionClosed`.
    pub async fn close(&self) -> Result<()> {
        self.ensure_open()?;
        self.connection.close(200, "OK").await?;
        self.closed.store(true, Ordering::SeqCst);
        self.log.info(format_args!("connection closed"));
        Ok(())
    }
}
