//! The task producer: publishes prioritized tasks and yields correlated replies.

use crate::error::{AragogError, Result};
use crate::log_context::LogContext;
use crate::task::{ResultData, TaskEnvelope, TaskResult};
use crate::topology::{self, QueueBinding, MAX_PRIORITY};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions},
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection,
};
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Outcome of one task as seen by the producer.
#[derive(Debug)]
pub enum TaskCompletion {
    /// The worker replied with a successful result.
    Completed(ResultData),
    /// The reply carried an `errorCode`, or could not be decoded at all.
    /// Undecodable replies carry no result.
    Failed {
        error: AragogError,
        result: Option<ResultData>,
    },
}

impl TaskCompletion {
    /// The request id this completion answers, when known.
    pub fn id(&self) -> Option<&str> {
        match self {
            TaskCompletion::Completed(data) => Some(&data.id),
            TaskCompletion::Failed { result, .. } => result.as_ref().map(|r| r.id.as_str()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskCompletion::Completed(_))
    }
}

/// Turns a reply body into a completion for request `correlation_id`.
pub fn decode_reply(correlation_id: Option<&str>, body: &[u8]) -> TaskCompletion {
    let parse_failure = |message: String| TaskCompletion::Failed {
        error: AragogError::ResultParse(message),
        result: None,
    };

    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => return parse_failure(e.to_string()),
    };
    if !value.is_object() {
        return parse_failure(format!("expected a result object, got {}", value));
    }
    let Some(id) = correlation_id else {
        return parse_failure("reply has no correlationId".to_string());
    };

    // The error fields decide the outcome even when the rest of the body is malformed.
    let error_code = value.get("errorCode").and_then(Value::as_i64);
    let error_msg = value
        .get("errorMsg")
        .and_then(Value::as_str)
        .map(str::to_string);
    let result = match serde_json::from_value::<TaskResult>(value) {
        Ok(result) => result,
        Err(e) => match error_code {
            Some(code) => TaskResult {
                data: None,
                headers: None,
                error_code: Some(code),
                error_msg,
                start_time: 0,
                end_time: 0,
            },
            None => return parse_failure(e.to_string()),
        },
    };

    let data = ResultData {
        id: id.to_string(),
        result,
    };
    match data.result.error_code {
        Some(code) => TaskCompletion::Failed {
            error: AragogError::Application {
                code,
                message: data.result.error_msg.clone().unwrap_or_default(),
            },
            result: Some(data),
        },
        None => TaskCompletion::Completed(data),
    }
}

/// Checks a task priority and narrows it to the AMQP priority octet.
pub fn check_priority(priority: i32) -> Result<u8> {
    if (0..=i32::from(MAX_PRIORITY)).contains(&priority) {
        Ok(priority as u8)
    } else {
        Err(AragogError::PriorityOutOfRange(priority))
    }
}

fn publish_properties(priority: u8, id: &str, reply_to: &str) -> BasicProperties {
    BasicProperties::default()
        .with_priority(priority)
        .with_delivery_mode(2)
        .with_correlation_id(id.to_string().into())
        .with_reply_to(reply_to.to_string().into())
}

/// Publishes tasks to one task queue and receives the replies for them.
pub struct Producer {
    connection: Arc<Connection>,
    binding: QueueBinding,
    channel: Option<Channel>,
    reply_queue: String,
    subscribed: Arc<AtomicBool>,
    log: LogContext,
}

impl Producer {
    pub fn new(connection: Arc<Connection>, binding: QueueBinding) -> Self {
        let log = LogContext::new("aragog::producer")
            .tag(&binding.queue_name)
            .tag(&binding.app);
        Self {
            connection,
            binding,
            channel: None,
            reply_queue: String::new(),
            subscribed: Arc::new(AtomicBool::new(false)),
            log,
        }
    }

    pub fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    /// Name of the queue replies arrive on; empty before `init`.
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn is_initialized(&self) -> bool {
        self.channel.is_some()
    }

    /// Declares the exchange, task queue and reply queue. Calling it again is a no-op.
    pub async fn init(&mut self) -> Result<()> {
        if self.channel.is_some() {
            return Ok(());
        }
        let channel = self.connection.create_channel().await?;
        topology::declare_task_queue(
            &channel,
            &self.binding.exchange_name,
            &self.binding.queue_name,
            &self.log,
        )
        .await?;
        self.reply_queue = topology::declare_reply_queue(&channel, &self.binding, &self.log).await?;
        self.channel = Some(channel);
        self.log.info(format_args!("init done, replies on '{}'", self.reply_queue));
        Ok(())
    }

    /// Publishes a task. Completes once the broker accepted the publish, not
    /// when a worker picked it up.
    pub async fn send(&self, envelope: &TaskEnvelope) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(AragogError::Uninitialized)?;
        let priority = check_priority(envelope.priority)?;

        let mut task = envelope.task.clone();
        if task.app_name.is_empty() {
            task.app_name = self.binding.app.clone();
        }
        let payload = serde_json::to_vec(&task)?;

        channel
            .basic_publish(
                &self.binding.exchange_name,
                &self.binding.routing_key(),
                BasicPublishOptions::default(),
                &payload,
                publish_properties(priority, &envelope.id, &self.reply_queue),
            )
            .await?;
        self.log.debug(format_args!(
            "sent task {} with priority {}",
            envelope.id, priority
        ));
        Ok(())
    }

    /// Starts consuming the reply queue. Replies are auto-acknowledged.
    ///
    /// A producer has one active reply subscription; calling this again before
    /// it is cancelled fails with [`AragogError::AlreadySubscribed`].
    pub async fn subscribe(&self) -> Result<ReplySubscription> {
        let channel = self.channel.as_ref().ok_or(AragogError::Uninitialized)?;
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(AragogError::AlreadySubscribed);
        }

        let consumer = match channel
            .basic_consume(
                &self.reply_queue,
                "",
                BasicConsumeOptions { no_ack: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                self.subscribed.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let consumer_tag = consumer.tag();
        self.log.info(format_args!(
            "listening for replies on '{}' (consumer '{}')",
            self.reply_queue,
            consumer_tag.as_str()
        ));

        let log = self.log.clone();
        let completions = consumer
            .map(move |delivery| match delivery {
                Ok(delivery) => {
                    let id = delivery
                        .properties
                        .correlation_id()
                        .as_ref()
                        .map(|id| id.as_str().to_string());
                    let completion = decode_reply(id.as_deref(), &delivery.data);
                    if let TaskCompletion::Failed { error, .. } = &completion {
                        log.warn(format_args!("task {} failed: {}", id.as_deref().unwrap_or("-"), error));
                    }
                    completion
                }
                Err(e) => TaskCompletion::Failed {
                    error: e.into(),
                    result: None,
                },
            })
            .boxed();

        Ok(ReplySubscription {
            handle: SubscriptionHandle {
                channel: channel.clone(),
                consumer_tag,
                subscribed: self.subscribed.clone(),
            },
            completions,
        })
    }
}

/// Cancels the broker-side consumer behind a subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    channel: Channel,
    consumer_tag: ShortString,
    subscribed: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn consumer_tag(&self) -> &str {
        self.consumer_tag.as_str()
    }

    /// Stops reply delivery; the stream ends once the broker confirms.
    /// The producer can be subscribed again afterwards.
    pub async fn cancel(&self) -> Result<()> {
        let cancelled = self
            .channel
            .basic_cancel(self.consumer_tag.as_str(), BasicCancelOptions::default())
            .await;
        self.release();
        cancelled?;
        Ok(())
    }

    /// Frees the producer's subscription slot.
    fn release(&self) {
        self.subscribed.store(false, Ordering::SeqCst);
    }
}

/// Stream of completions for one producer's reply queue.
pub struct ReplySubscription {
    handle: SubscriptionHandle,
    completions: BoxStream<'static, TaskCompletion>,
}

impl ReplySubscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub async fn cancel(&self) -> Result<()> {
        self.handle.cancel().await
    }

    pub(crate) fn into_parts(self) -> (SubscriptionHandle, BoxStream<'static, TaskCompletion>) {
        (self.handle, self.completions)
    }
}

impl Stream for ReplySubscription {
    type Item = TaskCompletion;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().completions.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_range_is_inclusive() {
        for p in 0..=10 {
            assert_eq!(check_priority(p).unwrap(), p as u8);
        }
        for p in [-1, 11, i32::MIN, i32::MAX] {
            let err = check_priority(p).unwrap_err();
            assert!(matches!(err, AragogError::PriorityOutOfRange(v) if v == p));
        }
    }

    #[test]
    fn publish_properties_carry_correlation_metadata() {
        let properties = publish_properties(7, "req-1", "amq.gen-abc");
        assert_eq!(*properties.priority(), Some(7));
        assert_eq!(*properties.delivery_mode(), Some(2));
        assert_eq!(
            properties.correlation_id().as_ref().map(|s| s.as_str()),
            Some("req-1")
        );
        assert_eq!(
            properties.reply_to().as_ref().map(|s| s.as_str()),
            Some("amq.gen-abc")
        );
    }

    #[test]
    fn successful_reply_is_merged_with_id() {
        let body = json!({"data": {"title": "hi"}, "startTime": 1, "endTime": 2}).to_string();
        match decode_reply(Some("test-id"), body.as_bytes()) {
            TaskCompletion::Completed(data) => {
                assert_eq!(data.id, "test-id");
                assert_eq!(data.result.data, Some(json!({"title": "hi"})));
                assert_eq!(data.result.start_time, 1);
            }
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn error_code_reply_is_an_application_failure() {
        let body = json!({
            "errorCode": 500,
            "errorMsg": "error message",
            "startTime": 1,
            "endTime": 2,
        })
        .to_string();
        let completion = decode_reply(Some("test-id"), body.as_bytes());
        assert_eq!(completion.id(), Some("test-id"));
        match completion {
            TaskCompletion::Failed { error, result: Some(result) } => {
                assert_eq!(error.to_string(), "error message");
                assert_eq!(error.error_code(), Some(500));
                assert_eq!(result.result.error_code, Some(500));
                assert_eq!(result.result.error_msg.as_deref(), Some("error message"));
            }
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn non_object_reply_is_a_parse_failure_without_result() {
        let bodies: [&[u8]; 3] = [b"\"value\"", b"not json", b"[1,2]"];
        for body in bodies {
            match decode_reply(Some("test-id"), body) {
                TaskCompletion::Failed { error: AragogError::ResultParse(_), result: None } => {}
                other => panic!("unexpected completion {:?}", other),
            }
        }
    }

    #[test]
    fn error_reply_without_timestamps_keeps_id_and_code() {
        let completion = decode_reply(
            Some("req-9"),
            br#"{"errorCode":4001,"errorMsg":"page load failed"}"#,
        );
        assert_eq!(completion.id(), Some("req-9"));
        match completion {
            TaskCompletion::Failed { error, result: Some(result) } => {
                assert!(matches!(error, AragogError::Application { code: 4001, .. }));
                assert_eq!(error.to_string(), "page load failed");
                assert_eq!(result.result.start_time, 0);
            }
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn error_reply_with_malformed_fields_keeps_error_code() {
        let body = json!({"errorCode": 5000, "errorMsg": "boom", "headers": [1, 2]}).to_string();
        match decode_reply(Some("req-10"), body.as_bytes()) {
            TaskCompletion::Failed { error, result: Some(result) } => {
                assert_eq!(error.error_code(), Some(5000));
                assert_eq!(result.id, "req-10");
                assert_eq!(result.result.error_msg.as_deref(), Some("boom"));
            }
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn reply_without_correlation_id_is_a_parse_failure() {
        let body = json!({"startTime": 1, "endTime": 2}).to_string();
        let completion = decode_reply(None, body.as_bytes());
        assert!(!completion.is_success());
        assert_eq!(completion.id(), None);
    }
}
