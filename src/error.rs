use thiserror::Error;

/// Error type shared by the producer, worker and dispatch facade.
#[derive(Debug, Error)]
pub enum AragogError {
    /// The task payload failed validation. The message names the offending field.
    #[error("{0}")]
    Validation(String),

    /// `send`, `subscribe` or `consume` was called before `init`.
    #[error("uninitialized")]
    Uninitialized,

    /// Message priority outside the range supported by the task queue.
    #[error("priority between 0-10, got {0}")]
    PriorityOutOfRange(i32),

    /// Error originating from the underlying `lapin` library.
    #[error("RabbitMQ communication error: {0}")]
    Transport(#[from] lapin::Error),

    /// The task handler returned an error or panicked.
    #[error("{0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),

    /// The task handler did not finish within the message timeout.
    #[error("timeout of {millis}ms exceeded")]
    Timeout { millis: u64 },

    /// Error during message deserialization.
    #[error("Failed to deserialize message: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A reply body that is not a JSON result object.
    #[error("cannot parse result: {0}")]
    ResultParse(String),

    /// A well-formed result that carries an `errorCode`.
    #[error("{message}")]
    Application { code: i64, message: String },

    #[error("unknown task type '{0}', TaskType should be headless or source")]
    UnknownTaskType(String),

    #[error("connection closed")]
    ConnectionClosed,

    /// The reply queue of a producer can only be consumed once.
    #[error("reply queue is already subscribed")]
    AlreadySubscribed,

    /// `consume` was called while the worker's consumer is still running.
    #[error("worker is already consuming")]
    AlreadyConsuming,

    /// A delivery is missing an AMQP property the protocol depends on.
    #[error("message has no {0} property")]
    MissingProperty(&'static str),

    #[error("{0}")]
    InvalidConnectParam(String),

    /// Error from the RabbitMQ HTTP management API.
    #[error("management API request failed: {0}")]
    Management(#[from] reqwest::Error),
}

impl AragogError {
    /// Returns the application error code for errors that carry one.
    pub fn error_code(&self) -> Option<i64> {
        match self {
            AragogError::Application { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = AragogError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_states_budget() {
        let err = AragogError::Timeout { millis: 1000 };
        assert_eq!(err.to_string(), "timeout of 1000ms exceeded");
    }

    #[test]
    fn application_error_displays_error_msg() {
        let err = AragogError::Application { code: 500, message: "error message".into() };
        assert_eq!(err.to_string(), "error message");
        assert_eq!(err.error_code(), Some(500));
        assert_eq!(AragogError::Uninitialized.error_code(), None);
    }

    #[test]
    fn second_consumer_error_names_the_worker() {
        assert_eq!(AragogError::AlreadyConsuming.to_string(), "worker is already consuming");
    }

    #[test]
    fn priority_error_mentions_range() {
        let err = AragogError::PriorityOutOfRange(11);
        assert!(err.to_string().starts_with("priority between 0-10"));
    }
}
