//! Connection parameters and client/worker configuration.

use crate::error::{AragogError, Result};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{Connection, ConnectionProperties};
use std::time::Duration;

/// Topic exchange used when no other name is configured.
pub const DEFAULT_EXCHANGE: &str = "aragog_exchange";
pub const DEFAULT_AMQP_PORT: u16 = 5672;
pub const DEFAULT_MANAGEMENT_PORT: u16 = 15672;

/// Where and as whom to connect to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    /// Name of the submitting application; becomes the first routing key segment.
    pub app_name: String,
}

impl ConnectionParams {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_AMQP_PORT,
            username: username.into(),
            password: password.into(),
            vhost: "/".to_string(),
            app_name: app_name.into(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    /// Checks that every required field is set.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("hostname", &self.hostname),
            ("username", &self.username),
            ("password", &self.password),
            ("appName", &self.app_name),
        ];
        match fields.iter().find(|(_, value)| value.is_empty()) {
            Some((name, _)) => Err(AragogError::InvalidConnectParam(format!("{name} is required"))),
            None => Ok(()),
        }
    }

    pub fn to_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.hostname.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..Default::default()
        }
    }
}

/// Opens the broker connection shared by producers and workers.
pub async fn connect(params: &ConnectionParams) -> Result<Connection> {
    params.validate()?;
    let connection = Connection::connect_uri(params.to_uri(), ConnectionProperties::default()).await?;
    log::info!(
        target: "aragog::connection",
        "Connected to RabbitMQ at {}:{}{}",
        params.hostname,
        params.port,
        params.vhost
    );
    Ok(connection)
}

/// Options for the client side (producers and the dispatch facade).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Use a named, durable reply queue shared across producer instances
    /// instead of an exclusive, connection-scoped one.
    pub durable: bool,
    pub exchange_name: String,
    /// Use HTTPS for the management API.
    pub ssl: bool,
    pub management_port: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            durable: false,
            exchange_name: DEFAULT_EXCHANGE.to_string(),
            ssl: false,
            management_port: DEFAULT_MANAGEMENT_PORT,
        }
    }
}

/// Configuration for a [`Worker`](crate::worker::Worker).
///
/// Use the `WorkerConfig::builder()` method to construct this struct.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// The name of the task queue to consume from.
    pub queue_name: String,
    /// The topic exchange the queue is bound to.
    pub exchange_name: String,
    /// A unique identifier for the consumer on this queue.
    pub consumer_tag: String,
    /// Maximum number of unacknowledged deliveries (QoS prefetch count).
    pub prefetch_count: u16,
    /// How long a handler may run before its message is rejected.
    pub message_timeout: Duration,
}

impl WorkerConfig {
    /// Creates a new `WorkerConfigBuilder` for the given task queue.
    pub fn builder(queue_name: impl Into<String>) -> WorkerConfigBuilder {
        WorkerConfigBuilder::new(queue_name.into())
    }
}

/// A builder for creating `WorkerConfig` instances.
pub struct WorkerConfigBuilder {
    queue_name: String,
    exchange_name: Option<String>,
    consumer_tag: Option<String>,
    prefetch_count: Option<u16>,
    message_timeout: Option<Duration>,
}

impl WorkerConfigBuilder {
    fn new(queue_name: String) -> Self {
        Self {
            queue_name,
            exchange_name: None,
            consumer_tag: None,
            prefetch_count: None,
            message_timeout: None,
        }
    }

    /// Sets a custom exchange name.
    /// Defaults to `aragog_exchange` if not set.
    pub fn exchange_name(mut self, exchange_name: impl Into<String>) -> Self {
        self.exchange_name = Some(exchange_name.into());
        self
    }

    /// Sets a custom consumer tag.
    /// Defaults to `{queue_name}_consumer` if not set.
    pub fn consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(consumer_tag.into());
        self
    }

    /// Sets the prefetch count (QoS). Defaults to 5.
    ///
    /// This is also the number of handler invocations that may run at once,
    /// so the handler must tolerate concurrent calls.
    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = Some(count);
        self
    }

    /// Sets the per-message handler deadline. Defaults to 5 minutes.
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = Some(timeout);
        self
    }

    /// Builds the final `WorkerConfig`, applying defaults for any unset options.
    pub fn build(self) -> WorkerConfig {
        let queue_name = self.queue_name;
        WorkerConfig {
            exchange_name: self.exchange_name.unwrap_or_else(|| DEFAULT_EXCHANGE.to_string()),
            consumer_tag: self.consumer_tag.unwrap_or_else(|| format!("{}_consumer", queue_name)),
            prefetch_count: self.prefetch_count.unwrap_or(5),
            message_timeout: self.message_timeout.unwrap_or(Duration::from_secs(5 * 60)),
            queue_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_builder_defaults() {
        let config = WorkerConfig::builder("headless").build();

        assert_eq!(config.queue_name, "headless");
        assert_eq!(config.exchange_name, "aragog_exchange");
        assert_eq!(config.consumer_tag, "headless_consumer");
        assert_eq!(config.prefetch_count, 5);
        assert_eq!(config.message_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_worker_config_builder_custom_values() {
        let config = WorkerConfig::builder("source")
            .exchange_name("custom_exchange")
            .consumer_tag("custom_consumer")
            .prefetch_count(1)
            .message_timeout(Duration::from_secs(1))
            .build();

        assert_eq!(config.exchange_name, "custom_exchange");
        assert_eq!(config.consumer_tag, "custom_consumer");
        assert_eq!(config.prefetch_count, 1);
        assert_eq!(config.message_timeout, Duration::from_secs(1));
    }

    #[test]
    fn connect_params_report_first_missing_field() {
        let cases = [
            (ConnectionParams::new("", "u", "p", "a"), "hostname is required"),
            (ConnectionParams::new("h", "", "p", "a"), "username is required"),
            (ConnectionParams::new("h", "u", "", "a"), "password is required"),
            (ConnectionParams::new("h", "u", "p", ""), "appName is required"),
        ];
        for (params, expected) in cases {
            assert_eq!(params.validate().unwrap_err().to_string(), expected);
        }
        assert!(ConnectionParams::new("h", "u", "p", "a").validate().is_ok());
    }

    #[test]
    fn uri_carries_credentials_and_vhost() {
        let params = ConnectionParams::new("rabbit", "guest", "secret", "crawler")
            .port(5673)
            .vhost("crawl");
        let uri = params.to_uri();

        assert_eq!(uri.authority.host, "rabbit");
        assert_eq!(uri.authority.port, 5673);
        assert_eq!(uri.authority.userinfo.username, "guest");
        assert_eq!(uri.authority.userinfo.password, "secret");
        assert_eq!(uri.vhost, "crawl");
    }

    #[test]
    fn client_options_defaults() {
        let options = ClientOptions::default();
        assert!(!options.durable);
        assert!(!options.ssl);
        assert_eq!(options.exchange_name, DEFAULT_EXCHANGE);
        assert_eq!(options.management_port, 15672);
    }
}
