//! Read-only client for the RabbitMQ HTTP management API.

use crate::config::{ClientOptions, ConnectionParams};
use crate::error::{AragogError, Result};
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackingQueueStatus {
    /// Ready messages per priority level.
    #[serde(default)]
    pub priority_lengths: HashMap<String, u64>,
    #[serde(default)]
    pub avg_ack_egress_rate: f64,
    #[serde(default)]
    pub avg_ack_ingress_rate: f64,
    #[serde(default)]
    pub avg_egress_rate: f64,
    #[serde(default)]
    pub avg_ingress_rate: f64,
    #[serde(default)]
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub vhost: String,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub consumers: u64,
    #[serde(default)]
    pub message_bytes: u64,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub backing_queue_status: Option<BackingQueueStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDetails {
    #[serde(default)]
    pub connection_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub peer_host: String,
    #[serde(default)]
    pub peer_port: u64,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerQueue {
    pub name: String,
    pub vhost: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub consumer_tag: String,
    pub queue: ConsumerQueue,
    #[serde(default)]
    pub ack_required: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub activity_status: String,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub prefetch_count: u64,
    #[serde(default)]
    pub channel_details: ChannelDetails,
}

/// Authenticated GET access to `/api/queues` and `/api/consumers` of one vhost.
#[derive(Debug, Clone)]
pub struct ManagementApi {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
    vhost: String,
}

impl ManagementApi {
    pub fn new(params: &ConnectionParams, options: &ClientOptions) -> Result<Self> {
        let scheme = if options.ssl { "https" } else { "http" };
        let base_url = format!(
            "{}://{}:{}/api/",
            scheme, params.hostname, options.management_port
        );
        Self::with_base_url(&base_url, &params.username, &params.password, &params.vhost)
    }

    /// Builds a client against an explicit API root such as `http://host:15672/api/`.
    pub fn with_base_url(base_url: &str, username: &str, password: &str, vhost: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            AragogError::InvalidConnectParam(format!("invalid management URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AragogError::InvalidConnectParam(format!(
                "management URL '{}' cannot be used as a base",
                base_url
            )));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            vhost: vhost.to_string(),
        })
    }

    /// Builds `{base}/{resource}/{vhost}[/{name}]`, percent-encoding each segment.
    fn endpoint(&self, resource: &str, name: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(resource).push(&self.vhost);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        log::debug!(target: "aragog::management", "GET {}", url);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn queue_info(&self, queue_name: &str) -> Result<QueueInfo> {
        self.get(self.endpoint("queues", Some(queue_name))).await
    }

    pub async fn consumers(&self) -> Result<Vec<ConsumerInfo>> {
        self.get(self.endpoint("consumers", None)).await
    }
}
