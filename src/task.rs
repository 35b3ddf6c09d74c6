//! Wire payloads exchanged between producers and workers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// HTTP method used by fetch-style tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

/// Request body of a task: a form-like object or a raw string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskData {
    Form(Map<String, Value>),
    Raw(String),
}

/// Which response headers a worker should return with its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequireHeaders {
    All(bool),
    Only(Vec<String>),
}

impl RequireHeaders {
    /// Keeps the headers selected by this setting. Names in a list match case-insensitively.
    pub fn filter(&self, headers: &HashMap<String, String>) -> HashMap<String, String> {
        match self {
            RequireHeaders::All(true) => headers.clone(),
            RequireHeaders::All(false) => HashMap::new(),
            RequireHeaders::Only(names) => headers
                .iter()
                .filter(|(key, _)| names.iter().any(|name| name.eq_ignore_ascii_case(key)))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Expiry as epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        }
    }
}

/// A crawl task as it travels through the task queue.
///
/// `url` and `script` must be non-empty; everything else is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub app_name: String,
    pub url: String,
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_image: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TaskData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_headers: Option<RequireHeaders>,
    /// Per-task load timeout in seconds, interpreted by the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl Task {
    pub fn new(url: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            script: script.into(),
            ..Default::default()
        }
    }
}

/// A task as handed to a worker's handler, tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTask {
    pub task_id: String,
    #[serde(flatten)]
    pub task: Task,
}

/// A task submission: the request id and priority travel as message
/// properties, only `task` is encoded into the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub task: Task,
}

impl TaskEnvelope {
    pub fn new(id: impl Into<String>, task: Task) -> Self {
        Self { id: id.into(), priority: 0, task }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Application-level error codes carried in [`TaskResult::error_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParams = 4000,
    PageLoadError = 4001,
    ScriptError = 4002,
    HeadlessError = 5000,
    SourceError = 5010,
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code as i64
    }
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The reply a worker sends back for a task.
///
/// A result carrying `error_code` is a failure; `data` and `error_code` are
/// not set together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    /// Epoch milliseconds; replies that omit it read as `0`.
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
}

impl TaskResult {
    /// A successful result that started at `start_time` and ends now.
    pub fn success(data: Value, start_time: i64) -> Self {
        Self {
            data: Some(data),
            headers: None,
            error_code: None,
            error_msg: None,
            start_time,
            end_time: now_millis(),
        }
    }

    /// A failed result that started at `start_time` and ends now.
    pub fn failure(code: impl Into<i64>, message: impl Into<String>, start_time: i64) -> Self {
        Self {
            data: None,
            headers: None,
            error_code: Some(code.into()),
            error_msg: Some(message.into()),
            start_time,
            end_time: now_millis(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error_code.is_some()
    }
}

/// A task result correlated back to the request id it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    pub id: String,
    #[serde(flatten)]
    pub result: TaskResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_serializes_camel_case_and_skips_unset_fields() {
        let mut task = Task::new("https://example.com", "return 1");
        task.app_name = "crawler".into();
        task.disable_image = Some(true);
        task.require_headers = Some(RequireHeaders::Only(vec!["content-type".into()]));

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value,
            json!({
                "appName": "crawler",
                "url": "https://example.com",
                "script": "return 1",
                "disableImage": true,
                "requireHeaders": ["content-type"],
            })
        );
    }

    #[test]
    fn worker_task_flattens_task_id() {
        let task = WorkerTask {
            task_id: "test-id".into(),
            task: Task::new("u", "s"),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["taskId"], "test-id");
        assert_eq!(value["url"], "u");
    }

    #[test]
    fn envelope_priority_defaults_to_zero() {
        let envelope: TaskEnvelope =
            serde_json::from_value(json!({"id": "a", "url": "u", "script": "s"})).unwrap();
        assert_eq!(envelope.priority, 0);
        assert_eq!(envelope.task.url, "u");
    }

    #[test]
    fn task_data_accepts_object_or_string() {
        let form: TaskData = serde_json::from_value(json!({"a": "1"})).unwrap();
        assert!(matches!(form, TaskData::Form(_)));
        let raw: TaskData = serde_json::from_value(json!("post data")).unwrap();
        assert_eq!(raw, TaskData::Raw("post data".into()));
    }

    #[test]
    fn cookie_parses_optional_fields() {
        let cookie: Cookie = serde_json::from_value(json!({
            "name": "sid",
            "value": "abc",
            "httpOnly": true,
            "sameSite": "Lax",
            "expires": 1_600_000_000_000u64,
        }))
        .unwrap();
        assert_eq!(cookie.http_only, Some(true));
        assert_eq!(cookie.same_site, Some(SameSite::Lax));
        assert_eq!(cookie.expires, Some(1_600_000_000_000.0));
    }

    #[test]
    fn require_headers_filter() {
        let headers: HashMap<String, String> = [
            ("content-type".to_string(), "text/html".to_string()),
            ("server".to_string(), "nginx".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(RequireHeaders::All(true).filter(&headers).len(), 2);
        assert!(RequireHeaders::All(false).filter(&headers).is_empty());

        let only = RequireHeaders::Only(vec!["Content-Type".into()]).filter(&headers);
        assert_eq!(only.len(), 1);
        assert_eq!(only["content-type"], "text/html");
    }

    #[test]
    fn failure_result_carries_code() {
        let result = TaskResult::failure(ErrorCode::InvalidParams, "url is required", 10);
        assert!(result.is_failure());
        assert_eq!(result.error_code, Some(4000));
        assert_eq!(result.start_time, 10);
        assert!(result.end_time >= result.start_time);

        let ok = TaskResult::success(json!({"title": "x"}), now_millis());
        assert!(!ok.is_failure());
    }

    #[test]
    fn result_data_merges_id() {
        let data = ResultData {
            id: "test-id".into(),
            result: TaskResult::failure(500, "error message", 1),
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["id"], "test-id");
        assert_eq!(value["errorCode"], 500);
        assert_eq!(value["errorMsg"], "error message");
    }
}
