//! Structural checks for task payloads.
//!
//! Both sides of the queue run the same rules over the raw JSON: the producer
//! before publishing and the worker before a task reaches its handler. The
//! first violation is reported, naming the offending field.

use crate::error::{AragogError, Result};
use serde_json::{Map, Value};

/// Fields checked on every task, in reporting order.
const TASK_FIELDS: [&str; 12] = [
    "url",
    "script",
    "disableImage",
    "encoding",
    "method",
    "auth",
    "data",
    "params",
    "cookies",
    "headers",
    "requireHeaders",
    "timeout",
];

const COOKIE_FIELDS: [(&str, JsonType); 8] = [
    ("name", JsonType::String),
    ("value", JsonType::String),
    ("domain", JsonType::String),
    ("path", JsonType::String),
    ("expires", JsonType::Number),
    ("httpOnly", JsonType::Boolean),
    ("secure", JsonType::Boolean),
    ("sameSite", JsonType::String),
];

#[derive(Debug, Clone, Copy)]
enum JsonType {
    String,
    Number,
    Boolean,
}

impl JsonType {
    fn name(self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Boolean => value.is_boolean(),
        }
    }
}

fn invalid(message: impl Into<String>) -> AragogError {
    AragogError::Validation(message.into())
}

/// Missing, `null`, `false`, `0` and `""` all count as absent for required fields.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(_) => false,
    }
}

fn require_string(task: &Map<String, Value>, key: &str) -> Result<()> {
    let value = task.get(key);
    if is_blank(value) {
        return Err(invalid(format!("{key} is required")));
    }
    if !value.is_some_and(Value::is_string) {
        return Err(invalid(format!("{key} must be of type string")));
    }
    Ok(())
}

fn as_object(value: &Value) -> Result<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| invalid("task must be of type object"))
}

/// Validates a task as a worker receives it.
pub fn check_task_input(value: &Value) -> Result<()> {
    check_fields(as_object(value)?)
}

/// Validates a task submission on the producer side, which also carries its `id`.
pub fn check_send_input(value: &Value) -> Result<()> {
    let task = as_object(value)?;
    require_string(task, "id")?;
    check_fields(task)
}

fn check_fields(task: &Map<String, Value>) -> Result<()> {
    for key in TASK_FIELDS {
        if key == "url" || key == "script" {
            require_string(task, key)?;
            continue;
        }
        match task.get(key) {
            None | Some(Value::Null) => {}
            Some(value) => check_optional(key, value)?,
        }
    }
    Ok(())
}

fn check_optional(key: &str, value: &Value) -> Result<()> {
    match key {
        "disableImage" if !value.is_boolean() => {
            Err(invalid(format!("{key} must be of type boolean")))
        }
        "encoding" if !value.is_string() => Err(invalid(format!("{key} must be of type string"))),
        "method" if !matches!(value.as_str(), Some("GET" | "POST")) => {
            Err(invalid(format!("{key} should be GET or POST")))
        }
        "auth" => check_auth(value),
        "data" if !(value.is_object() || value.is_string()) => {
            Err(invalid(format!("{key} must be of type object or string")))
        }
        "params" | "headers" => check_string_map(key, value),
        "cookies" => check_cookies(value),
        "requireHeaders" => check_require_headers(value),
        "timeout" if !value.is_number() => Err(invalid(format!("{key} must be of type number"))),
        _ => Ok(()),
    }
}

fn check_auth(value: &Value) -> Result<()> {
    let valid = value
        .as_object()
        .is_some_and(|auth| {
            auth.get("username").is_some_and(Value::is_string)
                && auth.get("password").is_some_and(Value::is_string)
        });
    if valid {
        Ok(())
    } else {
        Err(invalid("auth should contain username and password of string type"))
    }
}

fn check_string_map(key: &str, value: &Value) -> Result<()> {
    let map = value
        .as_object()
        .ok_or_else(|| invalid(format!("{key} must be of type object")))?;
    match map.iter().find(|(_, v)| !v.is_string()) {
        Some((name, _)) => Err(invalid(format!("{key}.{name} must be of type string"))),
        None => Ok(()),
    }
}

fn check_require_headers(value: &Value) -> Result<()> {
    let valid = match value {
        Value::Bool(_) => true,
        Value::Array(names) => names.iter().all(Value::is_string),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(invalid("requireHeaders must be of type boolean or array"))
    }
}

fn check_cookies(value: &Value) -> Result<()> {
    let cookies = value
        .as_array()
        .ok_or_else(|| invalid("cookies must be of type array"))?;
    for cookie in cookies {
        let cookie = cookie
            .as_object()
            .ok_or_else(|| invalid("cookies must contain objects"))?;
        if is_blank(cookie.get("name")) || is_blank(cookie.get("value")) {
            return Err(invalid("cookies.name and cookies.value is required"));
        }
        for (field, expected) in COOKIE_FIELDS {
            match cookie.get(field) {
                None | Some(Value::Null) => {}
                Some(v) if !expected.matches(v) => {
                    return Err(invalid(format!(
                        "cookies.{field} must be of type {}",
                        expected.name()
                    )));
                }
                Some(_) => {}
            }
        }
        if let Some(same_site) = cookie.get("sameSite").and_then(Value::as_str) {
            if same_site != "Strict" && same_site != "Lax" {
                return Err(invalid("cookies.sameSite should be Strict or Lax"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_input(overrides: Value) -> Value {
        let mut base = json!({
            "id": "id",
            "url": "url",
            "script": "script",
            "disableImage": true,
            "encoding": "encoding",
            "method": "GET",
            "auth": { "username": "username", "password": "password" },
            "data": { "a": "1" },
            "params": { "a": "1" },
            "headers": { "a": "1" },
            "cookies": [{ "name": "name", "value": "value" }],
            "requireHeaders": ["header"],
            "timeout": 1000,
        });
        if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }
        base
    }

    fn both_sides() -> [(&'static str, fn(&Value) -> Result<()>); 2] {
        [
            ("producer", check_send_input as fn(&Value) -> Result<()>),
            ("worker", check_task_input as fn(&Value) -> Result<()>),
        ]
    }

    #[test]
    fn accepts_valid_inputs() {
        let valid = [
            client_input(json!({})),
            client_input(json!({"method": "POST"})),
            client_input(json!({"data": {"a": "1", "b": "2"}})),
            client_input(json!({"data": "post data"})),
            client_input(json!({"requireHeaders": true})),
            client_input(json!({"requireHeaders": ["header1", "header2"]})),
            client_input(json!({"encoding": null})),
            client_input(json!({"cookies": [{
                "name": "name",
                "value": "value",
                "domain": "domain",
                "path": "path",
                "expires": 1_600_000_000_000u64,
                "httpOnly": true,
                "secure": true,
                "sameSite": "Strict",
            }]})),
        ];
        for (side, check) in both_sides() {
            for input in &valid {
                assert!(check(input).is_ok(), "{side} rejected {input}");
            }
        }
    }

    #[test]
    fn rejects_invalid_inputs_identically_on_both_sides() {
        let cases = [
            (json!({"url": ""}), "url is required"),
            (json!({"script": ""}), "script is required"),
            (json!({"url": 123}), "url must be of type string"),
            (json!({"script": 123}), "script must be of type string"),
            (json!({"method": "DELETE"}), "method should be GET or POST"),
            (json!({"disableImage": "disable"}), "disableImage must be of type boolean"),
            (json!({"encoding": 123}), "encoding must be of type string"),
            (
                json!({"auth": {"username": "user", "password": 123456}}),
                "auth should contain username and password of string type",
            ),
            (
                json!({"auth": {"username": 12345, "password": "pass"}}),
                "auth should contain username and password of string type",
            ),
            (json!({"data": 123}), "data must be of type object or string"),
            (json!({"params": 123}), "params must be of type object"),
            (json!({"params": {"a": 1}}), "params.a must be of type string"),
            (json!({"headers": 123}), "headers must be of type object"),
            (json!({"requireHeaders": 123}), "requireHeaders must be of type boolean or array"),
            (json!({"timeout": "123"}), "timeout must be of type number"),
            (json!({"cookies": "123"}), "cookies must be of type array"),
            (json!({"cookies": [{"name": "name"}]}), "cookies.name and cookies.value is required"),
            (json!({"cookies": [{"value": "value"}]}), "cookies.name and cookies.value is required"),
            (
                json!({"cookies": [{"name": "name", "value": "value", "expires": "expires"}]}),
                "cookies.expires must be of type number",
            ),
            (
                json!({"cookies": [
                    {"name": "name", "value": "value"},
                    {"name": "name", "value": "value", "httpOnly": "ok"},
                ]}),
                "cookies.httpOnly must be of type boolean",
            ),
            (
                json!({"cookies": [{"name": "name", "value": "value", "sameSite": "None"}]}),
                "cookies.sameSite should be Strict or Lax",
            ),
        ];
        for (side, check) in both_sides() {
            for (overrides, expected) in &cases {
                let err = check(&client_input(overrides.clone())).unwrap_err();
                assert_eq!(err.to_string(), *expected, "{side} side, input {overrides}");
            }
        }
    }

    #[test]
    fn missing_url_is_required() {
        let mut input = client_input(json!({}));
        input.as_object_mut().unwrap().remove("url");
        let err = check_task_input(&input).unwrap_err();
        assert_eq!(err.to_string(), "url is required");
    }

    #[test]
    fn producer_side_requires_id() {
        let err = check_send_input(&client_input(json!({"id": ""}))).unwrap_err();
        assert_eq!(err.to_string(), "id is required");
        let err = check_send_input(&client_input(json!({"id": 123}))).unwrap_err();
        assert_eq!(err.to_string(), "id must be of type string");

        // the worker-side shape carries no id
        assert!(check_task_input(&client_input(json!({"id": ""}))).is_ok());
    }

    #[test]
    fn reports_first_violation_only() {
        let input = client_input(json!({"url": "", "timeout": "x"}));
        let err = check_task_input(&input).unwrap_err();
        assert_eq!(err.to_string(), "url is required");
    }

    #[test]
    fn non_object_task_is_rejected() {
        let err = check_task_input(&json!("value")).unwrap_err();
        assert!(matches!(err, AragogError::Validation(_)));
    }
}
