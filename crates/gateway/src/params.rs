//! Request parameter extraction.
//!
//! Every endpoint accepts its parameters from the JSON body, the query
//! string, or headers. The body wins, then the query, then headers.

use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use chatrelay_agent::{AssistantSet, TurnRequest};
use chatrelay_core::{ContextToken, Error};

use crate::error::ApiError;

/// Which endpoint family a request came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Completion,
    Assistant,
}

pub struct RequestParams {
    body: Option<serde_json::Map<String, Value>>,
    query: HashMap<String, String>,
    headers: HeaderMap,
}

impl RequestParams {
    /// A body that is not a JSON object is ignored.
    pub fn new(body: &[u8], query: HashMap<String, String>, headers: HeaderMap) -> Self {
        let body = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        };
        Self { body, query, headers }
    }

    fn body_value(&self, field: &str) -> Option<&Value> {
        self.body.as_ref()?.get(field).filter(|v| !v.is_null())
    }

    /// First non-blank value for `field`.
    pub fn get(&self, field: &str) -> Option<String> {
        let from_body = self.body_value(field).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        });
        non_blank(from_body)
            .or_else(|| non_blank(self.query.get(field).cloned()))
            .or_else(|| {
                non_blank(
                    self.headers
                        .get(field)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                )
            })
    }

    /// `assistants` as a JSON array in the body, or a comma-separated list.
    pub fn list(&self, field: &str) -> Option<Vec<String>> {
        if let Some(Value::Array(items)) = self.body_value(field) {
            return Some(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.trim().to_string(),
                        other => other.to_string(),
                    })
                    .collect(),
            );
        }
        self.get(field)
            .map(|s| s.split(',').map(|id| id.trim().to_string()).collect())
    }

    /// Build the turn for `family`.
    pub fn into_turn(self, family: Family) -> Result<TurnRequest, ApiError> {
        let prompt = self
            .get("prompt")
            .ok_or_else(|| ApiError::bad_request("missing-prompt", "a prompt is required"))?;

        let mut turn = TurnRequest::new(prompt);
        if let Some(config) = self.get("config") {
            turn = turn.with_config(config);
        }
        if let Some(context) = self.get("context") {
            turn = turn.with_context(ContextToken(context));
        }
        if let Some(stream_id) = self.get("stream-id") {
            turn = turn.with_stream(stream_id);
        }
        if let Some(secs) = self.get("timeout") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| ApiError::bad_request("invalid-timeout", format!("timeout must be whole seconds, got \"{secs}\"")))?;
            turn.timeout = Some(Duration::from_secs(secs.max(1)));
        }

        if family == Family::Assistant {
            let set = match (self.list("assistants"), self.get("assistant")) {
                (Some(ids), _) => AssistantSet::from_list(ids)?,
                (None, Some(id)) => AssistantSet::single(id)?,
                (None, None) => {
                    return Err(Error::MalformedAssistantSet("name an assistant or a list of assistants".into()).into());
                }
            };
            turn = turn.with_assistants(set);
        }
        Ok(turn)
    }
}

/// Trimmed, or `None` when only whitespace is left.
fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(body: &str, query: &[(&str, &str)], headers: &[(&'static str, &str)]) -> RequestParams {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        RequestParams::new(
            body.as_bytes(),
            query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            map,
        )
    }

    #[test]
    fn body_then_query_then_header() {
        let p = params(
            r#"{"config": "from-body"}"#,
            &[("config", "from-query"), ("context", "ctx-query")],
            &[("config", "from-header"), ("context", "ctx-header"), ("stream-id", "s1")],
        );
        assert_eq!(p.get("config").as_deref(), Some("from-body"));
        assert_eq!(p.get("context").as_deref(), Some("ctx-query"));
        assert_eq!(p.get("stream-id").as_deref(), Some("s1"));
        assert!(p.get("prompt").is_none());
    }

    #[test]
    fn non_json_body_is_ignored() {
        let p = params("prompt=hi", &[("prompt", "hello")], &[]);
        assert_eq!(p.get("prompt").as_deref(), Some("hello"));
    }

    #[test]
    fn blank_values_fall_through() {
        let p = params(r#"{"prompt": "  "}"#, &[("prompt", "hi")], &[]);
        assert_eq!(p.get("prompt").as_deref(), Some("hi"));

        let p = params(r#"{"config": ""}"#, &[("config", " ")], &[("config", " from-header ")]);
        assert_eq!(p.get("config").as_deref(), Some("from-header"));
    }

    #[test]
    fn completion_turn_ignores_assistants() {
        let turn = params(
            r#"{"prompt": "hi", "config": "my-config", "assistant": "a1"}"#,
            &[],
            &[("context", "abc123")],
        )
        .into_turn(Family::Completion)
        .unwrap();
        assert_eq!(turn.prompt, "hi");
        assert_eq!(turn.config.as_deref(), Some("my-config"));
        assert_eq!(turn.context, Some(ContextToken::from("abc123")));
        assert!(turn.assistants.is_none());
    }

    #[test]
    fn assistants_from_body_array_or_csv() {
        let turn = params(r#"{"prompt": "hi", "assistants": ["a", "b", "lead"]}"#, &[], &[])
            .into_turn(Family::Assistant)
            .unwrap();
        assert_eq!(
            turn.assistants,
            Some(AssistantSet::Multi {
                participants: vec!["a".into(), "b".into()],
                interpreter: "lead".into(),
            })
        );

        let turn = params("", &[("prompt", "hi"), ("assistants", "a, lead")], &[])
            .into_turn(Family::Assistant)
            .unwrap();
        assert_eq!(turn.assistants.unwrap().ids(), vec!["a", "lead"]);
    }

    #[test]
    fn single_assistant() {
        let turn = params(r#"{"prompt": "hi", "assistant": "helper"}"#, &[], &[])
            .into_turn(Family::Assistant)
            .unwrap();
        assert_eq!(turn.assistants, Some(AssistantSet::Single("helper".into())));
    }

    #[test]
    fn assistant_endpoint_needs_an_assistant() {
        let err = params(r#"{"prompt": "hi"}"#, &[], &[])
            .into_turn(Family::Assistant)
            .unwrap_err();
        assert_eq!(err.kind, "malformed-assistant-set");

        let err = params(r#"{"prompt": "hi", "assistants": ["only-one"]}"#, &[], &[])
            .into_turn(Family::Assistant)
            .unwrap_err();
        assert_eq!(err.kind, "malformed-assistant-set");
    }

    #[test]
    fn missing_prompt_and_bad_timeout() {
        let err = params("{}", &[], &[]).into_turn(Family::Completion).unwrap_err();
        assert_eq!(err.kind, "missing-prompt");

        let err = params(r#"{"prompt": "hi", "timeout": "soon"}"#, &[], &[])
            .into_turn(Family::Completion)
            .unwrap_err();
        assert_eq!(err.kind, "invalid-timeout");

        let turn = params(r#"{"prompt": "hi", "timeout": 30}"#, &[], &[])
            .into_turn(Family::Completion)
            .unwrap();
        assert_eq!(turn.timeout, Some(Duration::from_secs(30)));
    }
}
