use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorklogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorklogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(WorklogError::invalid_argument(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

/// Token counts reported by an LLM provider. Providers disagree on which
/// counters exist, so absent counters stay absent and unknown ones are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenUsage {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        TokenUsage {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            total_tokens: Some(input_tokens.saturating_add(output_tokens)),
            extra: Map::new(),
        }
    }
}

/// One tool invocation made while producing an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const MODEL_KEY: &str = "model";
const USAGE_KEY: &str = "usage";
const PROCESSING_TIME_KEY: &str = "processing_time_ms";
const TOOL_CALLS_KEY: &str = "tool_calls";
const ERROR_KEY: &str = "error";

/// Attributes attached to a message after the fact.
///
/// The object is stored and exported exactly as given. The getters below
/// read well-known keys leniently: a missing or differently shaped value
/// reads as `None` and is never rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageMetadata(Map<String, Value>);

impl MessageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        let mut meta = Self::new();
        meta.insert(MODEL_KEY, Value::String(model.into()));
        meta
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        // TokenUsage only holds integers and JSON values.
        if let Ok(value) = serde_json::to_value(usage) {
            self.insert(USAGE_KEY, value);
        }
        self
    }

    pub fn with_processing_time_ms(mut self, millis: u64) -> Self {
        self.insert(PROCESSING_TIME_KEY, Value::from(millis));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.insert(ERROR_KEY, Value::String(error.into()));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn model(&self) -> Option<&str> {
        self.get(MODEL_KEY).and_then(Value::as_str)
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        self.get(USAGE_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Accepts integer and fractional values.
    pub fn processing_time_ms(&self) -> Option<f64> {
        self.get(PROCESSING_TIME_KEY).and_then(Value::as_f64)
    }

    /// Entries that do not look like a tool call are skipped.
    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.get(TOOL_CALLS_KEY)
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| serde_json::from_value(c.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn error(&self) -> Option<&str> {
        self.get(ERROR_KEY).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for MessageMetadata {
    fn from(map: Map<String, Value>) -> Self {
        MessageMetadata(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_roundtrip_through_str() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!(" Assistant ".parse::<Role>().unwrap(), Role::Assistant);
        assert!(matches!(
            "tool".parse::<Role>(),
            Err(WorklogError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::System).unwrap(), json!("system"));
        let role: Role = serde_json::from_value(json!("user")).unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_token_usage_total_saturates() {
        let usage = TokenUsage::new(i64::MAX, 5);
        assert_eq!(usage.total_tokens, Some(i64::MAX));
        assert_eq!(TokenUsage::new(120, 30).total_tokens, Some(150));
    }

    #[test]
    fn test_token_usage_does_not_invent_counters() {
        let raw = json!({"input_tokens": 5, "cache_read_tokens": 7});
        let usage: TokenUsage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(usage.input_tokens, Some(5));
        assert_eq!(usage.output_tokens, None);
        assert_eq!(usage.extra.get("cache_read_tokens"), Some(&json!(7)));
        assert_eq!(serde_json::to_value(&usage).unwrap(), raw);
    }

    #[test]
    fn test_metadata_builders() {
        let meta = MessageMetadata::with_model("claude-sonnet")
            .with_usage(TokenUsage::new(10, 4))
            .with_processing_time_ms(2300);
        assert_eq!(
            serde_json::to_value(&meta).unwrap(),
            json!({
                "model": "claude-sonnet",
                "usage": {"input_tokens": 10, "output_tokens": 4, "total_tokens": 14},
                "processing_time_ms": 2300
            })
        );
        assert_eq!(meta.model(), Some("claude-sonnet"));
        assert_eq!(meta.usage(), Some(TokenUsage::new(10, 4)));
        assert_eq!(meta.processing_time_ms(), Some(2300.0));
    }

    #[test]
    fn test_metadata_is_kept_verbatim() {
        let raw = r#"{"usage":{"input_tokens":5,"cache_read_tokens":7},"processing_time_ms":2.5,"tool_calls":[{"name":"gitlab_list_commits","arguments":{"project":"core"}},"not-a-call"],"trace":{"spans":[{"id":"a","attrs":{"x":null}}]},"model":42}"#;
        let meta: MessageMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(serde_json::to_string(&meta).unwrap(), raw);

        assert_eq!(meta.processing_time_ms(), Some(2.5));
        assert_eq!(meta.usage().unwrap().extra.get("cache_read_tokens"), Some(&json!(7)));
        assert_eq!(meta.tool_calls().len(), 1);
        assert_eq!(meta.tool_calls()[0].name, "gitlab_list_commits");
        assert_eq!(meta.model(), None);
        assert!(meta.get("trace").is_some());
    }

    #[test]
    fn test_metadata_must_be_an_object() {
        assert!(serde_json::from_str::<MessageMetadata>("[1, 2]").is_err());
        assert!(serde_json::from_str::<MessageMetadata>("{}").unwrap().is_empty());
    }

    #[test]
    fn test_metadata_is_empty() {
        assert!(MessageMetadata::default().is_empty());
        assert!(!MessageMetadata::with_model("m").is_empty());
    }
}
