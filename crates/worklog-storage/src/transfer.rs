//! JSON form used by history export and import.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use worklog_core::error::WorklogError;
use worklog_core::message::{MessageMetadata, Role};
use worklog_core::time::ensure_storable;

use crate::db::StoredMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedMessage {
    /// Informational only; imports always allocate fresh ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for ExportedMessage {
    fn from(msg: StoredMessage) -> Self {
        ExportedMessage {
            id: Some(msg.id),
            role: msg.role,
            content: msg.content,
            metadata: msg.metadata,
            created_at: msg.created_at,
        }
    }
}

pub fn encode(messages: Vec<StoredMessage>) -> Result<String, WorklogError> {
    let exported: Vec<ExportedMessage> = messages.into_iter().map(Into::into).collect();
    Ok(serde_json::to_string_pretty(&exported)?)
}

/// Parses the whole payload up front so a malformed file imports nothing.
pub fn decode(serialized: &str) -> Result<Vec<ExportedMessage>, WorklogError> {
    let messages: Vec<ExportedMessage> = serde_json::from_str(serialized)?;
    for (idx, msg) in messages.iter().enumerate() {
        ensure_storable(&msg.created_at).map_err(|e| match e {
            WorklogError::InvalidArgument(reason) => {
                WorklogError::InvalidArgument(format!("message {idx}: {reason}"))
            }
            other => other,
        })?;
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> StoredMessage {
        StoredMessage {
            id: 7,
            user_id: "u1".into(),
            role: Role::Assistant,
            content: "You merged 3 MRs this week.".into(),
            metadata: Some(MessageMetadata::with_model("claude-sonnet")),
            created_at: Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap(),
        }
    }

    #[test]
    fn test_encode_shape() {
        let text = encode(vec![sample()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!([{
                "id": 7,
                "role": "assistant",
                "content": "You merged 3 MRs this week.",
                "metadata": {"model": "claude-sonnet"},
                "created_at": "2024-03-04T05:06:07Z"
            }])
        );
        // user_id is implied by the accessor and never exported
        assert!(!text.contains("u1"));
    }

    #[test]
    fn test_decode_accepts_browser_style_payload() {
        let payload = r#"[
            {"role": "user", "content": "what did I do?", "created_at": "2024-03-04T05:06:07.123Z"},
            {"id": 99, "role": "assistant", "content": "stuff", "metadata": null,
             "created_at": "2024-03-04T07:06:08+02:00"}
        ]"#;
        let decoded = decode(payload).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].id, None);
        assert_eq!(decoded[1].metadata, None);
        assert_eq!(
            decoded[1].created_at,
            Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 8).unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_unknown_role() {
        let payload = r#"[{"role": "tool", "content": "x", "created_at": "2024-03-04T05:06:07Z"}]"#;
        assert!(matches!(decode(payload), Err(WorklogError::Json(_))));
    }

    #[test]
    fn test_decode_rejects_unstorable_created_at() {
        let payload = r#"[
            {"role": "user", "content": "fine", "created_at": "2024-03-04T05:06:07Z"},
            {"role": "user", "content": "far", "created_at": "+10000-01-01T00:00:00Z"}
        ]"#;
        let err = decode(payload).unwrap_err();
        assert!(matches!(err, WorklogError::InvalidArgument(_)));
        assert!(err.to_string().contains("message 1"));
    }

    #[test]
    fn test_decode_rejects_non_array() {
        assert!(matches!(decode(r#"{"role": "user"}"#), Err(WorklogError::Json(_))));
    }
}
