use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Message;

/// Transport envelope wrapped around every bus payload.
///
/// The `type`/`payload` pair comes from the flattened [`Message`] enum; the
/// remaining fields are delivery metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(alias = "sender_id")]
    pub sender_id: String,
    #[serde(alias = "message_id")]
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(
        default,
        alias = "correlation_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<Uuid>,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Wrap a payload in a fresh envelope.
    pub fn new(sender_id: impl Into<String>, message: Message) -> Self {
        Self {
            sender_id: sender_id.into(),
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            message,
        }
    }

    /// Build a response envelope correlated to this one.
    pub fn reply_with(&self, sender_id: impl Into<String>, message: Message) -> Self {
        Self {
            correlation_id: Some(self.message_id),
            ..Self::new(sender_id, message)
        }
    }
}
