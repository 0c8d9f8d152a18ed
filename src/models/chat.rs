use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Restaurant,
    Rider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub shift_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: SenderRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn is_unread_for(&self, reader_id: Uuid) -> bool {
        self.sender_id != reader_id && self.read_at.is_none()
    }
}

/// Insert payload; id and createdAt are assigned by the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatMessage {
    pub shift_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: SenderRole,
    pub text: String,
}
