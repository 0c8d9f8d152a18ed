use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transient "is typing" broadcast. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub shift_id: Uuid,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
}
