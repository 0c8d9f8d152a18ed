//! Push notifications. Sending is fire-and-forget: the caller never learns
//! whether delivery worked, failures only show up in the logs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_TITLE: &str = "MotoExtra";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_id: Option<Uuid>,
}

impl Default for PushPayload {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            body: String::new(),
            url: None,
            shift_id: None,
        }
    }
}

impl PushPayload {
    /// Parses a payload field by field; unreadable input or fields fall
    /// back to defaults instead of failing.
    pub fn from_json_lenient(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "unparsable push payload; using defaults");
                return Self::default();
            }
        };

        let text = |field: &str| {
            value
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|text| !text.trim().is_empty())
        };

        Self {
            title: text("title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: text("body").unwrap_or_default(),
            url: text("url"),
            shift_id: text("shiftId").and_then(|raw| Uuid::parse_str(&raw).ok()),
        }
    }

    pub fn new_chat_message(shift_id: Uuid, preview: &str) -> Self {
        let body: String = preview.chars().take(120).collect();
        Self {
            title: "Nova mensagem".to_string(),
            body,
            url: None,
            shift_id: Some(shift_id),
        }
    }
}

pub trait Notifier: Send + Sync + 'static {
    /// Queues a notification for `target` and returns immediately.
    fn notify(&self, target: Uuid, payload: PushPayload);
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, target: Uuid, payload: PushPayload) {
        info!(target_id = %target, title = %payload.title, "push notification (log only)");
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookRequest {
    target_id: Uuid,
    #[serde(flatten)]
    payload: PushPayload,
}

/// Forwards notifications to an HTTP endpoint that does the actual push.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, target: Uuid, payload: PushPayload) {
        let client = self.client.clone();
        let url = self.url.clone();
        let request = WebhookRequest {
            target_id: target,
            payload,
        };

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&request)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);

            match result {
                Ok(_) => info!(target_id = %target, "push notification sent"),
                Err(err) => warn!(target_id = %target, error = %err, "push notification failed"),
            }
        });
    }
}
