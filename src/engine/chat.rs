//! Per-shift chat log with read tracking.
//!
//! The local list keeps the backend's creation order for the initial load
//! and arrival order for realtime inserts; it is never re-sorted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BackendError;
use crate::models::chat::{ChatMessage, NewChatMessage, SenderRole};
use crate::realtime::{
    ChannelEvent, ChannelKind, ChannelName, Filter, RealtimeBackend, Subscription, Table,
    parse_row, parse_rows,
};

pub const MAX_MESSAGE_CHARS: usize = 2_000;

fn shift_messages(shift_id: Uuid) -> Filter {
    Filter::new().eq("shiftId", shift_id)
}

fn unread_for(filter: Filter, reader_id: Uuid) -> Filter {
    filter.neq("senderId", reader_id).is_null("readAt")
}

/// Trimmed message text, or `None` when it cannot be sent.
pub fn normalize_text(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let length = trimmed.chars().count();
    (length > 0 && length <= MAX_MESSAGE_CHARS).then_some(trimmed)
}

pub async fn load_messages<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
) -> Result<Vec<ChatMessage>, BackendError> {
    let rows = backend
        .select(Table::ChatMessages, shift_messages(shift_id).order_by("createdAt"))
        .await?;
    Ok(parse_rows(Table::ChatMessages, &rows))
}

pub async fn insert_message<B: RealtimeBackend + ?Sized>(
    backend: &B,
    message: NewChatMessage,
) -> Result<ChatMessage, BackendError> {
    let row = serde_json::to_value(&message)
        .map_err(|err| BackendError::Malformed(format!("chat message: {err}")))?;
    let stored = backend.insert(Table::ChatMessages, row).await?;

    parse_row(Table::ChatMessages, &stored)
        .ok_or_else(|| BackendError::Malformed("stored chat message".to_string()))
}

/// Appends a message. Returns `false` when the text is empty or too long,
/// or the backend refused it, so the caller can restore the draft.
pub async fn send_chat_message<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
    sender_id: Uuid,
    sender_role: SenderRole,
    text: &str,
) -> bool {
    try_send(backend, shift_id, sender_id, sender_role, text)
        .await
        .is_some()
}

async fn try_send<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
    sender_id: Uuid,
    sender_role: SenderRole,
    text: &str,
) -> Option<ChatMessage> {
    let message = NewChatMessage {
        shift_id,
        sender_id,
        sender_role,
        text: normalize_text(text)?.to_string(),
    };

    match insert_message(backend, message).await {
        Ok(stored) => Some(stored),
        Err(err) => {
            warn!(shift_id = %shift_id, error = %err, "failed to send chat message");
            None
        }
    }
}

/// Marks every message of the shift not sent by `reader_id` as read.
/// Returns the rows that changed.
pub async fn mark_all_read<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
    reader_id: Uuid,
) -> Result<Vec<ChatMessage>, BackendError> {
    mark_all_read_at(backend, shift_id, reader_id, Utc::now()).await
}

pub async fn mark_all_read_at<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
    reader_id: Uuid,
    read_at: DateTime<Utc>,
) -> Result<Vec<ChatMessage>, BackendError> {
    let patch = json!({ "readAt": read_at });
    let rows = backend
        .update_where(
            Table::ChatMessages,
            unread_for(shift_messages(shift_id), reader_id),
            patch,
        )
        .await?;
    Ok(parse_rows(Table::ChatMessages, &rows))
}

pub async fn unread_count<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
    reader_id: Uuid,
) -> Result<usize, BackendError> {
    let rows = backend
        .select(
            Table::ChatMessages,
            unread_for(shift_messages(shift_id), reader_id),
        )
        .await?;
    Ok(rows.len())
}

/// Unread counts for several shifts in one query. Every requested shift is
/// present in the result, with zero when nothing is unread.
pub async fn unread_counts<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_ids: &[Uuid],
    reader_id: Uuid,
) -> Result<HashMap<Uuid, usize>, BackendError> {
    let mut counts: HashMap<Uuid, usize> = shift_ids.iter().map(|id| (*id, 0)).collect();
    if shift_ids.is_empty() {
        return Ok(counts);
    }

    let filter = unread_for(
        Filter::new().one_of("shiftId", shift_ids.iter().copied()),
        reader_id,
    );
    let rows = backend.select(Table::ChatMessages, filter).await?;

    for message in parse_rows::<ChatMessage>(Table::ChatMessages, &rows) {
        *counts.entry(message.shift_id).or_default() += 1;
    }
    Ok(counts)
}

/// One party's view of a shift conversation.
pub struct ChatStore<B> {
    backend: Arc<B>,
    shift_id: Uuid,
    self_id: Uuid,
    role: SenderRole,
    messages: Vec<ChatMessage>,
    subscription: Option<Subscription>,
}

impl<B: RealtimeBackend> ChatStore<B> {
    /// Subscribes to the shift's chat channel and loads the history. Either
    /// step may fail; the store then works with what it has.
    pub async fn open(backend: Arc<B>, shift_id: Uuid, self_id: Uuid, role: SenderRole) -> Self {
        let channel = ChannelName::for_shift(ChannelKind::Chat, shift_id);
        let subscription = match backend.subscribe(&channel, shift_messages(shift_id)) {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(channel = %channel, error = %err, "chat feed unavailable");
                None
            }
        };

        let mut store = Self {
            backend,
            shift_id,
            self_id,
            role,
            messages: Vec::new(),
            subscription,
        };
        store.reload().await;
        store
    }

    /// Replaces the local list with the backend's. Keeps the current list
    /// when the backend cannot be reached.
    pub async fn reload(&mut self) -> bool {
        match load_messages(self.backend.as_ref(), self.shift_id).await {
            Ok(messages) => {
                self.messages = messages;
                true
            }
            Err(err) => {
                warn!(shift_id = %self.shift_id, error = %err, "failed to load chat messages");
                false
            }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_unread_for(self.self_id))
            .count()
    }

    pub async fn send(&mut self, text: &str) -> bool {
        let sent = try_send(
            self.backend.as_ref(),
            self.shift_id,
            self.self_id,
            self.role,
            text,
        )
        .await;

        match sent {
            Some(stored) => {
                // The realtime echo of this insert is deduplicated by id.
                self.append(stored);
                true
            }
            None => false,
        }
    }

    /// Marks the counterpart's messages read locally right away, then in
    /// the backend. The local marks are undone when the backend refuses.
    /// Repeating the call changes nothing.
    pub async fn mark_all_read(&mut self) -> bool {
        let read_at = Utc::now();
        let mut changed = Vec::new();
        for message in &mut self.messages {
            if message.is_unread_for(self.self_id) {
                message.read_at = Some(read_at);
                changed.push(message.id);
            }
        }
        debug!(shift_id = %self.shift_id, changed = changed.len(), "marked messages read locally");

        let result =
            mark_all_read_at(self.backend.as_ref(), self.shift_id, self.self_id, read_at).await;
        match result {
            Ok(_) => true,
            Err(err) => {
                warn!(shift_id = %self.shift_id, error = %err, "failed to mark messages read");
                for message in &mut self.messages {
                    if changed.contains(&message.id) && message.read_at == Some(read_at) {
                        message.read_at = None;
                    }
                }
                false
            }
        }
    }

    /// Applies one realtime event. Returns whether the local list changed.
    pub fn apply_event(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Insert {
                table: Table::ChatMessages,
                row,
            } => match parse_row::<ChatMessage>(Table::ChatMessages, &row) {
                Some(message) if message.shift_id == self.shift_id => self.append(message),
                _ => false,
            },
            ChannelEvent::Update {
                table: Table::ChatMessages,
                row,
            } => match parse_row::<ChatMessage>(Table::ChatMessages, &row) {
                Some(message) => self.patch(message),
                None => false,
            },
            _ => false,
        }
    }

    /// Waits for the next event that changes the list. Returns `false` once
    /// the feed is gone.
    pub async fn next_change(&mut self) -> bool {
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                return false;
            };
            let Some(event) = subscription.next().await else {
                self.subscription = None;
                return false;
            };
            if self.apply_event(event) {
                return true;
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn append(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|existing| existing.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    fn patch(&mut self, message: ChatMessage) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|existing| existing.id == message.id)
        {
            Some(existing) if *existing != message => {
                *existing = message;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_MESSAGE_CHARS, normalize_text};

    #[test]
    fn text_is_trimmed() {
        assert_eq!(normalize_text("  chego em 5 min \n"), Some("chego em 5 min"));
    }

    #[test]
    fn blank_or_oversized_text_is_rejected() {
        assert_eq!(normalize_text("   "), None);
        assert_eq!(normalize_text(""), None);

        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(normalize_text(&long), None);

        let exact = "á".repeat(MAX_MESSAGE_CHARS);
        assert!(normalize_text(&exact).is_some());
    }
}
