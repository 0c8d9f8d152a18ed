use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelEvent, ChannelName, Filter, RealtimeBackend, RowKey, Subscription, Table};
use crate::error::BackendError;

/// Process-local backend: tables live in memory and change events fan out
/// over one broadcast channel per channel name.
pub struct InMemoryBackend {
    tables: DashMap<Table, Vec<Value>>,
    channels: DashMap<ChannelName, broadcast::Sender<ChannelEvent>>,
    buffer_size: usize,
    reject_writes: AtomicBool,
}

impl InMemoryBackend {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            tables: DashMap::new(),
            channels: DashMap::new(),
            buffer_size: buffer_size.max(1),
            reject_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent write fail with [`BackendError::Rejected`],
    /// the way an RLS policy or a dropped connection would.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.tables.get(&table).map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), BackendError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("writes are disabled".to_string()));
        }
        Ok(())
    }

    fn sender(&self, channel: &ChannelName) -> broadcast::Sender<ChannelEvent> {
        self.channels
            .entry(channel.clone())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }

    fn publish_row_event(&self, table: Table, event: ChannelEvent) {
        let Some(shift_id) = event
            .row()
            .and_then(|row| row.get("shiftId"))
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
        else {
            return;
        };

        let channel = ChannelName::for_shift(table.channel_kind(), shift_id);
        self.publish(&channel, event);
    }

    fn publish(&self, channel: &ChannelName, event: ChannelEvent) {
        let delivered = self
            .channels
            .get(channel)
            .and_then(|sender| sender.send(event).ok())
            .unwrap_or(0);

        if delivered == 0 {
            // Drop senders nobody listens to any more.
            self.channels
                .remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }
    }
}

fn as_object(row: Value) -> Result<Map<String, Value>, BackendError> {
    match row {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::Malformed(format!(
            "expected an object row, got {other}"
        ))),
    }
}

fn apply_defaults(table: Table, row: &mut Map<String, Value>) {
    let missing = |row: &Map<String, Value>, column: &str| {
        row.get(column).is_none_or(Value::is_null)
    };

    if missing(row, "id") {
        row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }

    if table == Table::ChatMessages {
        if missing(row, "createdAt") {
            row.insert("createdAt".to_string(), Value::String(Utc::now().to_rfc3339()));
        }
        row.entry("readAt").or_insert(Value::Null);
    }
}

#[async_trait]
impl RealtimeBackend for InMemoryBackend {
    async fn upsert_by_key(
        &self,
        table: Table,
        key_columns: &[&'static str],
        row: Value,
    ) -> Result<Value, BackendError> {
        self.check_writable()?;

        let key = RowKey::from_row(key_columns, &row).ok_or_else(|| {
            BackendError::Malformed(format!("row is missing key columns {key_columns:?}"))
        })?;
        let mut row = as_object(row)?;

        let event = {
            let mut rows = self.tables.entry(table).or_default();
            match rows.iter_mut().find(|existing| key.matches(existing)) {
                Some(existing) => {
                    if let Some(id) = existing.get("id") {
                        row.insert("id".to_string(), id.clone());
                    }
                    *existing = Value::Object(row);
                    ChannelEvent::Update {
                        table,
                        row: existing.clone(),
                    }
                }
                None => {
                    apply_defaults(table, &mut row);
                    let stored = Value::Object(row);
                    rows.push(stored.clone());
                    ChannelEvent::Insert { table, row: stored }
                }
            }
        };

        let stored = event.row().cloned().unwrap_or(Value::Null);
        self.publish_row_event(table, event);
        Ok(stored)
    }

    async fn delete_by_key(&self, table: Table, key: RowKey) -> Result<usize, BackendError> {
        self.check_writable()?;

        let removed: Vec<Value> = match self.tables.get_mut(&table) {
            Some(mut rows) => {
                let (removed, kept): (Vec<Value>, Vec<Value>) =
                    rows.drain(..).partition(|row| key.matches(row));
                *rows = kept;
                removed
            }
            None => Vec::new(),
        };

        debug!(table = table.as_str(), removed = removed.len(), "delete by key");

        let count = removed.len();
        for row in removed {
            self.publish_row_event(table, ChannelEvent::Delete { table, row });
        }
        Ok(count)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        self.check_writable()?;

        let mut row = as_object(row)?;
        apply_defaults(table, &mut row);
        let stored = Value::Object(row);

        self.tables.entry(table).or_default().push(stored.clone());
        self.publish_row_event(
            table,
            ChannelEvent::Insert {
                table,
                row: stored.clone(),
            },
        );
        Ok(stored)
    }

    async fn select(&self, table: Table, filter: Filter) -> Result<Vec<Value>, BackendError> {
        let mut rows: Vec<Value> = self
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default();

        filter.sort(&mut rows);
        Ok(rows)
    }

    async fn update_where(
        &self,
        table: Table,
        filter: Filter,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        self.check_writable()?;

        let patch = as_object(patch)?;
        let updated: Vec<Value> = match self.tables.get_mut(&table) {
            Some(mut rows) => rows
                .iter_mut()
                .filter(|row| filter.matches(row))
                .filter_map(|row| {
                    let fields = row.as_object_mut()?;
                    for (column, value) in &patch {
                        fields.insert(column.clone(), value.clone());
                    }
                    Some(row.clone())
                })
                .collect(),
            None => Vec::new(),
        };

        for row in &updated {
            self.publish_row_event(
                table,
                ChannelEvent::Update {
                    table,
                    row: row.clone(),
                },
            );
        }
        Ok(updated)
    }

    async fn broadcast(
        &self,
        channel: &ChannelName,
        event: &str,
        payload: Value,
    ) -> Result<(), BackendError> {
        self.publish(
            channel,
            ChannelEvent::Broadcast {
                event: event.to_string(),
                payload,
            },
        );
        Ok(())
    }

    fn subscribe(
        &self,
        channel: &ChannelName,
        filter: Filter,
    ) -> Result<Subscription, BackendError> {
        let receiver = self.sender(channel).subscribe();
        debug!(channel = %channel, "subscribed");
        Ok(Subscription::new(channel.clone(), filter, receiver))
    }

    fn unsubscribe(&self, channel: &ChannelName) {
        if self.channels.remove(channel).is_some() {
            debug!(channel = %channel, "channel closed for all subscribers");
        }
    }
}
