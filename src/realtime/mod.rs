//! Realtime channel abstraction.
//!
//! A backend stores rows in a handful of tables and fans changes out over
//! named channels, one per conversation kind per shift. Rows cross this
//! boundary as JSON and are parsed into typed models with [`parse_row`],
//! which treats anything malformed as absent.

pub mod memory;
mod subscription;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::BackendError;

pub use subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    LocationSamples,
    RouteHistory,
    ChatMessages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::LocationSamples => "location_samples",
            Table::RouteHistory => "route_history",
            Table::ChatMessages => "chat_messages",
        }
    }

    /// Channel that carries change events for rows of this table.
    pub fn channel_kind(&self) -> ChannelKind {
        match self {
            Table::LocationSamples | Table::RouteHistory => ChannelKind::Location,
            Table::ChatMessages => ChannelKind::Chat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Location,
    Typing,
    Chat,
}

impl ChannelKind {
    fn prefix(&self) -> &'static str {
        match self {
            ChannelKind::Location => "location",
            ChannelKind::Typing => "typing",
            ChannelKind::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn for_shift(kind: ChannelKind, shift_id: Uuid) -> Self {
        Self(format!("{}:{shift_id}", kind.prefix()))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, shift) = raw.split_once(':')?;
        let kind = [ChannelKind::Location, ChannelKind::Typing, ChannelKind::Chat]
            .into_iter()
            .find(|kind| kind.prefix() == prefix)?;
        let shift_id = Uuid::parse_str(shift).ok()?;
        Some(Self::for_shift(kind, shift_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    Insert { table: Table, row: Value },
    Update { table: Table, row: Value },
    /// Carries the row as it was before removal.
    Delete { table: Table, row: Value },
    Broadcast { event: String, payload: Value },
}

impl ChannelEvent {
    pub fn row(&self) -> Option<&Value> {
        match self {
            ChannelEvent::Insert { row, .. }
            | ChannelEvent::Update { row, .. }
            | ChannelEvent::Delete { row, .. } => Some(row),
            ChannelEvent::Broadcast { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(&'static str, Value),
    Neq(&'static str, Value),
    IsNull(&'static str),
    In(&'static str, Vec<Value>),
}

impl Condition {
    fn matches(&self, row: &Value) -> bool {
        let field = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Condition::Eq(column, value) => field(column) == value,
            Condition::Neq(column, value) => field(column) != value,
            Condition::IsNull(column) => field(column).is_null(),
            Condition::In(column, values) => values.contains(field(column)),
        }
    }
}

/// Row predicate plus an optional ascending sort column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    order_by: Option<&'static str>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Eq(column, to_value(value)));
        self
    }

    pub fn neq(mut self, column: &'static str, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Neq(column, to_value(value)));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.conditions.push(Condition::IsNull(column));
        self
    }

    pub fn one_of<T: Serialize>(
        mut self,
        column: &'static str,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        let values = values.into_iter().map(to_value).collect();
        self.conditions.push(Condition::In(column, values));
        self
    }

    pub fn order_by(mut self, column: &'static str) -> Self {
        self.order_by = Some(column);
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|condition| condition.matches(row))
    }

    pub fn sort(&self, rows: &mut [Value]) {
        if let Some(column) = self.order_by {
            rows.sort_by(|a, b| {
                compare_values(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                )
            });
        }
    }
}

/// Composite identity of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey(Vec<(&'static str, Value)>);

impl RowKey {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, column: &'static str, value: impl Serialize) -> Self {
        self.0.push((column, to_value(value)));
        self
    }

    /// Extracts the key from a row; `None` when a key column is missing.
    pub fn from_row(columns: &[&'static str], row: &Value) -> Option<Self> {
        columns
            .iter()
            .map(|column| {
                row.get(*column)
                    .filter(|value| !value.is_null())
                    .map(|value| (*column, value.clone()))
            })
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.0
            .iter()
            .all(|(column, value)| row.get(*column) == Some(value))
    }
}

impl Default for RowKey {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait RealtimeBackend: Send + Sync + 'static {
    /// Inserts the row, or replaces the row with the same key. Returns the
    /// stored row.
    async fn upsert_by_key(
        &self,
        table: Table,
        key_columns: &[&'static str],
        row: Value,
    ) -> Result<Value, BackendError>;

    /// Removes every row matching the key. Deleting an absent key is not an
    /// error.
    async fn delete_by_key(&self, table: Table, key: RowKey) -> Result<usize, BackendError>;

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError>;

    async fn select(&self, table: Table, filter: Filter) -> Result<Vec<Value>, BackendError>;

    /// Merges `patch` into every matching row and returns the updated rows.
    async fn update_where(
        &self,
        table: Table,
        filter: Filter,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError>;

    /// Fire a transient event to current subscribers of the channel.
    async fn broadcast(
        &self,
        channel: &ChannelName,
        event: &str,
        payload: Value,
    ) -> Result<(), BackendError>;

    fn subscribe(&self, channel: &ChannelName, filter: Filter)
    -> Result<Subscription, BackendError>;

    /// Closes the channel for every subscriber. Safe to repeat.
    fn unsubscribe(&self, channel: &ChannelName);
}

/// Parses a backend row into a model, treating malformed rows as absent.
pub fn parse_row<T: DeserializeOwned>(table: Table, row: &Value) -> Option<T> {
    match serde_json::from_value(row.clone()) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(table = table.as_str(), error = %err, "ignoring malformed row");
            None
        }
    }
}

pub fn parse_rows<T: DeserializeOwned>(table: Table, rows: &[Value]) -> Vec<T> {
    rows.iter().filter_map(|row| parse_row(table, row)).collect()
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Orders timestamps chronologically, numbers numerically and everything
/// else by its JSON text.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (as_timestamp(a), as_timestamp(b)) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.total_cmp(&b);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::{ChannelKind, ChannelName, Filter, RowKey, Table, parse_row};
    use crate::models::location::LocationSample;

    #[test]
    fn channel_names_are_scoped_per_kind_and_shift() {
        let shift = Uuid::from_u128(7);
        let other = Uuid::from_u128(8);

        let location = ChannelName::for_shift(ChannelKind::Location, shift);
        assert_eq!(location, ChannelName::for_shift(ChannelKind::Location, shift));
        assert_ne!(location, ChannelName::for_shift(ChannelKind::Typing, shift));
        assert_ne!(location, ChannelName::for_shift(ChannelKind::Location, other));
        assert_eq!(ChannelName::parse(location.as_str()), Some(location));
    }

    #[test]
    fn unknown_channel_names_are_rejected() {
        assert!(ChannelName::parse("presence:00000000-0000-0000-0000-000000000001").is_none());
        assert!(ChannelName::parse("chat:not-a-uuid").is_none());
        assert!(ChannelName::parse("chat").is_none());
    }

    #[test]
    fn filter_combines_conditions() {
        let me = Uuid::from_u128(1);
        let unread = Filter::new()
            .eq("shiftId", Uuid::from_u128(9))
            .neq("senderId", me)
            .is_null("readAt");

        let from_counterpart = json!({
            "shiftId": Uuid::from_u128(9),
            "senderId": Uuid::from_u128(2),
            "readAt": null,
        });
        let mine = json!({
            "shiftId": Uuid::from_u128(9),
            "senderId": me,
        });

        assert!(unread.matches(&from_counterpart));
        assert!(!unread.matches(&mine));
    }

    #[test]
    fn sort_orders_timestamps_chronologically() {
        let mut rows = vec![
            json!({ "createdAt": "2024-05-01T12:00:00.12Z" }),
            json!({ "createdAt": "2024-05-01T12:00:00.123Z" }),
            json!({ "createdAt": "2024-05-01T11:59:59Z" }),
        ];

        Filter::new().order_by("createdAt").sort(&mut rows);

        let order: Vec<&Value> = rows.iter().map(|row| &row["createdAt"]).collect();
        assert_eq!(
            order,
            vec![
                "2024-05-01T11:59:59Z",
                "2024-05-01T12:00:00.12Z",
                "2024-05-01T12:00:00.123Z"
            ]
        );
    }

    #[test]
    fn row_key_requires_every_column() {
        let row = json!({ "riderId": "a", "shiftId": "b", "lat": 1.0 });
        let key = RowKey::from_row(&LocationSample::KEY_COLUMNS, &row).unwrap();

        assert!(key.matches(&row));
        assert!(RowKey::from_row(&LocationSample::KEY_COLUMNS, &json!({ "riderId": "a" })).is_none());
    }

    #[test]
    fn malformed_rows_parse_as_absent() {
        let row = json!({ "shiftId": "nope", "lat": "north" });
        assert!(parse_row::<LocationSample>(Table::LocationSamples, &row).is_none());
    }
}
