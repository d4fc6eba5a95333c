// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Change events: the typed form the stores consume, and the raw
//! notification tuple the backend delivers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Record, Table};
use crate::error::{AppError, Result};

/// Kind of change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A typed change to one record.
///
/// Deletes carry only the primary key; the backend is not required to
/// send the old row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete { id: String },
}

impl<T: Record> ChangeEvent<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Primary key the event targets.
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => r.id(),
            ChangeEvent::Delete { id } => id,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        ChangeEvent::Delete { id: id.into() }
    }
}

/// Raw change notification as delivered by the backend:
/// `{table, event_type, new_record?, old_record?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub table: Table,
    pub event_type: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
}

impl Notification {
    /// Build a notification from a typed event.
    pub fn from_event<T: Record + Serialize>(event: &ChangeEvent<T>) -> Result<Self> {
        let encode = |record: &T| {
            serde_json::to_value(record)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Encode record: {}", e)))
        };
        let (new_record, old_record) = match event {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => (Some(encode(r)?), None),
            ChangeEvent::Delete { id } => (None, Some(serde_json::json!({ "id": id }))),
        };
        Ok(Self {
            table: T::TABLE,
            event_type: event.kind(),
            new_record,
            old_record,
        })
    }

    /// Decode into a typed event for `T`.
    pub fn decode<T: Record + DeserializeOwned>(&self) -> Result<ChangeEvent<T>> {
        if self.table != T::TABLE {
            return Err(AppError::Feed(format!(
                "Notification for table {} decoded as {}",
                self.table.as_str(),
                T::TABLE.as_str()
            )));
        }

        match self.event_type {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = self.new_record.clone().ok_or_else(|| {
                    AppError::Feed(format!(
                        "{:?} on {} without new_record",
                        self.event_type,
                        self.table.as_str()
                    ))
                })?;
                let record: T = serde_json::from_value(row)
                    .map_err(|e| AppError::Feed(format!("Malformed record: {}", e)))?;
                Ok(match self.event_type {
                    ChangeKind::Insert => ChangeEvent::Insert(record),
                    _ => ChangeEvent::Update(record),
                })
            }
            ChangeKind::Delete => {
                let id = self
                    .old_record
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AppError::Feed(format!("DELETE on {} without old id", self.table.as_str()))
                    })?;
                Ok(ChangeEvent::delete(id))
            }
        }
    }
}
