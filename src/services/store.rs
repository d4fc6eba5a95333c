// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client-side record cache with change reconciliation.
//!
//! The backend is the source of truth; a [`RecordStore`] is a cache fed by
//! two independent paths (results of our own writes and pushed change
//! notifications). Both paths may deliver the same logical change, in
//! either order, any number of times. Every change is therefore keyed on
//! the primary key:
//!
//! - INSERT and UPDATE upsert the full record (last applied wins, no
//!   field merge), so a duplicate delivery replaces rather than appends.
//! - DELETE removes the id; deleting an unknown id is a no-op.
//!
//! Two *different* changes to the same id arriving in the wrong order are
//! not detected: the last one applied wins.

use std::collections::{BTreeMap, HashSet};

use crate::models::{ChangeEvent, Record};

/// What [`RecordStore::apply_change`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new id was added.
    Inserted,
    /// An existing record was overwritten.
    Replaced,
    /// A record was removed.
    Removed,
    /// Nothing changed (identical record, or delete of an unknown id).
    Unchanged,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        self != ApplyOutcome::Unchanged
    }
}

/// Cache of records keyed by primary key.
///
/// Iteration is in id order, so every derived view is deterministic.
#[derive(Debug, Clone)]
pub struct RecordStore<T> {
    records: BTreeMap<String, T>,
}

impl<T> Default for RecordStore<T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }
}

impl<T: Record + PartialEq> RecordStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a fetched record list. Later duplicates win.
    pub fn from_records(records: impl IntoIterator<Item = T>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Apply one change event.
    pub fn apply_change(&mut self, event: ChangeEvent<T>) -> ApplyOutcome {
        match event {
            // An UPDATE for an id we never saw is kept: with two delivery
            // paths it may simply have overtaken its INSERT.
            ChangeEvent::Insert(record) | ChangeEvent::Update(record) => self.upsert(record),
            ChangeEvent::Delete { id } => match self.records.remove(&id) {
                Some(_) => ApplyOutcome::Removed,
                None => ApplyOutcome::Unchanged,
            },
        }
    }

    fn upsert(&mut self, record: T) -> ApplyOutcome {
        match self.records.get_mut(record.id()) {
            Some(existing) if *existing == record => ApplyOutcome::Unchanged,
            Some(existing) => {
                *existing = record;
                ApplyOutcome::Replaced
            }
            None => {
                self.records.insert(record.id().to_string(), record);
                ApplyOutcome::Inserted
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.values()
    }

    /// Owned copy of every record, in id order.
    pub fn records(&self) -> Vec<T> {
        self.records.values().cloned().collect()
    }

    /// Replace the cache with authoritative rows from a full fetch.
    ///
    /// Records whose id is in `keep` (optimistic rows whose write has not
    /// completed yet) survive even though the server does not know them.
    pub fn replace_all(&mut self, fresh: impl IntoIterator<Item = T>, keep: &HashSet<String>) {
        let mut next: BTreeMap<String, T> = self
            .records
            .iter()
            .filter(|(id, _)| keep.contains(*id))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        for record in fresh {
            next.insert(record.id().to_string(), record);
        }
        self.records = next;
    }

    /// Remove every record matching `pred`; returns how many were removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !pred(r));
        before - self.records.len()
    }
}
