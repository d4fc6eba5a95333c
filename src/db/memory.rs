// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process backend.
//!
//! Behaves like the hosted backend as far as the session can tell: it
//! assigns ids and timestamps, cascades itinerary deletes, and pushes a
//! notification for every committed write to each matching subscriber.
//! Used for offline mode and tests, which can also make writes fail and
//! drop live feeds on demand.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use validator::Validate;

use crate::db::{ChangeFeed, ChangeFilter, DataStore, FeedMessage};
use crate::error::{AppError, Result};
use crate::models::{
    Activity, ActivityPatch, ChangeEvent, Itinerary, NewActivity, NewItinerary, Notification,
    Record,
};
use crate::time_utils::format_utc_rfc3339;

const DEFAULT_FEED_BUFFER: usize = 64;

struct Subscriber {
    filter: ChangeFilter,
    tx: mpsc::Sender<FeedMessage>,
}

#[derive(Default)]
struct Tables {
    itineraries: DashMap<String, Itinerary>,
    activities: DashMap<String, Activity>,
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
    failing_writes: AtomicUsize,
}

/// In-memory database.
#[derive(Clone)]
pub struct MemoryDb {
    inner: Arc<Tables>,
    feed_buffer: usize,
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::with_feed_buffer(DEFAULT_FEED_BUFFER)
    }

    /// Database whose feeds hold at most `feed_buffer` undelivered
    /// notifications. A subscriber that falls further behind is
    /// disconnected.
    pub fn with_feed_buffer(feed_buffer: usize) -> Self {
        Self {
            inner: Arc::new(Tables::default()),
            feed_buffer: feed_buffer.max(1),
        }
    }

    // ─── Test controls ───────────────────────────────────────────

    /// Store a row directly, without notifying anyone.
    pub fn seed_itinerary(&self, itinerary: Itinerary) {
        self.inner
            .itineraries
            .insert(itinerary.id.clone(), itinerary);
    }

    /// Store a row directly, without notifying anyone.
    pub fn seed_activity(&self, activity: Activity) {
        self.inner.activities.insert(activity.id.clone(), activity);
    }

    /// Make the next `count` writes fail as if the connection dropped.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Disconnect every live feed.
    pub fn drop_feeds(&self, reason: &str) {
        let ids: Vec<u64> = self.inner.subscribers.iter().map(|s| *s.key()).collect();
        for id in ids {
            if let Some((_, sub)) = self.inner.subscribers.remove(&id) {
                let _ = sub.tx.try_send(FeedMessage::Dropped(reason.to_string()));
            }
        }
        tracing::info!(reason, "Dropped all change feeds");
    }

    /// Number of live feeds. Feeds whose receiver is gone do not count.
    pub fn subscriber_count(&self) -> usize {
        self.prune_closed();
        self.inner.subscribers.len()
    }

    pub fn itinerary(&self, id: &str) -> Option<Itinerary> {
        self.inner.itineraries.get(id).map(|r| r.value().clone())
    }

    pub fn activity(&self, id: &str) -> Option<Activity> {
        self.inner.activities.get(id).map(|r| r.value().clone())
    }

    pub fn activity_count(&self) -> usize {
        self.inner.activities.len()
    }

    // ─── Internals ───────────────────────────────────────────────

    fn take_failure(&self) -> Result<()> {
        let failed = self
            .inner
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::Backend("connection reset (injected)".to_string()));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", prefix, n)
    }

    fn owner_of_itinerary(&self, itinerary_id: &str) -> Option<String> {
        self.inner
            .itineraries
            .get(itinerary_id)
            .map(|r| r.user_id.clone())
    }

    fn prune_closed(&self) {
        self.inner.subscribers.retain(|id, sub| {
            let open = !sub.tx.is_closed();
            if !open {
                tracing::debug!(subscriber = *id, "Change feed closed by consumer");
            }
            open
        });
    }

    fn publish<T: Record + Serialize>(&self, event: &ChangeEvent<T>, owner: Option<&str>) {
        let notification = match Notification::from_event(event) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode notification");
                return;
            }
        };

        self.prune_closed();

        let mut disconnected = Vec::new();
        for sub in self.inner.subscribers.iter() {
            let filter = &sub.filter;
            if filter.table != T::TABLE {
                continue;
            }
            if let Some(user_id) = &filter.user_id {
                if owner != Some(user_id.as_str()) {
                    continue;
                }
            }
            if let Err(e) = sub.tx.try_send(FeedMessage::Change(notification.clone())) {
                // A full buffer means the consumer can no longer be kept
                // consistent; closing the channel forces it to resync.
                tracing::warn!(subscriber = *sub.key(), error = %e, "Disconnecting change feed");
                disconnected.push(*sub.key());
            }
        }
        for id in disconnected {
            self.inner.subscribers.remove(&id);
        }
    }
}

#[async_trait]
impl DataStore for MemoryDb {
    async fn list_itineraries(&self, user_id: &str) -> Result<Vec<Itinerary>> {
        let mut rows: Vec<Itinerary> = self
            .inner
            .itineraries
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_activities(&self, itinerary_ids: &[String]) -> Result<Vec<Activity>> {
        let mut rows: Vec<Activity> = self
            .inner
            .activities
            .iter()
            .filter(|r| itinerary_ids.contains(&r.itinerary_id))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_itinerary(&self, user_id: &str, input: &NewItinerary) -> Result<Itinerary> {
        self.take_failure()?;
        input.validate()?;

        let row = Itinerary {
            id: self.next_id("itinerary"),
            user_id: user_id.to_string(),
            title: input.title.clone(),
            description: input.description.clone(),
            start_date: input.start_date,
            end_date: input.end_date,
            budget: input.budget,
            created_at: Some(format_utc_rfc3339(Utc::now())),
        };
        self.inner.itineraries.insert(row.id.clone(), row.clone());
        self.publish(&ChangeEvent::Insert(row.clone()), Some(user_id));
        Ok(row)
    }

    async fn insert_activity(&self, input: &NewActivity) -> Result<Activity> {
        self.take_failure()?;
        input.validate()?;

        let owner = self.owner_of_itinerary(&input.itinerary_id).ok_or_else(|| {
            AppError::Backend(format!(
                "{}: itinerary {} does not exist",
                AppError::BACKEND_REJECTED,
                input.itinerary_id
            ))
        })?;

        let row = Activity {
            id: self.next_id("activity"),
            itinerary_id: input.itinerary_id.clone(),
            name: input.name.clone(),
            cost: input.cost,
            date: input.date,
            created_at: Some(format_utc_rfc3339(Utc::now())),
        };
        self.inner.activities.insert(row.id.clone(), row.clone());
        self.publish(&ChangeEvent::Insert(row.clone()), Some(&owner));
        Ok(row)
    }

    async fn update_activity(&self, id: &str, patch: &ActivityPatch) -> Result<Activity> {
        self.take_failure()?;
        patch.validate()?;

        let row = {
            let mut entry = self
                .inner
                .activities
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("activity {}", id)))?;
            let patched = patch.apply_to(&entry);
            *entry = patched.clone();
            patched
        };
        let owner = self.owner_of_itinerary(&row.itinerary_id);
        self.publish(&ChangeEvent::Update(row.clone()), owner.as_deref());
        Ok(row)
    }

    async fn delete_activity(&self, id: &str) -> Result<()> {
        self.take_failure()?;

        if let Some((_, row)) = self.inner.activities.remove(id) {
            let owner = self.owner_of_itinerary(&row.itinerary_id);
            self.publish(&ChangeEvent::<Activity>::delete(id), owner.as_deref());
        }
        Ok(())
    }

    async fn delete_itinerary(&self, id: &str) -> Result<()> {
        self.take_failure()?;

        let Some((_, trip)) = self.inner.itineraries.remove(id) else {
            return Ok(());
        };

        let children: Vec<String> = self
            .inner
            .activities
            .iter()
            .filter(|r| r.itinerary_id == id)
            .map(|r| r.key().clone())
            .collect();
        for child in &children {
            self.inner.activities.remove(child);
            self.publish(&ChangeEvent::<Activity>::delete(child.as_str()), Some(&trip.user_id));
        }
        self.publish(&ChangeEvent::<Itinerary>::delete(id), Some(&trip.user_id));

        tracing::debug!(itinerary_id = id, activities = children.len(), "Deleted itinerary");
        Ok(())
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeFeed> {
        let (tx, rx) = mpsc::channel(self.feed_buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(subscriber = id, table = filter.table.as_str(), "Change feed opened");
        self.inner.subscribers.insert(id, Subscriber { filter, tx });
        Ok(ChangeFeed::new(rx))
    }
}
