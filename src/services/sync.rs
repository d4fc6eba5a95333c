// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync session: one user's cached itineraries and activities, kept
//! consistent with the backend.
//!
//! Write intents are optimistic. The local change is applied first, the
//! backend write is awaited, and then either the server row replaces the
//! optimistic one or exactly the optimistic change is undone and the
//! error is returned. Change notifications arrive independently through
//! [`SyncSession::subscribe`] and go through the same idempotent store
//! operations, so a write seen via both paths is applied once.
//!
//! Resyncs fetch without holding the session lock. Changes applied while a
//! fetch is outstanding are journaled and replayed over the fetched
//! snapshot, so a notification that arrives mid-fetch is not lost.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use validator::Validate;

use crate::db::{ChangeFeed, ChangeFilter, DataStore, FeedMessage};
use crate::error::{AppError, Result};
use crate::models::{
    Activity, ActivityPatch, ChangeEvent, DashboardStats, Itinerary, NewActivity,
    NewItinerary, Notification, Table,
};
use crate::services::aggregate::{bucketize, BudgetStatus, DayPlan, OutOfRangePolicy, TripTotals};
use crate::services::browse::{browse, BrowseOptions, TripSection};
use crate::services::store::{ApplyOutcome, RecordStore};
use crate::time_utils::today_local;

const MAX_CONCURRENT_FETCHES: usize = 8;
/// Itinerary ids per activity list request (keeps the query string short).
const ACTIVITY_FETCH_CHUNK: usize = 50;
const LOCAL_ID_PREFIX: &str = "local-";
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Everything the itinerary detail screen shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItineraryView {
    pub itinerary: Itinerary,
    pub plan: DayPlan,
    pub totals: TripTotals,
    /// Total spend against the itinerary's budget
    pub budget: BudgetStatus,
}

/// A change applied to the cache while a resync was fetching.
enum Replay {
    Itinerary(ChangeEvent<Itinerary>),
    Activity(ChangeEvent<Activity>),
}

#[derive(Default)]
struct SessionState {
    itineraries: RecordStore<Itinerary>,
    /// May hold rows whose itinerary has not arrived yet; views only show
    /// activities of cached itineraries.
    activities: RecordStore<Activity>,
    /// Ids of optimistic rows whose backend write has not completed.
    pending: HashSet<String>,
    journal: Option<Vec<Replay>>,
}

impl SessionState {
    /// Apply an itinerary change. Deleting an itinerary drops its
    /// activities with it.
    fn apply_itinerary(&mut self, event: ChangeEvent<Itinerary>) -> ApplyOutcome {
        if let Some(journal) = &mut self.journal {
            journal.push(Replay::Itinerary(event.clone()));
        }
        let deleted = match &event {
            ChangeEvent::Delete { id } => Some(id.clone()),
            _ => None,
        };
        let mut outcome = self.itineraries.apply_change(event);
        if let Some(id) = deleted {
            if self.activities.remove_where(|a| a.itinerary_id == id) > 0 {
                outcome = ApplyOutcome::Removed;
            }
        }
        outcome
    }

    fn apply_activity(&mut self, event: ChangeEvent<Activity>) -> ApplyOutcome {
        if let Some(journal) = &mut self.journal {
            journal.push(Replay::Activity(event.clone()));
        }
        self.activities.apply_change(event)
    }

    /// Activities whose itinerary is cached.
    fn visible_activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities
            .iter()
            .filter(|a| self.itineraries.contains(&a.itinerary_id))
    }
}

/// Stops journaling when a resync is abandoned before it applies.
struct JournalReset<'a> {
    state: &'a Mutex<SessionState>,
    armed: bool,
}

impl Drop for JournalReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.state.try_lock() {
                state.journal = None;
            }
        }
    }
}

struct Shared<D> {
    db: D,
    user_id: String,
    policy: OutOfRangePolicy,
    reconnect_delay: Duration,
    state: Mutex<SessionState>,
    /// Serializes resyncs; views never take it.
    resync_lock: Mutex<()>,
    revision: watch::Sender<u64>,
    next_local: AtomicU64,
}

/// A signed-in user's view of the backend.
pub struct SyncSession<D> {
    shared: Arc<Shared<D>>,
}

impl<D> Clone for SyncSession<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: DataStore> SyncSession<D> {
    pub fn new(db: D, user_id: impl Into<String>, policy: OutOfRangePolicy) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                db,
                user_id: user_id.into(),
                policy,
                reconnect_delay: DEFAULT_RECONNECT_DELAY,
                state: Mutex::new(SessionState::default()),
                resync_lock: Mutex::new(()),
                revision,
                next_local: AtomicU64::new(0),
            }),
        }
    }

    /// Base delay before reopening a dropped change feed. Only takes
    /// effect before the session is cloned or subscribed.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.reconnect_delay = delay,
            None => tracing::warn!("Session already shared; reconnect delay unchanged"),
        }
        self
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    pub fn db(&self) -> &D {
        &self.shared.db
    }

    /// Revision counter, bumped after every change to the cached stores.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    fn bump(&self) {
        self.shared.revision.send_modify(|r| *r += 1);
    }

    fn local_id(&self) -> String {
        let n = self.shared.next_local.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{}", LOCAL_ID_PREFIX, n)
    }

    // ─── Loading ─────────────────────────────────────────────────

    /// Initial fetch of the user's itineraries and their activities.
    pub async fn load(&self) -> Result<()> {
        self.resync().await
    }

    /// Replace the cache with authoritative server state.
    ///
    /// Optimistic rows still waiting on their write are kept. The session
    /// stays readable while the fetch is outstanding; changes applied in
    /// the meantime are replayed over the fetched rows.
    pub async fn resync(&self) -> Result<()> {
        let _running = self.shared.resync_lock.lock().await;
        let mut reset = JournalReset {
            state: &self.shared.state,
            armed: true,
        };
        self.shared.state.lock().await.journal = Some(Vec::new());

        let fetched = self.fetch_all().await;

        let mut state = self.shared.state.lock().await;
        let journal = state.journal.take().unwrap_or_default();
        reset.armed = false;
        let (itineraries, activities) = fetched?;

        let pending = state.pending.clone();
        state.itineraries.replace_all(itineraries, &pending);
        state.activities.replace_all(activities, &pending);
        // Pending activities may belong to itineraries the server no
        // longer has; those go before the journal brings in newer rows.
        let SessionState {
            itineraries,
            activities,
            ..
        } = &mut *state;
        activities.remove_where(|a| !itineraries.contains(&a.itinerary_id));

        let replayed = journal.len();
        for entry in journal {
            match entry {
                Replay::Itinerary(event) => state.apply_itinerary(event),
                Replay::Activity(event) => state.apply_activity(event),
            };
        }

        tracing::info!(
            user_id = %self.shared.user_id,
            itineraries = state.itineraries.len(),
            activities = state.activities.len(),
            pending = state.pending.len(),
            replayed,
            "Resynced from backend"
        );
        drop(state);
        self.bump();
        Ok(())
    }

    async fn fetch_all(&self) -> Result<(Vec<Itinerary>, Vec<Activity>)> {
        let itineraries = self.shared.db.list_itineraries(&self.shared.user_id).await?;
        let ids: Vec<String> = itineraries.iter().map(|t| t.id.clone()).collect();
        let activities = self.fetch_activities(&ids).await?;
        Ok((itineraries, activities))
    }

    async fn fetch_activities(&self, itinerary_ids: &[String]) -> Result<Vec<Activity>> {
        let requests: Vec<_> = itinerary_ids
            .chunks(ACTIVITY_FETCH_CHUNK)
            .map(|chunk| self.shared.db.list_activities(chunk))
            .collect();
        let batches = stream::iter(requests)
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .collect::<Vec<Result<Vec<Activity>>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<Vec<Activity>>>>()?;

        Ok(batches.into_iter().flatten().collect())
    }

    // ─── Write intents ───────────────────────────────────────────

    /// Create an itinerary.
    pub async fn create_itinerary(&self, input: NewItinerary) -> Result<Itinerary> {
        input.validate()?;

        let temp_id = self.local_id();
        {
            let mut state = self.shared.state.lock().await;
            state.apply_itinerary(ChangeEvent::Insert(Itinerary {
                id: temp_id.clone(),
                user_id: self.shared.user_id.clone(),
                title: input.title.clone(),
                description: input.description.clone(),
                start_date: input.start_date,
                end_date: input.end_date,
                budget: input.budget,
                created_at: None,
            }));
            state.pending.insert(temp_id.clone());
        }
        self.bump();

        let result = self
            .shared
            .db
            .insert_itinerary(&self.shared.user_id, &input)
            .await;

        let mut state = self.shared.state.lock().await;
        state.pending.remove(&temp_id);
        state.apply_itinerary(ChangeEvent::delete(temp_id.as_str()));
        let outcome = match result {
            Ok(saved) => {
                state.apply_itinerary(ChangeEvent::Insert(saved.clone()));
                tracing::info!(itinerary_id = %saved.id, temp_id = %temp_id, "Itinerary created");
                Ok(saved)
            }
            Err(e) => {
                tracing::warn!(temp_id = %temp_id, error = %e, "Itinerary create failed, rolled back");
                Err(e)
            }
        };
        drop(state);
        self.bump();
        outcome
    }

    /// Add an activity to a known itinerary.
    pub async fn add_activity(&self, input: NewActivity) -> Result<Activity> {
        input.validate()?;

        let temp_id = self.local_id();
        {
            let mut state = self.shared.state.lock().await;
            let trip = state
                .itineraries
                .get(&input.itinerary_id)
                .ok_or_else(|| AppError::NotFound(format!("itinerary {}", input.itinerary_id)))?;
            if state.pending.contains(&trip.id) {
                return Err(AppError::Validation(
                    "itinerary_id: itinerary is not saved yet".to_string(),
                ));
            }
            self.check_date(trip, input.date)?;

            state.apply_activity(ChangeEvent::Insert(Activity {
                id: temp_id.clone(),
                itinerary_id: input.itinerary_id.clone(),
                name: input.name.clone(),
                cost: input.cost,
                date: input.date,
                created_at: None,
            }));
            state.pending.insert(temp_id.clone());
        }
        self.bump();

        let result = self.shared.db.insert_activity(&input).await;

        let mut state = self.shared.state.lock().await;
        state.pending.remove(&temp_id);
        state.apply_activity(ChangeEvent::delete(temp_id.as_str()));
        let outcome = match result {
            Ok(saved) => {
                // The itinerary may have been deleted meanwhile; the
                // delete cascades on the server as well.
                if state.itineraries.contains(&saved.itinerary_id) {
                    state.apply_activity(ChangeEvent::Insert(saved.clone()));
                }
                tracing::info!(
                    activity_id = %saved.id,
                    itinerary_id = %saved.itinerary_id,
                    temp_id = %temp_id,
                    "Activity added"
                );
                Ok(saved)
            }
            Err(e) => {
                tracing::warn!(temp_id = %temp_id, error = %e, "Activity add failed, rolled back");
                Err(e)
            }
        };
        drop(state);
        self.bump();
        outcome
    }

    /// Change some fields of an activity.
    pub async fn update_activity(&self, id: &str, patch: ActivityPatch) -> Result<Activity> {
        patch.validate()?;

        let (previous, optimistic) = {
            let mut state = self.shared.state.lock().await;
            let previous = state
                .activities
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("activity {}", id)))?;
            if state.pending.contains(id) {
                return Err(AppError::Validation(
                    "activity is not saved yet".to_string(),
                ));
            }
            if patch.is_empty() {
                return Ok(previous);
            }
            let optimistic = patch.apply_to(&previous);
            if let Some(trip) = state.itineraries.get(&optimistic.itinerary_id) {
                self.check_date(trip, optimistic.date)?;
            }
            state.apply_activity(ChangeEvent::Update(optimistic.clone()));
            (previous, optimistic)
        };
        self.bump();

        let result = self.shared.db.update_activity(id, &patch).await;

        let mut state = self.shared.state.lock().await;
        let outcome = match result {
            Ok(saved) => {
                if state.activities.contains(id) {
                    state.apply_activity(ChangeEvent::Update(saved.clone()));
                }
                tracing::info!(activity_id = %id, "Activity updated");
                Ok(saved)
            }
            Err(e) => {
                // Only undo our own change; a newer row from the feed wins.
                if state.activities.get(id) == Some(&optimistic) {
                    state.apply_activity(ChangeEvent::Update(previous));
                }
                tracing::warn!(activity_id = %id, error = %e, "Activity update failed, rolled back");
                Err(e)
            }
        };
        drop(state);
        self.bump();
        outcome
    }

    /// Delete an activity.
    pub async fn delete_activity(&self, id: &str) -> Result<()> {
        let previous = {
            let mut state = self.shared.state.lock().await;
            if state.pending.contains(id) {
                return Err(AppError::Validation(
                    "activity is not saved yet".to_string(),
                ));
            }
            let previous = state
                .activities
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("activity {}", id)))?;
            state.apply_activity(ChangeEvent::delete(id));
            previous
        };
        self.bump();

        let result = self.shared.db.delete_activity(id).await;

        let mut state = self.shared.state.lock().await;
        let outcome = match result {
            Ok(()) => {
                // A resync in between may have brought the row back.
                state.apply_activity(ChangeEvent::delete(id));
                tracing::info!(activity_id = %id, "Activity deleted");
                Ok(())
            }
            Err(e) => {
                if !state.activities.contains(id)
                    && state.itineraries.contains(&previous.itinerary_id)
                {
                    state.apply_activity(ChangeEvent::Insert(previous));
                }
                tracing::warn!(activity_id = %id, error = %e, "Activity delete failed, rolled back");
                Err(e)
            }
        };
        drop(state);
        self.bump();
        outcome
    }

    /// Delete an itinerary together with its activities.
    pub async fn delete_itinerary(&self, id: &str) -> Result<()> {
        let (previous, children) = {
            let mut state = self.shared.state.lock().await;
            if state.pending.contains(id) {
                return Err(AppError::Validation(
                    "itinerary is not saved yet".to_string(),
                ));
            }
            let previous = state
                .itineraries
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("itinerary {}", id)))?;
            let children: Vec<Activity> = state
                .activities
                .iter()
                .filter(|a| a.itinerary_id == id)
                .cloned()
                .collect();
            state.apply_itinerary(ChangeEvent::delete(id));
            (previous, children)
        };
        self.bump();

        let result = self.shared.db.delete_itinerary(id).await;

        let mut state = self.shared.state.lock().await;
        let outcome = match result {
            Ok(()) => {
                state.apply_itinerary(ChangeEvent::delete(id));
                tracing::info!(itinerary_id = %id, activities = children.len(), "Itinerary deleted");
                Ok(())
            }
            Err(e) => {
                if !state.itineraries.contains(id) {
                    state.apply_itinerary(ChangeEvent::Insert(previous));
                    for child in children {
                        if !state.activities.contains(&child.id) {
                            state.apply_activity(ChangeEvent::Insert(child));
                        }
                    }
                }
                tracing::warn!(itinerary_id = %id, error = %e, "Itinerary delete failed, rolled back");
                Err(e)
            }
        };
        drop(state);
        self.bump();
        outcome
    }

    fn check_date(&self, trip: &Itinerary, date: NaiveDate) -> Result<()> {
        if self.shared.policy == OutOfRangePolicy::Reject && !trip.contains(date) {
            return Err(AppError::Validation(format!(
                "date: {} is outside {} to {}",
                date, trip.start_date, trip.end_date
            )));
        }
        Ok(())
    }

    // ─── Change notifications ────────────────────────────────────

    /// Apply one externally delivered change.
    pub async fn apply_notification(&self, notification: &Notification) -> Result<ApplyOutcome> {
        let mut state = self.shared.state.lock().await;

        let outcome = match notification.table {
            Table::Itinerary => {
                let event = notification.decode::<Itinerary>()?;
                let foreign = matches!(
                    &event,
                    ChangeEvent::Insert(t) | ChangeEvent::Update(t)
                        if t.user_id != self.shared.user_id
                );
                if foreign {
                    ApplyOutcome::Unchanged
                } else {
                    state.apply_itinerary(event)
                }
            }
            Table::Activities => {
                let event = notification.decode::<Activity>()?;
                // The two feeds are not ordered against each other, so the
                // parent itinerary may still be on its way.
                if let ChangeEvent::Insert(a) | ChangeEvent::Update(a) = &event {
                    if !state.itineraries.contains(&a.itinerary_id) {
                        tracing::debug!(
                            activity_id = %a.id,
                            itinerary_id = %a.itinerary_id,
                            "Activity arrived before its itinerary"
                        );
                    }
                }
                state.apply_activity(event)
            }
        };
        drop(state);

        tracing::debug!(
            table = notification.table.as_str(),
            kind = ?notification.event_type,
            outcome = ?outcome,
            "Applied change notification"
        );
        if outcome.changed() {
            self.bump();
        }
        Ok(outcome)
    }

    /// Start consuming change feeds in the background.
    ///
    /// Every time the feeds open the cache is resynced, so writes made
    /// before subscribing (or while disconnected) are picked up. The
    /// returned handle owns the task: dropping it (or calling
    /// [`Subscription::unsubscribe`]) stops delivery.
    pub fn subscribe(&self) -> Subscription {
        let session = self.clone();
        Subscription {
            task: tokio::spawn(async move { session.run_feeds().await }),
        }
    }

    async fn open_feeds(&self) -> Result<(ChangeFeed, ChangeFeed)> {
        let db = &self.shared.db;
        let itineraries = db
            .subscribe(ChangeFilter::owned_by(
                Table::Itinerary,
                self.shared.user_id.clone(),
            ))
            .await?;
        let activities = db
            .subscribe(ChangeFilter::owned_by(
                Table::Activities,
                self.shared.user_id.clone(),
            ))
            .await?;
        Ok((itineraries, activities))
    }

    async fn run_feeds(&self) {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = reconnect_backoff(self.shared.reconnect_delay, attempt);
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reopening change feeds");
                tokio::time::sleep(delay).await;
            }

            let (mut itineraries, mut activities) = match self.open_feeds().await {
                Ok(feeds) => feeds,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to open change feeds");
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            // Changes made while no feed was open are only visible in a
            // full fetch.
            if let Err(e) = self.resync().await {
                tracing::warn!(error = %e, attempt, "Resync after opening feeds failed");
                attempt = attempt.saturating_add(1);
                continue;
            }
            attempt = 0;

            let reason = loop {
                let msg = tokio::select! {
                    msg = itineraries.next() => msg,
                    msg = activities.next() => msg,
                };
                match msg {
                    FeedMessage::Change(notification) => {
                        if let Err(e) = self.apply_notification(&notification).await {
                            tracing::warn!(
                                error = %e,
                                table = notification.table.as_str(),
                                "Skipping undecodable notification"
                            );
                        }
                    }
                    FeedMessage::Dropped(reason) => break reason,
                }
            };

            tracing::warn!(reason = %reason, "Change feed dropped, will resync");
            attempt = 1;
        }
    }

    // ─── Views ───────────────────────────────────────────────────

    /// Day plan and totals of one itinerary.
    pub async fn itinerary_view(&self, id: &str) -> Result<ItineraryView> {
        let state = self.shared.state.lock().await;
        let itinerary = state
            .itineraries
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("itinerary {}", id)))?;
        let plan = bucketize(&itinerary, state.activities.iter());
        let totals = plan.totals();
        let budget = BudgetStatus::classify(totals.total, itinerary.budget);
        Ok(ItineraryView {
            itinerary,
            plan,
            totals,
            budget,
        })
    }

    /// Dashboard summary as of today.
    pub async fn dashboard(&self) -> DashboardStats {
        self.dashboard_on(today_local()).await
    }

    pub async fn dashboard_on(&self, today: NaiveDate) -> DashboardStats {
        let state = self.shared.state.lock().await;
        DashboardStats::compute(state.itineraries.iter(), state.visible_activities(), today)
    }

    /// Trip list as of today.
    pub async fn browse(&self, options: &BrowseOptions) -> Vec<TripSection> {
        self.browse_on(options, today_local()).await
    }

    pub async fn browse_on(&self, options: &BrowseOptions, today: NaiveDate) -> Vec<TripSection> {
        let state = self.shared.state.lock().await;
        browse(state.itineraries.iter(), options, today)
    }

    pub async fn itineraries(&self) -> Vec<Itinerary> {
        self.shared.state.lock().await.itineraries.records()
    }

    /// Activities of cached itineraries.
    pub async fn activities(&self) -> Vec<Activity> {
        let state = self.shared.state.lock().await;
        state.visible_activities().cloned().collect()
    }

    /// Whether `id` is an optimistic row still waiting on its write.
    pub async fn is_pending(&self, id: &str) -> bool {
        self.shared.state.lock().await.pending.contains(id)
    }
}

/// Whether an id was minted locally for an optimistic row.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

fn reconnect_backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(MAX_RECONNECT_DELAY)
}

/// Handle to a running change-feed consumer.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop consuming changes.
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!("Change feed subscription closed");
    }
}
