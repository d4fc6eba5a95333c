// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::NaiveDate;
use itinerary_sync::config::Config;
use itinerary_sync::db::{MemoryDb, PostgrestDb};
use itinerary_sync::models::{Itinerary, NewActivity, NewItinerary};
use itinerary_sync::services::{OutOfRangePolicy, SyncSession};
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::watch;

pub const USER_ID: &str = "user-1";

/// Check if a live backend is configured via environment variables.
#[allow(dead_code)]
pub fn backend_available() -> bool {
    std::env::var("SUPABASE_URL").is_ok() && std::env::var("SUPABASE_ACCESS_TOKEN").is_ok()
}

/// Skip test with message if no live backend is configured.
#[macro_export]
macro_rules! require_backend {
    () => {
        if !crate::common::backend_available() {
            eprintln!("⚠️  Skipping: SUPABASE_URL / SUPABASE_ACCESS_TOKEN not set");
            return;
        }
    };
}

/// Create a client for the configured live backend.
#[allow(dead_code)]
pub fn test_db_live() -> PostgrestDb {
    let config = Config::from_env().expect("Failed to load backend configuration");
    PostgrestDb::new(&config)
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Session over a fresh in-memory backend with a short reconnect delay.
#[allow(dead_code)]
pub fn test_session(policy: OutOfRangePolicy) -> (SyncSession<MemoryDb>, MemoryDb) {
    let db = MemoryDb::new();
    let session = SyncSession::new(db.clone(), USER_ID, policy)
        .with_reconnect_delay(Duration::from_millis(10));
    (session, db)
}

#[allow(dead_code)]
pub async fn create_trip(
    session: &SyncSession<MemoryDb>,
    title: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Itinerary {
    session
        .create_itinerary(NewItinerary::new(title, None, start, end))
        .await
        .expect("Failed to create itinerary")
}

#[allow(dead_code)]
pub fn new_activity(trip: &Itinerary, name: &str, cost: Decimal, on: NaiveDate) -> NewActivity {
    NewActivity {
        itinerary_id: trip.id.clone(),
        name: name.to_string(),
        cost,
        date: on,
    }
}

/// Wait until `check` holds, re-evaluating after every revision bump.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(changes: &mut watch::Receiver<u64>, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        // Polling as well covers changes that land without a bump.
        let wait = remaining.min(Duration::from_millis(50));
        assert!(!remaining.is_zero(), "condition not reached in time");
        let _ = tokio::time::timeout(wait, changes.changed()).await;
    }
}
