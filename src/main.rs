// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Itinerary-Sync client daemon
//!
//! Keeps a signed-in user's itineraries and activities in sync with the
//! hosted backend and logs a dashboard summary whenever they change.

use itinerary_sync::{config::Config, db::PostgrestDb, services::SyncSession};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        backend = %config.supabase_url,
        user_id = %config.user_id,
        poll_interval_secs = config.poll_interval.as_secs(),
        policy = ?config.out_of_range_policy,
        "Starting Itinerary-Sync"
    );

    let db = PostgrestDb::new(&config);
    let session = SyncSession::new(db, config.user_id.clone(), config.out_of_range_policy);

    session.load().await?;
    let mut changes = session.changes();
    let subscription = session.subscribe();

    loop {
        let stats = session.dashboard().await;
        tracing::info!(
            total_trips = stats.total_trips,
            active_trips = stats.active_trips,
            total_activities = stats.total_activities,
            total_spent = %stats.total_spent,
            "Dashboard"
        );

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    subscription.unsubscribe();
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("itinerary_sync=debug,info"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
