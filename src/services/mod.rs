// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync and view logic.

pub mod aggregate;
pub mod browse;
pub mod store;
pub mod sync;

pub use aggregate::{bucketize, BudgetStatus, DayBucket, DayPlan, OutOfRangePolicy, TripTotals};
pub use browse::{browse, BrowseOptions, GroupBy, SortBy, TripSection};
pub use store::{ApplyOutcome, RecordStore};
pub use sync::{ItineraryView, Subscription, SyncSession};
