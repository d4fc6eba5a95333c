// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod change;
pub mod itinerary;
pub mod stats;

pub use activity::{Activity, ActivityForm, ActivityPatch, NewActivity};
pub use change::{ChangeEvent, ChangeKind, Notification};
pub use itinerary::{Itinerary, NewItinerary};
pub use stats::DashboardStats;

use serde::{Deserialize, Serialize};
use validator::ValidationError;

/// Backend tables the client caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Itinerary,
    Activities,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Itinerary => "itinerary",
            Table::Activities => "activities",
        }
    }
}

/// A row that can live in a [`crate::services::store::RecordStore`].
pub trait Record: Clone {
    /// Table the row belongs to.
    const TABLE: Table;

    /// Primary key.
    fn id(&self) -> &str;
}

/// Reject empty or whitespace-only text.
pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("is required".into());
        return Err(err);
    }
    Ok(())
}
