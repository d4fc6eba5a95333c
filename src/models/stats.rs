//! Dashboard statistics derived from the cached stores.
//!
//! Always recomputed from the full record set; there is no running
//! counter that could drift from the rows it summarizes.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::{Activity, Itinerary};

/// Summary shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DashboardStats {
    /// Number of trips the user owns
    pub total_trips: u32,
    /// Trips whose last day is today or later
    pub active_trips: u32,
    /// Activities across all of the user's trips
    pub total_activities: u32,
    /// Sum of all activity costs
    #[serde(with = "rust_decimal::serde::float")]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total_spent: Decimal,
    /// Cost per itinerary id
    #[cfg_attr(feature = "binding-generation", ts(type = "Record<string, number>"))]
    pub spent_by_itinerary: BTreeMap<String, Decimal>,
}

impl DashboardStats {
    /// Compute stats from the current store contents.
    ///
    /// Only activities whose parent itinerary is present are counted.
    pub fn compute<'a>(
        itineraries: impl IntoIterator<Item = &'a Itinerary>,
        activities: impl IntoIterator<Item = &'a Activity>,
        today: NaiveDate,
    ) -> Self {
        let mut stats = Self::default();

        for trip in itineraries {
            stats.total_trips += 1;
            if trip.is_active(today) {
                stats.active_trips += 1;
            }
            stats
                .spent_by_itinerary
                .insert(trip.id.clone(), Decimal::ZERO);
        }

        for activity in activities {
            let Some(spent) = stats.spent_by_itinerary.get_mut(&activity.itinerary_id) else {
                continue;
            };
            *spent += activity.cost;
            stats.total_activities += 1;
            stats.total_spent += activity.cost;
        }

        stats
    }
}
