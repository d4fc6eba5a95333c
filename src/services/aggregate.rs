// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Day bucketing and cost totals for an itinerary.
//!
//! Everything here is a pure function of its inputs. Views are recomputed
//! from the store after every mutation instead of being patched
//! incrementally.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::{Activity, Itinerary};

/// Handling of activity dates outside their itinerary's span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfRangePolicy {
    /// Accept such writes and report the rows in [`DayPlan::unbucketed`].
    #[default]
    Separate,
    /// Also reject new out-of-range dates at the write boundary.
    Reject,
}

impl FromStr for OutOfRangePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "separate" => Ok(OutOfRangePolicy::Separate),
            "reject" => Ok(OutOfRangePolicy::Reject),
            other => Err(format!("unknown out-of-range policy: {}", other)),
        }
    }
}

/// Activities planned for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub activities: Vec<Activity>,
    #[serde(with = "rust_decimal::serde::float")]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total: Decimal,
}

/// An itinerary's activities grouped by day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DayPlan {
    /// One bucket per trip day, chronological, empty days included.
    pub buckets: Vec<DayBucket>,
    /// Activities of this itinerary dated outside its span.
    pub unbucketed: Vec<Activity>,
}

impl DayPlan {
    /// Bucket for a given day, if the day is part of the trip.
    pub fn bucket(&self, date: NaiveDate) -> Option<&DayBucket> {
        let first = self.buckets.first()?.date;
        let offset = usize::try_from((date - first).num_days()).ok()?;
        self.buckets.get(offset)
    }

    /// Totals derived from this plan.
    pub fn totals(&self) -> TripTotals {
        let bucketed: Decimal = self.buckets.iter().map(|b| b.total).sum();
        let unbucketed_total = total_cost(&self.unbucketed);
        let days = self.buckets.len();
        TripTotals {
            total: bucketed + unbucketed_total,
            bucketed_total: bucketed,
            unbucketed_total,
            daily_average: if days > 0 {
                bucketed / Decimal::from(days)
            } else {
                Decimal::ZERO
            },
        }
    }
}

/// Cost totals of one itinerary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TripTotals {
    /// Every activity of the itinerary, in range or not
    #[serde(with = "rust_decimal::serde::float")]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total: Decimal,
    /// Sum of the day buckets
    #[serde(with = "rust_decimal::serde::float")]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub bucketed_total: Decimal,
    /// Sum of the out-of-range activities
    #[serde(with = "rust_decimal::serde::float")]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub unbucketed_total: Decimal,
    /// Bucketed total spread over the trip's days
    #[serde(with = "rust_decimal::serde::float")]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub daily_average: Decimal,
}

/// Group `activities` of `itinerary` by calendar day.
///
/// Activities of other itineraries are ignored. Within a bucket,
/// activities are ordered by id so repeated calls render identically.
/// Runs in O(days + activities).
pub fn bucketize<'a>(
    itinerary: &Itinerary,
    activities: impl IntoIterator<Item = &'a Activity>,
) -> DayPlan {
    let mut buckets: Vec<DayBucket> = itinerary
        .days()
        .map(|date| DayBucket {
            date,
            activities: Vec::new(),
            total: Decimal::ZERO,
        })
        .collect();
    let index: HashMap<NaiveDate, usize> = buckets
        .iter()
        .enumerate()
        .map(|(i, b)| (b.date, i))
        .collect();

    let mut unbucketed = Vec::new();
    for activity in activities {
        if activity.itinerary_id != itinerary.id {
            continue;
        }
        match index.get(&activity.date) {
            Some(&i) => buckets[i].activities.push(activity.clone()),
            None => unbucketed.push(activity.clone()),
        }
    }

    for bucket in &mut buckets {
        bucket.activities.sort_by(|a, b| a.id.cmp(&b.id));
        bucket.total = total_cost(&bucket.activities);
    }
    unbucketed.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    if !unbucketed.is_empty() {
        tracing::debug!(
            itinerary_id = %itinerary.id,
            count = unbucketed.len(),
            "Activities outside itinerary date range"
        );
    }

    DayPlan {
        buckets,
        unbucketed,
    }
}

/// Exact sum of activity costs.
pub fn total_cost<'a>(activities: impl IntoIterator<Item = &'a Activity>) -> Decimal {
    activities.into_iter().map(|a| a.cost).sum()
}

/// How a trip's spending compares to its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetStatus {
    Under,
    OnTrack,
    Over,
}

impl BudgetStatus {
    /// Below 90% of the cap is under budget, up to 110% is on track.
    /// Without a (positive) cap every total is on track.
    pub fn classify(total: Decimal, cap: Option<Decimal>) -> Self {
        let Some(cap) = cap.filter(|c| *c > Decimal::ZERO) else {
            return BudgetStatus::OnTrack;
        };
        let percent = total * Decimal::ONE_HUNDRED / cap;
        if percent < Decimal::from(90) {
            BudgetStatus::Under
        } else if percent <= Decimal::from(110) {
            BudgetStatus::OnTrack
        } else {
            BudgetStatus::Over
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn trip(start: NaiveDate, end: NaiveDate) -> Itinerary {
        Itinerary {
            id: "t1".to_string(),
            user_id: "u1".to_string(),
            title: "Trip".to_string(),
            description: None,
            start_date: start,
            end_date: end,
            budget: None,
            created_at: None,
        }
    }

    fn make_activity(id: &str, on: NaiveDate, cost: Decimal) -> Activity {
        Activity {
            id: id.to_string(),
            itinerary_id: "t1".to_string(),
            name: format!("Activity {}", id),
            cost,
            date: on,
            created_at: None,
        }
    }

    #[test]
    fn test_empty_days_are_present() {
        let t = trip(date(2024, 6, 1), date(2024, 6, 3));
        let plan = bucketize(&t, &Vec::<Activity>::new());

        let dates: Vec<_> = plan.buckets.iter().map(|b| b.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 6, 1), date(2024, 6, 2), date(2024, 6, 3)]
        );
        assert!(plan.buckets.iter().all(|b| b.activities.is_empty()));
        assert_eq!(plan.totals().total, Decimal::ZERO);
    }

    #[test]
    fn test_bucket_order_is_stable_by_id() {
        let t = trip(date(2024, 6, 1), date(2024, 6, 1));
        let activities = vec![
            make_activity("b", date(2024, 6, 1), dec!(1)),
            make_activity("a", date(2024, 6, 1), dec!(2)),
        ];
        let plan = bucketize(&t, &activities);
        let ids: Vec<_> = plan.buckets[0]
            .activities
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(plan.buckets[0].total, dec!(3));
    }

    #[test]
    fn test_out_of_range_is_reported() {
        let t = trip(date(2024, 6, 1), date(2024, 6, 2));
        let activities = vec![
            make_activity("a1", date(2024, 6, 1), dec!(10)),
            make_activity("a2", date(2024, 7, 1), dec!(5)),
        ];
        let plan = bucketize(&t, &activities);
        assert_eq!(plan.unbucketed.len(), 1);
        assert_eq!(plan.unbucketed[0].id, "a2");

        let totals = plan.totals();
        assert_eq!(totals.bucketed_total, dec!(10));
        assert_eq!(totals.unbucketed_total, dec!(5));
        assert_eq!(totals.total, dec!(15));
        assert_eq!(totals.daily_average, dec!(5));
    }

    #[test]
    fn test_other_itineraries_ignored() {
        let t = trip(date(2024, 6, 1), date(2024, 6, 1));
        let mut foreign = make_activity("x", date(2024, 6, 1), dec!(99));
        foreign.itinerary_id = "t2".to_string();
        let plan = bucketize(&t, &[foreign]);
        assert!(plan.unbucketed.is_empty());
        assert_eq!(plan.totals().total, Decimal::ZERO);
    }

    #[test]
    fn test_bucket_lookup() {
        let t = trip(date(2024, 6, 1), date(2024, 6, 3));
        let plan = bucketize(&t, &[make_activity("a", date(2024, 6, 2), dec!(1))]);
        assert_eq!(plan.bucket(date(2024, 6, 2)).map(|b| b.activities.len()), Some(1));
        assert!(plan.bucket(date(2024, 5, 31)).is_none());
        assert!(plan.bucket(date(2024, 6, 4)).is_none());
    }

    #[test]
    fn test_budget_status() {
        assert_eq!(
            BudgetStatus::classify(dec!(80), Some(dec!(100))),
            BudgetStatus::Under
        );
        assert_eq!(
            BudgetStatus::classify(dec!(110), Some(dec!(100))),
            BudgetStatus::OnTrack
        );
        assert_eq!(
            BudgetStatus::classify(dec!(111), Some(dec!(100))),
            BudgetStatus::Over
        );
        assert_eq!(BudgetStatus::classify(dec!(5), None), BudgetStatus::OnTrack);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Reject".parse::<OutOfRangePolicy>(), Ok(OutOfRangePolicy::Reject));
        assert_eq!(
            " separate ".parse::<OutOfRangePolicy>(),
            Ok(OutOfRangePolicy::Separate)
        );
        assert!("clamp".parse::<OutOfRangePolicy>().is_err());
    }
}
