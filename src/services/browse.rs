// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Trip list filtering, sorting and grouping.
//!
//! `browse` always runs filter → sort → group in that order and never
//! touches its input.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::Itinerary;
use crate::time_utils::month_label;

/// Sort key of the trip list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    StartAsc,
    StartDesc,
    TitleAsc,
    TitleDesc,
}

/// Grouping of the trip list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// A single `All` section
    #[default]
    None,
    /// `Active` and `Past` sections, both always present
    Status,
    /// One section per start month, in order of first appearance
    Month,
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_asc" => Ok(SortBy::StartAsc),
            "start_desc" => Ok(SortBy::StartDesc),
            "title_asc" => Ok(SortBy::TitleAsc),
            "title_desc" => Ok(SortBy::TitleDesc),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(GroupBy::None),
            "status" => Ok(GroupBy::Status),
            "month" => Ok(GroupBy::Month),
            other => Err(format!("unknown group key: {}", other)),
        }
    }
}

/// List view options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseOptions {
    /// Case-insensitive substring of title or description; empty matches all
    #[serde(default)]
    pub query: String,
    /// Only trips whose last day is today or later
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub group_by: GroupBy,
}

/// One headed section of the trip list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TripSection {
    pub heading: String,
    pub trips: Vec<Itinerary>,
}

pub const HEADING_ALL: &str = "All";
pub const HEADING_ACTIVE: &str = "Active";
pub const HEADING_PAST: &str = "Past";

/// Filter, sort and group `trips` for display.
pub fn browse<'a>(
    trips: impl IntoIterator<Item = &'a Itinerary>,
    options: &BrowseOptions,
    today: NaiveDate,
) -> Vec<TripSection> {
    let query = options.query.trim().to_lowercase();

    let mut list: Vec<Itinerary> = trips
        .into_iter()
        .filter(|t| matches_query(t, &query))
        .filter(|t| !options.active_only || t.is_active(today))
        .cloned()
        .collect();

    // `sort_by` is stable, so equal keys keep their input order.
    list.sort_by(|a, b| compare(a, b, options.sort_by));

    match options.group_by {
        GroupBy::None => vec![TripSection {
            heading: HEADING_ALL.to_string(),
            trips: list,
        }],
        GroupBy::Status => {
            let (active, past): (Vec<_>, Vec<_>) =
                list.into_iter().partition(|t| t.is_active(today));
            vec![
                TripSection {
                    heading: HEADING_ACTIVE.to_string(),
                    trips: active,
                },
                TripSection {
                    heading: HEADING_PAST.to_string(),
                    trips: past,
                },
            ]
        }
        GroupBy::Month => {
            let mut sections: Vec<TripSection> = Vec::new();
            for trip in list {
                let heading = month_label(trip.start_date);
                match sections.iter_mut().find(|s| s.heading == heading) {
                    Some(section) => section.trips.push(trip),
                    None => sections.push(TripSection {
                        heading,
                        trips: vec![trip],
                    }),
                }
            }
            sections
        }
    }
}

fn matches_query(trip: &Itinerary, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    trip.title.to_lowercase().contains(query)
        || trip
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(query))
}

fn compare(a: &Itinerary, b: &Itinerary, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::StartAsc => a.start_date.cmp(&b.start_date),
        SortBy::StartDesc => b.start_date.cmp(&a.start_date),
        SortBy::TitleAsc => a.title.cmp(&b.title),
        SortBy::TitleDesc => b.title.cmp(&a.title),
    }
}
