// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Itinerary (trip) model and its write-boundary input.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::{Validate, ValidationError};

use super::{not_blank, Record, Table};

/// A stored itinerary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Itinerary {
    /// Server-assigned id (or a `local-` id while a create is in flight)
    pub id: String,
    /// Owner
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// First day of the trip (inclusive)
    pub start_date: NaiveDate,
    /// Last day of the trip (inclusive)
    pub end_date: NaiveDate,
    /// Spending cap, if the user set one
    #[serde(default, with = "rust_decimal::serde::float_option")]
    #[cfg_attr(feature = "binding-generation", ts(type = "number | null"))]
    pub budget: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Itinerary {
    /// Number of calendar days in the trip, both ends included.
    ///
    /// A row whose dates are inverted has no days at all.
    pub fn day_count(&self) -> usize {
        let span = (self.end_date - self.start_date).num_days();
        if span < 0 {
            0
        } else {
            span as usize + 1
        }
    }

    /// Every calendar date of the trip in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start_date.iter_days().take(self.day_count())
    }

    /// Whether `date` falls inside `[start_date, end_date]`.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// A trip is active through the whole of its last day.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.end_date >= today
    }
}

impl Record for Itinerary {
    const TABLE: Table = Table::Itinerary;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Input for creating an itinerary, validated before anything is written.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_date_range"))]
pub struct NewItinerary {
    #[validate(
        length(max = 200, message = "must be at most 200 characters"),
        custom(function = "not_blank")
    )]
    pub title: String,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    #[validate(custom(function = "non_negative_budget"))]
    pub budget: Option<Decimal>,
}

impl NewItinerary {
    /// Build an input from form values, trimming text and dropping an
    /// empty description.
    pub fn new(
        title: &str,
        description: Option<&str>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            title: title.trim().to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
            start_date,
            end_date,
            budget: None,
        }
    }

    pub fn with_budget(mut self, cap: Decimal) -> Self {
        self.budget = Some(cap);
        self
    }
}

fn non_negative_budget(cap: &Decimal) -> Result<(), ValidationError> {
    if cap.is_sign_negative() && !cap.is_zero() {
        let mut err = ValidationError::new("negative_budget");
        err.message = Some("budget must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_date_range(input: &NewItinerary) -> Result<(), ValidationError> {
    if input.start_date > input.end_date {
        let mut err = ValidationError::new("date_range");
        err.message = Some("start date must not be after end date".into());
        return Err(err);
    }
    Ok(())
}
