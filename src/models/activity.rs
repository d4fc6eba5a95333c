// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity model (a costed, dated line item of an itinerary) and the
//! inputs that create or change one.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::{Validate, ValidationError};

use super::{not_blank, Record, Table};
use crate::error::{AppError, Result};
use crate::time_utils::parse_iso_date;

/// A stored activity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Activity {
    pub id: String,
    /// Parent itinerary
    pub itinerary_id: String,
    #[serde(rename = "activity_name")]
    pub name: String,
    /// Cost in the trip's currency (currency-agnostic magnitude)
    #[serde(
        default,
        serialize_with = "rust_decimal::serde::float::serialize",
        deserialize_with = "deserialize_cost_lenient"
    )]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub cost: Decimal,
    /// Calendar day the activity is planned for
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record for Activity {
    const TABLE: Table = Table::Activities;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Decode a cost column coming back from the backend.
///
/// Rows written by other clients are not guaranteed to be clean: numbers,
/// numeric strings, `null` and missing values all occur. Anything that is
/// not a number becomes zero and is logged. User input never goes through
/// here; see [`ActivityForm::parse`].
pub fn coerce_cost(value: Option<&Value>) -> Decimal {
    match value {
        None | Some(Value::Null) => Decimal::ZERO,
        Some(Value::Number(n)) => parse_decimal(&n.to_string()).unwrap_or_else(|| {
            tracing::warn!(cost = %n, "Unrepresentable cost from backend, treating as zero");
            Decimal::ZERO
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Decimal::ZERO,
        Some(Value::String(s)) => parse_decimal(s).unwrap_or_else(|| {
            tracing::warn!(cost = %s, "Malformed cost from backend, treating as zero");
            Decimal::ZERO
        }),
        Some(other) => {
            tracing::warn!(cost = %other, "Non-numeric cost from backend, treating as zero");
            Decimal::ZERO
        }
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

fn deserialize_cost_lenient<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(coerce_cost(value.as_ref()))
}

fn non_negative_cost(cost: &Decimal) -> std::result::Result<(), ValidationError> {
    if cost.is_sign_negative() && !cost.is_zero() {
        let mut err = ValidationError::new("negative_cost");
        err.message = Some("cost must not be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Input for adding an activity to an itinerary.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewActivity {
    #[validate(custom(function = "not_blank"))]
    pub itinerary_id: String,
    #[serde(rename = "activity_name")]
    #[validate(
        length(max = 200, message = "must be at most 200 characters"),
        custom(function = "not_blank")
    )]
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[validate(custom(function = "non_negative_cost"))]
    pub cost: Decimal,
    pub date: NaiveDate,
}

/// Partial change to an existing activity. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ActivityPatch {
    #[serde(rename = "activity_name", skip_serializing_if = "Option::is_none")]
    #[validate(
        length(max = 200, message = "must be at most 200 characters"),
        custom(function = "not_blank")
    )]
    pub name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    #[validate(custom(function = "non_negative_cost"))]
    pub cost: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl ActivityPatch {
    /// Apply the patch to a copy of `activity`.
    pub fn apply_to(&self, activity: &Activity) -> Activity {
        let mut patched = activity.clone();
        if let Some(name) = &self.name {
            patched.name = name.trim().to_string();
        }
        if let Some(cost) = self.cost {
            patched.cost = cost;
        }
        if let Some(date) = self.date {
            patched.date = date;
        }
        patched
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.cost.is_none() && self.date.is_none()
    }
}

/// Raw text of the "add activity" form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityForm {
    pub itinerary_id: String,
    pub name: String,
    pub cost: String,
    pub date: String,
}

impl ActivityForm {
    /// Turn raw form text into a validated [`NewActivity`].
    ///
    /// A cost that is not a number is rejected here; it is never coerced.
    pub fn parse(&self) -> Result<NewActivity> {
        let cost = parse_decimal(&self.cost)
            .ok_or_else(|| AppError::Validation("cost: must be a number".to_string()))?;
        let date = parse_iso_date(&self.date)
            .ok_or_else(|| AppError::Validation("date: must be YYYY-MM-DD".to_string()))?;

        let input = NewActivity {
            itinerary_id: self.itinerary_id.trim().to_string(),
            name: self.name.trim().to_string(),
            cost,
            date,
        };
        input.validate()?;
        Ok(input)
    }
}
