// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Itinerary-Sync: client-side state for a trip planner
//!
//! This crate keeps a user's itineraries and their costed activities in
//! sync with a hosted backend, reconciling optimistic local writes with
//! pushed change notifications, and derives the per-day plan, trip totals
//! and dashboard statistics from the cached rows.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod time_utils;

pub use error::{AppError, Result};
