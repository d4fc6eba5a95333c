// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use itinerary_sync::error::AppError;
use itinerary_sync::models::{ActivityForm, NewItinerary};
use validator::Validate;

#[test]
fn test_is_retryable_matches() {
    let err = AppError::Backend("connection reset".to_string());
    assert!(err.is_retryable());

    let err = AppError::Backend("HTTP 503 Service Unavailable: ".to_string());
    assert!(err.is_retryable());

    let err = AppError::Feed("channel closed".to_string());
    assert!(err.is_retryable());
}

#[test]
fn test_is_retryable_no_match() {
    let err = AppError::Backend(format!("{}: HTTP 409 Conflict", AppError::BACKEND_REJECTED));
    assert!(!err.is_retryable());

    let err = AppError::Validation("name: is required".to_string());
    assert!(!err.is_retryable());

    assert!(!AppError::Unauthorized.is_retryable());
    assert!(!AppError::NotFound("activity a1".to_string()).is_retryable());
}

#[test]
fn test_validation_errors_name_fields() {
    let input = NewItinerary {
        title: " ".to_string(),
        description: None,
        start_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        end_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        budget: None,
    };
    let err: AppError = input.validate().unwrap_err().into();

    let AppError::Validation(message) = err else {
        panic!("expected validation error");
    };
    assert!(message.contains("title: is required"), "{}", message);
    assert!(message.contains("start date must not be after end date"), "{}", message);
}

#[test]
fn test_form_parse_errors_are_validation() {
    let form = ActivityForm {
        itinerary_id: "t1".to_string(),
        name: "Dinner".to_string(),
        cost: "about 20".to_string(),
        date: "2024-06-01".to_string(),
    };
    let err = form.parse().unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.to_string(), "Invalid input: cost: must be a number");
}

#[test]
fn test_error_display() {
    assert_eq!(AppError::Unauthorized.to_string(), "Authentication required");
    assert_eq!(
        AppError::Feed("poll failed".to_string()).to_string(),
        "Change feed error: poll failed"
    );
}
