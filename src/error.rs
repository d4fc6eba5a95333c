// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types shared by the stores, the backend clients and
//! the sync session.

/// Application error type.
///
/// Every write intent returns `Result<T, AppError>`, so the presentation
/// layer can always tell a confirmed write from a rolled-back one.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Change feed error: {0}")]
    Feed(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Prefix used by backends when a write is rejected by the server
    /// (constraint or permission failure) rather than lost in transit.
    pub const BACKEND_REJECTED: &'static str = "rejected";

    /// Whether this is a write-boundary validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation(_))
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Validation failures and server-side rejections are permanent;
    /// connectivity and feed problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Backend(msg) => !msg.starts_with(Self::BACKEND_REJECTED),
            AppError::Feed(_) => true,
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let reason = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| {
                        errs.first()
                            .map(|e| e.code.to_string())
                            .unwrap_or_default()
                    });
                format!("{}: {}", field, reason)
            })
            .collect();
        // Struct-level (schema) failures land under "__all__".
        fields.sort();
        AppError::Validation(fields.join("; "))
    }
}

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, AppError>;
