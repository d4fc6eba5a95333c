//! Application configuration loaded from environment variables.
//!
//! A `.env` file is honored for local development.

use std::env;
use std::time::Duration;

use crate::services::aggregate::OutOfRangePolicy;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Backend ---
    /// Base URL of the hosted backend (e.g. `https://xyz.supabase.co`)
    pub supabase_url: String,
    /// Public anon key sent as the `apikey` header
    pub supabase_anon_key: String,
    /// Access token of the signed-in user (issued by the auth provider)
    pub access_token: String,
    /// Opaque id of the signed-in user
    pub user_id: String,

    // --- Sync behavior ---
    /// Interval of the polling change feed
    pub poll_interval: Duration,
    /// What to do with activity dates outside their trip's span
    pub out_of_range_policy: OutOfRangePolicy,
    /// Capacity of each change feed channel
    pub feed_buffer: usize,
}

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_FEED_BUFFER: usize = 64;

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test_anon_key".to_string(),
            access_token: "test_access_token".to_string(),
            user_id: "user-1".to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            out_of_range_policy: OutOfRangePolicy::Separate,
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let poll_secs = match env::var("POLL_INTERVAL_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::Invalid("POLL_INTERVAL_SECS", raw))?,
            Err(_) => DEFAULT_POLL_INTERVAL_SECS,
        };

        let feed_buffer = match env::var("FEED_BUFFER") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid("FEED_BUFFER", raw))?,
            Err(_) => DEFAULT_FEED_BUFFER,
        };

        let out_of_range_policy = match env::var("OUT_OF_RANGE_POLICY") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("OUT_OF_RANGE_POLICY", raw))?,
            Err(_) => OutOfRangePolicy::default(),
        };

        Ok(Self {
            supabase_url: env::var("SUPABASE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
            supabase_anon_key: env::var("SUPABASE_ANON_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?,
            access_token: env::var("SUPABASE_ACCESS_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_ACCESS_TOKEN"))?,
            user_id: env::var("USER_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("USER_ID"))?,
            poll_interval: Duration::from_secs(poll_secs),
            out_of_range_policy,
            feed_buffer,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
