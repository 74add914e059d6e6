use std::env;

use anyhow::Context;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::is_allowed_frequency;

const DEFAULT_SLOT_FREQUENCY: i32 = 30;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub salon_id: String,
    pub slot_frequency_minutes: i32,
    pub public_base_url: String,
    pub mail_api_url: String,
    pub mail_api_key: String,
    pub mail_from: String,
    pub notify_max_attempts: u32,
    pub notify_retry_delay_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "salonbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            salon_id: env::var("SALON_ID").unwrap_or_else(|_| "default".to_string()),
            slot_frequency_minutes: slot_frequency_from(env::var("SLOT_FREQUENCY_MINUTES").ok()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            mail_api_url: env::var("MAIL_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            mail_api_key: env::var("MAIL_API_KEY").unwrap_or_default(),
            mail_from: env::var("MAIL_FROM").unwrap_or_default(),
            notify_max_attempts: env::var("NOTIFY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            notify_retry_delay_ms: env::var("NOTIFY_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
        }
    }

    pub fn salon_scope(&self) -> SalonScope {
        SalonScope {
            salon_id: self.salon_id.clone(),
            default_frequency: self.slot_frequency_minutes,
        }
    }
}

/// Parses `SLOT_FREQUENCY_MINUTES`, falling back to 30 when it is missing or
/// not one of the supported steps.
fn slot_frequency_from(raw: Option<String>) -> i32 {
    let Some(raw) = raw else {
        return DEFAULT_SLOT_FREQUENCY;
    };
    match raw.trim().parse::<i32>() {
        Ok(minutes) if is_allowed_frequency(minutes) => minutes,
        _ => {
            tracing::warn!(
                value = %raw,
                fallback = DEFAULT_SLOT_FREQUENCY,
                "SLOT_FREQUENCY_MINUTES must be 15, 30, 45 or 60"
            );
            DEFAULT_SLOT_FREQUENCY
        }
    }
}

/// The tenant every core operation runs against, passed explicitly.
#[derive(Clone, Debug, PartialEq)]
pub struct SalonScope {
    pub salon_id: String,
    /// Used when the salon has no settings row yet.
    pub default_frequency: i32,
}

impl SalonScope {
    pub fn new(salon_id: impl Into<String>, default_frequency: i32) -> Self {
        Self {
            salon_id: salon_id.into(),
            default_frequency,
        }
    }

    /// The salon's configured slot frequency in minutes.
    pub fn frequency(&self, conn: &Connection) -> anyhow::Result<i32> {
        queries::slot_frequency(conn, &self.salon_id, self.default_frequency)
            .context("failed to load slot frequency")
    }
}
