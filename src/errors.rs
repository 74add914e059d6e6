use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::models::{Appointment, AppointmentStatus};

/// Business-rule violations reported by the slot validator.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotError {
    #[error("service is missing or has no duration")]
    ServiceInvalid,

    #[error("this service needs {required} slots, {provided} were selected")]
    CountMismatch { required: usize, provided: usize },

    #[error("unknown slots: {}", .missing.join(", "))]
    SlotsNotFound { missing: Vec<String> },

    #[error("slots no longer available: {}", format_times(.start_times))]
    SlotsUnavailable { start_times: Vec<NaiveTime> },

    #[error("selected slots span several days")]
    SlotsSpanMultipleDays { dates: Vec<NaiveDate> },

    #[error("gap between {} and {}: expected {} minutes, found {}", .after.format("%H:%M"), .next.format("%H:%M"), .expected_minutes, .actual_minutes)]
    SlotsNotContiguous {
        after: NaiveTime,
        next: NaiveTime,
        expected_minutes: i64,
        actual_minutes: i64,
    },
}

impl SlotError {
    pub fn kind(&self) -> &'static str {
        match self {
            SlotError::ServiceInvalid => "service_invalid",
            SlotError::CountMismatch { .. } => "count_mismatch",
            SlotError::SlotsNotFound { .. } => "slots_not_found",
            SlotError::SlotsUnavailable { .. } => "slots_unavailable",
            SlotError::SlotsSpanMultipleDays { .. } => "slots_span_multiple_days",
            SlotError::SlotsNotContiguous { .. } => "slots_not_contiguous",
        }
    }
}

fn format_times(times: &[NaiveTime]) -> String {
    times
        .iter()
        .map(|t| t.format("%H:%M").to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("slots were taken by another booking: {}", .slots.join(", "))]
    Conflict { slots: Vec<String> },

    #[error("cannot move appointment from {} to {}", .from.as_str(), .to.as_str())]
    TransitionInvalid {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("{} confirmed appointment(s) fall in this period; confirm their cancellation first", .appointments.len())]
    ConfirmationRequired { appointments: Vec<Appointment> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Persistence(e.into())
    }
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Slot(e) => e.kind(),
            AppError::Conflict { .. } => "conflict",
            AppError::TransitionInvalid { .. } => "transition_invalid",
            AppError::ConfirmationRequired { .. } => "confirmation_required",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Persistence(_) => "persistence_failure",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Slot(SlotError::SlotsUnavailable { .. }) => StatusCode::CONFLICT,
            AppError::Slot(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::TransitionInvalid { .. } => StatusCode::BAD_REQUEST,
            AppError::ConfirmationRequired { .. } => StatusCode::CONFLICT,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        match &self {
            AppError::Slot(e) => {
                body["details"] = serde_json::to_value(e).unwrap_or_default();
            }
            AppError::Conflict { slots } => {
                body["slots"] = serde_json::json!(slots);
            }
            AppError::ConfirmationRequired { appointments } => {
                body["appointments"] = serde_json::to_value(appointments).unwrap_or_default();
            }
            _ => {}
        }

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_slots_map_to_conflict() {
        let err = AppError::from(SlotError::SlotsUnavailable {
            start_times: vec![NaiveTime::from_hms_opt(9, 30, 0).unwrap()],
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "slots no longer available: 09:30");
    }

    #[test]
    fn test_gap_message_names_both_times() {
        let err = SlotError::SlotsNotContiguous {
            after: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            next: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            expected_minutes: 30,
            actual_minutes: 60,
        };
        assert_eq!(
            err.to_string(),
            "gap between 09:00 and 10:00: expected 30 minutes, found 60"
        );
        assert_eq!(AppError::from(err).status_code(), StatusCode::BAD_REQUEST);
    }
}
