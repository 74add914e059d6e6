pub mod admin;
pub mod calendar;
pub mod public;

use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // public booking site
        .route("/api/services", get(public::list_services))
        .route("/api/slots", get(public::list_slots))
        .route("/api/slots/starts", get(public::list_starts))
        .route("/api/slots/validate", post(public::validate))
        .route("/api/bookings", post(public::create_booking))
        .route("/api/reschedule/:token", post(public::respond_to_reschedule))
        .route("/calendar/:appointment_id", get(calendar::download_ics))
        // admin
        .route("/api/admin/appointments", get(admin::list_appointments))
        .route(
            "/api/admin/appointments/status",
            patch(admin::update_appointment_status),
        )
        .route(
            "/api/admin/appointments/:id/reschedule",
            post(admin::propose_reschedule),
        )
        .route("/api/admin/services", post(admin::create_service))
        .route("/api/admin/services/:id", patch(admin::update_service))
        .route(
            "/api/admin/settings",
            get(admin::get_settings).post(admin::update_settings),
        )
        .route(
            "/api/admin/opening-rules",
            get(admin::list_opening_rules).post(admin::create_opening_rule),
        )
        .route(
            "/api/admin/opening-rules/:id",
            delete(admin::delete_opening_rule),
        )
        .route("/api/admin/generate-slots", post(admin::generate_slots))
        .route(
            "/api/admin/exceptional-periods",
            get(admin::list_exceptional_periods).post(admin::create_exceptional_period),
        )
        .route(
            "/api/admin/exceptional-periods/:id",
            delete(admin::delete_exceptional_period),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The local calendar day; slot generation never creates slots before it.
pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub(crate) fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::InvalidInput(format!("{field} must be YYYY-MM-DD, got {value:?}")))
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub(crate) fn parse_time(field: &str, value: &str) -> Result<NaiveTime, AppError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| AppError::InvalidInput(format!("{field} must be HH:MM, got {value:?}")))
}
