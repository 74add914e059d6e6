use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::handlers::parse_date;
use crate::models::{Appointment, CustomerInfo, Service, TimeSlot};
use crate::services::booking::{self, BookingRequest};
use crate::services::notifications::Notification;
use crate::services::validation::{self, SlotCheck, SlotRun};
use crate::services::workflow::{self, RescheduleOutcome};
use crate::state::AppState;

// GET /api/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Service>>, AppError> {
    let scope = state.scope();
    let services = queries::list_services(&state.conn(), &scope.salon_id)?;
    Ok(Json(services))
}

// GET /api/slots?date=
#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Vec<TimeSlot>>, AppError> {
    let date = parse_date("date", &query.date)?;
    let scope = state.scope();
    let slots = queries::slots_on(&state.conn(), &scope.salon_id, date, true)?;
    Ok(Json(slots))
}

// GET /api/slots/starts?service_id=&date=
#[derive(Deserialize)]
pub struct StartsQuery {
    pub service_id: String,
    pub date: String,
}

pub async fn list_starts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StartsQuery>,
) -> Result<Json<Vec<SlotRun>>, AppError> {
    let date = parse_date("date", &query.date)?;
    let scope = state.scope();
    let runs = validation::bookable_runs(&state.conn(), &scope, &query.service_id, date)?;
    Ok(Json(runs))
}

// POST /api/slots/validate
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[serde(alias = "service_id")]
    pub service_id: String,
    #[serde(alias = "required_slot_ids")]
    pub required_slot_ids: Vec<String>,
}

pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<SlotCheck>, AppError> {
    let scope = state.scope();
    let check = validation::validate_slots(
        &state.conn(),
        &scope,
        &body.service_id,
        &body.required_slot_ids,
    )?;
    Ok(Json(check))
}

// POST /api/bookings
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingBody {
    pub service_id: String,
    pub required_slot_ids: Vec<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
}

impl BookingBody {
    fn into_request(self) -> Result<BookingRequest, AppError> {
        let name = self.customer_name.trim().to_string();
        let email = self.customer_email.trim().to_string();
        if name.is_empty() {
            return Err(AppError::InvalidInput("customerName is required".to_string()));
        }
        if !email.contains('@') {
            return Err(AppError::InvalidInput("customerEmail is not a valid address".to_string()));
        }

        Ok(BookingRequest {
            service_id: self.service_id,
            slot_ids: self.required_slot_ids,
            customer: CustomerInfo {
                name,
                email,
                phone: self.customer_phone.filter(|p| !p.trim().is_empty()),
                notes: self.notes.filter(|n| !n.trim().is_empty()),
            },
        })
    }
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BookingBody>,
) -> Result<Json<Appointment>, AppError> {
    let request = body.into_request()?;
    let scope = state.scope();

    let (appointment, service_name) = {
        let conn = state.conn();
        let appointment = booking::book(&conn, &scope, &request)?;
        let service_name = booked_service_name(&conn, &scope.salon_id, &appointment);
        (appointment, service_name)
    };

    state
        .notifier
        .dispatch(Notification::booking_received(&appointment, &service_name));

    Ok(Json(appointment))
}

/// Service name for the booking notification. Lookup errors are logged, not
/// returned.
fn booked_service_name(conn: &Connection, salon_id: &str, appointment: &Appointment) -> String {
    match queries::get_service(conn, salon_id, &appointment.service_id) {
        Ok(service) => service.map(|s| s.name).unwrap_or_default(),
        Err(e) => {
            tracing::error!(
                appointment_id = %appointment.id,
                "failed to load service for booking notification: {e}"
            );
            String::new()
        }
    }
}

// POST /api/reschedule/:token
#[derive(Deserialize)]
pub struct RescheduleAnswer {
    pub accept: bool,
}

#[derive(Serialize)]
pub struct RescheduleAnswerResponse {
    pub outcome: &'static str,
    pub appointment: Appointment,
}

pub async fn respond_to_reschedule(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(body): Json<RescheduleAnswer>,
) -> Result<Json<RescheduleAnswerResponse>, AppError> {
    let scope = state.scope();
    let outcome = {
        let conn = state.conn();
        workflow::respond_to_reschedule(&conn, &scope, &token, body.accept)?
    };

    let response = match outcome {
        RescheduleOutcome::Accepted(appointment) => {
            state
                .notifier
                .dispatch(Notification::reschedule_confirmed(&appointment));
            RescheduleAnswerResponse {
                outcome: "accepted",
                appointment,
            }
        }
        RescheduleOutcome::Rejected(transition) => {
            state
                .notifier
                .dispatch_all(Notification::status_changed(&transition.appointment));
            RescheduleAnswerResponse {
                outcome: "rejected",
                appointment: transition.appointment,
            }
        }
    };

    Ok(Json(response))
}
