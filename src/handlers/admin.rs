use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::handlers::{parse_date, parse_time, today};
use crate::models::{
    is_allowed_frequency, Appointment, AppointmentStatus, ExceptionalPeriod, OpeningRule,
    PeriodKind, RescheduleProposal, SalonSettings, Service,
};
use crate::services::exceptions::{
    self, NewExceptionalPeriod, NewTimeRange, PeriodOutcome, PeriodRemoval,
};
use crate::services::notifications::Notification;
use crate::services::slots;
use crate::services::workflow;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn check_frequency(minutes: i32) -> Result<i32, AppError> {
    if !is_allowed_frequency(minutes) {
        return Err(AppError::InvalidInput(format!(
            "slot frequency must be 15, 30, 45 or 60 minutes, got {minutes}"
        )));
    }
    Ok(minutes)
}

// GET /api/admin/appointments
#[derive(Deserialize)]
pub struct AppointmentsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            AppointmentStatus::parse(raw)
                .ok_or_else(|| AppError::InvalidInput(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let scope = state.scope();
    let appointments = queries::list_appointments(&state.conn(), &scope.salon_id, status, limit)?;
    Ok(Json(appointments))
}

// PATCH /api/admin/appointments/status
#[derive(Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct StatusUpdateResponse {
    pub appointment: Appointment,
    pub previous_status: AppointmentStatus,
    pub released_slots: usize,
}

pub async fn update_appointment_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<StatusUpdateResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let next = AppointmentStatus::parse(&body.status)
        .ok_or_else(|| AppError::InvalidInput(format!("unknown status: {}", body.status)))?;

    let scope = state.scope();
    let transition = {
        let conn = state.conn();
        workflow::change_status(&conn, &scope, &body.id, next)?
    };

    state
        .notifier
        .dispatch_all(Notification::status_changed(&transition.appointment));

    Ok(Json(StatusUpdateResponse {
        appointment: transition.appointment,
        previous_status: transition.previous,
        released_slots: transition.released_slots,
    }))
}

// POST /api/admin/appointments/:id/reschedule
#[derive(Deserialize)]
pub struct RescheduleBody {
    pub date: String,
    pub start_time: String,
}

pub async fn propose_reschedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<RescheduleProposal>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let date = parse_date("date", &body.date)?;
    let time = parse_time("start_time", &body.start_time)?;
    if date < today() {
        return Err(AppError::InvalidInput("cannot reschedule into the past".to_string()));
    }

    let scope = state.scope();
    let (appointment, proposal) = {
        let conn = state.conn();
        workflow::propose_reschedule(&conn, &scope, &id, date, time)?
    };

    state.notifier.dispatch(Notification::reschedule_proposed(
        &appointment,
        &proposal,
        &state.config.public_base_url,
    ));

    Ok(Json(proposal))
}

// POST /api/admin/services
#[derive(Deserialize)]
pub struct NewServiceBody {
    pub name: String,
    pub duration_minutes: i32,
}

pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewServiceBody>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if body.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name is required".to_string()));
    }
    if body.duration_minutes <= 0 {
        return Err(AppError::InvalidInput("duration_minutes must be positive".to_string()));
    }

    let service = Service {
        id: uuid::Uuid::new_v4().to_string(),
        salon_id: state.config.salon_id.clone(),
        name: body.name.trim().to_string(),
        duration_minutes: body.duration_minutes,
    };
    queries::create_service(&state.conn(), &service)?;
    tracing::info!(service_id = %service.id, duration = service.duration_minutes, "service created");

    Ok((StatusCode::CREATED, Json(service)))
}

// PATCH /api/admin/services/:id
#[derive(Deserialize)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub duration_minutes: Option<i32>,
}

pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ServicePatch>,
) -> Result<Json<Service>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if matches!(body.duration_minutes, Some(d) if d <= 0) {
        return Err(AppError::InvalidInput("duration_minutes must be positive".to_string()));
    }

    let scope = state.scope();
    let conn = state.conn();
    let mut service = queries::get_service(&conn, &scope.salon_id, &id)?
        .ok_or_else(|| AppError::NotFound(format!("service {id}")))?;
    if let Some(name) = body.name.filter(|n| !n.trim().is_empty()) {
        service.name = name.trim().to_string();
    }
    if let Some(duration) = body.duration_minutes {
        service.duration_minutes = duration;
    }
    queries::update_service(&conn, &service)?;

    Ok(Json(service))
}

// GET /api/admin/settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SalonSettings>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let scope = state.scope();
    let settings = queries::get_settings(&state.conn(), &scope.salon_id)?.unwrap_or(SalonSettings {
        salon_id: scope.salon_id.clone(),
        business_name: String::new(),
        slot_frequency_minutes: scope.default_frequency,
    });
    Ok(Json(settings))
}

// POST /api/admin/settings
#[derive(Deserialize)]
pub struct SettingsBody {
    pub business_name: Option<String>,
    pub slot_frequency_minutes: Option<i32>,
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SettingsBody>,
) -> Result<Json<SalonSettings>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let scope = state.scope();
    let conn = state.conn();
    let current = queries::get_settings(&conn, &scope.salon_id)?;
    let settings = SalonSettings {
        salon_id: scope.salon_id.clone(),
        business_name: body
            .business_name
            .or_else(|| current.as_ref().map(|s| s.business_name.clone()))
            .unwrap_or_default(),
        slot_frequency_minutes: check_frequency(
            body.slot_frequency_minutes
                .or_else(|| current.as_ref().map(|s| s.slot_frequency_minutes))
                .unwrap_or(scope.default_frequency),
        )?,
    };
    queries::save_settings(&conn, &settings)?;
    tracing::info!(
        salon_id = %settings.salon_id,
        frequency = settings.slot_frequency_minutes,
        "settings updated"
    );

    Ok(Json(settings))
}

// GET /api/admin/opening-rules
pub async fn list_opening_rules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<OpeningRule>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let scope = state.scope();
    let rules = queries::list_opening_rules(&state.conn(), &scope.salon_id)?;
    Ok(Json(rules))
}

// POST /api/admin/opening-rules
#[derive(Deserialize)]
pub struct OpeningRuleBody {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub slot_frequency_minutes: Option<i32>,
}

pub async fn create_opening_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OpeningRuleBody>,
) -> Result<(StatusCode, Json<OpeningRule>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let start_time = parse_time("start_time", &body.start_time)?;
    let end_time = parse_time("end_time", &body.end_time)?;

    let scope = state.scope();
    let rule = slots::create_opening_rule(
        &state.conn(),
        &scope,
        body.day_of_week,
        start_time,
        end_time,
        body.slot_frequency_minutes,
    )?;

    Ok((StatusCode::CREATED, Json(rule)))
}

// DELETE /api/admin/opening-rules/:id
pub async fn delete_opening_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let scope = state.scope();
    if !queries::delete_opening_rule(&state.conn(), &scope.salon_id, &id)? {
        return Err(AppError::NotFound(format!("opening rule {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/admin/generate-slots
#[derive(Deserialize)]
pub struct GenerateBody {
    pub rule_id: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub inserted: usize,
}

pub async fn generate_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let start = parse_date("start_date", &body.start_date)?;
    let end = parse_date("end_date", &body.end_date)?;

    let scope = state.scope();
    let conn = state.conn();
    let rule = queries::get_opening_rule(&conn, &scope.salon_id, &body.rule_id)?
        .ok_or_else(|| AppError::NotFound(format!("opening rule {}", body.rule_id)))?;
    let inserted = exceptions::generate_standard_slots(&conn, &scope, &rule, start, end, today())?;

    Ok(Json(GenerateResponse { inserted }))
}

// GET /api/admin/exceptional-periods
pub async fn list_exceptional_periods(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ExceptionalPeriod>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let scope = state.scope();
    let periods = queries::list_exceptional_periods(&state.conn(), &scope.salon_id)?;
    Ok(Json(periods))
}

// POST /api/admin/exceptional-periods
#[derive(Deserialize)]
pub struct TimeRangeBody {
    pub day_of_week: Option<u8>,
    pub start_time: String,
    pub end_time: String,
    pub slot_frequency_minutes: Option<i32>,
}

#[derive(Deserialize)]
pub struct PeriodBody {
    pub start_date: String,
    pub end_date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: Option<String>,
    #[serde(default)]
    pub time_ranges: Vec<TimeRangeBody>,
    #[serde(default)]
    pub confirm_cancel_appointments: bool,
}

impl PeriodBody {
    fn into_new_period(self) -> Result<(NewExceptionalPeriod, bool), AppError> {
        let kind = PeriodKind::parse(&self.kind).ok_or_else(|| {
            AppError::InvalidInput(format!("type must be \"closed\" or \"open\", got {:?}", self.kind))
        })?;

        let mut time_ranges = Vec::with_capacity(self.time_ranges.len());
        for range in &self.time_ranges {
            time_ranges.push(NewTimeRange {
                day_of_week: range.day_of_week,
                start_time: parse_time("start_time", &range.start_time)?,
                end_time: parse_time("end_time", &range.end_time)?,
                slot_frequency_minutes: range.slot_frequency_minutes,
            });
        }

        let period = NewExceptionalPeriod {
            start_date: parse_date("start_date", &self.start_date)?,
            end_date: parse_date("end_date", &self.end_date)?,
            kind,
            reason: self.reason.filter(|r| !r.trim().is_empty()),
            time_ranges,
        };
        Ok((period, self.confirm_cancel_appointments))
    }
}

pub async fn create_exceptional_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PeriodBody>,
) -> Result<(StatusCode, Json<PeriodOutcome>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let (new_period, confirm) = body.into_new_period()?;
    let scope = state.scope();
    let outcome = {
        let conn = state.conn();
        exceptions::create_period(&conn, &scope, new_period, confirm, today())?
    };

    let reason = outcome.period.reason.as_deref();
    state.notifier.dispatch_all(
        outcome
            .cancelled_appointments
            .iter()
            .map(|appt| Notification::closure_cancellation(appt, reason)),
    );

    Ok((StatusCode::CREATED, Json(outcome)))
}

// DELETE /api/admin/exceptional-periods/:id
pub async fn delete_exceptional_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PeriodRemoval>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let scope = state.scope();
    let removal = exceptions::delete_period(&state.conn(), &scope, &id, today())?;
    Ok(Json(removal))
}
