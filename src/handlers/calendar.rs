use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::AppointmentStatus;
use crate::services::calendar::generate_ics;
use crate::state::AppState;

pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    let appointment_id = raw_id.strip_suffix(".ics").unwrap_or(&raw_id);
    let scope = state.scope();

    let (appointment, service, business_name) = {
        let conn = state.conn();
        let appointment = queries::get_appointment(&conn, &scope.salon_id, appointment_id)?
            .filter(|a| a.status == AppointmentStatus::Accepted)
            .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
        let service = queries::get_service(&conn, &scope.salon_id, &appointment.service_id)?
            .ok_or_else(|| AppError::NotFound(format!("service {}", appointment.service_id)))?;
        let business_name = queries::get_settings(&conn, &scope.salon_id)?
            .map(|s| s.business_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "the salon".to_string());
        (appointment, service, business_name)
    };

    let ics = generate_ics(&appointment, &service.name, service.duration_minutes, &business_name);
    let filename = format!("appointment-{appointment_id}.ics");

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        ics,
    )
        .into_response())
}
