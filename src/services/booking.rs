use chrono::Utc;
use rusqlite::Connection;

use crate::config::SalonScope;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Appointment, AppointmentStatus, CustomerInfo, TimeSlot};
use crate::services::validation::validate_slots;

/// The single-statement writes a booking is made of. Each step has an undo,
/// so a failed booking can be rolled back without a multi-statement transaction.
pub trait SlotLedger {
    fn load_slots(&self, salon_id: &str, ids: &[String]) -> anyhow::Result<Vec<TimeSlot>>;
    fn insert_appointment(&self, appt: &Appointment) -> anyhow::Result<()>;
    fn delete_appointment(&self, salon_id: &str, id: &str) -> anyhow::Result<()>;
    /// Conditional flip to reserved; `false` when the slot was already taken.
    fn reserve_slot(&self, salon_id: &str, id: &str) -> anyhow::Result<bool>;
    fn release_slots(&self, salon_id: &str, ids: &[String]) -> anyhow::Result<usize>;
    fn link_slots(&self, appointment_id: &str, ids: &[String]) -> anyhow::Result<()>;
}

impl SlotLedger for Connection {
    fn load_slots(&self, salon_id: &str, ids: &[String]) -> anyhow::Result<Vec<TimeSlot>> {
        queries::get_slots_by_ids(self, salon_id, ids)
    }

    fn insert_appointment(&self, appt: &Appointment) -> anyhow::Result<()> {
        queries::create_appointment(self, appt)
    }

    fn delete_appointment(&self, salon_id: &str, id: &str) -> anyhow::Result<()> {
        queries::delete_appointment(self, salon_id, id).map(|_| ())
    }

    fn reserve_slot(&self, salon_id: &str, id: &str) -> anyhow::Result<bool> {
        queries::reserve_slot(self, salon_id, id)
    }

    fn release_slots(&self, salon_id: &str, ids: &[String]) -> anyhow::Result<usize> {
        queries::release_slots(self, salon_id, ids)
    }

    fn link_slots(&self, appointment_id: &str, ids: &[String]) -> anyhow::Result<()> {
        queries::link_slots(self, appointment_id, ids)
    }
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub service_id: String,
    pub slot_ids: Vec<String>,
    pub customer: CustomerInfo,
}

pub fn book(
    conn: &Connection,
    scope: &SalonScope,
    request: &BookingRequest,
) -> Result<Appointment, AppError> {
    book_with(conn, conn, scope, request)
}

/// Validates, then writes appointment, reservations and links through
/// `ledger`. Any failure after the appointment row exists is undone before
/// returning.
pub fn book_with<L: SlotLedger + ?Sized>(
    conn: &Connection,
    ledger: &L,
    scope: &SalonScope,
    request: &BookingRequest,
) -> Result<Appointment, AppError> {
    let salon_id = scope.salon_id.as_str();

    let check = validate_slots(conn, scope, &request.service_id, &request.slot_ids)?.into_result()?;
    let (appointment_date, start_time) = match check.slots.first() {
        Some(first) => (first.slot_date, first.start_time),
        None => return Err(AppError::InvalidInput("no slots selected".to_string())),
    };

    // Availability may have changed since the client picked these slots.
    let current = ledger.load_slots(salon_id, &request.slot_ids)?;
    let taken: Vec<String> = request
        .slot_ids
        .iter()
        .filter(|id| !current.iter().any(|s| &s.id == *id && s.is_available))
        .cloned()
        .collect();
    if !taken.is_empty() {
        return Err(AppError::Conflict { slots: taken });
    }

    let now = Utc::now().naive_utc();
    let appointment = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        salon_id: salon_id.to_string(),
        service_id: request.service_id.clone(),
        customer_name: request.customer.name.clone(),
        customer_email: request.customer.email.clone(),
        customer_phone: request.customer.phone.clone(),
        notes: request.customer.notes.clone(),
        appointment_date,
        start_time,
        status: AppointmentStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    ledger.insert_appointment(&appointment)?;

    let mut reserved: Vec<String> = Vec::with_capacity(request.slot_ids.len());
    for slot_id in &request.slot_ids {
        match ledger.reserve_slot(salon_id, slot_id) {
            Ok(true) => reserved.push(slot_id.clone()),
            Ok(false) => {
                compensate(ledger, salon_id, &appointment.id, &reserved);
                tracing::warn!(slot_id = %slot_id, "slot taken between validation and reservation");
                return Err(AppError::Conflict {
                    slots: vec![slot_id.clone()],
                });
            }
            Err(e) => {
                compensate(ledger, salon_id, &appointment.id, &reserved);
                return Err(e.into());
            }
        }
    }

    if let Err(e) = ledger.link_slots(&appointment.id, &request.slot_ids) {
        compensate(ledger, salon_id, &appointment.id, &reserved);
        return Err(e.into());
    }

    tracing::info!(
        appointment_id = %appointment.id,
        salon_id,
        slots = request.slot_ids.len(),
        "appointment booked"
    );
    Ok(appointment)
}

/// Undo for a partially applied booking. Failures are logged; the caller
/// still reports the original error.
fn compensate<L: SlotLedger + ?Sized>(
    ledger: &L,
    salon_id: &str,
    appointment_id: &str,
    reserved: &[String],
) {
    if !reserved.is_empty() {
        if let Err(e) = ledger.release_slots(salon_id, reserved) {
            tracing::error!(error = %e, appointment_id, "rollback: failed to release slots");
        }
    }
    if let Err(e) = ledger.delete_appointment(salon_id, appointment_id) {
        tracing::error!(error = %e, appointment_id, "rollback: failed to delete appointment");
    }
}
