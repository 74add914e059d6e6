use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;

use crate::config::SalonScope;
use crate::db::queries;
use crate::errors::{AppError, SlotError};
use crate::models::{Appointment, AppointmentStatus, RescheduleProposal};
use crate::services::validation::validate_slots;

#[derive(Debug, Clone)]
pub struct Transition {
    pub appointment: Appointment,
    pub previous: AppointmentStatus,
    pub released_slots: usize,
}

fn load_appointment(conn: &Connection, scope: &SalonScope, id: &str) -> Result<Appointment, AppError> {
    queries::get_appointment(conn, &scope.salon_id, id)?
        .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))
}

/// Applies an admin status change. Refusal and cancellation hand the linked
/// slots back to the public pool.
pub fn change_status(
    conn: &Connection,
    scope: &SalonScope,
    id: &str,
    next: AppointmentStatus,
) -> Result<Transition, AppError> {
    let salon_id = scope.salon_id.as_str();
    let mut appointment = load_appointment(conn, scope, id)?;
    let previous = appointment.status;

    if !previous.can_transition_to(next) {
        return Err(AppError::TransitionInvalid {
            from: previous,
            to: next,
        });
    }

    if !queries::update_appointment_status(conn, salon_id, id, previous, next)? {
        // Someone else moved it first; report against what it is now.
        let current = load_appointment(conn, scope, id)?;
        return Err(AppError::TransitionInvalid {
            from: current.status,
            to: next,
        });
    }

    let mut released_slots = 0;
    if !next.holds_slots() {
        let released = queries::linked_slot_ids(conn, id)
            .and_then(|ids| queries::release_slots(conn, salon_id, &ids));
        match released {
            Ok(count) => released_slots = count,
            Err(e) => {
                if let Err(undo) = queries::update_appointment_status(conn, salon_id, id, next, previous) {
                    tracing::error!(error = %undo, appointment_id = id, "rollback: failed to restore status");
                }
                return Err(e.into());
            }
        }
        queries::delete_reschedule_proposal(conn, id)?;
    }

    appointment.status = next;
    appointment.updated_at = Utc::now().naive_utc();
    tracing::info!(
        appointment_id = id,
        from = previous.as_str(),
        to = next.as_str(),
        released_slots,
        "appointment status changed"
    );

    Ok(Transition {
        appointment,
        previous,
        released_slots,
    })
}

/// Records a proposed new time. The appointment itself is unchanged until the
/// customer accepts.
pub fn propose_reschedule(
    conn: &Connection,
    scope: &SalonScope,
    id: &str,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<(Appointment, RescheduleProposal), AppError> {
    let appointment = load_appointment(conn, scope, id)?;
    if !appointment.status.holds_slots() {
        return Err(AppError::InvalidInput(format!(
            "a {} appointment cannot be rescheduled",
            appointment.status.as_str()
        )));
    }

    let proposal = RescheduleProposal {
        appointment_id: appointment.id.clone(),
        token: uuid::Uuid::new_v4().simple().to_string(),
        proposed_date: date,
        proposed_time: time,
    };
    queries::save_reschedule_proposal(conn, &proposal)?;
    tracing::info!(appointment_id = id, date = %date, time = %time, "reschedule proposed");

    Ok((appointment, proposal))
}

#[derive(Debug, Clone)]
pub enum RescheduleOutcome {
    Accepted(Appointment),
    Rejected(Transition),
}

/// Customer answer to a proposal. Accepting moves the booking onto the slots
/// at the proposed time; rejecting cancels the appointment.
pub fn respond_to_reschedule(
    conn: &Connection,
    scope: &SalonScope,
    token: &str,
    accept: bool,
) -> Result<RescheduleOutcome, AppError> {
    let proposal = queries::get_reschedule_by_token(conn, token)?
        .ok_or_else(|| AppError::NotFound("reschedule proposal".to_string()))?;

    if !accept {
        let transition = change_status(conn, scope, &proposal.appointment_id, AppointmentStatus::Cancelled)?;
        queries::delete_reschedule_proposal(conn, &proposal.appointment_id)?;
        return Ok(RescheduleOutcome::Rejected(transition));
    }

    let appointment = apply_reschedule(conn, scope, &proposal)?;
    queries::delete_reschedule_proposal(conn, &proposal.appointment_id)?;
    Ok(RescheduleOutcome::Accepted(appointment))
}

fn apply_reschedule(
    conn: &Connection,
    scope: &SalonScope,
    proposal: &RescheduleProposal,
) -> Result<Appointment, AppError> {
    let salon_id = scope.salon_id.as_str();
    let mut appointment = load_appointment(conn, scope, &proposal.appointment_id)?;
    if !appointment.status.holds_slots() {
        return Err(AppError::InvalidInput(format!(
            "a {} appointment cannot be rescheduled",
            appointment.status.as_str()
        )));
    }

    let frequency = scope.frequency(conn)?;
    let service = queries::get_service(conn, salon_id, &appointment.service_id)?
        .filter(|s| s.duration_minutes > 0)
        .ok_or(SlotError::ServiceInvalid)?;
    let required = service.required_slots(frequency);

    let old_ids = queries::linked_slot_ids(conn, &appointment.id)?;
    queries::release_slots(conn, salon_id, &old_ids)?;

    let result = move_to_proposed(conn, scope, &appointment, proposal, &old_ids, required);
    if result.is_err() {
        restore_reservation(conn, salon_id, &appointment.id, &old_ids);
    }
    result?;

    appointment.appointment_date = proposal.proposed_date;
    appointment.start_time = proposal.proposed_time;
    appointment.updated_at = Utc::now().naive_utc();
    tracing::info!(appointment_id = %appointment.id, "appointment rescheduled");
    Ok(appointment)
}

/// Everything after the old slots were released. On `Err`, the new slots
/// have been handed back and the caller restores the old ones.
fn move_to_proposed(
    conn: &Connection,
    scope: &SalonScope,
    appointment: &Appointment,
    proposal: &RescheduleProposal,
    old_ids: &[String],
    required: usize,
) -> Result<(), AppError> {
    let salon_id = scope.salon_id.as_str();
    let day = queries::slots_on(conn, salon_id, proposal.proposed_date, false)?;
    let Some(start) = day.iter().position(|s| s.start_time == proposal.proposed_time) else {
        return Err(SlotError::SlotsNotFound {
            missing: vec![format!(
                "{} {}",
                proposal.proposed_date,
                proposal.proposed_time.format("%H:%M")
            )],
        }
        .into());
    };
    let new_ids: Vec<String> = day[start..]
        .iter()
        .take(required)
        .map(|s| s.id.clone())
        .collect();

    validate_slots(conn, scope, &appointment.service_id, &new_ids)?.into_result()?;

    let mut reserved = vec![];
    for slot_id in &new_ids {
        if !queries::reserve_slot(conn, salon_id, slot_id)? {
            release_quietly(conn, salon_id, &reserved);
            return Err(AppError::Conflict {
                slots: vec![slot_id.clone()],
            });
        }
        reserved.push(slot_id.clone());
    }

    let relinked = queries::unlink_slots(conn, &appointment.id)
        .and_then(|_| queries::link_slots(conn, &appointment.id, &new_ids))
        .and_then(|_| {
            queries::update_appointment_schedule(
                conn,
                salon_id,
                &appointment.id,
                proposal.proposed_date,
                proposal.proposed_time,
            )
        });
    if let Err(e) = relinked {
        release_quietly(conn, salon_id, &reserved);
        if let Err(undo) = queries::unlink_slots(conn, &appointment.id)
            .and_then(|_| queries::link_slots(conn, &appointment.id, old_ids))
        {
            tracing::error!(error = %undo, appointment_id = %appointment.id, "rollback: failed to relink slots");
        }
        return Err(e.into());
    }

    Ok(())
}

fn release_quietly(conn: &Connection, salon_id: &str, ids: &[String]) {
    if let Err(e) = queries::release_slots(conn, salon_id, ids) {
        tracing::error!(error = %e, "rollback: failed to release slots");
    }
}

fn restore_reservation(conn: &Connection, salon_id: &str, appointment_id: &str, ids: &[String]) {
    for slot_id in ids {
        match queries::reserve_slot(conn, salon_id, slot_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(appointment_id, slot_id = %slot_id, "rollback: previous slot was taken meanwhile")
            }
            Err(e) => tracing::error!(error = %e, appointment_id, "rollback: failed to re-reserve slot"),
        }
    }
}
