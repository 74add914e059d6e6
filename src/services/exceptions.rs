use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::SalonScope;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Appointment, AppointmentStatus, ExceptionalPeriod, ExceptionalTimeRange,
    OpeningRule, PeriodKind,
};
use crate::services::slots::{self, DayFilter, SlotRule};
use crate::services::workflow;

#[derive(Debug, Clone)]
pub struct NewTimeRange {
    pub day_of_week: Option<u8>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_frequency_minutes: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewExceptionalPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kind: PeriodKind,
    pub reason: Option<String>,
    pub time_ranges: Vec<NewTimeRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodOutcome {
    pub period: ExceptionalPeriod,
    pub slots_created: usize,
    pub slots_removed: usize,
    pub cancelled_appointments: Vec<Appointment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodRemoval {
    pub period: ExceptionalPeriod,
    pub slots_created: usize,
    pub slots_removed: usize,
}

/// Creates a closure or special opening and reconciles the slot inventory of
/// its span.
///
/// A closure over accepted appointments fails with
/// [`AppError::ConfirmationRequired`] unless `confirm_cancel` is set; nothing
/// is written in that case.
pub fn create_period(
    conn: &Connection,
    scope: &SalonScope,
    new: NewExceptionalPeriod,
    confirm_cancel: bool,
    today: NaiveDate,
) -> Result<PeriodOutcome, AppError> {
    if new.start_date > new.end_date {
        return Err(AppError::InvalidInput(
            "end_date must not be before start_date".to_string(),
        ));
    }

    let frequency = scope.frequency(conn)?;
    let period_id = uuid::Uuid::new_v4().to_string();
    let mut time_ranges = Vec::with_capacity(new.time_ranges.len());
    if new.kind == PeriodKind::Open {
        for range in &new.time_ranges {
            time_ranges.push(build_range(&period_id, range, frequency)?);
        }
    }

    let period = ExceptionalPeriod {
        id: period_id,
        salon_id: scope.salon_id.clone(),
        start_date: new.start_date,
        end_date: new.end_date,
        kind: new.kind,
        reason: new.reason,
        time_ranges,
    };

    match period.kind {
        PeriodKind::Closed => apply_closure(conn, scope, period, confirm_cancel),
        PeriodKind::Open => apply_opening(conn, scope, period, today),
    }
}

fn build_range(
    period_id: &str,
    range: &NewTimeRange,
    salon_frequency: i32,
) -> Result<ExceptionalTimeRange, AppError> {
    if range.start_time >= range.end_time {
        return Err(AppError::InvalidInput(format!(
            "time range {}-{} ends before it starts",
            range.start_time.format("%H:%M"),
            range.end_time.format("%H:%M")
        )));
    }
    if matches!(range.day_of_week, Some(day) if day > 6) {
        return Err(AppError::InvalidInput("day_of_week must be 0-6".to_string()));
    }
    let frequency = slots::resolve_frequency(range.slot_frequency_minutes, salon_frequency)?;

    Ok(ExceptionalTimeRange {
        id: uuid::Uuid::new_v4().to_string(),
        period_id: period_id.to_string(),
        day_of_week: range.day_of_week,
        start_time: range.start_time,
        end_time: range.end_time,
        slot_frequency_minutes: frequency,
    })
}

fn apply_closure(
    conn: &Connection,
    scope: &SalonScope,
    period: ExceptionalPeriod,
    confirm_cancel: bool,
) -> Result<PeriodOutcome, AppError> {
    let salon_id = scope.salon_id.as_str();
    let affected = queries::appointments_in_range(
        conn,
        salon_id,
        period.start_date,
        period.end_date,
        AppointmentStatus::Accepted,
    )?;

    if !affected.is_empty() && !confirm_cancel {
        tracing::info!(
            salon_id,
            count = affected.len(),
            "closure needs confirmation before cancelling appointments"
        );
        return Err(AppError::ConfirmationRequired {
            appointments: affected,
        });
    }

    let mut cancelled_appointments = Vec::with_capacity(affected.len());
    for appointment in &affected {
        let transition =
            workflow::change_status(conn, scope, &appointment.id, AppointmentStatus::Cancelled)?;
        cancelled_appointments.push(transition.appointment);
    }

    queries::insert_exceptional_period(conn, &period)?;
    let slots_removed =
        queries::delete_available_slots_in_range(conn, salon_id, period.start_date, period.end_date)?;

    tracing::info!(
        period_id = %period.id,
        cancelled = cancelled_appointments.len(),
        slots_removed,
        "closure applied"
    );

    Ok(PeriodOutcome {
        period,
        slots_created: 0,
        slots_removed,
        cancelled_appointments,
        warning: None,
    })
}

fn apply_opening(
    conn: &Connection,
    scope: &SalonScope,
    period: ExceptionalPeriod,
    today: NaiveDate,
) -> Result<PeriodOutcome, AppError> {
    queries::insert_exceptional_period(conn, &period)?;

    let mut slots_created = 0;
    for range in &period.time_ranges {
        let rule = SlotRule {
            start_date: period.start_date,
            end_date: period.end_date,
            days: DayFilter::AllDays,
            start_time: range.start_time,
            end_time: range.end_time,
            frequency_minutes: range.slot_frequency_minutes,
        };
        slots_created += slots::generate_slots(conn, &scope.salon_id, &rule, today)?;
    }

    let warning = period
        .time_ranges
        .is_empty()
        .then(|| "opening period has no time ranges, no slots were created".to_string());
    if warning.is_some() {
        tracing::warn!(period_id = %period.id, "opening period created without time ranges");
    }

    Ok(PeriodOutcome {
        period,
        slots_created,
        slots_removed: 0,
        cancelled_appointments: vec![],
        warning,
    })
}

/// Slots the standard weekly rules produce over a span, minus dates masked by
/// a closed period. Rules step at the current salon frequency.
fn standard_plan(
    rules: &[OpeningRule],
    closures: &[ExceptionalPeriod],
    start: NaiveDate,
    end: NaiveDate,
    frequency: i32,
    today: NaiveDate,
) -> Result<Vec<(NaiveDate, NaiveTime)>, AppError> {
    let mut planned = vec![];
    for rule in rules {
        let slot_rule = SlotRule {
            frequency_minutes: frequency,
            ..SlotRule::for_opening_rule(rule, start, end)?
        };
        planned.extend(
            slots::plan_slots(&slot_rule, today)
                .into_iter()
                .filter(|(date, _)| !closures.iter().any(|p| p.covers(*date))),
        );
    }
    Ok(planned)
}

fn closed_periods(conn: &Connection, salon_id: &str) -> anyhow::Result<Vec<ExceptionalPeriod>> {
    Ok(queries::list_exceptional_periods(conn, salon_id)?
        .into_iter()
        .filter(|p| p.kind == PeriodKind::Closed)
        .collect())
}

/// Runs the generator for one weekly rule, skipping dates inside a closure.
pub fn generate_standard_slots(
    conn: &Connection,
    scope: &SalonScope,
    rule: &OpeningRule,
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<usize, AppError> {
    let frequency = scope.frequency(conn)?;
    if rule.slot_frequency_minutes != frequency {
        tracing::warn!(
            rule_id = %rule.id,
            rule_frequency = rule.slot_frequency_minutes,
            frequency,
            "opening rule predates a frequency change, stepping at the salon frequency"
        );
    }
    SlotRule {
        frequency_minutes: frequency,
        ..SlotRule::for_opening_rule(rule, start, end)?
    }
    .validate()?;
    let closures = closed_periods(conn, &scope.salon_id)?;
    let planned = standard_plan(
        std::slice::from_ref(rule),
        &closures,
        start,
        end,
        frequency,
        today,
    )?;
    let inserted = slots::insert_new_slots(conn, &scope.salon_id, planned)?;
    tracing::info!(rule_id = %rule.id, inserted, "standard slots generated");
    Ok(inserted)
}

/// Removes an exceptional period and brings its span back to the standard
/// schedule.
pub fn delete_period(
    conn: &Connection,
    scope: &SalonScope,
    id: &str,
    today: NaiveDate,
) -> Result<PeriodRemoval, AppError> {
    let salon_id = scope.salon_id.as_str();
    let period = queries::get_exceptional_period(conn, salon_id, id)?
        .ok_or_else(|| AppError::NotFound(format!("exceptional period {id}")))?;
    queries::delete_exceptional_period(conn, salon_id, id)?;

    let rules = queries::list_opening_rules(conn, salon_id)?;
    let closures = closed_periods(conn, salon_id)?;
    let frequency = scope.frequency(conn)?;
    let standard = standard_plan(
        &rules,
        &closures,
        period.start_date,
        period.end_date,
        frequency,
        today,
    )?;

    let (slots_created, slots_removed) = match period.kind {
        PeriodKind::Closed => (slots::insert_new_slots(conn, salon_id, standard)?, 0),
        PeriodKind::Open => (0, prune_unexplained(conn, scope, &period, standard, today)?),
    };

    tracing::info!(
        period_id = id,
        kind = period.kind.as_str(),
        slots_created,
        slots_removed,
        "exceptional period removed"
    );

    Ok(PeriodRemoval {
        period,
        slots_created,
        slots_removed,
    })
}

/// After an opening is removed, drops the available slots of its span that
/// neither the weekly rules nor another opening account for.
fn prune_unexplained(
    conn: &Connection,
    scope: &SalonScope,
    removed: &ExceptionalPeriod,
    standard: Vec<(NaiveDate, NaiveTime)>,
    today: NaiveDate,
) -> Result<usize, AppError> {
    let salon_id = scope.salon_id.as_str();
    let mut explained: HashSet<(NaiveDate, NaiveTime)> = standard.into_iter().collect();

    for other in queries::list_exceptional_periods(conn, salon_id)? {
        if other.kind != PeriodKind::Open
            || other.end_date < removed.start_date
            || other.start_date > removed.end_date
        {
            continue;
        }
        for range in &other.time_ranges {
            let rule = SlotRule {
                start_date: other.start_date.max(removed.start_date),
                end_date: other.end_date.min(removed.end_date),
                days: DayFilter::AllDays,
                start_time: range.start_time,
                end_time: range.end_time,
                frequency_minutes: range.slot_frequency_minutes,
            };
            explained.extend(slots::plan_slots(&rule, today));
        }
    }

    let stale: Vec<String> = queries::slots_in_range(conn, salon_id, removed.start_date, removed.end_date, true)?
        .into_iter()
        .filter(|slot| slot.slot_date >= today)
        .filter(|slot| !explained.contains(&(slot.slot_date, slot.start_time)))
        .map(|slot| slot.id)
        .collect();

    Ok(queries::delete_available_slots(conn, salon_id, &stale)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{CustomerInfo, Service};
    use crate::services::booking::{book, BookingRequest};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn scope() -> SalonScope {
        SalonScope::new("default", 30)
    }

    const TODAY: &str = "2024-06-01";

    /// Mondays 09:00-12:00 and a 60 minute service; slots for 2024-06-03 and 2024-06-10.
    fn setup() -> Connection {
        let conn = db::init_db(":memory:").unwrap();
        queries::create_service(
            &conn,
            &Service {
                id: "cut".to_string(),
                salon_id: "default".to_string(),
                name: "Cut".to_string(),
                duration_minutes: 60,
            },
        )
        .unwrap();
        let rule = OpeningRule {
            id: "mon".to_string(),
            salon_id: "default".to_string(),
            day_of_week: 0,
            start_time: t("09:00"),
            end_time: t("12:00"),
            slot_frequency_minutes: 30,
        };
        queries::create_opening_rule(&conn, &rule).unwrap();
        generate_standard_slots(&conn, &scope(), &rule, d("2024-06-03"), d("2024-06-10"), d(TODAY))
            .unwrap();
        conn
    }

    fn ids_at(conn: &Connection, date: &str, times: &[&str]) -> Vec<String> {
        let slots = queries::slots_on(conn, "default", d(date), false).unwrap();
        times
            .iter()
            .map(|time| slots.iter().find(|s| s.start_time == t(time)).unwrap().id.clone())
            .collect()
    }

    fn accepted_booking(conn: &Connection, date: &str, times: &[&str]) -> Appointment {
        let appt = book(
            conn,
            &scope(),
            &BookingRequest {
                service_id: "cut".to_string(),
                slot_ids: ids_at(conn, date, times),
                customer: CustomerInfo {
                    name: "Bob".to_string(),
                    email: "bob@example.com".to_string(),
                    phone: None,
                    notes: None,
                },
            },
        )
        .unwrap();
        workflow::change_status(conn, &scope(), &appt.id, AppointmentStatus::Accepted)
            .unwrap()
            .appointment
    }

    fn closure(start: &str, end: &str) -> NewExceptionalPeriod {
        NewExceptionalPeriod {
            start_date: d(start),
            end_date: d(end),
            kind: PeriodKind::Closed,
            reason: Some("holiday".to_string()),
            time_ranges: vec![],
        }
    }

    fn slot_count(conn: &Connection, date: &str) -> usize {
        queries::slots_on(conn, "default", d(date), false).unwrap().len()
    }

    #[test]
    fn test_closure_with_accepted_appointment_needs_confirmation() {
        let conn = setup();
        let appt = accepted_booking(&conn, "2024-06-03", &["09:00", "09:30"]);

        let err = create_period(&conn, &scope(), closure("2024-06-03", "2024-06-03"), false, d(TODAY))
            .unwrap_err();
        match err {
            AppError::ConfirmationRequired { appointments } => {
                assert_eq!(appointments.len(), 1);
                assert_eq!(appointments[0].id, appt.id);
            }
            other => panic!("expected confirmation request, got {other:?}"),
        }

        assert!(queries::list_exceptional_periods(&conn, "default").unwrap().is_empty());
        assert_eq!(slot_count(&conn, "2024-06-03"), 6);
        let stored = queries::get_appointment(&conn, "default", &appt.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Accepted);
    }

    #[test]
    fn test_confirmed_closure_cancels_and_clears_slots() {
        let conn = setup();
        let appt = accepted_booking(&conn, "2024-06-03", &["09:00", "09:30"]);

        let outcome =
            create_period(&conn, &scope(), closure("2024-06-03", "2024-06-03"), true, d(TODAY)).unwrap();
        assert_eq!(outcome.cancelled_appointments.len(), 1);
        assert_eq!(outcome.cancelled_appointments[0].status, AppointmentStatus::Cancelled);
        assert_eq!(outcome.slots_removed, 6);
        assert_eq!(slot_count(&conn, "2024-06-03"), 0);
        assert_eq!(slot_count(&conn, "2024-06-10"), 6);

        let stored = queries::get_appointment(&conn, "default", &appt.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
    }

    #[test]
    fn test_closure_keeps_reserved_slots() {
        let conn = setup();
        // Pending bookings are not cancelled by a closure and keep their slots.
        let held = ids_at(&conn, "2024-06-03", &["10:00", "10:30"]);
        book(
            &conn,
            &scope(),
            &BookingRequest {
                service_id: "cut".to_string(),
                slot_ids: held.clone(),
                customer: CustomerInfo {
                    name: "Cy".to_string(),
                    email: "cy@example.com".to_string(),
                    phone: None,
                    notes: None,
                },
            },
        )
        .unwrap();

        let outcome =
            create_period(&conn, &scope(), closure("2024-06-03", "2024-06-03"), false, d(TODAY)).unwrap();
        assert_eq!(outcome.slots_removed, 4);
        let remaining = queries::slots_on(&conn, "default", d("2024-06-03"), false).unwrap();
        let mut remaining_ids: Vec<String> = remaining.into_iter().map(|s| s.id).collect();
        remaining_ids.sort();
        let mut expected = held;
        expected.sort();
        assert_eq!(remaining_ids, expected);
    }

    #[test]
    fn test_deleting_closure_restores_standard_slots() {
        let conn = setup();
        let outcome =
            create_period(&conn, &scope(), closure("2024-06-03", "2024-06-10"), false, d(TODAY)).unwrap();
        assert_eq!(outcome.slots_removed, 12);

        let removal = delete_period(&conn, &scope(), &outcome.period.id, d(TODAY)).unwrap();
        assert_eq!(removal.slots_created, 12);
        assert_eq!(slot_count(&conn, "2024-06-03"), 6);
        assert_eq!(slot_count(&conn, "2024-06-10"), 6);
        // Tuesday has no standard rule.
        assert_eq!(slot_count(&conn, "2024-06-04"), 0);
    }

    #[test]
    fn test_restoration_respects_other_closures() {
        let conn = setup();
        let wide =
            create_period(&conn, &scope(), closure("2024-06-03", "2024-06-10"), false, d(TODAY)).unwrap();
        create_period(&conn, &scope(), closure("2024-06-10", "2024-06-10"), false, d(TODAY)).unwrap();

        delete_period(&conn, &scope(), &wide.period.id, d(TODAY)).unwrap();
        assert_eq!(slot_count(&conn, "2024-06-03"), 6);
        assert_eq!(slot_count(&conn, "2024-06-10"), 0);
    }

    #[test]
    fn test_standard_generation_skips_closed_days() {
        let conn = setup();
        create_period(&conn, &scope(), closure("2024-06-17", "2024-06-17"), false, d(TODAY)).unwrap();
        let rule = queries::get_opening_rule(&conn, "default", "mon").unwrap().unwrap();
        let inserted =
            generate_standard_slots(&conn, &scope(), &rule, d("2024-06-17"), d("2024-06-24"), d(TODAY))
                .unwrap();
        assert_eq!(inserted, 6);
        assert_eq!(slot_count(&conn, "2024-06-17"), 0);
        assert_eq!(slot_count(&conn, "2024-06-24"), 6);
    }

    #[test]
    fn test_opening_generates_every_day_of_span() {
        let conn = setup();
        let opening = NewExceptionalPeriod {
            start_date: d("2024-06-08"),
            end_date: d("2024-06-09"),
            kind: PeriodKind::Open,
            reason: Some("wedding season".to_string()),
            time_ranges: vec![NewTimeRange {
                day_of_week: Some(5),
                start_time: t("14:00"),
                end_time: t("16:00"),
                slot_frequency_minutes: None,
            }],
        };
        let outcome = create_period(&conn, &scope(), opening, false, d(TODAY)).unwrap();
        assert_eq!(outcome.slots_created, 8);
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.period.time_ranges[0].slot_frequency_minutes, 30);
        assert_eq!(slot_count(&conn, "2024-06-08"), 4);
        assert_eq!(slot_count(&conn, "2024-06-09"), 4);
    }

    #[test]
    fn test_opening_without_ranges_warns() {
        let conn = setup();
        let opening = NewExceptionalPeriod {
            start_date: d("2024-06-08"),
            end_date: d("2024-06-08"),
            kind: PeriodKind::Open,
            reason: None,
            time_ranges: vec![],
        };
        let outcome = create_period(&conn, &scope(), opening, false, d(TODAY)).unwrap();
        assert_eq!(outcome.slots_created, 0);
        assert!(outcome.warning.is_some());
        assert_eq!(queries::list_exceptional_periods(&conn, "default").unwrap().len(), 1);
    }

    #[test]
    fn test_deleting_opening_prunes_only_its_slots() {
        let conn = setup();
        let opening = NewExceptionalPeriod {
            start_date: d("2024-06-03"),
            end_date: d("2024-06-04"),
            kind: PeriodKind::Open,
            reason: None,
            time_ranges: vec![NewTimeRange {
                day_of_week: None,
                start_time: t("11:00"),
                end_time: t("13:00"),
                slot_frequency_minutes: Some(30),
            }],
        };
        let outcome = create_period(&conn, &scope(), opening, false, d(TODAY)).unwrap();
        // Monday gains 12:00 and 12:30, Tuesday gets 4 slots.
        assert_eq!(outcome.slots_created, 6);

        let removal = delete_period(&conn, &scope(), &outcome.period.id, d(TODAY)).unwrap();
        assert_eq!(removal.slots_removed, 6);
        assert_eq!(slot_count(&conn, "2024-06-03"), 6);
        assert_eq!(slot_count(&conn, "2024-06-04"), 0);
    }

    #[test]
    fn test_invalid_periods_are_rejected() {
        let conn = setup();
        assert!(matches!(
            create_period(&conn, &scope(), closure("2024-06-05", "2024-06-03"), false, d(TODAY)),
            Err(AppError::InvalidInput(_))
        ));

        let inverted = NewExceptionalPeriod {
            start_date: d("2024-06-08"),
            end_date: d("2024-06-08"),
            kind: PeriodKind::Open,
            reason: None,
            time_ranges: vec![NewTimeRange {
                day_of_week: None,
                start_time: t("16:00"),
                end_time: t("14:00"),
                slot_frequency_minutes: None,
            }],
        };
        assert!(create_period(&conn, &scope(), inverted, false, d(TODAY)).is_err());
        assert!(queries::list_exceptional_periods(&conn, "default").unwrap().is_empty());
    }

    #[test]
    fn test_open_range_with_other_frequency_is_rejected() {
        let conn = setup();
        let hourly = NewExceptionalPeriod {
            start_date: d("2024-06-08"),
            end_date: d("2024-06-08"),
            kind: PeriodKind::Open,
            reason: None,
            time_ranges: vec![NewTimeRange {
                day_of_week: None,
                start_time: t("10:00"),
                end_time: t("14:00"),
                slot_frequency_minutes: Some(60),
            }],
        };
        assert!(matches!(
            create_period(&conn, &scope(), hourly, false, d(TODAY)),
            Err(AppError::InvalidInput(_))
        ));
        assert!(queries::list_exceptional_periods(&conn, "default").unwrap().is_empty());
    }

    #[test]
    fn test_delete_unknown_period() {
        let conn = setup();
        assert!(matches!(
            delete_period(&conn, &scope(), "nope", d(TODAY)),
            Err(AppError::NotFound(_))
        ));
    }
}
