use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::SalonScope;
use crate::db::queries;
use crate::errors::{AppError, SlotError};
use crate::models::TimeSlot;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CheckDetails {
    pub service_duration: Option<i32>,
    pub frequency_minutes: i32,
    pub required_count: usize,
    pub provided_count: usize,
    pub found_count: usize,
    pub contiguous: bool,
    pub slot_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
}

/// Outcome of checking a candidate slot group against a service.
#[derive(Debug, Clone, Serialize)]
pub struct SlotCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SlotError>,
    pub details: CheckDetails,
    /// Resolved slots in start order. Empty unless every id was found.
    #[serde(skip)]
    pub slots: Vec<TimeSlot>,
}

impl SlotCheck {
    fn fail(error: SlotError, details: CheckDetails) -> Self {
        Self {
            valid: false,
            error: Some(error),
            details,
            slots: vec![],
        }
    }

    pub fn into_result(self) -> Result<Self, SlotError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Checks that `slot_ids` exactly cover the service: right count, all
/// present, all available, same day, and spaced by the salon frequency.
/// Read-only; store errors are the only `Err`.
pub fn validate_slots(
    conn: &Connection,
    scope: &SalonScope,
    service_id: &str,
    slot_ids: &[String],
) -> anyhow::Result<SlotCheck> {
    let frequency = scope.frequency(conn)?;
    let mut details = CheckDetails {
        frequency_minutes: frequency,
        provided_count: slot_ids.len(),
        ..CheckDetails::default()
    };

    let service = match queries::get_service(conn, &scope.salon_id, service_id)? {
        Some(service) if service.duration_minutes > 0 => service,
        _ => return Ok(SlotCheck::fail(SlotError::ServiceInvalid, details)),
    };
    details.service_duration = Some(service.duration_minutes);

    let required = service.required_slots(frequency);
    details.required_count = required;
    if required == 0 {
        return Ok(SlotCheck::fail(SlotError::ServiceInvalid, details));
    }
    if slot_ids.len() != required {
        return Ok(SlotCheck::fail(
            SlotError::CountMismatch {
                required,
                provided: slot_ids.len(),
            },
            details,
        ));
    }

    let found: HashMap<String, TimeSlot> = queries::get_slots_by_ids(conn, &scope.salon_id, slot_ids)?
        .into_iter()
        .map(|slot| (slot.id.clone(), slot))
        .collect();
    details.found_count = found.len();

    let missing: Vec<String> = slot_ids
        .iter()
        .filter(|id| !found.contains_key(*id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Ok(SlotCheck::fail(SlotError::SlotsNotFound { missing }, details));
    }

    let mut slots: Vec<TimeSlot> = slot_ids.iter().filter_map(|id| found.get(id).cloned()).collect();
    slots.sort_by_key(|s| (s.slot_date, s.start_time));

    let start_times: Vec<NaiveTime> = slots
        .iter()
        .filter(|s| !s.is_available)
        .map(|s| s.start_time)
        .collect();
    if !start_times.is_empty() {
        return Ok(SlotCheck::fail(SlotError::SlotsUnavailable { start_times }, details));
    }

    let dates: BTreeSet<NaiveDate> = slots.iter().map(|s| s.slot_date).collect();
    if dates.len() > 1 {
        return Ok(SlotCheck::fail(
            SlotError::SlotsSpanMultipleDays {
                dates: dates.into_iter().collect(),
            },
            details,
        ));
    }

    if let Some(gap) = first_gap(&slots, frequency) {
        return Ok(SlotCheck::fail(gap, details));
    }

    details.contiguous = true;
    details.slot_date = slots.first().map(|s| s.slot_date);
    details.start_time = slots.first().map(|s| s.start_time);

    Ok(SlotCheck {
        valid: true,
        error: None,
        details,
        slots,
    })
}

/// First pair of consecutive slots (already sorted) not exactly `frequency`
/// minutes apart.
fn first_gap(slots: &[TimeSlot], frequency: i32) -> Option<SlotError> {
    slots.windows(2).find_map(|pair| {
        let actual = pair[1]
            .start_time
            .signed_duration_since(pair[0].start_time)
            .num_minutes();
        (actual != frequency as i64).then(|| SlotError::SlotsNotContiguous {
            after: pair[0].start_time,
            next: pair[1].start_time,
            expected_minutes: frequency as i64,
            actual_minutes: actual,
        })
    })
}

/// A group of slots a service can be booked into.
#[derive(Debug, Clone, Serialize)]
pub struct SlotRun {
    pub start_time: NaiveTime,
    pub slot_ids: Vec<String>,
}

/// The `required` slots following `start` in `day_slots` (sorted by start),
/// if they form a contiguous run.
pub fn run_from(
    day_slots: &[TimeSlot],
    start: NaiveTime,
    required: usize,
    frequency: i32,
) -> Option<Vec<TimeSlot>> {
    let index = day_slots.iter().position(|s| s.start_time == start)?;
    let run = day_slots.get(index..index + required)?;
    if first_gap(run, frequency).is_some() {
        return None;
    }
    Some(run.to_vec())
}

/// Every start time on `date` from which the service fits in available,
/// contiguous slots.
pub fn bookable_runs(
    conn: &Connection,
    scope: &SalonScope,
    service_id: &str,
    date: NaiveDate,
) -> Result<Vec<SlotRun>, AppError> {
    let frequency = scope.frequency(conn)?;
    let service = queries::get_service(conn, &scope.salon_id, service_id)?
        .filter(|s| s.duration_minutes > 0)
        .ok_or(SlotError::ServiceInvalid)?;
    let required = service.required_slots(frequency);
    if required == 0 {
        return Ok(vec![]);
    }

    let available = queries::slots_on(conn, &scope.salon_id, date, true)?;
    let runs = available
        .iter()
        .filter_map(|slot| run_from(&available, slot.start_time, required, frequency))
        .filter_map(|run| {
            let start_time = run.first()?.start_time;
            Some(SlotRun {
                start_time,
                slot_ids: run.into_iter().map(|s| s.id).collect(),
            })
        })
        .collect();

    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{SalonSettings, Service};
    use crate::services::slots::{generate_slots, DayFilter, SlotRule};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn scope() -> SalonScope {
        SalonScope::new("default", 30)
    }

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
        for day in ["2024-06-03", "2024-06-04"] {
            let rule = SlotRule {
                start_date: d(day),
                end_date: d(day),
                days: DayFilter::AllDays,
                start_time: t("09:00"),
                end_time: t("12:00"),
                frequency_minutes: 30,
            };
            generate_slots(&conn, "default", &rule, d("2024-06-01")).unwrap();
        }
        conn
    }

    fn ids_at(conn: &Connection, date: &str, times: &[&str]) -> Vec<String> {
        let slots = queries::slots_on(conn, "default", d(date), false).unwrap();
        times
            .iter()
            .map(|time| {
                slots
                    .iter()
                    .find(|s| s.start_time == t(time))
                    .map(|s| s.id.clone())
                    .unwrap()
            })
            .collect()
    }

    fn check(conn: &Connection, service: &str, ids: &[String]) -> SlotCheck {
        validate_slots(conn, &scope(), service, ids).unwrap()
    }

    #[test]
    fn test_contiguous_pair_passes() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["09:00", "09:30"]);
        let result = check(&conn, "cut", &ids);
        assert!(result.valid);
        assert!(result.details.contiguous);
        assert_eq!(result.details.required_count, 2);
        assert_eq!(result.details.start_time, Some(t("09:00")));
        assert_eq!(result.slots.len(), 2);
    }

    #[test]
    fn test_order_of_ids_does_not_matter() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["10:30", "10:00"]);
        let result = check(&conn, "cut", &ids);
        assert!(result.valid);
        assert_eq!(result.details.start_time, Some(t("10:00")));
    }

    #[test]
    fn test_gap_is_rejected() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["09:00", "10:00"]);
        let result = check(&conn, "cut", &ids);
        assert!(!result.valid);
        assert_eq!(
            result.error,
            Some(SlotError::SlotsNotContiguous {
                after: t("09:00"),
                next: t("10:00"),
                expected_minutes: 30,
                actual_minutes: 60,
            })
        );
        assert!(!result.details.contiguous);
    }

    #[test]
    fn test_wrong_count_is_rejected() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["09:00", "09:30", "10:00"]);
        let result = check(&conn, "cut", &ids);
        assert_eq!(
            result.error,
            Some(SlotError::CountMismatch {
                required: 2,
                provided: 3
            })
        );
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["09:00", "09:30"]);
        assert_eq!(check(&conn, "perm", &ids).error, Some(SlotError::ServiceInvalid));
    }

    #[test]
    fn test_zero_duration_service_is_rejected() {
        let conn = setup();
        conn.execute(
            "INSERT INTO services (id, salon_id, name, duration_minutes) VALUES ('free', 'default', 'Chat', 0)",
            [],
        )
        .unwrap();
        assert_eq!(check(&conn, "free", &[]).error, Some(SlotError::ServiceInvalid));
    }

    #[test]
    fn test_missing_slot_is_reported() {
        let conn = setup();
        let mut ids = ids_at(&conn, "2024-06-03", &["09:00"]);
        ids.push("nope".to_string());
        assert_eq!(
            check(&conn, "cut", &ids).error,
            Some(SlotError::SlotsNotFound {
                missing: vec!["nope".to_string()]
            })
        );
    }

    #[test]
    fn test_slot_of_other_salon_is_not_found() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["09:00", "09:30"]);
        let other = SalonScope::new("other", 30);
        queries::create_service(
            &conn,
            &Service {
                id: "cut-b".to_string(),
                salon_id: "other".to_string(),
                name: "Cut".to_string(),
                duration_minutes: 60,
            },
        )
        .unwrap();
        let result = validate_slots(&conn, &other, "cut-b", &ids).unwrap();
        assert!(matches!(result.error, Some(SlotError::SlotsNotFound { .. })));
    }

    #[test]
    fn test_unavailable_slot_is_named() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["09:00", "09:30"]);
        assert!(queries::reserve_slot(&conn, "default", &ids[1]).unwrap());
        assert_eq!(
            check(&conn, "cut", &ids).error,
            Some(SlotError::SlotsUnavailable {
                start_times: vec![t("09:30")]
            })
        );
    }

    #[test]
    fn test_multiple_days_rejected() {
        let conn = setup();
        let mut ids = ids_at(&conn, "2024-06-03", &["11:30"]);
        ids.extend(ids_at(&conn, "2024-06-04", &["09:00"]));
        assert_eq!(
            check(&conn, "cut", &ids).error,
            Some(SlotError::SlotsSpanMultipleDays {
                dates: vec![d("2024-06-03"), d("2024-06-04")]
            })
        );
    }

    #[test]
    fn test_duplicate_ids_are_not_contiguous() {
        let conn = setup();
        let mut ids = ids_at(&conn, "2024-06-03", &["09:00"]);
        ids.push(ids[0].clone());
        assert!(matches!(
            check(&conn, "cut", &ids).error,
            Some(SlotError::SlotsNotContiguous { actual_minutes: 0, .. })
        ));
    }

    #[test]
    fn test_salon_frequency_drives_count() {
        let conn = setup();
        queries::save_settings(
            &conn,
            &SalonSettings {
                salon_id: "default".to_string(),
                business_name: String::new(),
                slot_frequency_minutes: 60,
            },
        )
        .unwrap();
        let ids = ids_at(&conn, "2024-06-03", &["09:00"]);
        let result = check(&conn, "cut", &ids);
        assert!(result.valid);
        assert_eq!(result.details.frequency_minutes, 60);
    }

    #[test]
    fn test_validation_never_mutates() {
        let conn = setup();
        let ids = ids_at(&conn, "2024-06-03", &["09:00", "09:30"]);
        check(&conn, "cut", &ids);
        let slots = queries::get_slots_by_ids(&conn, "default", &ids).unwrap();
        assert!(slots.iter().all(|s| s.is_available));
    }

    #[test]
    fn test_bookable_runs_skip_reserved() {
        let conn = setup();
        let reserved = ids_at(&conn, "2024-06-03", &["10:00"]);
        queries::reserve_slot(&conn, "default", &reserved[0]).unwrap();

        let runs = bookable_runs(&conn, &scope(), "cut", d("2024-06-03")).unwrap();
        let starts: Vec<NaiveTime> = runs.iter().map(|r| r.start_time).collect();
        assert_eq!(starts, vec![t("09:00"), t("10:30"), t("11:00")]);
        assert!(runs.iter().all(|r| r.slot_ids.len() == 2));
    }

    #[test]
    fn test_zero_frequency_yields_no_runs() {
        let conn = setup();
        let broken = SalonScope::new("default", 0);
        let runs = bookable_runs(&conn, &broken, "cut", d("2024-06-03")).unwrap();
        assert!(runs.is_empty());

        let result = validate_slots(&conn, &broken, "cut", &[]).unwrap();
        assert!(!result.valid);
        assert!(matches!(result.error, Some(SlotError::ServiceInvalid)));
    }
}
