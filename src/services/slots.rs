use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use rusqlite::Connection;

use crate::config::SalonScope;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{is_allowed_frequency, OpeningRule};

/// Which days of a date span a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayFilter {
    Weekday(Weekday),
    AllDays,
}

impl DayFilter {
    fn matches(&self, date: NaiveDate) -> bool {
        match self {
            DayFilter::Weekday(day) => date.weekday() == *day,
            DayFilter::AllDays => true,
        }
    }
}

/// 0 = Monday .. 6 = Sunday.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct SlotRule {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: DayFilter,
    pub start_time: NaiveTime,
    /// Exclusive: the last slot starts strictly before this time.
    pub end_time: NaiveTime,
    pub frequency_minutes: i32,
}

impl SlotRule {
    pub fn for_opening_rule(
        rule: &OpeningRule,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Self, AppError> {
        let weekday = weekday_from_index(rule.day_of_week).ok_or_else(|| {
            AppError::InvalidInput(format!("day_of_week out of range: {}", rule.day_of_week))
        })?;
        Ok(Self {
            start_date,
            end_date,
            days: DayFilter::Weekday(weekday),
            start_time: rule.start_time,
            end_time: rule.end_time,
            frequency_minutes: rule.slot_frequency_minutes,
        })
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !is_allowed_frequency(self.frequency_minutes) {
            return Err(AppError::InvalidInput(format!(
                "slot frequency must be 15, 30, 45 or 60 minutes, got {}",
                self.frequency_minutes
            )));
        }
        if self.start_time >= self.end_time {
            return Err(AppError::InvalidInput(
                "start time must be before end time".to_string(),
            ));
        }
        if self.start_date > self.end_date {
            return Err(AppError::InvalidInput(
                "start date must not be after end date".to_string(),
            ));
        }
        Ok(())
    }
}

/// The frequency a new rule or range steps at. It must match the salon's, since
/// the validator only accepts runs spaced by the salon frequency.
pub fn resolve_frequency(requested: Option<i32>, salon_frequency: i32) -> Result<i32, AppError> {
    let frequency = requested.unwrap_or(salon_frequency);
    if !is_allowed_frequency(frequency) {
        return Err(AppError::InvalidInput(format!(
            "slot frequency must be 15, 30, 45 or 60 minutes, got {frequency}"
        )));
    }
    if frequency != salon_frequency {
        return Err(AppError::InvalidInput(format!(
            "slot frequency {frequency} differs from the salon frequency of {salon_frequency} minutes"
        )));
    }
    Ok(frequency)
}

pub fn create_opening_rule(
    conn: &Connection,
    scope: &SalonScope,
    day_of_week: u8,
    start_time: NaiveTime,
    end_time: NaiveTime,
    frequency: Option<i32>,
) -> Result<OpeningRule, AppError> {
    if weekday_from_index(day_of_week).is_none() {
        return Err(AppError::InvalidInput(
            "day_of_week must be 0 (Monday) to 6 (Sunday)".to_string(),
        ));
    }
    if start_time >= end_time {
        return Err(AppError::InvalidInput(
            "start_time must be before end_time".to_string(),
        ));
    }

    let rule = OpeningRule {
        id: uuid::Uuid::new_v4().to_string(),
        salon_id: scope.salon_id.clone(),
        day_of_week,
        start_time,
        end_time,
        slot_frequency_minutes: resolve_frequency(frequency, scope.frequency(conn)?)?,
    };
    queries::create_opening_rule(conn, &rule)?;
    tracing::info!(rule_id = %rule.id, day = rule.day_of_week, "opening rule created");
    Ok(rule)
}

/// Candidate (date, start) pairs for a rule. Days before `today` are skipped.
pub fn plan_slots(rule: &SlotRule, today: NaiveDate) -> Vec<(NaiveDate, NaiveTime)> {
    let mut planned = vec![];
    if rule.frequency_minutes <= 0 {
        return planned;
    }
    let step = Duration::minutes(rule.frequency_minutes as i64);

    let mut date = rule.start_date.max(today);
    while date <= rule.end_date {
        if rule.days.matches(date) {
            let mut time = rule.start_time;
            while time < rule.end_time {
                planned.push((date, time));
                let (next, wrapped) = time.overflowing_add_signed(step);
                if wrapped != 0 {
                    break;
                }
                time = next;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    planned
}

/// Inserts the candidates that do not exist yet. Returns how many were written.
pub fn insert_new_slots(
    conn: &Connection,
    salon_id: &str,
    candidates: Vec<(NaiveDate, NaiveTime)>,
) -> anyhow::Result<usize> {
    let (Some(first), Some(last)) = (
        candidates.iter().map(|(d, _)| *d).min(),
        candidates.iter().map(|(d, _)| *d).max(),
    ) else {
        return Ok(0);
    };

    let existing = queries::slot_keys_in_range(conn, salon_id, first, last)?;
    let mut fresh: Vec<_> = candidates
        .into_iter()
        .filter(|key| !existing.contains(key))
        .collect();
    fresh.sort();
    fresh.dedup();

    let inserted = queries::insert_slots(conn, salon_id, &fresh)?;
    tracing::debug!(salon_id, inserted, "slots inserted");
    Ok(inserted)
}

/// Generates slots for a rule. Idempotent: a second run with the same rule
/// inserts nothing.
pub fn generate_slots(
    conn: &Connection,
    salon_id: &str,
    rule: &SlotRule,
    today: NaiveDate,
) -> Result<usize, AppError> {
    rule.validate()?;
    let inserted = insert_new_slots(conn, salon_id, plan_slots(rule, today))?;
    tracing::info!(
        salon_id,
        start = %rule.start_date,
        end = %rule.end_date,
        inserted,
        "slot generation finished"
    );
    Ok(inserted)
}
