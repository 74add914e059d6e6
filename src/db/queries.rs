use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, params_from_iter, Connection};

use crate::models::{
    Appointment, AppointmentStatus, ExceptionalPeriod, ExceptionalTimeRange, OpeningRule,
    PeriodKind, RescheduleProposal, SalonSettings, Service, TimeSlot,
};

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M";
const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

pub fn fmt_time(time: NaiveTime) -> String {
    time.format(TIME_FMT).to_string()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).map_err(|e| anyhow::anyhow!("bad date {s:?}: {e}"))
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FMT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| anyhow::anyhow!("bad time {s:?}: {e}"))
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FMT)
        .map_err(|e| anyhow::anyhow!("bad timestamp {s:?}: {e}"))
}

fn now_timestamp() -> String {
    Utc::now().naive_utc().format(TIMESTAMP_FMT).to_string()
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Salon Settings ──

pub fn get_settings(conn: &Connection, salon_id: &str) -> anyhow::Result<Option<SalonSettings>> {
    let result = conn.query_row(
        "SELECT salon_id, business_name, slot_frequency_minutes FROM salon_settings WHERE salon_id = ?1",
        params![salon_id],
        |row| {
            Ok(SalonSettings {
                salon_id: row.get(0)?,
                business_name: row.get(1)?,
                slot_frequency_minutes: row.get(2)?,
            })
        },
    );

    match result {
        Ok(settings) => Ok(Some(settings)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_settings(conn: &Connection, settings: &SalonSettings) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO salon_settings (salon_id, business_name, slot_frequency_minutes)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(salon_id) DO UPDATE SET
           business_name = excluded.business_name,
           slot_frequency_minutes = excluded.slot_frequency_minutes,
           updated_at = datetime('now')",
        params![
            settings.salon_id,
            settings.business_name,
            settings.slot_frequency_minutes,
        ],
    )?;
    Ok(())
}

/// The salon's slot frequency, or `fallback` when the salon has no settings row.
pub fn slot_frequency(conn: &Connection, salon_id: &str, fallback: i32) -> anyhow::Result<i32> {
    Ok(get_settings(conn, salon_id)?
        .map(|s| s.slot_frequency_minutes)
        .unwrap_or(fallback))
}

// ── Services ──

pub fn create_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, salon_id, name, duration_minutes) VALUES (?1, ?2, ?3, ?4)",
        params![
            service.id,
            service.salon_id,
            service.name,
            service.duration_minutes
        ],
    )?;
    Ok(())
}

pub fn update_service(conn: &Connection, service: &Service) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET name = ?1, duration_minutes = ?2 WHERE id = ?3 AND salon_id = ?4",
        params![
            service.name,
            service.duration_minutes,
            service.id,
            service.salon_id
        ],
    )?;
    Ok(count > 0)
}

pub fn get_service(conn: &Connection, salon_id: &str, id: &str) -> anyhow::Result<Option<Service>> {
    let result = conn.query_row(
        "SELECT id, salon_id, name, duration_minutes FROM services WHERE id = ?1 AND salon_id = ?2",
        params![id, salon_id],
        parse_service_row,
    );

    match result {
        Ok(service) => Ok(Some(service)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_services(conn: &Connection, salon_id: &str) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, salon_id, name, duration_minutes FROM services WHERE salon_id = ?1 ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![salon_id], parse_service_row)?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

fn parse_service_row(row: &rusqlite::Row) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        salon_id: row.get(1)?,
        name: row.get(2)?,
        duration_minutes: row.get(3)?,
    })
}

// ── Time Slots ──

const SLOT_COLUMNS: &str = "id, salon_id, slot_date, start_time, is_available";

/// Existing (date, start) keys in an inclusive date span, regardless of availability.
pub fn slot_keys_in_range(
    conn: &Connection,
    salon_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<HashSet<(NaiveDate, NaiveTime)>> {
    let mut stmt = conn.prepare(
        "SELECT slot_date, start_time FROM time_slots
         WHERE salon_id = ?1 AND slot_date >= ?2 AND slot_date <= ?3",
    )?;
    let rows = stmt.query_map(params![salon_id, fmt_date(start), fmt_date(end)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut keys = HashSet::new();
    for row in rows {
        let (date, time) = row?;
        keys.insert((parse_date(&date)?, parse_time(&time)?));
    }
    Ok(keys)
}

/// Inserts available slots in one transaction. Keys that already exist are
/// ignored; returns the number of rows actually written.
pub fn insert_slots(
    conn: &Connection,
    salon_id: &str,
    keys: &[(NaiveDate, NaiveTime)],
) -> anyhow::Result<usize> {
    if keys.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO time_slots (id, salon_id, slot_date, start_time, is_available)
             VALUES (?1, ?2, ?3, ?4, 1)",
        )?;
        for (date, time) in keys {
            inserted += stmt.execute(params![
                uuid::Uuid::new_v4().to_string(),
                salon_id,
                fmt_date(*date),
                fmt_time(*time),
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

pub fn get_slots_by_ids(
    conn: &Connection,
    salon_id: &str,
    ids: &[String],
) -> anyhow::Result<Vec<TimeSlot>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {SLOT_COLUMNS} FROM time_slots WHERE salon_id = ?1 AND id IN ({})",
        placeholders(2, ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let bind = std::iter::once(salon_id).chain(ids.iter().map(String::as_str));
    let rows = stmt.query_map(params_from_iter(bind), |row| Ok(parse_slot_row(row)))?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

pub fn slots_on(
    conn: &Connection,
    salon_id: &str,
    date: NaiveDate,
    only_available: bool,
) -> anyhow::Result<Vec<TimeSlot>> {
    slots_in_range(conn, salon_id, date, date, only_available)
}

pub fn slots_in_range(
    conn: &Connection,
    salon_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    only_available: bool,
) -> anyhow::Result<Vec<TimeSlot>> {
    let filter = if only_available { " AND is_available = 1" } else { "" };
    let sql = format!(
        "SELECT {SLOT_COLUMNS} FROM time_slots
         WHERE salon_id = ?1 AND slot_date >= ?2 AND slot_date <= ?3{filter}
         ORDER BY slot_date ASC, start_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![salon_id, fmt_date(start), fmt_date(end)], |row| {
        Ok(parse_slot_row(row))
    })?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

/// Flips one slot to reserved only if it is still available.
/// Returns `false` when another writer got there first.
pub fn reserve_slot(conn: &Connection, salon_id: &str, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE time_slots SET is_available = 0 WHERE id = ?1 AND salon_id = ?2 AND is_available = 1",
        params![id, salon_id],
    )?;
    Ok(count == 1)
}

pub fn release_slots(conn: &Connection, salon_id: &str, ids: &[String]) -> anyhow::Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE time_slots SET is_available = 1 WHERE salon_id = ?1 AND id IN ({})",
        placeholders(2, ids.len())
    );
    let bind = std::iter::once(salon_id).chain(ids.iter().map(String::as_str));
    Ok(conn.execute(&sql, params_from_iter(bind))?)
}

/// Deletes available slots in an inclusive span. Reserved slots are never touched.
pub fn delete_available_slots_in_range(
    conn: &Connection,
    salon_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM time_slots
         WHERE salon_id = ?1 AND slot_date >= ?2 AND slot_date <= ?3 AND is_available = 1",
        params![salon_id, fmt_date(start), fmt_date(end)],
    )?;
    Ok(count)
}

pub fn delete_available_slots(
    conn: &Connection,
    salon_id: &str,
    ids: &[String],
) -> anyhow::Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "DELETE FROM time_slots WHERE salon_id = ?1 AND is_available = 1 AND id IN ({})",
        placeholders(2, ids.len())
    );
    let bind = std::iter::once(salon_id).chain(ids.iter().map(String::as_str));
    Ok(conn.execute(&sql, params_from_iter(bind))?)
}

fn parse_slot_row(row: &rusqlite::Row) -> anyhow::Result<TimeSlot> {
    let date_str: String = row.get(2)?;
    let time_str: String = row.get(3)?;
    Ok(TimeSlot {
        id: row.get(0)?,
        salon_id: row.get(1)?,
        slot_date: parse_date(&date_str)?,
        start_time: parse_time(&time_str)?,
        is_available: row.get::<_, i32>(4)? != 0,
    })
}

// ── Opening Rules ──

pub fn create_opening_rule(conn: &Connection, rule: &OpeningRule) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO opening_rules (id, salon_id, day_of_week, start_time, end_time, slot_frequency_minutes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            rule.id,
            rule.salon_id,
            rule.day_of_week,
            fmt_time(rule.start_time),
            fmt_time(rule.end_time),
            rule.slot_frequency_minutes,
        ],
    )?;
    Ok(())
}

pub fn list_opening_rules(conn: &Connection, salon_id: &str) -> anyhow::Result<Vec<OpeningRule>> {
    let mut stmt = conn.prepare(
        "SELECT id, salon_id, day_of_week, start_time, end_time, slot_frequency_minutes
         FROM opening_rules WHERE salon_id = ?1 ORDER BY day_of_week ASC, start_time ASC",
    )?;
    let rows = stmt.query_map(params![salon_id], |row| Ok(parse_opening_rule_row(row)))?;

    let mut rules = vec![];
    for row in rows {
        rules.push(row??);
    }
    Ok(rules)
}

pub fn get_opening_rule(
    conn: &Connection,
    salon_id: &str,
    id: &str,
) -> anyhow::Result<Option<OpeningRule>> {
    let result = conn.query_row(
        "SELECT id, salon_id, day_of_week, start_time, end_time, slot_frequency_minutes
         FROM opening_rules WHERE id = ?1 AND salon_id = ?2",
        params![id, salon_id],
        |row| Ok(parse_opening_rule_row(row)),
    );

    match result {
        Ok(rule) => Ok(Some(rule?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_opening_rule(conn: &Connection, salon_id: &str, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM opening_rules WHERE id = ?1 AND salon_id = ?2",
        params![id, salon_id],
    )?;
    Ok(count > 0)
}

fn parse_opening_rule_row(row: &rusqlite::Row) -> anyhow::Result<OpeningRule> {
    let start_str: String = row.get(3)?;
    let end_str: String = row.get(4)?;
    Ok(OpeningRule {
        id: row.get(0)?,
        salon_id: row.get(1)?,
        day_of_week: row.get(2)?,
        start_time: parse_time(&start_str)?,
        end_time: parse_time(&end_str)?,
        slot_frequency_minutes: row.get(5)?,
    })
}

// ── Exceptional Periods ──

pub fn insert_exceptional_period(conn: &Connection, period: &ExceptionalPeriod) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO exceptional_periods (id, salon_id, start_date, end_date, kind, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            period.id,
            period.salon_id,
            fmt_date(period.start_date),
            fmt_date(period.end_date),
            period.kind.as_str(),
            period.reason,
        ],
    )?;
    for range in &period.time_ranges {
        tx.execute(
            "INSERT INTO exceptional_time_ranges (id, period_id, day_of_week, start_time, end_time, slot_frequency_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                range.id,
                period.id,
                range.day_of_week,
                fmt_time(range.start_time),
                fmt_time(range.end_time),
                range.slot_frequency_minutes,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn list_exceptional_periods(
    conn: &Connection,
    salon_id: &str,
) -> anyhow::Result<Vec<ExceptionalPeriod>> {
    let mut stmt = conn.prepare(
        "SELECT id, salon_id, start_date, end_date, kind, reason
         FROM exceptional_periods WHERE salon_id = ?1 ORDER BY start_date ASC",
    )?;
    let rows = stmt.query_map(params![salon_id], |row| Ok(parse_period_row(row)))?;

    let mut periods = vec![];
    for row in rows {
        let mut period = row??;
        period.time_ranges = get_time_ranges(conn, &period.id)?;
        periods.push(period);
    }
    Ok(periods)
}

pub fn get_exceptional_period(
    conn: &Connection,
    salon_id: &str,
    id: &str,
) -> anyhow::Result<Option<ExceptionalPeriod>> {
    let result = conn.query_row(
        "SELECT id, salon_id, start_date, end_date, kind, reason
         FROM exceptional_periods WHERE id = ?1 AND salon_id = ?2",
        params![id, salon_id],
        |row| Ok(parse_period_row(row)),
    );

    match result {
        Ok(period) => {
            let mut period = period?;
            period.time_ranges = get_time_ranges(conn, &period.id)?;
            Ok(Some(period))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_exceptional_period(conn: &Connection, salon_id: &str, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM exceptional_periods WHERE id = ?1 AND salon_id = ?2",
        params![id, salon_id],
    )?;
    Ok(count > 0)
}

fn get_time_ranges(conn: &Connection, period_id: &str) -> anyhow::Result<Vec<ExceptionalTimeRange>> {
    let mut stmt = conn.prepare(
        "SELECT id, period_id, day_of_week, start_time, end_time, slot_frequency_minutes
         FROM exceptional_time_ranges WHERE period_id = ?1 ORDER BY start_time ASC",
    )?;
    let rows = stmt.query_map(params![period_id], |row| {
        let start_str: String = row.get(3)?;
        let end_str: String = row.get(4)?;
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<u8>>(2)?,
            start_str,
            end_str,
            row.get::<_, i32>(5)?,
        ))
    })?;

    let mut ranges = vec![];
    for row in rows {
        let (id, period_id, day_of_week, start_str, end_str, slot_frequency_minutes) = row?;
        ranges.push(ExceptionalTimeRange {
            id,
            period_id,
            day_of_week,
            start_time: parse_time(&start_str)?,
            end_time: parse_time(&end_str)?,
            slot_frequency_minutes,
        });
    }
    Ok(ranges)
}

fn parse_period_row(row: &rusqlite::Row) -> anyhow::Result<ExceptionalPeriod> {
    let start_str: String = row.get(2)?;
    let end_str: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    Ok(ExceptionalPeriod {
        id: row.get(0)?,
        salon_id: row.get(1)?,
        start_date: parse_date(&start_str)?,
        end_date: parse_date(&end_str)?,
        kind: PeriodKind::parse(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("unknown period kind: {kind_str}"))?,
        reason: row.get(5)?,
        time_ranges: vec![],
    })
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, salon_id, service_id, customer_name, customer_email, customer_phone, \
     notes, appointment_date, start_time, status, created_at, updated_at";

pub fn create_appointment(conn: &Connection, appt: &Appointment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, salon_id, service_id, customer_name, customer_email, customer_phone,
                                   notes, appointment_date, start_time, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            appt.id,
            appt.salon_id,
            appt.service_id,
            appt.customer_name,
            appt.customer_email,
            appt.customer_phone,
            appt.notes,
            fmt_date(appt.appointment_date),
            fmt_time(appt.start_time),
            appt.status.as_str(),
            appt.created_at.format(TIMESTAMP_FMT).to_string(),
            appt.updated_at.format(TIMESTAMP_FMT).to_string(),
        ],
    )?;
    Ok(())
}

/// Hard delete, reserved for undoing a booking that never completed.
pub fn delete_appointment(conn: &Connection, salon_id: &str, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM appointments WHERE id = ?1 AND salon_id = ?2",
        params![id, salon_id],
    )?;
    Ok(count > 0)
}

pub fn get_appointment(
    conn: &Connection,
    salon_id: &str,
    id: &str,
) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1 AND salon_id = ?2"),
        params![id, salon_id],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_appointments(
    conn: &Connection,
    salon_id: &str,
    status_filter: Option<AppointmentStatus>,
    limit: i64,
) -> anyhow::Result<Vec<Appointment>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE salon_id = ?1 AND status = ?2 \
                 ORDER BY appointment_date DESC, start_time DESC LIMIT ?3"
            ),
            vec![
                Box::new(salon_id.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(status.as_str()),
                Box::new(limit),
            ],
        ),
        None => (
            format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE salon_id = ?1 \
                 ORDER BY appointment_date DESC, start_time DESC LIMIT ?2"
            ),
            vec![
                Box::new(salon_id.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_appointment_row(row)))?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn appointments_in_range(
    conn: &Connection,
    salon_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    status: AppointmentStatus,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE salon_id = ?1 AND appointment_date >= ?2 AND appointment_date <= ?3 AND status = ?4
         ORDER BY appointment_date ASC, start_time ASC"
    ))?;
    let rows = stmt.query_map(
        params![salon_id, fmt_date(start), fmt_date(end), status.as_str()],
        |row| Ok(parse_appointment_row(row)),
    )?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

/// Moves an appointment from `from` to `to` only if it is still in `from`.
pub fn update_appointment_status(
    conn: &Connection,
    salon_id: &str,
    id: &str,
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET status = ?1, updated_at = ?2
         WHERE id = ?3 AND salon_id = ?4 AND status = ?5",
        params![to.as_str(), now_timestamp(), id, salon_id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn update_appointment_schedule(
    conn: &Connection,
    salon_id: &str,
    id: &str,
    date: NaiveDate,
    start_time: NaiveTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET appointment_date = ?1, start_time = ?2, updated_at = ?3
         WHERE id = ?4 AND salon_id = ?5",
        params![fmt_date(date), fmt_time(start_time), now_timestamp(), id, salon_id],
    )?;
    Ok(count > 0)
}

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let date_str: String = row.get(7)?;
    let time_str: String = row.get(8)?;
    let status_str: String = row.get(9)?;
    let created_at_str: String = row.get(10)?;
    let updated_at_str: String = row.get(11)?;

    Ok(Appointment {
        id: row.get(0)?,
        salon_id: row.get(1)?,
        service_id: row.get(2)?,
        customer_name: row.get(3)?,
        customer_email: row.get(4)?,
        customer_phone: row.get(5)?,
        notes: row.get(6)?,
        appointment_date: parse_date(&date_str)?,
        start_time: parse_time(&time_str)?,
        status: AppointmentStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown appointment status: {status_str}"))?,
        created_at: parse_timestamp(&created_at_str)?,
        updated_at: parse_timestamp(&updated_at_str)?,
    })
}

// ── Appointment Slot Links ──

pub fn link_slots(conn: &Connection, appointment_id: &str, slot_ids: &[String]) -> anyhow::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO appointment_slots (appointment_id, time_slot_id, slot_order) VALUES (?1, ?2, ?3)",
    )?;
    for (order, slot_id) in slot_ids.iter().enumerate() {
        stmt.execute(params![appointment_id, slot_id, order as i64])?;
    }
    Ok(())
}

pub fn linked_slot_ids(conn: &Connection, appointment_id: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT time_slot_id FROM appointment_slots WHERE appointment_id = ?1 ORDER BY slot_order ASC",
    )?;
    let rows = stmt.query_map(params![appointment_id], |row| row.get(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

pub fn unlink_slots(conn: &Connection, appointment_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM appointment_slots WHERE appointment_id = ?1",
        params![appointment_id],
    )?;
    Ok(count)
}

// ── Reschedule Proposals ──

pub fn save_reschedule_proposal(conn: &Connection, proposal: &RescheduleProposal) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO reschedule_proposals (appointment_id, token, proposed_date, proposed_time)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(appointment_id) DO UPDATE SET
           token = excluded.token,
           proposed_date = excluded.proposed_date,
           proposed_time = excluded.proposed_time,
           created_at = datetime('now')",
        params![
            proposal.appointment_id,
            proposal.token,
            fmt_date(proposal.proposed_date),
            fmt_time(proposal.proposed_time),
        ],
    )?;
    Ok(())
}

pub fn get_reschedule_by_token(
    conn: &Connection,
    token: &str,
) -> anyhow::Result<Option<RescheduleProposal>> {
    let result = conn.query_row(
        "SELECT appointment_id, token, proposed_date, proposed_time
         FROM reschedule_proposals WHERE token = ?1",
        params![token],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    );

    match result {
        Ok((appointment_id, token, date_str, time_str)) => Ok(Some(RescheduleProposal {
            appointment_id,
            token,
            proposed_date: parse_date(&date_str)?,
            proposed_time: parse_time(&time_str)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_reschedule_proposal(conn: &Connection, appointment_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM reschedule_proposals WHERE appointment_id = ?1",
        params![appointment_id],
    )?;
    Ok(())
}
