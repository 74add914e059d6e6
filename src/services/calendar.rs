use chrono::Duration;

use crate::models::Appointment;

pub fn generate_ics(
    appt: &Appointment,
    service_name: &str,
    duration_minutes: i32,
    business_name: &str,
) -> String {
    let start = appt.appointment_date.and_time(appt.start_time);
    let dtstart = start.format("%Y%m%dT%H%M%S").to_string();
    let dtend = (start + Duration::minutes(duration_minutes as i64))
        .format("%Y%m%dT%H%M%S")
        .to_string();
    let dtstamp = appt.created_at.format("%Y%m%dT%H%M%SZ").to_string();
    let uid = format!("{}@salonbook", appt.id);

    let summary = escape_text(&format!("{service_name} at {business_name}"));
    let description = escape_text(
        appt.notes
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("No additional notes"),
    );

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Salonbook//Appointments//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         DESCRIPTION:{description}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}

/// RFC 5545 TEXT escaping.
fn escape_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}
