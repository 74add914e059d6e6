use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Recurring weekly opening hours. `day_of_week` is 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningRule {
    pub id: String,
    pub salon_id: String,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_frequency_minutes: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Closed,
    Open,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Closed => "closed",
            PeriodKind::Open => "open",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(PeriodKind::Closed),
            "open" => Some(PeriodKind::Open),
            _ => None,
        }
    }
}

/// A dated override of the weekly schedule: either a closure or a special opening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionalPeriod {
    pub id: String,
    pub salon_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: PeriodKind,
    pub reason: Option<String>,
    #[serde(default)]
    pub time_ranges: Vec<ExceptionalTimeRange>,
}

impl ExceptionalPeriod {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Opening hours inside an `open` exceptional period. They apply to every
/// date of the period; `day_of_week` is informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionalTimeRange {
    pub id: String,
    pub period_id: String,
    pub day_of_week: Option<u8>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_frequency_minutes: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_kind_parse() {
        assert_eq!(PeriodKind::parse("closed"), Some(PeriodKind::Closed));
        assert_eq!(PeriodKind::parse("open"), Some(PeriodKind::Open));
        assert_eq!(PeriodKind::parse("holiday"), None);
    }

    #[test]
    fn test_period_covers_is_inclusive() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let period = ExceptionalPeriod {
            id: "p".to_string(),
            salon_id: "default".to_string(),
            start_date: d("2024-06-03"),
            end_date: d("2024-06-05"),
            kind: PeriodKind::Closed,
            reason: None,
            time_ranges: vec![],
        };
        assert!(period.covers(d("2024-06-03")));
        assert!(period.covers(d("2024-06-05")));
        assert!(!period.covers(d("2024-06-06")));
        assert!(!period.covers(d("2024-06-02")));
    }
}
