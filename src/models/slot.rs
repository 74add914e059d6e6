use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSlot {
    pub id: String,
    pub salon_id: String,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub is_available: bool,
}
