use serde::{Deserialize, Serialize};

pub const ALLOWED_FREQUENCIES: [i32; 4] = [15, 30, 45, 60];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalonSettings {
    pub salon_id: String,
    pub business_name: String,
    pub slot_frequency_minutes: i32,
}

pub fn is_allowed_frequency(minutes: i32) -> bool {
    ALLOWED_FREQUENCIES.contains(&minutes)
}
