use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub salon_id: String,
    pub name: String,
    pub duration_minutes: i32,
}

impl Service {
    /// Number of consecutive slots a booking of this service occupies.
    pub fn required_slots(&self, frequency_minutes: i32) -> usize {
        if self.duration_minutes <= 0 || frequency_minutes <= 0 {
            return 0;
        }
        let duration = self.duration_minutes as usize;
        let frequency = frequency_minutes as usize;
        duration.div_ceil(frequency)
    }
}
