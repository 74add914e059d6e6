pub mod appointment;
pub mod schedule;
pub mod service;
pub mod settings;
pub mod slot;

pub use appointment::{Appointment, AppointmentStatus, CustomerInfo, RescheduleProposal};
pub use schedule::{ExceptionalPeriod, ExceptionalTimeRange, OpeningRule, PeriodKind};
pub use service::Service;
pub use settings::{is_allowed_frequency, SalonSettings, ALLOWED_FREQUENCIES};
pub use slot::TimeSlot;
