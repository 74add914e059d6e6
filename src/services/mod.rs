pub mod booking;
pub mod calendar;
pub mod exceptions;
pub mod messaging;
pub mod notifications;
pub mod slots;
pub mod validation;
pub mod workflow;
