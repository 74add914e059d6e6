use std::sync::Arc;
use std::time::Duration;

use crate::models::{Appointment, AppointmentStatus, RescheduleProposal};
use crate::services::messaging::MessagingProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn when(appt: &Appointment) -> String {
    format!(
        "{} at {}",
        appt.appointment_date.format("%A %d %B %Y"),
        appt.start_time.format("%H:%M")
    )
}

impl Notification {
    pub fn booking_received(appt: &Appointment, service_name: &str) -> Self {
        Self {
            to: appt.customer_email.clone(),
            subject: "We received your appointment request".to_string(),
            body: format!(
                "Hello {},\n\nYour request for {} on {} has been received. \
                 We will confirm it shortly.",
                appt.customer_name,
                service_name,
                when(appt)
            ),
        }
    }

    /// Message for an admin status change. `None` for transitions the
    /// customer is not told about.
    pub fn status_changed(appt: &Appointment) -> Option<Self> {
        let (subject, text) = match appt.status {
            AppointmentStatus::Accepted => (
                "Your appointment is confirmed",
                format!("Your appointment on {} is confirmed. See you soon!", when(appt)),
            ),
            AppointmentStatus::Refused => (
                "Your appointment request was declined",
                format!(
                    "Unfortunately we cannot take your appointment on {}. \
                     The time has been released, feel free to pick another slot.",
                    when(appt)
                ),
            ),
            AppointmentStatus::Cancelled => (
                "Your appointment was cancelled",
                format!(
                    "Your appointment on {} has been cancelled and the time slots were freed.",
                    when(appt)
                ),
            ),
            AppointmentStatus::Pending => return None,
        };

        Some(Self {
            to: appt.customer_email.clone(),
            subject: subject.to_string(),
            body: format!("Hello {},\n\n{text}", appt.customer_name),
        })
    }

    pub fn closure_cancellation(appt: &Appointment, reason: Option<&str>) -> Self {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        Self {
            to: appt.customer_email.clone(),
            subject: "Your appointment was cancelled".to_string(),
            body: format!(
                "Hello {},\n\nThe salon is closed on {}{reason}, so your appointment \
                 has been cancelled. Please book another time.",
                appt.customer_name,
                appt.appointment_date.format("%A %d %B %Y"),
            ),
        }
    }

    pub fn reschedule_proposed(
        appt: &Appointment,
        proposal: &RescheduleProposal,
        base_url: &str,
    ) -> Self {
        Self {
            to: appt.customer_email.clone(),
            subject: "A new time is proposed for your appointment".to_string(),
            body: format!(
                "Hello {},\n\nWe would like to move your appointment of {} to {} at {}.\n\
                 Accept or decline here: {}/reschedule/{}",
                appt.customer_name,
                when(appt),
                proposal.proposed_date.format("%A %d %B %Y"),
                proposal.proposed_time.format("%H:%M"),
                base_url.trim_end_matches('/'),
                proposal.token,
            ),
        }
    }

    pub fn reschedule_confirmed(appt: &Appointment) -> Self {
        Self {
            to: appt.customer_email.clone(),
            subject: "Your appointment was moved".to_string(),
            body: format!(
                "Hello {},\n\nYour appointment is now on {}.",
                appt.customer_name,
                when(appt)
            ),
        }
    }
}

/// Best-effort delivery. Each notification runs on its own task and failures
/// are only logged.
#[derive(Clone)]
pub struct Notifier {
    provider: Arc<dyn MessagingProvider>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Notifier {
    pub fn new(provider: Arc<dyn MessagingProvider>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            provider,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn dispatch(&self, notification: Notification) -> tokio::task::JoinHandle<bool> {
        let provider = Arc::clone(&self.provider);
        let max_attempts = self.max_attempts;
        let retry_delay = self.retry_delay;
        tokio::spawn(async move {
            deliver(provider.as_ref(), &notification, max_attempts, retry_delay).await
        })
    }

    pub fn dispatch_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for notification in notifications {
            self.dispatch(notification);
        }
    }
}

async fn deliver(
    provider: &dyn MessagingProvider,
    notification: &Notification,
    max_attempts: u32,
    retry_delay: Duration,
) -> bool {
    if notification.to.trim().is_empty() {
        tracing::warn!(subject = %notification.subject, "no recipient, skipping notification");
        return false;
    }

    for attempt in 1..=max_attempts {
        match provider
            .send_message(&notification.to, &notification.subject, &notification.body)
            .await
        {
            Ok(()) => {
                tracing::info!(to = %notification.to, attempt, "notification sent");
                return true;
            }
            Err(e) => {
                tracing::warn!(error = %e, to = %notification.to, attempt, "notification attempt failed");
                if attempt < max_attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    tracing::error!(to = %notification.to, subject = %notification.subject, "giving up on notification");
    false
}
