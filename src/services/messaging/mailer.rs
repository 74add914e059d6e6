use anyhow::Context;
use async_trait::async_trait;

use super::MessagingProvider;

/// Sends transactional email through an HTTP mail API (Resend-compatible JSON).
pub struct HttpMailer {
    api_url: String,
    api_key: String,
    from_address: String,
    client: reqwest::Client,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: String, from_address: String) -> Self {
        Self {
            api_url,
            api_key,
            from_address,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessagingProvider for HttpMailer {
    async fn send_message(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "from": self.from_address,
            "to": [to],
            "subject": subject,
            "text": body,
        });

        self.client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("failed to reach mail API")?
            .error_for_status()
            .context("mail API returned error")?;

        Ok(())
    }
}
