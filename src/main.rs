use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use salonbook::config::AppConfig;
use salonbook::db;
use salonbook::handlers;
use salonbook::services::messaging::mailer::HttpMailer;
use salonbook::services::messaging::{LogOnlyProvider, MessagingProvider};
use salonbook::services::notifications::Notifier;
use salonbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let provider: Arc<dyn MessagingProvider> = if config.mail_api_key.is_empty() {
        tracing::info!("MAIL_API_KEY not set, notifications will only be logged");
        Arc::new(LogOnlyProvider)
    } else {
        anyhow::ensure!(
            !config.mail_from.is_empty(),
            "MAIL_FROM must be set when MAIL_API_KEY is"
        );
        tracing::info!("sending notifications through {}", config.mail_api_url);
        Arc::new(HttpMailer::new(
            config.mail_api_url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
        ))
    };
    let notifier = Notifier::new(
        provider,
        config.notify_max_attempts,
        Duration::from_millis(config.notify_retry_delay_ms),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        notifier,
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(salon_id = %config.salon_id, "starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
