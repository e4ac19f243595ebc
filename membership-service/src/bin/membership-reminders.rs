//! Daily reminder run: expiry and credit reminders plus lapsed access removal.
//!
//! Intended for cron. `REMINDER_DATE` (YYYY-MM-DD) overrides today's date.

use chrono::{NaiveDate, Utc};
use membership_service::config::MembershipConfig;
use membership_service::services::{init_metrics, Database, ReminderJob};
use membership_service::startup::build_dispatcher;
use membership_service::telemetry::init_tracing;

fn run_date() -> Result<NaiveDate, String> {
    match std::env::var("REMINDER_DATE") {
        Ok(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|e| format!("Invalid REMINDER_DATE '{}': {}", raw, e)),
        Err(_) => Ok(Utc::now().date_naive()),
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = MembershipConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "membership-reminders",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    let today = run_date().map_err(std::io::Error::other)?;

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?;
    let dispatcher = build_dispatcher(&config).map_err(|e| std::io::Error::other(e.to_string()))?;

    let job = ReminderJob::new(db, dispatcher, config.reminders.lead_days);
    let summary = job.run(today).await.map_err(|e| {
        tracing::error!(error = %e, "Reminder run failed");
        std::io::Error::other(e.to_string())
    })?;

    tracing::info!(
        run_date = %today,
        expiry_reminders = summary.expiry_reminders,
        credit_reminders = summary.credit_reminders,
        access_revoked = summary.access_revoked,
        "Reminder run complete"
    );
    Ok(())
}
