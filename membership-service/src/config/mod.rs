//! Configuration module for membership-service.

use crate::error::BillingError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::env;

/// Listener settings shared with the rest of the platform (`APP__PORT`).
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl ServerConfig {
    pub fn load() -> Result<Self, BillingError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub server: ServerConfig,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub collaborators: CollaboratorConfig,
    pub workflow: WorkflowConfig,
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Outbound collaborators. An unset URL disables that collaborator.
#[derive(Debug, Clone, Default)]
pub struct CollaboratorConfig {
    pub notification_service_url: Option<String>,
    pub device_sync_url: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Attempts after the first when the invoice sequence is contended.
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// Days ahead of expiry at which the reminder goes out.
    pub lead_days: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self { lead_days: 3 }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl MembershipConfig {
    pub fn from_env() -> Result<Self, BillingError> {
        let server = ServerConfig::load()?;

        Ok(Self {
            server,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "membership-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env_non_empty("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    BillingError::Config(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            collaborators: CollaboratorConfig {
                notification_service_url: env_non_empty("NOTIFICATION_SERVICE_URL"),
                device_sync_url: env_non_empty("DEVICE_SYNC_URL"),
                request_timeout_secs: env_parse("COLLABORATOR_TIMEOUT_SECS", 10),
            },
            workflow: WorkflowConfig {
                max_retries: env_parse("WORKFLOW_MAX_RETRIES", WorkflowConfig::default().max_retries),
            },
            reminders: ReminderConfig {
                lead_days: env_parse("REMINDER_LEAD_DAYS", ReminderConfig::default().lead_days),
            },
        })
    }
}
