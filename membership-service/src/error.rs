//! Error types for membership-service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// SQLSTATE raised when a serializable transaction cannot be ordered.
const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE raised when Postgres breaks a lock cycle.
const DEADLOCK_DETECTED: &str = "40P01";
/// Unique index guarding issued invoice numbers.
const INVOICE_NUMBER_CONSTRAINT: &str = "invoices_invoice_number_key";

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    /// Two transactions observed the same last invoice number. Retried by the
    /// workflow runner and never returned to callers directly.
    #[error("Invoice sequence conflict: {0}")]
    SequenceConflict(anyhow::Error),

    #[error("Sequencing error: {0}")]
    Sequencing(anyhow::Error),

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BillingError {
    /// Classify a driver error raised inside a workflow transaction.
    pub fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.constraint() == Some(INVOICE_NUMBER_CONSTRAINT) {
                return BillingError::SequenceConflict(anyhow::anyhow!("{}: {}", context, err));
            }
            match db_err.code().as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    return BillingError::Conflict(anyhow::anyhow!("{}: {}", context, err));
                }
                _ => {}
            }
            if db_err.is_unique_violation() {
                return BillingError::Conflict(anyhow::anyhow!("{}: {}", context, err));
            }
        }
        BillingError::Database(anyhow::anyhow!("{}: {}", context, err))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::NotFound(_) => "not_found",
            BillingError::InvalidInput(_) => "invalid_input",
            BillingError::Conflict(_) => "conflict",
            BillingError::SequenceConflict(_) => "sequence_conflict",
            BillingError::Sequencing(_) => "sequencing",
            BillingError::Database(_) => "database",
            BillingError::Config(_) => "config",
            BillingError::Internal(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::SequenceConflict(_))
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(err: validator::ValidationErrors) -> Self {
        BillingError::InvalidInput(anyhow::anyhow!("{}", err))
    }
}

impl From<config::ConfigError> for BillingError {
    fn from(err: config::ConfigError) -> Self {
        BillingError::Config(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for BillingError {
    fn from(err: std::io::Error) -> Self {
        BillingError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            kind: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let kind = self.kind();
        let (status, error_message, details) = match self {
            BillingError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            BillingError::InvalidInput(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            BillingError::Conflict(err) | BillingError::SequenceConflict(err) => {
                (StatusCode::CONFLICT, err.to_string(), None)
            }
            BillingError::Sequencing(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Invoice sequence unavailable".to_string(),
                Some(err.to_string()),
            ),
            BillingError::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            BillingError::Config(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
            BillingError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(format!("{:#?}", err)),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                kind,
                details,
            }),
        )
            .into_response()
    }
}

/// Failure reported by an outbound collaborator. Logged by the dispatcher, never
/// propagated into a workflow result.
#[derive(Debug, Error)]
pub enum NotificationDispatchError {
    #[error("Collaborator request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Collaborator rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sequence_conflicts_are_retryable() {
        assert!(BillingError::SequenceConflict(anyhow::anyhow!("race")).is_retryable());
        assert!(!BillingError::Conflict(anyhow::anyhow!("deadlock")).is_retryable());
        assert!(!BillingError::NotFound(anyhow::anyhow!("package")).is_retryable());
    }

    #[test]
    fn non_database_driver_errors_map_to_database() {
        let err = BillingError::from_sqlx("Failed to insert", sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn sequencing_error_maps_to_service_unavailable() {
        let response = BillingError::Sequencing(anyhow::anyhow!("exhausted")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
