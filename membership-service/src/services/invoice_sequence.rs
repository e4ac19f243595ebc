//! Invoice numbering shared by every invoiced payment kind.
//!
//! Numbers are `INV-` followed by a counter zero-padded to six digits. The next
//! number is derived from the most recently inserted invoice, inside the
//! transaction that inserts the payment record being billed.

use crate::error::BillingError;
use crate::models::{Invoice, PaymentReference};
use crate::services::metrics::{DB_QUERY_DURATION, INVOICES_ISSUED};
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

pub const INVOICE_PREFIX: &str = "INV-";
const COUNTER_WIDTH: usize = 6;

/// Advisory lock key serializing invoice issuance across transactions.
const INVOICE_SEQUENCE_LOCK: i64 = 0x494E_565F_5345_51; // "INV_SEQ"

pub fn format_invoice_number(counter: u64) -> String {
    format!("{}{:0width$}", INVOICE_PREFIX, counter, width = COUNTER_WIDTH)
}

/// Extract the trailing counter from an issued invoice number.
pub fn parse_invoice_counter(invoice_number: &str) -> Result<u64, BillingError> {
    let digits_start = invoice_number
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let digits = &invoice_number[digits_start..];

    if digits.is_empty() {
        return Err(BillingError::Sequencing(anyhow::anyhow!(
            "Invoice number '{}' has no trailing counter",
            invoice_number
        )));
    }

    digits.parse::<u64>().map_err(|e| {
        BillingError::Sequencing(anyhow::anyhow!(
            "Invoice number '{}' has an unreadable counter: {}",
            invoice_number,
            e
        ))
    })
}

/// Number that follows `last`, or the first number when nothing was issued.
pub fn next_invoice_number(last: Option<&str>) -> Result<String, BillingError> {
    let counter = match last {
        Some(number) => parse_invoice_counter(number)?
            .checked_add(1)
            .ok_or_else(|| BillingError::Sequencing(anyhow::anyhow!("Invoice counter exhausted")))?,
        None => 1,
    };
    Ok(format_invoice_number(counter))
}

/// Take the transaction-scoped sequence lock. Re-entrant within a transaction,
/// so a workflow that must hold it before locking other rows can take it early
/// and `issue_invoice` simply re-acquires it.
pub async fn lock_sequence(conn: &mut PgConnection) -> Result<(), BillingError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(INVOICE_SEQUENCE_LOCK)
        .execute(&mut *conn)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to lock invoice sequence", e))?;
    Ok(())
}

/// Issue the invoice for a freshly inserted payment record.
///
/// Holds a transaction-scoped advisory lock, so a concurrent issuer waits for
/// this transaction to commit or roll back before reading the last number.
/// The unique index on `invoice_number` backs this up; a violation surfaces as
/// a retryable [`BillingError::SequenceConflict`].
#[instrument(skip(conn), fields(payment_kind = %reference.kind, payment_id = %reference.id))]
pub async fn issue_invoice(
    conn: &mut PgConnection,
    reference: PaymentReference,
) -> Result<Invoice, BillingError> {
    if !reference.kind.is_invoiced() {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "{} records are not invoiced",
            reference.kind
        )));
    }

    let timer = DB_QUERY_DURATION
        .with_label_values(&["issue_invoice"])
        .start_timer();

    lock_sequence(conn).await?;

    let last: Option<String> = sqlx::query_scalar(
        r#"
        SELECT invoice_number
        FROM invoices
        ORDER BY invoice_seq DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to read last invoice number", e))?;

    let invoice_number = next_invoice_number(last.as_deref())?;

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (invoice_id, invoice_number, payment_kind, payment_id)
        VALUES ($1, $2, $3, $4)
        RETURNING invoice_id, invoice_seq, invoice_number, payment_kind, payment_id, issued_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&invoice_number)
    .bind(reference.kind.as_str())
    .bind(reference.id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to insert invoice", e))?;

    timer.observe_duration();
    INVOICES_ISSUED
        .with_label_values(&[reference.kind.as_str()])
        .inc();

    info!(invoice_number = %invoice.invoice_number, "Invoice issued");

    Ok(invoice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_number_seeds_at_one() {
        assert_eq!(next_invoice_number(None).unwrap(), "INV-000001");
    }

    #[test]
    fn increments_and_pads() {
        assert_eq!(next_invoice_number(Some("INV-000009")).unwrap(), "INV-000010");
        assert_eq!(next_invoice_number(Some("INV-000999")).unwrap(), "INV-001000");
    }

    #[test]
    fn counter_grows_past_six_digits() {
        assert_eq!(next_invoice_number(Some("INV-999999")).unwrap(), "INV-1000000");
    }

    #[test]
    fn parses_trailing_counter_only() {
        assert_eq!(parse_invoice_counter("INV-000123").unwrap(), 123);
        assert_eq!(parse_invoice_counter("LEGACY-2019-000042").unwrap(), 42);
    }

    #[test]
    fn malformed_last_number_is_a_sequencing_error() {
        let err = next_invoice_number(Some("INV-")).unwrap_err();
        assert_eq!(err.kind(), "sequencing");
    }
}
