//! Row-level reads and writes that run on a caller-supplied connection.
//!
//! Workflows pass their open transaction here so every write of one invocation
//! commits or rolls back together. Payment rows are insert-only.

#![allow(clippy::too_many_arguments)]

use crate::error::BillingError;
use crate::models::{
    EntryPayment, Invoice, Locker, LockerPayment, Member, MemberLocker, MembershipPackage,
    MembershipRenewal, MiscTransaction, NewMember, PaymentProof, PaymentReference,
    Refund, RegistrationApplication, RenewalApplication, RenewalConfirmation,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

const MEMBER_COLUMNS: &str = "member_id, package_id, full_name, phone, email, photo_reference, \
    start_date, end_date, payment_expiry_date, credit, is_approved, created_utc, updated_utc";

const PACKAGE_COLUMNS: &str = "package_id, name, admission_amount, monthly_amount, \
    discount_quarterly, discount_half_yearly, discount_yearly, default_months, device_ids, created_utc";

const ENTRY_PAYMENT_COLUMNS: &str = "entry_payment_id, record_seq, member_id, package_id, months, \
    admission_fee, monthly_fee, total_monthly_fees, package_discount, extra_discount, net_amount, \
    paid_amount, expiry_date, payment_date, payment_mode, bill_number, payment_proof, created_utc";

const RENEWAL_COLUMNS: &str = "renewal_id, record_seq, member_id, package_id, months, monthly_fee, \
    total_monthly_fees, package_discount, extra_discount, net_amount, paid_amount, \
    previous_expiry_date, expiry_date, requires_confirmation, payment_date, payment_mode, bill_number, \
    payment_proof, created_utc";

const LOCKER_PAYMENT_COLUMNS: &str = "locker_payment_id, record_seq, member_id, locker_id, months, \
    locker_price, locker_discount, net_amount, paid_amount, start_date, end_date, payment_date, \
    payment_mode, bill_number, payment_proof, created_utc";

const MISC_COLUMNS: &str = "misc_transaction_id, record_seq, member_id, description, total_amount, \
    paid_amount, payment_date, payment_mode, bill_number, payment_proof, created_utc";

const REFUND_COLUMNS: &str = "refund_id, record_seq, member_id, reason, refund_amount, payment_date, \
    payment_mode, bill_number, payment_proof, created_utc";

const MEMBER_LOCKER_COLUMNS: &str =
    "member_locker_id, member_id, locker_id, start_date, end_date, is_active, created_utc, updated_utc";

const INVOICE_COLUMNS: &str =
    "invoice_id, invoice_seq, invoice_number, payment_kind, payment_id, issued_utc";

/// Amounts and metadata common to billed payment inserts.
#[derive(Debug, Clone)]
pub struct PaymentDetails<'a> {
    pub net_amount: i64,
    pub paid_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: &'a str,
    pub proof: Option<&'a PaymentProof>,
}

// =========================================================================
// Reference data
// =========================================================================

#[instrument(skip(conn))]
pub async fn fetch_package(
    conn: &mut PgConnection,
    package_id: Uuid,
) -> Result<MembershipPackage, BillingError> {
    sqlx::query_as::<_, MembershipPackage>(&format!(
        "SELECT {} FROM membership_packages WHERE package_id = $1",
        PACKAGE_COLUMNS
    ))
    .bind(package_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get package", e))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Package {} not found", package_id)))
}

#[instrument(skip(conn))]
pub async fn fetch_locker(conn: &mut PgConnection, locker_id: Uuid) -> Result<Locker, BillingError> {
    sqlx::query_as::<_, Locker>(
        "SELECT locker_id, locker_number, monthly_price, created_utc FROM lockers WHERE locker_id = $1",
    )
    .bind(locker_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get locker", e))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Locker {} not found", locker_id)))
}

// =========================================================================
// Members
// =========================================================================

#[instrument(skip(conn))]
pub async fn fetch_member(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<Option<Member>, BillingError> {
    sqlx::query_as::<_, Member>(&format!(
        "SELECT {} FROM members WHERE member_id = $1",
        MEMBER_COLUMNS
    ))
    .bind(member_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get member", e))
}

/// Load a member and hold its row lock until the transaction ends.
#[instrument(skip(conn))]
pub async fn lock_member(conn: &mut PgConnection, member_id: Uuid) -> Result<Member, BillingError> {
    sqlx::query_as::<_, Member>(&format!(
        "SELECT {} FROM members WHERE member_id = $1 FOR UPDATE",
        MEMBER_COLUMNS
    ))
    .bind(member_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to lock member", e))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Member {} not found", member_id)))
}

#[instrument(skip(conn, member), fields(package_id = %package_id))]
pub async fn insert_member(
    conn: &mut PgConnection,
    package_id: Uuid,
    member: &NewMember,
    payment_expiry_date: NaiveDate,
    is_approved: bool,
) -> Result<Member, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_member"])
        .start_timer();

    let inserted = sqlx::query_as::<_, Member>(&format!(
        r#"
        INSERT INTO members (member_id, package_id, full_name, phone, email, photo_reference,
            start_date, end_date, payment_expiry_date, credit, is_approved)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10)
        RETURNING {}
        "#,
        MEMBER_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(package_id)
    .bind(&member.full_name)
    .bind(&member.phone)
    .bind(&member.email)
    .bind(&member.photo_reference)
    .bind(member.start_date)
    .bind(member.end_date)
    .bind(payment_expiry_date)
    .bind(is_approved)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to create member", e))?;

    timer.observe_duration();
    Ok(inserted)
}

/// Commit a new paid-through date and approval flag.
#[instrument(skip(conn))]
pub async fn update_member_expiry(
    conn: &mut PgConnection,
    member_id: Uuid,
    payment_expiry_date: NaiveDate,
    is_approved: bool,
) -> Result<Member, BillingError> {
    sqlx::query_as::<_, Member>(&format!(
        r#"
        UPDATE members
        SET payment_expiry_date = $2, is_approved = $3, updated_utc = NOW()
        WHERE member_id = $1
        RETURNING {}
        "#,
        MEMBER_COLUMNS
    ))
    .bind(member_id)
    .bind(payment_expiry_date)
    .bind(is_approved)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to update member expiry", e))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Member {} not found", member_id)))
}

#[instrument(skip(conn))]
pub async fn set_member_approval(
    conn: &mut PgConnection,
    member_id: Uuid,
    is_approved: bool,
) -> Result<Member, BillingError> {
    sqlx::query_as::<_, Member>(&format!(
        "UPDATE members SET is_approved = $2, updated_utc = NOW() WHERE member_id = $1 RETURNING {}",
        MEMBER_COLUMNS
    ))
    .bind(member_id)
    .bind(is_approved)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to update member approval", e))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Member {} not found", member_id)))
}

// =========================================================================
// Payment records
// =========================================================================

#[instrument(skip(conn, details), fields(member_id = %member_id))]
pub async fn insert_entry_payment(
    conn: &mut PgConnection,
    member_id: Uuid,
    package_id: Uuid,
    months: i32,
    fees: &crate::services::fees::FeeBreakdown,
    expiry_date: NaiveDate,
    details: &PaymentDetails<'_>,
) -> Result<EntryPayment, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_entry_payment"])
        .start_timer();
    let (bill_number, payment_proof) = PaymentProof::columns(details.proof);

    let payment = sqlx::query_as::<_, EntryPayment>(&format!(
        r#"
        INSERT INTO entry_payments (entry_payment_id, member_id, package_id, months, admission_fee,
            monthly_fee, total_monthly_fees, package_discount, extra_discount, net_amount,
            paid_amount, expiry_date, payment_date, payment_mode, bill_number, payment_proof)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING {}
        "#,
        ENTRY_PAYMENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(member_id)
    .bind(package_id)
    .bind(months)
    .bind(fees.admission_fee)
    .bind(fees.monthly_fee)
    .bind(fees.total_monthly_fees)
    .bind(fees.package_discount)
    .bind(fees.extra_discount_applied)
    .bind(details.net_amount)
    .bind(details.paid_amount)
    .bind(expiry_date)
    .bind(details.payment_date)
    .bind(details.payment_mode)
    .bind(bill_number)
    .bind(payment_proof)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to create entry payment", e))?;

    timer.observe_duration();
    Ok(payment)
}

#[instrument(skip(conn, details), fields(member_id = %member_id))]
pub async fn insert_renewal(
    conn: &mut PgConnection,
    member_id: Uuid,
    package_id: Uuid,
    months: i32,
    fees: &crate::services::fees::FeeBreakdown,
    previous_expiry_date: NaiveDate,
    expiry_date: NaiveDate,
    requires_confirmation: bool,
    details: &PaymentDetails<'_>,
) -> Result<MembershipRenewal, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_renewal"])
        .start_timer();
    let (bill_number, payment_proof) = PaymentProof::columns(details.proof);

    let renewal = sqlx::query_as::<_, MembershipRenewal>(&format!(
        r#"
        INSERT INTO membership_renewals (renewal_id, member_id, package_id, months, monthly_fee,
            total_monthly_fees, package_discount, extra_discount, net_amount, paid_amount,
            previous_expiry_date, expiry_date, requires_confirmation, payment_date, payment_mode,
            bill_number, payment_proof)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING {}
        "#,
        RENEWAL_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(member_id)
    .bind(package_id)
    .bind(months)
    .bind(fees.monthly_fee)
    .bind(fees.total_monthly_fees)
    .bind(fees.package_discount)
    .bind(fees.extra_discount_applied)
    .bind(details.net_amount)
    .bind(details.paid_amount)
    .bind(previous_expiry_date)
    .bind(expiry_date)
    .bind(requires_confirmation)
    .bind(details.payment_date)
    .bind(details.payment_mode)
    .bind(bill_number)
    .bind(payment_proof)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to create renewal", e))?;

    timer.observe_duration();
    Ok(renewal)
}

#[instrument(skip(conn, details), fields(member_id = %member_id, locker_id = %locker_id))]
pub async fn insert_locker_payment(
    conn: &mut PgConnection,
    member_id: Uuid,
    locker_id: Uuid,
    months: i32,
    quote: &crate::services::fees::LockerQuote,
    window: (NaiveDate, NaiveDate),
    details: &PaymentDetails<'_>,
) -> Result<LockerPayment, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_locker_payment"])
        .start_timer();
    let (bill_number, payment_proof) = PaymentProof::columns(details.proof);

    let payment = sqlx::query_as::<_, LockerPayment>(&format!(
        r#"
        INSERT INTO locker_payments (locker_payment_id, member_id, locker_id, months, locker_price,
            locker_discount, net_amount, paid_amount, start_date, end_date, payment_date,
            payment_mode, bill_number, payment_proof)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {}
        "#,
        LOCKER_PAYMENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(member_id)
    .bind(locker_id)
    .bind(months)
    .bind(quote.locker_price)
    .bind(quote.discount_applied)
    .bind(details.net_amount)
    .bind(details.paid_amount)
    .bind(window.0)
    .bind(window.1)
    .bind(details.payment_date)
    .bind(details.payment_mode)
    .bind(bill_number)
    .bind(payment_proof)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to create locker payment", e))?;

    timer.observe_duration();
    Ok(payment)
}

#[instrument(skip(conn, description, details))]
pub async fn insert_misc_transaction(
    conn: &mut PgConnection,
    member_id: Option<Uuid>,
    description: &str,
    details: &PaymentDetails<'_>,
) -> Result<MiscTransaction, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_misc_transaction"])
        .start_timer();
    let (bill_number, payment_proof) = PaymentProof::columns(details.proof);

    let transaction = sqlx::query_as::<_, MiscTransaction>(&format!(
        r#"
        INSERT INTO misc_transactions (misc_transaction_id, member_id, description, total_amount,
            paid_amount, payment_date, payment_mode, bill_number, payment_proof)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        MISC_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(member_id)
    .bind(description)
    .bind(details.net_amount)
    .bind(details.paid_amount)
    .bind(details.payment_date)
    .bind(details.payment_mode)
    .bind(bill_number)
    .bind(payment_proof)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to create misc transaction", e))?;

    timer.observe_duration();
    Ok(transaction)
}

#[instrument(skip(conn, reason, proof))]
pub async fn insert_refund(
    conn: &mut PgConnection,
    member_id: Option<Uuid>,
    reason: &str,
    refund_amount: i64,
    payment_date: NaiveDate,
    payment_mode: &str,
    proof: Option<&PaymentProof>,
) -> Result<Refund, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_refund"])
        .start_timer();
    let (bill_number, payment_proof) = PaymentProof::columns(proof);

    let refund = sqlx::query_as::<_, Refund>(&format!(
        r#"
        INSERT INTO refunds (refund_id, member_id, reason, refund_amount, payment_date,
            payment_mode, bill_number, payment_proof)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        REFUND_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(member_id)
    .bind(reason)
    .bind(refund_amount)
    .bind(payment_date)
    .bind(payment_mode)
    .bind(bill_number)
    .bind(payment_proof)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to create refund", e))?;

    timer.observe_duration();
    Ok(refund)
}

#[instrument(skip(conn))]
pub async fn lock_renewal(
    conn: &mut PgConnection,
    renewal_id: Uuid,
) -> Result<MembershipRenewal, BillingError> {
    sqlx::query_as::<_, MembershipRenewal>(&format!(
        "SELECT {} FROM membership_renewals WHERE renewal_id = $1 FOR UPDATE",
        RENEWAL_COLUMNS
    ))
    .bind(renewal_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to lock renewal", e))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Renewal {} not found", renewal_id)))
}

/// Most recent entry payment for a member, used when confirming a public registration.
#[instrument(skip(conn))]
pub async fn fetch_latest_entry_payment(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<EntryPayment, BillingError> {
    sqlx::query_as::<_, EntryPayment>(&format!(
        "SELECT {} FROM entry_payments WHERE member_id = $1 ORDER BY record_seq DESC LIMIT 1",
        ENTRY_PAYMENT_COLUMNS
    ))
    .bind(member_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get entry payment", e))?
    .ok_or_else(|| {
        BillingError::NotFound(anyhow::anyhow!("No entry payment for member {}", member_id))
    })
}

/// Whether the member has a public-path renewal no admin has confirmed yet.
pub async fn has_unconfirmed_renewal(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<bool, BillingError> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM membership_renewals r
            LEFT JOIN renewal_confirmations c ON c.renewal_id = r.renewal_id
            WHERE r.member_id = $1 AND r.requires_confirmation AND c.renewal_id IS NULL
        )
        "#,
    )
    .bind(member_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to check pending renewals", e))
}

#[instrument(skip(conn))]
pub async fn fetch_renewal_confirmation(
    conn: &mut PgConnection,
    renewal_id: Uuid,
) -> Result<Option<RenewalConfirmation>, BillingError> {
    sqlx::query_as::<_, RenewalConfirmation>(
        r#"
        SELECT renewal_id, tentative_expiry_date, confirmed_expiry_date, confirmed_utc
        FROM renewal_confirmations
        WHERE renewal_id = $1
        "#,
    )
    .bind(renewal_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get renewal confirmation", e))
}

#[instrument(skip(conn))]
pub async fn insert_renewal_confirmation(
    conn: &mut PgConnection,
    renewal_id: Uuid,
    tentative_expiry_date: NaiveDate,
    confirmed_expiry_date: NaiveDate,
) -> Result<RenewalConfirmation, BillingError> {
    sqlx::query_as::<_, RenewalConfirmation>(
        r#"
        INSERT INTO renewal_confirmations (renewal_id, tentative_expiry_date, confirmed_expiry_date)
        VALUES ($1, $2, $3)
        RETURNING renewal_id, tentative_expiry_date, confirmed_expiry_date, confirmed_utc
        "#,
    )
    .bind(renewal_id)
    .bind(tentative_expiry_date)
    .bind(confirmed_expiry_date)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to confirm renewal", e))
}

// =========================================================================
// Payment reads (ledger)
// =========================================================================

pub async fn list_entry_payments(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<Vec<EntryPayment>, BillingError> {
    sqlx::query_as::<_, EntryPayment>(&format!(
        "SELECT {} FROM entry_payments WHERE member_id = $1 ORDER BY record_seq",
        ENTRY_PAYMENT_COLUMNS
    ))
    .bind(member_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to list entry payments", e))
}

pub async fn list_renewals(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<Vec<MembershipRenewal>, BillingError> {
    sqlx::query_as::<_, MembershipRenewal>(&format!(
        "SELECT {} FROM membership_renewals WHERE member_id = $1 ORDER BY record_seq",
        RENEWAL_COLUMNS
    ))
    .bind(member_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to list renewals", e))
}

pub async fn list_locker_payments(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<Vec<LockerPayment>, BillingError> {
    sqlx::query_as::<_, LockerPayment>(&format!(
        "SELECT {} FROM locker_payments WHERE member_id = $1 ORDER BY record_seq",
        LOCKER_PAYMENT_COLUMNS
    ))
    .bind(member_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to list locker payments", e))
}

pub async fn list_misc_transactions(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<Vec<MiscTransaction>, BillingError> {
    sqlx::query_as::<_, MiscTransaction>(&format!(
        "SELECT {} FROM misc_transactions WHERE member_id = $1 ORDER BY record_seq",
        MISC_COLUMNS
    ))
    .bind(member_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to list misc transactions", e))
}

pub async fn list_refunds(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<Vec<Refund>, BillingError> {
    sqlx::query_as::<_, Refund>(&format!(
        "SELECT {} FROM refunds WHERE member_id = $1 ORDER BY record_seq",
        REFUND_COLUMNS
    ))
    .bind(member_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to list refunds", e))
}

pub async fn list_member_invoices(
    conn: &mut PgConnection,
    payment_ids: &[Uuid],
) -> Result<Vec<Invoice>, BillingError> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE payment_id = ANY($1) ORDER BY invoice_seq",
        INVOICE_COLUMNS
    ))
    .bind(payment_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to list invoices", e))
}

pub async fn fetch_invoice(
    conn: &mut PgConnection,
    reference: PaymentReference,
) -> Result<Option<Invoice>, BillingError> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE payment_kind = $1 AND payment_id = $2",
        INVOICE_COLUMNS
    ))
    .bind(reference.kind.as_str())
    .bind(reference.id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get invoice", e))
}

// =========================================================================
// Locker assignments
// =========================================================================

/// Active assignment held by the member, row-locked.
pub async fn lock_active_assignment_for_member(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<Option<MemberLocker>, BillingError> {
    sqlx::query_as::<_, MemberLocker>(&format!(
        "SELECT {} FROM member_lockers WHERE member_id = $1 AND is_active FOR UPDATE",
        MEMBER_LOCKER_COLUMNS
    ))
    .bind(member_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get member locker", e))
}

/// Active assignment on the locker, row-locked.
pub async fn lock_active_assignment_for_locker(
    conn: &mut PgConnection,
    locker_id: Uuid,
) -> Result<Option<MemberLocker>, BillingError> {
    sqlx::query_as::<_, MemberLocker>(&format!(
        "SELECT {} FROM member_lockers WHERE locker_id = $1 AND is_active FOR UPDATE",
        MEMBER_LOCKER_COLUMNS
    ))
    .bind(locker_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get locker assignment", e))
}

pub async fn insert_assignment(
    conn: &mut PgConnection,
    member_id: Uuid,
    locker_id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<MemberLocker, BillingError> {
    sqlx::query_as::<_, MemberLocker>(&format!(
        r#"
        INSERT INTO member_lockers (member_locker_id, member_id, locker_id, start_date, end_date, is_active)
        VALUES ($1, $2, $3, $4, $5, TRUE)
        RETURNING {}
        "#,
        MEMBER_LOCKER_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(member_id)
    .bind(locker_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to assign locker", e))
}

pub async fn extend_assignment(
    conn: &mut PgConnection,
    member_locker_id: Uuid,
    end_date: NaiveDate,
) -> Result<MemberLocker, BillingError> {
    sqlx::query_as::<_, MemberLocker>(&format!(
        r#"
        UPDATE member_lockers
        SET end_date = $2, updated_utc = NOW()
        WHERE member_locker_id = $1
        RETURNING {}
        "#,
        MEMBER_LOCKER_COLUMNS
    ))
    .bind(member_locker_id)
    .bind(end_date)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to extend locker assignment", e))
}

pub async fn deactivate_assignment(
    conn: &mut PgConnection,
    member_locker_id: Uuid,
) -> Result<(), BillingError> {
    sqlx::query(
        "UPDATE member_lockers SET is_active = FALSE, updated_utc = NOW() WHERE member_locker_id = $1",
    )
    .bind(member_locker_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to release locker assignment", e))?;
    Ok(())
}

// =========================================================================
// Applications
// =========================================================================

pub async fn insert_registration_application(
    conn: &mut PgConnection,
    input: &crate::models::SubmitRegistrationApplication,
) -> Result<RegistrationApplication, BillingError> {
    sqlx::query_as::<_, RegistrationApplication>(
        r#"
        INSERT INTO registration_applications (application_id, package_id, full_name, phone, email,
            photo_reference, requested_months, start_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING application_id, package_id, full_name, phone, email, photo_reference,
            requested_months, start_date, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.package_id)
    .bind(&input.full_name)
    .bind(&input.phone)
    .bind(&input.email)
    .bind(&input.photo_reference)
    .bind(input.requested_months)
    .bind(input.start_date)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to submit registration application", e))
}

pub async fn insert_renewal_application(
    conn: &mut PgConnection,
    input: &crate::models::SubmitRenewalApplication,
) -> Result<RenewalApplication, BillingError> {
    sqlx::query_as::<_, RenewalApplication>(
        r#"
        INSERT INTO renewal_applications (application_id, member_id, requested_months, payment_proof)
        VALUES ($1, $2, $3, $4)
        RETURNING application_id, member_id, requested_months, payment_proof, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.member_id)
    .bind(input.requested_months)
    .bind(&input.payment_proof)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to submit renewal application", e))
}

pub async fn lock_registration_application(
    conn: &mut PgConnection,
    application_id: Uuid,
) -> Result<RegistrationApplication, BillingError> {
    sqlx::query_as::<_, RegistrationApplication>(
        r#"
        SELECT application_id, package_id, full_name, phone, email, photo_reference,
            requested_months, start_date, created_utc
        FROM registration_applications
        WHERE application_id = $1
        FOR UPDATE
        "#,
    )
    .bind(application_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get registration application", e))?
    .ok_or_else(|| {
        BillingError::NotFound(anyhow::anyhow!(
            "Registration application {} not found",
            application_id
        ))
    })
}

pub async fn lock_renewal_application(
    conn: &mut PgConnection,
    application_id: Uuid,
) -> Result<RenewalApplication, BillingError> {
    sqlx::query_as::<_, RenewalApplication>(
        r#"
        SELECT application_id, member_id, requested_months, payment_proof, created_utc
        FROM renewal_applications
        WHERE application_id = $1
        FOR UPDATE
        "#,
    )
    .bind(application_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to get renewal application", e))?
    .ok_or_else(|| {
        BillingError::NotFound(anyhow::anyhow!("Renewal application {} not found", application_id))
    })
}

/// Remove a pending application. Returns false when it no longer exists.
pub async fn delete_application(
    conn: &mut PgConnection,
    kind: ApplicationKind,
    application_id: Uuid,
) -> Result<bool, BillingError> {
    let sql = match kind {
        ApplicationKind::Registration => {
            "DELETE FROM registration_applications WHERE application_id = $1"
        }
        ApplicationKind::Renewal => "DELETE FROM renewal_applications WHERE application_id = $1",
    };

    let result = sqlx::query(sql)
        .bind(application_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to delete application", e))?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationKind {
    Registration,
    Renewal,
}
