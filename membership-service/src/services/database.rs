//! Database service for membership-service.

use crate::error::BillingError;
use crate::models::{
    CreatePackage, Invoice, LedgerEntry, Locker, Member, MemberLocker, MembershipPackage,
    PaymentReference, RegistrationApplication, RenewalApplication,
};
use crate::services::credit::{self, CreditReconciliation};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::payment_ledger::{self, normalize, LedgerSource, StatementTotals};
use crate::services::records;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

const MEMBER_COLUMNS: &str = "member_id, package_id, full_name, phone, email, photo_reference, \
    start_date, end_date, payment_expiry_date, credit, is_approved, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "membership-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, BillingError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), BillingError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Start the transaction a workflow attempt runs in.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, BillingError> {
        self.pool.begin().await.map_err(|e| {
            BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, BillingError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to acquire connection: {}", e)))
    }

    // =========================================================================
    // Package Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_package(&self, input: &CreatePackage) -> Result<MembershipPackage, BillingError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_package"])
            .start_timer();

        let package = sqlx::query_as::<_, MembershipPackage>(
            r#"
            INSERT INTO membership_packages (package_id, name, admission_amount, monthly_amount,
                discount_quarterly, discount_half_yearly, discount_yearly, default_months, device_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING package_id, name, admission_amount, monthly_amount, discount_quarterly,
                discount_half_yearly, discount_yearly, default_months, device_ids, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(input.admission_amount)
        .bind(input.monthly_amount)
        .bind(input.discount_quarterly)
        .bind(input.discount_half_yearly)
        .bind(input.discount_yearly)
        .bind(input.default_months)
        .bind(&input.device_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to create package", e))?;

        timer.observe_duration();
        info!(package_id = %package.package_id, "Package created");

        Ok(package)
    }

    #[instrument(skip(self))]
    pub async fn get_package(&self, package_id: Uuid) -> Result<MembershipPackage, BillingError> {
        let mut conn = self.acquire().await?;
        records::fetch_package(&mut conn, package_id).await
    }

    // =========================================================================
    // Locker Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn create_locker(
        &self,
        locker_number: &str,
        monthly_price: i64,
    ) -> Result<Locker, BillingError> {
        if monthly_price < 0 {
            return Err(BillingError::InvalidInput(anyhow::anyhow!(
                "Locker price cannot be negative"
            )));
        }

        let locker = sqlx::query_as::<_, Locker>(
            r#"
            INSERT INTO lockers (locker_id, locker_number, monthly_price)
            VALUES ($1, $2, $3)
            RETURNING locker_id, locker_number, monthly_price, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(locker_number)
        .bind(monthly_price)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to create locker", e))?;

        info!(locker_id = %locker.locker_id, "Locker created");
        Ok(locker)
    }

    #[instrument(skip(self))]
    pub async fn get_locker(&self, locker_id: Uuid) -> Result<Locker, BillingError> {
        let mut conn = self.acquire().await?;
        records::fetch_locker(&mut conn, locker_id).await
    }

    /// The member's active locker assignment, if any.
    #[instrument(skip(self))]
    pub async fn get_active_locker(&self, member_id: Uuid) -> Result<Option<MemberLocker>, BillingError> {
        sqlx::query_as::<_, MemberLocker>(
            r#"
            SELECT member_locker_id, member_id, locker_id, start_date, end_date, is_active,
                created_utc, updated_utc
            FROM member_lockers
            WHERE member_id = $1 AND is_active
            "#,
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to get member locker", e))
    }

    // =========================================================================
    // Member Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn get_member(&self, member_id: Uuid) -> Result<Member, BillingError> {
        let mut conn = self.acquire().await?;
        records::fetch_member(&mut conn, member_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Member {} not found", member_id)))
    }

    /// Approved members whose paid-through date is exactly `date`.
    #[instrument(skip(self))]
    pub async fn members_expiring_on(&self, date: NaiveDate) -> Result<Vec<Member>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["members_expiring_on"])
            .start_timer();

        let members = sqlx::query_as::<_, Member>(&format!(
            r#"
            SELECT {}
            FROM members
            WHERE is_approved AND payment_expiry_date = $1
            ORDER BY full_name
            "#,
            MEMBER_COLUMNS
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list expiring members", e))?;

        timer.observe_duration();
        Ok(members)
    }

    /// Members who owe the gym money.
    #[instrument(skip(self))]
    pub async fn members_with_outstanding_credit(&self) -> Result<Vec<Member>, BillingError> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE credit > 0 ORDER BY credit DESC",
            MEMBER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list members with credit", e))
    }

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    #[instrument(skip(self), fields(payment_kind = %reference.kind, payment_id = %reference.id))]
    pub async fn get_invoice_for(&self, reference: PaymentReference) -> Result<Invoice, BillingError> {
        let mut conn = self.acquire().await?;
        records::fetch_invoice(&mut conn, reference).await?.ok_or_else(|| {
            BillingError::NotFound(anyhow::anyhow!(
                "No invoice for {} {}",
                reference.kind,
                reference.id
            ))
        })
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Every payment of a member as one normalized ledger, newest first.
    #[instrument(skip(self))]
    pub async fn all_payments(&self, member_id: Uuid) -> Result<Vec<LedgerEntry>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["all_payments"])
            .start_timer();

        let mut conn = self.acquire().await?;
        let entries = load_ledger(&mut conn, member_id).await?;

        timer.observe_duration();
        Ok(entries)
    }

    /// Ledger entries with per-kind and overall totals, for statement export.
    #[instrument(skip(self))]
    pub async fn member_statement(
        &self,
        member_id: Uuid,
    ) -> Result<(Vec<LedgerEntry>, StatementTotals), BillingError> {
        let entries = self.all_payments(member_id).await?;
        let totals = payment_ledger::statement_totals(&entries);
        Ok((entries, totals))
    }

    /// Compare the stored balance against the sum of ledger deltas.
    ///
    /// Reads run in one repeatable-read transaction so a concurrent payment
    /// cannot land between the balance read and the ledger read.
    #[instrument(skip(self))]
    pub async fn reconcile_credit(&self, member_id: Uuid) -> Result<CreditReconciliation, BillingError> {
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to set isolation level", e))?;

        let member = records::fetch_member(&mut tx, member_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Member {} not found", member_id)))?;
        let entries = load_ledger(&mut tx, member_id).await?;

        tx.commit().await.map_err(|e| {
            BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        let report = credit::reconcile(member_id, member.credit, &entries);
        if !report.is_balanced() {
            tracing::warn!(
                member_id = %member_id,
                stored_credit = report.stored_credit,
                ledger_credit = report.ledger_credit,
                "Credit balance does not match payment ledger"
            );
        }
        Ok(report)
    }

    // =========================================================================
    // Application Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn list_registration_applications(
        &self,
    ) -> Result<Vec<RegistrationApplication>, BillingError> {
        sqlx::query_as::<_, RegistrationApplication>(
            r#"
            SELECT application_id, package_id, full_name, phone, email, photo_reference,
                requested_months, start_date, created_utc
            FROM registration_applications
            ORDER BY created_utc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list registration applications", e))
    }

    #[instrument(skip(self))]
    pub async fn list_renewal_applications(&self) -> Result<Vec<RenewalApplication>, BillingError> {
        sqlx::query_as::<_, RenewalApplication>(
            r#"
            SELECT application_id, member_id, requested_months, payment_proof, created_utc
            FROM renewal_applications
            ORDER BY created_utc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list renewal applications", e))
    }
}

/// Load and merge all five payment kinds for a member on one connection.
async fn load_ledger(conn: &mut PgConnection, member_id: Uuid) -> Result<Vec<LedgerEntry>, BillingError> {
    let entry_payments = records::list_entry_payments(conn, member_id).await?;
    let renewals = records::list_renewals(conn, member_id).await?;
    let locker_payments = records::list_locker_payments(conn, member_id).await?;
    let misc = records::list_misc_transactions(conn, member_id).await?;
    let refunds = records::list_refunds(conn, member_id).await?;

    let payment_ids: Vec<Uuid> = entry_payments
        .iter()
        .map(LedgerSource::payment_id)
        .chain(renewals.iter().map(LedgerSource::payment_id))
        .chain(locker_payments.iter().map(LedgerSource::payment_id))
        .chain(misc.iter().map(LedgerSource::payment_id))
        .collect();

    let invoice_numbers: HashMap<PaymentReference, String> =
        records::list_member_invoices(conn, &payment_ids)
            .await?
            .into_iter()
            .filter_map(|invoice| {
                let reference = invoice.reference()?;
                Some((reference, invoice.invoice_number))
            })
            .collect();

    Ok(payment_ledger::merge_ledger([
        normalize(&entry_payments, &invoice_numbers),
        normalize(&renewals, &invoice_numbers),
        normalize(&locker_payments, &invoice_numbers),
        normalize(&misc, &invoice_numbers),
        normalize(&refunds, &invoice_numbers),
    ]))
}
