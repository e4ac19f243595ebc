//! Common test utilities for membership-service integration tests.
//!
//! Tests run against the database named by `TEST_DATABASE_URL` and return
//! early when it is unset. Every test creates its own package and members, so
//! assertions never depend on rows written by other tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use membership_service::error::NotificationDispatchError;
use membership_service::models::{
    CreatePackage, Locker, LockerSelection, Member, MembershipPackage, NewMember, PaymentMode,
};
use membership_service::services::{
    ActorContext, BillingEngine, Database, DeviceSync, Dispatcher, NotificationContext,
    NotificationKind, Notifier, RegistrationRequest, RenewalRequest, RetryConfig,
};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,membership_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// What the fake collaborators were asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Notify(NotificationKind, Uuid),
    SyncMember(Uuid, Vec<String>),
    SyncStaff(Uuid, Vec<String>),
    DeleteUser(Uuid, Vec<String>),
}

/// Notifier and device client that record calls instead of making them.
#[derive(Default)]
pub struct RecordingCollaborators {
    calls: Mutex<Vec<Call>>,
}

impl RecordingCollaborators {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, member_id: Uuid) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Call::Notify(_, id)
                | Call::SyncMember(id, _)
                | Call::SyncStaff(id, _)
                | Call::DeleteUser(id, _) => *id == member_id,
            })
            .collect()
    }

    /// Poll until `member_id` has at least `count` calls. Dispatch is
    /// detached from the workflow, so results land some time after it returns.
    pub async fn wait_for(&self, member_id: Uuid, count: usize) -> Vec<Call> {
        for _ in 0..100 {
            let calls = self.calls_for(member_id);
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.calls_for(member_id)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Notifier for RecordingCollaborators {
    async fn notify(
        &self,
        kind: NotificationKind,
        member: &Member,
        _context: &NotificationContext,
    ) -> Result<(), NotificationDispatchError> {
        self.record(Call::Notify(kind, member.member_id));
        Ok(())
    }
}

#[async_trait]
impl DeviceSync for RecordingCollaborators {
    async fn sync_member(
        &self,
        member: &Member,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        self.record(Call::SyncMember(member.member_id, device_ids.to_vec()));
        Ok(())
    }

    async fn sync_staff(
        &self,
        staff_id: Uuid,
        _full_name: &str,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        self.record(Call::SyncStaff(staff_id, device_ids.to_vec()));
        Ok(())
    }

    async fn delete_user(
        &self,
        user_id: Uuid,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        self.record(Call::DeleteUser(user_id, device_ids.to_vec()));
        Ok(())
    }
}

pub struct TestApp {
    pub db: Database,
    pub engine: BillingEngine,
    pub collaborators: Arc<RecordingCollaborators>,
}

/// Connect, migrate, and build an engine wired to recording collaborators.
/// Returns `None` when `TEST_DATABASE_URL` is unset.
pub async fn spawn_app() -> Option<TestApp> {
    init_tracing();

    let database_url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set - skipping database test");
            return None;
        }
    };

    let db = Database::new(&database_url, 10, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    let collaborators = Arc::new(RecordingCollaborators::default());
    let dispatcher = Dispatcher::new(collaborators.clone(), collaborators.clone());
    let engine = BillingEngine::new(db.clone(), dispatcher, RetryConfig::default());

    Some(TestApp {
        db,
        engine,
        collaborators,
    })
}

impl TestApp {
    /// Package priced like the front-desk examples: 4000 admission, 2000 a
    /// month, 15 off a yearly term.
    pub async fn standard_package(&self) -> MembershipPackage {
        self.package(4000, 2000, (0, 0, 15)).await
    }

    pub async fn package(
        &self,
        admission: i64,
        monthly: i64,
        tiers: (i64, i64, i64),
    ) -> MembershipPackage {
        self.db
            .create_package(&CreatePackage {
                name: format!("Package {}", Uuid::new_v4()),
                admission_amount: admission,
                monthly_amount: monthly,
                discount_quarterly: tiers.0,
                discount_half_yearly: tiers.1,
                discount_yearly: tiers.2,
                default_months: 1,
                device_ids: vec!["door-1".to_string(), "turnstile-2".to_string()],
            })
            .await
            .expect("Failed to create package")
    }

    pub async fn locker(&self, monthly_price: i64) -> Locker {
        let number = format!("L-{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.db
            .create_locker(&number, monthly_price)
            .await
            .expect("Failed to create locker")
    }

    /// Admin registration with no discounts.
    pub async fn register(
        &self,
        package: &MembershipPackage,
        start: NaiveDate,
        months: i32,
        paid: i64,
    ) -> Member {
        self.engine
            .register_member(
                registration(package.package_id, start, months, paid),
                ActorContext::admin(),
            )
            .await
            .expect("Failed to register member")
            .member
    }
}

pub fn new_member(start: NaiveDate) -> NewMember {
    NewMember {
        full_name: format!("Member {}", &Uuid::new_v4().simple().to_string()[..8]),
        phone: Some("+919800000000".to_string()),
        email: None,
        photo_reference: None,
        start_date: start,
        end_date: None,
    }
}

pub fn registration(
    package_id: Uuid,
    start: NaiveDate,
    months: i32,
    paid: i64,
) -> RegistrationRequest {
    RegistrationRequest {
        package_id,
        member: new_member(start),
        months,
        extra_discount: 0,
        short_term_amount: None,
        explicit_expiry: None,
        paid_amount: paid,
        payment_date: start,
        payment_mode: PaymentMode::Cash,
        proof: None,
        locker: None,
    }
}

pub fn renewal(member_id: Uuid, months: i32, paid: i64, payment_date: NaiveDate) -> RenewalRequest {
    RenewalRequest {
        member_id,
        months,
        extra_discount: 0,
        short_term_amount: None,
        explicit_expiry: None,
        paid_amount: paid,
        payment_date,
        payment_mode: PaymentMode::Cash,
        proof: None,
        locker: None,
    }
}

pub fn locker_selection(locker_id: Uuid, months: i32, paid: i64) -> LockerSelection {
    LockerSelection {
        locker_id,
        months,
        discount: 0,
        paid_amount: paid,
    }
}
