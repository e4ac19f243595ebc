//! Services module for membership-service.

pub mod collaborators;
pub mod credit;
pub mod database;
pub mod fees;
pub mod invoice_sequence;
pub mod metrics;
pub mod payment_ledger;
pub mod records;
pub mod reminders;
pub mod retry;
pub mod workflow;

pub use collaborators::{
    DeviceSync, DisabledCollaborator, Dispatcher, HttpDeviceSync, HttpNotifier,
    NotificationContext, NotificationKind, Notifier, PostCommitEffect,
};
pub use credit::{CreditChange, CreditReconciliation};
pub use database::Database;
pub use fees::{calculate_fees, FeeBasis, FeeBreakdown, FeeRequest, LockerQuote, LockerTerms};
pub use metrics::{get_metrics, init_metrics, record_dispatch, record_error, record_workflow};
pub use payment_ledger::{statement_totals, KindTotals, StatementTotals};
pub use reminders::{ReminderJob, ReminderSummary};
pub use retry::RetryConfig;
pub use workflow::{
    ActorContext, ApplicationTerms, ApprovalState, BillingEngine, LockerPurchase,
    MiscTransactionRequest, RefundRequest, RegistrationRequest, RenewalRequest,
};
