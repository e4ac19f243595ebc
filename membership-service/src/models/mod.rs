//! Domain models for membership-service.

mod application;
mod invoice;
mod ledger;
mod locker;
mod member;
mod package;
mod payment;

pub use application::{
    RegistrationApplication, RenewalApplication, SubmitRegistrationApplication,
    SubmitRenewalApplication,
};
pub use invoice::Invoice;
pub use ledger::LedgerEntry;
pub use locker::{Locker, LockerSelection, MemberLocker};
pub use member::{Member, MemberStatus, NewMember};
pub use package::{CreatePackage, MembershipPackage};
pub use payment::{
    EntryPayment, LockerPayment, MembershipRenewal, MiscTransaction, PaymentKind, PaymentMode,
    PaymentProof, PaymentReference, Refund, RenewalConfirmation,
};

#[cfg(test)]
pub(crate) use member::test_member;
#[cfg(test)]
pub(crate) use package::test_package;
