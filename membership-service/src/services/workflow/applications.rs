//! Self-service applications and their admin decisions.

use super::registration::{register_in_tx, RegistrationOutcome, RegistrationRequest};
use super::renewal::{renew_in_tx, RenewalOutcome, RenewalRequest};
use super::{commit, ActorContext, BillingEngine};
use crate::error::BillingError;
use crate::models::{
    LockerSelection, NewMember, PaymentMode, PaymentProof, RegistrationApplication,
    RenewalApplication, SubmitRegistrationApplication, SubmitRenewalApplication,
};
use crate::services::records::{self, ApplicationKind};
use chrono::NaiveDate;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Billing terms an admin fills in when converting an application.
#[derive(Debug, Clone)]
pub struct ApplicationTerms {
    pub extra_discount: i64,
    pub short_term_amount: Option<i64>,
    pub explicit_expiry: Option<NaiveDate>,
    pub paid_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    /// Overrides the proof attached to the application.
    pub proof: Option<PaymentProof>,
    pub locker: Option<LockerSelection>,
}

fn registration_request(
    application: &RegistrationApplication,
    terms: &ApplicationTerms,
) -> RegistrationRequest {
    RegistrationRequest {
        package_id: application.package_id,
        member: NewMember {
            full_name: application.full_name.clone(),
            phone: application.phone.clone(),
            email: application.email.clone(),
            photo_reference: application.photo_reference.clone(),
            start_date: application.start_date,
            end_date: None,
        },
        months: application.requested_months,
        extra_discount: terms.extra_discount,
        short_term_amount: terms.short_term_amount,
        explicit_expiry: terms.explicit_expiry,
        paid_amount: terms.paid_amount,
        payment_date: terms.payment_date,
        payment_mode: terms.payment_mode,
        proof: terms.proof.clone(),
        locker: terms.locker.clone(),
    }
}

fn renewal_request(application: &RenewalApplication, terms: &ApplicationTerms) -> RenewalRequest {
    RenewalRequest {
        member_id: application.member_id,
        months: application.requested_months,
        extra_discount: terms.extra_discount,
        short_term_amount: terms.short_term_amount,
        explicit_expiry: terms.explicit_expiry,
        paid_amount: terms.paid_amount,
        payment_date: terms.payment_date,
        payment_mode: terms.payment_mode,
        proof: terms
            .proof
            .clone()
            .or_else(|| application.payment_proof.clone().map(PaymentProof::Document)),
        locker: terms.locker.clone(),
    }
}

impl BillingEngine {
    #[instrument(skip(self, input), fields(package_id = %input.package_id))]
    pub async fn submit_registration_application(
        &self,
        input: SubmitRegistrationApplication,
    ) -> Result<RegistrationApplication, BillingError> {
        input.validate()?;

        let mut tx = self.db().begin().await?;
        records::fetch_package(&mut tx, input.package_id).await?;
        let application = records::insert_registration_application(&mut tx, &input).await?;
        commit(tx).await?;

        info!(application_id = %application.application_id, "Registration application submitted");
        Ok(application)
    }

    #[instrument(skip(self, input), fields(member_id = %input.member_id))]
    pub async fn submit_renewal_application(
        &self,
        input: SubmitRenewalApplication,
    ) -> Result<RenewalApplication, BillingError> {
        input.validate()?;

        let mut tx = self.db().begin().await?;
        if records::fetch_member(&mut tx, input.member_id).await?.is_none() {
            return Err(BillingError::NotFound(anyhow::anyhow!(
                "Member {} not found",
                input.member_id
            )));
        }
        let application = records::insert_renewal_application(&mut tx, &input).await?;
        commit(tx).await?;

        info!(application_id = %application.application_id, "Renewal application submitted");
        Ok(application)
    }

    /// Convert a registration application into a member. The application is
    /// deleted in the same transaction.
    #[instrument(skip(self, terms))]
    pub async fn approve_registration_application(
        &self,
        application_id: Uuid,
        terms: ApplicationTerms,
        actor: ActorContext,
    ) -> Result<RegistrationOutcome, BillingError> {
        actor.require_admin("approve_registration_application")?;

        let terms = &terms;
        self.execute("approve_registration_application", || async move {
            let mut tx = self.db().begin().await?;

            let application = records::lock_registration_application(&mut tx, application_id).await?;
            let request = registration_request(&application, terms);
            let result = register_in_tx(&mut tx, &request, actor).await?;
            records::delete_application(&mut tx, ApplicationKind::Registration, application_id)
                .await?;
            commit(tx).await?;

            info!(
                application_id = %application_id,
                member_id = %result.0.member.member_id,
                "Registration application approved"
            );
            Ok(result)
        })
        .await
    }

    /// Convert a renewal application through the admin renewal path.
    #[instrument(skip(self, terms))]
    pub async fn approve_renewal_application(
        &self,
        application_id: Uuid,
        terms: ApplicationTerms,
        actor: ActorContext,
    ) -> Result<RenewalOutcome, BillingError> {
        actor.require_admin("approve_renewal_application")?;

        let terms = &terms;
        self.execute("approve_renewal_application", || async move {
            let mut tx = self.db().begin().await?;

            let application = records::lock_renewal_application(&mut tx, application_id).await?;
            let request = renewal_request(&application, terms);
            let result = renew_in_tx(&mut tx, &request, actor).await?;
            records::delete_application(&mut tx, ApplicationKind::Renewal, application_id).await?;
            commit(tx).await?;

            info!(
                application_id = %application_id,
                renewal_id = %result.0.renewal.renewal_id,
                "Renewal application approved"
            );
            Ok(result)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn reject_registration_application(
        &self,
        application_id: Uuid,
        actor: ActorContext,
    ) -> Result<(), BillingError> {
        self.reject_application(ApplicationKind::Registration, application_id, actor)
            .await
    }

    #[instrument(skip(self))]
    pub async fn reject_renewal_application(
        &self,
        application_id: Uuid,
        actor: ActorContext,
    ) -> Result<(), BillingError> {
        self.reject_application(ApplicationKind::Renewal, application_id, actor)
            .await
    }

    async fn reject_application(
        &self,
        kind: ApplicationKind,
        application_id: Uuid,
        actor: ActorContext,
    ) -> Result<(), BillingError> {
        actor.require_admin("reject_application")?;

        let mut tx = self.db().begin().await?;
        if !records::delete_application(&mut tx, kind, application_id).await? {
            return Err(BillingError::NotFound(anyhow::anyhow!(
                "Application {} not found",
                application_id
            )));
        }
        commit(tx).await?;

        info!(application_id = %application_id, kind = ?kind, "Application rejected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn terms() -> ApplicationTerms {
        ApplicationTerms {
            extra_discount: 100,
            short_term_amount: None,
            explicit_expiry: None,
            paid_amount: 2000,
            payment_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            payment_mode: PaymentMode::Upi,
            proof: None,
            locker: None,
        }
    }

    #[test]
    fn renewal_application_proof_is_carried_as_document() {
        let application = RenewalApplication {
            application_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            requested_months: 3,
            payment_proof: Some("proofs/upi-123.png".to_string()),
            created_utc: Utc::now(),
        };

        let request = renewal_request(&application, &terms());
        assert_eq!(request.months, 3);
        assert_eq!(
            request.proof,
            Some(PaymentProof::Document("proofs/upi-123.png".to_string()))
        );

        let mut with_bill = terms();
        with_bill.proof = Some(PaymentProof::BillNumber("B-9".to_string()));
        let request = renewal_request(&application, &with_bill);
        assert_eq!(request.proof, Some(PaymentProof::BillNumber("B-9".to_string())));
    }

    #[test]
    fn registration_application_maps_identity_and_term() {
        let application = RegistrationApplication {
            application_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            full_name: "Meera Nair".to_string(),
            phone: Some("+919800000000".to_string()),
            email: None,
            photo_reference: Some("photos/meera.jpg".to_string()),
            requested_months: 6,
            start_date: NaiveDate::from_ymd_opt(2025, 5, 2).unwrap(),
            created_utc: Utc::now(),
        };

        let request = registration_request(&application, &terms());
        assert_eq!(request.package_id, application.package_id);
        assert_eq!(request.months, 6);
        assert_eq!(request.member.start_date, application.start_date);
        assert_eq!(request.member.photo_reference.as_deref(), Some("photos/meera.jpg"));
        assert_eq!(request.extra_discount, 100);
    }
}
