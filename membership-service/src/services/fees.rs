//! Fee calculation for registrations, renewals, and locker terms.
//!
//! Pure functions over integer money. Nothing here touches the database.

use crate::error::BillingError;
use crate::models::MembershipPackage;
use serde::Serialize;

/// Whether the admission fee is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeBasis {
    Registration,
    Renewal,
}

/// Locker pricing inputs for a quote.
#[derive(Debug, Clone, Copy)]
pub struct LockerTerms {
    pub monthly_price: i64,
    pub months: i32,
    pub discount: i64,
}

#[derive(Debug, Clone)]
pub struct FeeRequest<'a> {
    pub package: &'a MembershipPackage,
    pub basis: FeeBasis,
    pub months: i32,
    pub extra_discount: i64,
    /// Amount charged for a zero-month (day pass) membership.
    pub short_term_amount: Option<i64>,
    pub locker: Option<LockerTerms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub admission_fee: i64,
    pub monthly_fee: i64,
    pub total_monthly_fees: i64,
    pub package_discount: i64,
    pub extra_discount_applied: i64,
    pub locker_charge: i64,
    pub gross_amount: i64,
    pub net_amount: i64,
}

impl FeeBreakdown {
    /// Package net plus the separately tracked locker charge.
    pub fn total_due(&self) -> i64 {
        self.net_amount + self.locker_charge
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockerQuote {
    pub locker_price: i64,
    pub discount_applied: i64,
    pub locker_charge: i64,
}

fn overflow() -> BillingError {
    BillingError::InvalidInput(anyhow::anyhow!("Amount out of range"))
}

/// Price a locker term. The discount never takes the charge below zero.
pub fn quote_locker(terms: LockerTerms) -> Result<LockerQuote, BillingError> {
    if terms.months < 0 {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Locker term cannot be negative"
        )));
    }
    if terms.monthly_price < 0 || terms.discount < 0 {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Locker price and discount cannot be negative"
        )));
    }

    let locker_price = terms
        .monthly_price
        .checked_mul(i64::from(terms.months))
        .ok_or_else(overflow)?;
    let discount_applied = terms.discount.min(locker_price);

    Ok(LockerQuote {
        locker_price,
        discount_applied,
        locker_charge: locker_price - discount_applied,
    })
}

/// Compute the fee breakdown for a membership term.
pub fn calculate_fees(request: &FeeRequest<'_>) -> Result<FeeBreakdown, BillingError> {
    if request.months < 0 {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Duration cannot be negative: {} months",
            request.months
        )));
    }
    if request.extra_discount < 0 {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Extra discount cannot be negative"
        )));
    }

    let locker_charge = match request.locker {
        Some(terms) => quote_locker(terms)?.locker_charge,
        None => 0,
    };

    if request.months == 0 {
        let net_amount = request.short_term_amount.ok_or_else(|| {
            BillingError::InvalidInput(anyhow::anyhow!(
                "A zero-month membership requires an explicit amount"
            ))
        })?;
        if net_amount < 0 {
            return Err(BillingError::InvalidInput(anyhow::anyhow!(
                "Short-term amount cannot be negative"
            )));
        }
        return Ok(FeeBreakdown {
            admission_fee: 0,
            monthly_fee: 0,
            total_monthly_fees: 0,
            package_discount: 0,
            extra_discount_applied: 0,
            locker_charge,
            gross_amount: net_amount,
            net_amount,
        });
    }

    let package = request.package;
    let admission_fee = match request.basis {
        FeeBasis::Registration => package.admission_amount,
        FeeBasis::Renewal => 0,
    };
    let monthly_fee = package.monthly_amount;
    let total_monthly_fees = monthly_fee
        .checked_mul(i64::from(request.months))
        .ok_or_else(overflow)?;
    let subtotal = admission_fee
        .checked_add(total_monthly_fees)
        .ok_or_else(overflow)?;

    // A tier larger than the fees it discounts is capped at the fees.
    let package_discount = package.term_discount(request.months).min(subtotal).max(0);
    let gross_amount = subtotal - package_discount;
    let extra_discount_applied = request.extra_discount.min(gross_amount);

    Ok(FeeBreakdown {
        admission_fee,
        monthly_fee,
        total_monthly_fees,
        package_discount,
        extra_discount_applied,
        locker_charge,
        gross_amount,
        net_amount: gross_amount - extra_discount_applied,
    })
}
