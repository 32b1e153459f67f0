//! Built-in detectors
//!
//! Each file holds one detection rule: its precondition, severity policy
//! and evidence contract. Detectors read through the repositories and never
//! write — persistence and de-duplication belong to the engine.

mod cross_platform_mismatch;
mod entitlement_without_payment;
mod paid_no_access;
mod refund_not_revoked;
mod silent_renewal_failure;
mod trial_no_conversion;
mod verified;
mod webhook_delivery_gap;

pub use cross_platform_mismatch::CrossPlatformMismatchDetector;
pub use entitlement_without_payment::EntitlementWithoutPaymentDetector;
pub use paid_no_access::PaidNoAccessDetector;
pub use refund_not_revoked::RefundNotRevokedDetector;
pub use silent_renewal_failure::SilentRenewalFailureDetector;
pub use trial_no_conversion::TrialNoConversionDetector;
pub use verified::{VerifiedAccessNoPaymentDetector, VerifiedPaidNoAccessDetector};
pub use webhook_delivery_gap::WebhookDeliveryGapDetector;

use revback_shared::Entitlement;

/// Monthly-equivalent amount for an entitlement's last payment: yearly
/// plans are divided by twelve, everything else passes through.
pub(crate) fn monthly_equivalent_cents(
    entitlement: &Entitlement,
    amount_cents: Option<i64>,
) -> Option<i64> {
    let amount = amount_cents?;
    match entitlement.billing_interval.as_deref() {
        Some("year") | Some("annual") => Some(amount / 12),
        _ => Some(amount),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use revback_shared::{BillingSource, Entitlement, EntitlementState};
    use uuid::Uuid;

    pub fn entitlement(state: EntitlementState) -> Entitlement {
        let now = Utc::now();
        Entitlement {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            source: BillingSource::Stripe,
            state,
            external_subscription_id: Some("sub_1".into()),
            current_period_start: Some(now),
            current_period_end: None,
            cancel_at: None,
            trial_end: None,
            billing_interval: Some("month".into()),
            plan_tier: Some("Pro".into()),
            last_event_id: None,
            state_history: Vec::new(),
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::entitlement;
    use super::*;
    use revback_shared::EntitlementState;

    #[test]
    fn yearly_plans_divide_by_twelve() {
        let mut e = entitlement(EntitlementState::Active);
        e.billing_interval = Some("year".into());
        assert_eq!(monthly_equivalent_cents(&e, Some(12000)), Some(1000));
        e.billing_interval = Some("month".into());
        assert_eq!(monthly_equivalent_cents(&e, Some(999)), Some(999));
        assert_eq!(monthly_equivalent_cents(&e, None), None);
    }
}
