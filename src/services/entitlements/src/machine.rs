//! The entitlement transition table
//!
//! Fully enumerated: any (state, event type) pair not matched below is a
//! no-op. A `Stay` transition is semantically meaningful — it appends to
//! history and may refresh period bounds without changing state. Events can
//! arrive out of order, so the table tolerates late arrivals (a late
//! `purchase` re-activates `refunded`).

use revback_shared::{EntitlementState, EventType};

use EntitlementState::*;
use EventType::*;

/// Outcome of a table lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to a different state
    To(EntitlementState),
    /// Record the event without changing state
    Stay,
}

impl Transition {
    /// The resulting state given the current one
    pub fn target(&self, current: EntitlementState) -> EntitlementState {
        match self {
            Transition::To(state) => *state,
            Transition::Stay => current,
        }
    }
}

/// Look up the transition for (state, event type). `None` means the pair is
/// not in the table and the event does not touch the entitlement.
pub fn transition_for(state: EntitlementState, event: EventType) -> Option<Transition> {
    let t = Transition::To;
    match (state, event) {
        (Inactive, Purchase) => Some(t(Active)),
        (Inactive, TrialStart) => Some(t(Trial)),
        (Inactive, Renewal) => Some(t(Active)),
        (Inactive, OfferRedeemed) => Some(t(Active)),

        (Trial, Purchase) => Some(t(Active)),
        (Trial, TrialConversion) => Some(t(Active)),
        (Trial, Cancellation) => Some(Transition::Stay),
        (Trial, Expiration) => Some(t(Expired)),
        (Trial, Refund) => Some(t(Refunded)),

        (Active, Renewal) => Some(Transition::Stay),
        (Active, Cancellation) => Some(Transition::Stay),
        (Active, GracePeriodStart) => Some(t(GracePeriod)),
        (Active, EventType::BillingRetry) => Some(t(EntitlementState::BillingRetry)),
        (Active, Expiration) => Some(t(Expired)),
        (Active, Refund) => Some(t(Refunded)),
        (Active, Chargeback) => Some(t(Refunded)),
        (Active, Revoke) => Some(t(Revoked)),
        (Active, Pause) => Some(t(Paused)),
        (Active, Upgrade) => Some(Transition::Stay),
        (Active, Downgrade) => Some(Transition::Stay),
        (Active, Crossgrade) => Some(Transition::Stay),
        (Active, PriceChange) => Some(Transition::Stay),

        (GracePeriod, Renewal) => Some(t(Active)),
        (GracePeriod, GracePeriodEnd) => Some(t(EntitlementState::BillingRetry)),
        (GracePeriod, EventType::BillingRetry) => Some(t(EntitlementState::BillingRetry)),
        (GracePeriod, Expiration) => Some(t(Expired)),
        (GracePeriod, Refund) => Some(t(Refunded)),

        (EntitlementState::BillingRetry, Renewal) => Some(t(Active)),
        (EntitlementState::BillingRetry, EventType::BillingRetry) => Some(Transition::Stay),
        (EntitlementState::BillingRetry, Expiration) => Some(t(Expired)),
        (EntitlementState::BillingRetry, Refund) => Some(t(Refunded)),

        (PastDue, Purchase) => Some(t(Active)),
        (PastDue, Renewal) => Some(t(Active)),
        (PastDue, Expiration) => Some(t(Expired)),

        (Paused, Cancellation) => Some(t(Expired)),
        (Paused, Expiration) => Some(t(Expired)),
        (Paused, Resume) => Some(t(Active)),

        (Expired, Purchase) => Some(t(Active)),
        (Expired, TrialStart) => Some(t(Trial)),
        (Expired, Renewal) => Some(t(Active)),
        (Expired, OfferRedeemed) => Some(t(Active)),

        (Revoked, Purchase) => Some(t(Active)),

        (Refunded, Purchase) => Some(t(Active)),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(state: EntitlementState, event: EventType) -> Option<EntitlementState> {
        transition_for(state, event).map(|t| t.target(state))
    }

    #[test]
    fn inactive_row() {
        assert_eq!(target(Inactive, Purchase), Some(Active));
        assert_eq!(target(Inactive, TrialStart), Some(Trial));
        assert_eq!(target(Inactive, Renewal), Some(Active));
        assert_eq!(target(Inactive, OfferRedeemed), Some(Active));
        assert_eq!(target(Inactive, Cancellation), None);
        assert_eq!(target(Inactive, Refund), None);
        assert_eq!(target(Inactive, TrialConversion), None);
    }

    #[test]
    fn trial_row() {
        assert_eq!(target(Trial, Purchase), Some(Active));
        assert_eq!(target(Trial, TrialConversion), Some(Active));
        // cancellation during trial records but keeps the trial running
        assert_eq!(transition_for(Trial, Cancellation), Some(Transition::Stay));
        assert_eq!(target(Trial, Expiration), Some(Expired));
        assert_eq!(target(Trial, Refund), Some(Refunded));
        assert_eq!(target(Trial, Renewal), None);
        assert_eq!(target(Trial, Chargeback), None);
    }

    #[test]
    fn active_row() {
        assert_eq!(transition_for(Active, Renewal), Some(Transition::Stay));
        assert_eq!(transition_for(Active, Cancellation), Some(Transition::Stay));
        assert_eq!(target(Active, GracePeriodStart), Some(GracePeriod));
        assert_eq!(
            target(Active, EventType::BillingRetry),
            Some(EntitlementState::BillingRetry)
        );
        assert_eq!(target(Active, Expiration), Some(Expired));
        assert_eq!(target(Active, Refund), Some(Refunded));
        assert_eq!(target(Active, Chargeback), Some(Refunded));
        assert_eq!(target(Active, Revoke), Some(Revoked));
        assert_eq!(target(Active, Pause), Some(Paused));
        for plan_change in [Upgrade, Downgrade, Crossgrade, PriceChange] {
            assert_eq!(transition_for(Active, plan_change), Some(Transition::Stay));
        }
        assert_eq!(target(Active, Purchase), None);
        assert_eq!(target(Active, Resume), None);
    }

    #[test]
    fn grace_period_row() {
        assert_eq!(target(GracePeriod, Renewal), Some(Active));
        assert_eq!(
            target(GracePeriod, GracePeriodEnd),
            Some(EntitlementState::BillingRetry)
        );
        assert_eq!(
            target(GracePeriod, EventType::BillingRetry),
            Some(EntitlementState::BillingRetry)
        );
        assert_eq!(target(GracePeriod, Expiration), Some(Expired));
        assert_eq!(target(GracePeriod, Refund), Some(Refunded));
        assert_eq!(target(GracePeriod, Purchase), None);
    }

    #[test]
    fn billing_retry_row() {
        assert_eq!(target(EntitlementState::BillingRetry, Renewal), Some(Active));
        assert_eq!(
            transition_for(EntitlementState::BillingRetry, EventType::BillingRetry),
            Some(Transition::Stay)
        );
        assert_eq!(
            target(EntitlementState::BillingRetry, Expiration),
            Some(Expired)
        );
        assert_eq!(
            target(EntitlementState::BillingRetry, Refund),
            Some(Refunded)
        );
        assert_eq!(target(EntitlementState::BillingRetry, Purchase), None);
    }

    #[test]
    fn past_due_row() {
        assert_eq!(target(PastDue, Purchase), Some(Active));
        assert_eq!(target(PastDue, Renewal), Some(Active));
        assert_eq!(target(PastDue, Expiration), Some(Expired));
        assert_eq!(target(PastDue, Refund), None);
    }

    #[test]
    fn paused_row() {
        assert_eq!(target(Paused, Cancellation), Some(Expired));
        assert_eq!(target(Paused, Expiration), Some(Expired));
        assert_eq!(target(Paused, Resume), Some(Active));
        assert_eq!(target(Paused, Renewal), None);
        assert_eq!(target(Paused, Purchase), None);
    }

    #[test]
    fn terminalish_states_resubscribe_on_purchase() {
        assert_eq!(target(Expired, Purchase), Some(Active));
        assert_eq!(target(Expired, TrialStart), Some(Trial));
        assert_eq!(target(Expired, Renewal), Some(Active));
        assert_eq!(target(Expired, OfferRedeemed), Some(Active));
        assert_eq!(target(Revoked, Purchase), Some(Active));
        assert_eq!(target(Refunded, Purchase), Some(Active));
        // nothing else lifts revoked/refunded
        assert_eq!(target(Revoked, Renewal), None);
        assert_eq!(target(Refunded, Renewal), None);
        assert_eq!(target(Refunded, TrialStart), None);
    }

    #[test]
    fn no_transition_reaches_past_due() {
        // past_due is kept for forward compatibility; nothing enters it
        let states = [
            Inactive, Trial, Active, GracePeriod,
            EntitlementState::BillingRetry, PastDue, Paused, Expired, Revoked, Refunded,
        ];
        let events = [
            Purchase, Renewal, Cancellation, Refund, Chargeback, GracePeriodStart,
            GracePeriodEnd, EventType::BillingRetry, Expiration, TrialStart,
            TrialConversion, Upgrade, Downgrade, Crossgrade, Pause, Resume, Revoke,
            OfferRedeemed, PriceChange,
        ];
        for state in states {
            for event in events {
                if state == PastDue {
                    continue;
                }
                assert_ne!(
                    target(state, event),
                    Some(PastDue),
                    "{state:?} + {event:?} must not enter past_due"
                );
            }
        }
    }
}
