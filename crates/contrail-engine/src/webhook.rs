//! Application of payment-gateway events to the authoritative store.
//!
//! The gateway webhook is the sole source of truth for subscription state;
//! everything the client-side reconciliation does is a stand-in that runs
//! before these writes are guaranteed to have landed. The HTTP handler and
//! signature verification live outside this crate; this is the state
//! transition itself.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use contrail_core::{CheckoutId, SubscriptionPlan, SubscriptionStatus, UserId};
use contrail_store::{Database, ProfileRepo, SubscriptionRepo};

use crate::error::EngineError;

/// Gateway events the store reacts to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    #[serde(rename = "checkout.session.completed")]
    CheckoutCompleted {
        checkout_id: CheckoutId,
        user_id: UserId,
        plan: SubscriptionPlan,
    },
    #[serde(rename = "customer.subscription.updated")]
    SubscriptionUpdated {
        user_id: UserId,
        plan: SubscriptionPlan,
        status: SubscriptionStatus,
    },
}

/// Write the event into `subscriptions` and the profile's subscription
/// columns.
#[instrument(skip(db))]
pub fn apply_gateway_event(db: &Database, event: &GatewayEvent) -> Result<(), EngineError> {
    let profiles = ProfileRepo::new(db.clone());
    let subscriptions = SubscriptionRepo::new(db.clone());

    match event {
        GatewayEvent::CheckoutCompleted {
            checkout_id,
            user_id,
            plan,
        } => {
            subscriptions.upsert(
                user_id,
                *plan,
                SubscriptionStatus::Active,
                Some(checkout_id),
            )?;
            profiles.update_subscription(user_id, *plan, SubscriptionStatus::Active)?;
            info!(user_id = %user_id, plan = %plan, "checkout completed, subscription activated");
        }
        GatewayEvent::SubscriptionUpdated {
            user_id,
            plan,
            status,
        } => {
            // Keep the original checkout id on the billing row.
            let existing_checkout = subscriptions
                .get(user_id)?
                .and_then(|row| row.checkout_id);
            subscriptions.upsert(user_id, *plan, *status, existing_checkout.as_ref())?;
            profiles.update_subscription(user_id, *plan, *status)?;
            info!(user_id = %user_id, plan = %plan, status = %status, "subscription updated");
        }
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, UserId) {
        let db = Database::in_memory().unwrap();
        let profile = ProfileRepo::new(db.clone())
            .create(&UserId::new(), "pilot@example.com", SubscriptionPlan::Free)
            .unwrap();
        (db, profile.id)
    }

    #[test]
    fn checkout_completed_activates() {
        let (db, user_id) = setup();

        apply_gateway_event(
            &db,
            &GatewayEvent::CheckoutCompleted {
                checkout_id: CheckoutId::from_raw("cs_123"),
                user_id: user_id.clone(),
                plan: SubscriptionPlan::Monthly,
            },
        )
        .unwrap();

        let profile = ProfileRepo::new(db.clone()).get(&user_id).unwrap();
        assert_eq!(profile.subscription_plan, SubscriptionPlan::Monthly);
        assert_eq!(profile.subscription_status, SubscriptionStatus::Active);

        let row = SubscriptionRepo::new(db).get(&user_id).unwrap().unwrap();
        assert_eq!(row.checkout_id, Some(CheckoutId::from_raw("cs_123")));
    }

    #[test]
    fn subscription_updated_keeps_checkout_id() {
        let (db, user_id) = setup();

        apply_gateway_event(
            &db,
            &GatewayEvent::CheckoutCompleted {
                checkout_id: CheckoutId::from_raw("cs_123"),
                user_id: user_id.clone(),
                plan: SubscriptionPlan::Monthly,
            },
        )
        .unwrap();

        apply_gateway_event(
            &db,
            &GatewayEvent::SubscriptionUpdated {
                user_id: user_id.clone(),
                plan: SubscriptionPlan::Monthly,
                status: SubscriptionStatus::Cancelled,
            },
        )
        .unwrap();

        let profile = ProfileRepo::new(db.clone()).get(&user_id).unwrap();
        assert_eq!(profile.subscription_status, SubscriptionStatus::Cancelled);

        let row = SubscriptionRepo::new(db).get(&user_id).unwrap().unwrap();
        assert_eq!(row.status, SubscriptionStatus::Cancelled);
        assert_eq!(row.checkout_id, Some(CheckoutId::from_raw("cs_123")));
    }

    #[test]
    fn unknown_user_errors() {
        let (db, _) = setup();
        let result = apply_gateway_event(
            &db,
            &GatewayEvent::CheckoutCompleted {
                checkout_id: CheckoutId::from_raw("cs_123"),
                user_id: UserId::from_raw("user_missing"),
                plan: SubscriptionPlan::Monthly,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn event_serde_uses_gateway_names() {
        let event = GatewayEvent::CheckoutCompleted {
            checkout_id: CheckoutId::from_raw("cs_123"),
            user_id: UserId::from_raw("user_1"),
            plan: SubscriptionPlan::Monthly,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"checkout.session.completed\""));
        let back: GatewayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
