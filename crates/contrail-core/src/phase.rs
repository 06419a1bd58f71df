//! Reconciliation phase machine and persisted client state.
//!
//! The phase is a single tagged value, so the state can never hold two
//! contradictory in-flight markers at once. One-shot routing hints stay as
//! individual fields: they are consumed independently of the phase.

use serde::{Deserialize, Serialize};

use crate::domain::SubscriptionPlan;
use crate::ids::{SessionToken, UserId};

/// Where the client is in the checkout/reconciliation lifecycle.
///
/// Exactly one phase holds at any time. Transitions go through the methods
/// below; an out-of-order request leaves the phase unchanged and the caller
/// decides whether that is worth logging.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    /// Checkout opened on the gateway's hosted page; waiting for the
    /// redirect back.
    AwaitingCheckout,
    /// Back from checkout, re-establishing the auth session.
    RestoringSession,
    /// Session restored; waiting for the profile row to reflect the new
    /// plan.
    ReconcilingSubscription,
    Error {
        reason: String,
    },
}

impl Phase {
    /// Idle/Error -> AwaitingCheckout. Set immediately before navigating
    /// to the hosted checkout page.
    pub fn begin_checkout(self) -> Phase {
        match self {
            Phase::Idle | Phase::Error { .. } => Phase::AwaitingCheckout,
            other => other,
        }
    }

    /// Enter RestoringSession. The payment callback sets this defensively
    /// on entry, so any pre-reconcile phase is accepted.
    pub fn begin_restore(self) -> Phase {
        match self {
            Phase::ReconcilingSubscription => Phase::ReconcilingSubscription,
            _ => Phase::RestoringSession,
        }
    }

    /// RestoringSession -> ReconcilingSubscription, once an auth session
    /// exists again.
    pub fn begin_reconcile(self) -> Phase {
        match self {
            Phase::RestoringSession | Phase::ReconcilingSubscription => {
                Phase::ReconcilingSubscription
            }
            other => other,
        }
    }

    /// Any -> Idle. The lifecycle completed or was abandoned.
    pub fn settle(self) -> Phase {
        Phase::Idle
    }

    /// Any -> Error.
    pub fn fail(self, reason: impl Into<String>) -> Phase {
        Phase::Error {
            reason: reason.into(),
        }
    }

    /// True while a checkout/restore/reconcile is in flight.
    pub fn in_flight(&self) -> bool {
        matches!(
            self,
            Phase::AwaitingCheckout | Phase::RestoringSession | Phase::ReconcilingSubscription
        )
    }
}

/// Persisted client-side state: last-known-good credentials, the current
/// phase, and one-shot routing hints.
///
/// The remote database owns profiles and session records; nothing here is
/// authoritative. A hint is only trusted until the matching remote read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    /// Last-known-good access token, kept as a restoration fallback.
    pub access_token: Option<String>,
    /// Last-known-good refresh token.
    pub refresh_token: Option<String>,
    pub user_id: Option<UserId>,
    /// Token of the server-side session record, distinct from the auth
    /// platform's pair.
    pub session_token: Option<SessionToken>,

    #[serde(default)]
    pub phase: Phase,

    /// A paid checkout finished but no session could be restored; resolved
    /// on the next successful login. Survives `clear_payment_flags`.
    #[serde(default)]
    pub pending_activation: bool,

    /// Plan chosen on the pricing page, cached for the corrective update.
    pub selected_plan: Option<SubscriptionPlan>,

    // One-shot routing hints, each cleared when consumed.
    #[serde(default)]
    pub new_user_signup: bool,
    #[serde(default)]
    pub recently_signed_up: bool,
    #[serde(default)]
    pub skip_initial_redirect: bool,
    #[serde(default)]
    pub redirect_to_pricing: bool,
    #[serde(default)]
    pub is_admin: bool,
}

impl ClientState {
    /// Store a credential pair and the identity it belongs to.
    pub fn set_tokens(&mut self, user_id: UserId, access: impl Into<String>, refresh: impl Into<String>) {
        self.user_id = Some(user_id);
        self.access_token = Some(access.into());
        self.refresh_token = Some(refresh.into());
    }

    /// True when both halves of the credential pair are present.
    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    /// Drop tokens and user identity. Flags and phase are untouched.
    pub fn clear_session(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.user_id = None;
        self.session_token = None;
    }

    /// Drop every routing/payment flag. Tokens and identity are untouched.
    pub fn clear_all_flags(&mut self) {
        self.phase = Phase::Idle;
        self.pending_activation = false;
        self.selected_plan = None;
        self.new_user_signup = false;
        self.recently_signed_up = false;
        self.skip_initial_redirect = false;
        self.redirect_to_pricing = false;
        self.is_admin = false;
    }

    /// Drop only the payment-phase state. `pending_activation` survives so
    /// the next login can resume reconciliation.
    pub fn clear_payment_flags(&mut self) {
        self.phase = Phase::Idle;
        self.selected_plan = None;
    }

    /// Consume the skip-initial-redirect hint.
    pub fn take_skip_initial_redirect(&mut self) -> bool {
        std::mem::take(&mut self.skip_initial_redirect)
    }

    /// Consume the new-user-signup hint.
    pub fn take_new_user_signup(&mut self) -> bool {
        std::mem::take(&mut self.new_user_signup)
    }

    /// Consume the recently-signed-up hint.
    pub fn take_recently_signed_up(&mut self) -> bool {
        std::mem::take(&mut self.recently_signed_up)
    }

    /// Consume the redirect-to-pricing hint.
    pub fn take_redirect_to_pricing(&mut self) -> bool {
        std::mem::take(&mut self.redirect_to_pricing)
    }
}
