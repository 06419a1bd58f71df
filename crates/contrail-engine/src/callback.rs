//! Payment callback: the handler for the redirect back from hosted
//! checkout.
//!
//! The auth session is often gone after the gateway round-trip, so the
//! handler first runs the shared restoration chain. With a session it
//! records the server-side login and hands the user to the chat route with
//! the phase set to reconcile; without one it falls back to the
//! pending-signup staging record (pay-before-account flow).
//!
//! "Can't confirm payment" is non-fatal here: the gateway webhook owns the
//! authoritative subscription write, and the checker keeps polling until
//! the profile reflects it.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use contrail_auth::AuthPlatform;
use contrail_core::{CheckoutId, Notice, Route, Settings};
use contrail_store::{Database, PendingSignup, PendingSignupRepo, SessionRepo, StateStore};

use crate::error::EngineError;
use crate::restore::{restore_session, RestoreMethod};
use crate::retry::retry;
use crate::signal::ReadySignal;

/// What the embedder should do after the callback ran.
#[derive(Clone, Debug)]
pub enum CallbackOutcome {
    /// Session restored and recorded; navigate and let the checker finish
    /// reconciliation.
    Completed {
        route: Route,
        method: RestoreMethod,
        notice: Notice,
    },
    /// No session, but a staged signup matched the checkout id. The caller
    /// completes account creation out-of-band.
    PendingSignup(PendingSignup),
    Failed {
        route: Route,
        notice: Notice,
    },
}

pub struct PaymentCallback {
    auth: Arc<dyn AuthPlatform>,
    state: StateStore,
    sessions: SessionRepo,
    signups: PendingSignupRepo,
    settings: Settings,
    ready: ReadySignal,
}

#[derive(Debug, thiserror::Error)]
enum LookupError {
    /// Read-after-write lag: the row may simply not be visible yet.
    #[error("pending signup not visible yet")]
    Missing,
    #[error("{0}")]
    Store(#[from] contrail_store::StoreError),
}

impl PaymentCallback {
    pub fn new(
        auth: Arc<dyn AuthPlatform>,
        db: Database,
        state: StateStore,
        settings: Settings,
        ready: ReadySignal,
    ) -> Self {
        Self {
            auth,
            state,
            sessions: SessionRepo::new(db.clone()),
            signups: PendingSignupRepo::new(db),
            settings,
            ready,
        }
    }

    /// Handle the return from hosted checkout. Never errors out: failures
    /// become a route + notice.
    #[instrument(skip(self), fields(checkout_id = %checkout_id))]
    pub async fn handle(&self, checkout_id: &CheckoutId) -> CallbackOutcome {
        match self.run(checkout_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("payment callback failed: {e}");
                if let Err(e) = self.state.update(|s| s.clear_payment_flags()) {
                    warn!("failed to clear payment flags: {e}");
                }
                CallbackOutcome::Failed {
                    route: Route::Login,
                    notice: Notice::Generic {
                        message: "Something went wrong finishing your payment. Please log in."
                            .to_string(),
                    },
                }
            }
        }
    }

    async fn run(&self, checkout_id: &CheckoutId) -> Result<CallbackOutcome, EngineError> {
        // Mark the phase defensively before anything can fail.
        self.ready.begin();
        self.state
            .update(|s| s.phase = s.phase.clone().begin_restore())?;

        let Some(restored) = restore_session(self.auth.as_ref(), &self.state).await else {
            return self.resolve_pending_signup(checkout_id).await;
        };

        let session = &restored.session;
        let user_id = session.user_id.clone();

        // Server-side login record; idempotent against a racing creation,
        // then the single-active-session sweep.
        let record = self
            .sessions
            .ensure_active(&user_id, self.settings.store.session_ttl_hours)?;
        let _ = self
            .sessions
            .invalidate_others(&user_id, &record.session_token)?;

        let tokens = session.tokens.clone();
        self.state.update(|s| {
            s.set_tokens(user_id.clone(), tokens.access_token, tokens.refresh_token);
            s.session_token = Some(record.session_token.clone());
            s.phase = s.phase.clone().begin_reconcile();
        })?;

        info!(user_id = %user_id, method = ?restored.method, "payment callback restored session");

        Ok(CallbackOutcome::Completed {
            route: Route::Chat,
            method: restored.method,
            notice: Notice::PaymentRecorded,
        })
    }

    /// No session could be restored: the user likely paid as part of
    /// signing up. Look for the staged record, tolerating read-after-write
    /// lag in the remote store.
    async fn resolve_pending_signup(
        &self,
        checkout_id: &CheckoutId,
    ) -> Result<CallbackOutcome, EngineError> {
        let signups = self.signups.clone();
        let checkout = checkout_id.clone();

        let lookup = retry(
            &self.settings.recon.retry,
            "pending signup lookup",
            move || {
                let signups = signups.clone();
                let checkout = checkout.clone();
                async move {
                    match signups.find_by_checkout(&checkout) {
                        Ok(Some(record)) => Ok(record),
                        Ok(None) => Err(LookupError::Missing),
                        Err(e) => Err(LookupError::Store(e)),
                    }
                }
            },
            |_| true,
        )
        .await;

        match lookup {
            Ok(record) => {
                info!(signup_id = %record.id, "pending signup found for checkout");
                Ok(CallbackOutcome::PendingSignup(record))
            }
            Err(e) => {
                warn!(
                    "{}: {e}",
                    EngineError::SignupNotFound(checkout_id.clone())
                );
                self.state.update(|s| s.clear_payment_flags())?;
                Ok(CallbackOutcome::Failed {
                    route: Route::Pricing,
                    notice: Notice::SignupNotFound,
                })
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
