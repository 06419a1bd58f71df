//! The session checker: one pass of the reconciliation state machine.
//!
//! Driven by two triggers — a one-time mount check and the auth platform's
//! change events. A tokio mutex coalesces overlapping invocations: the
//! second caller returns immediately without touching the network, exactly
//! one check runs at a time.
//!
//! Decision order per pass:
//! 1. consume `skip_initial_redirect` and stop (deliberate navigation)
//! 2. skip repeat checks while the user is mid-login
//! 3. post-payment: restore the session, verify the profile against the
//!    paid plan, correct it once if needed, and poll until the row
//!    confirms before settling the phase and firing the ready signal
//! 4. steady state: remote session existence + account status checks
//! 5. anything unexpected fails closed to the login route

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use contrail_auth::AuthPlatform;
use contrail_core::{
    AccountStatus, ClientState, Notice, Phase, RetryConfig, Route, Settings, SubscriptionPlan,
    SubscriptionStatus,
};
use contrail_store::{Database, ProfileRepo, SessionRepo, StateStore};

use crate::error::EngineError;
use crate::restore::restore_session;
use crate::retry::retry;
use crate::signal::ReadySignal;

/// Where the embedder currently is, supplied per pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckContext {
    pub on_login_route: bool,
    /// Routes that never force a login redirect (pricing, marketing).
    pub on_public_route: bool,
}

/// Result of one checker pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckOutcome {
    /// Where the embedder should navigate, if anywhere.
    pub route: Option<Route>,
    pub notices: Vec<Notice>,
    /// Whether this pass read remote state at all.
    pub performed_remote_check: bool,
    /// True when the pass was coalesced into an already-running one.
    pub skipped: bool,
}

impl CheckOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// A pass that decided everything from local state.
    fn local() -> Self {
        Self::default()
    }

    fn remote(route: Option<Route>, notices: Vec<Notice>) -> Self {
        Self {
            route,
            notices,
            performed_remote_check: true,
            skipped: false,
        }
    }
}

pub struct SessionChecker {
    auth: Arc<dyn AuthPlatform>,
    state: StateStore,
    profiles: ProfileRepo,
    sessions: SessionRepo,
    settings: Settings,
    guard: tokio::sync::Mutex<()>,
    first_check_done: AtomicBool,
    ready: ReadySignal,
}

#[derive(Debug, thiserror::Error)]
enum ConfirmError {
    /// The webhook write has not landed yet.
    #[error("profile does not reflect the paid plan yet")]
    NotYet,
    #[error("{0}")]
    Store(#[from] contrail_store::StoreError),
}

impl SessionChecker {
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
            profiles: ProfileRepo::new(db.clone()),
            sessions: SessionRepo::new(db),
            settings,
            guard: tokio::sync::Mutex::new(()),
            first_check_done: AtomicBool::new(false),
            ready,
        }
    }

    /// The reconcile-completion signal dependents can await.
    pub fn ready(&self) -> &ReadySignal {
        &self.ready
    }

    /// Run one checker pass. Never errors out: unexpected failures clear
    /// the in-flight phase and fail closed to the login route.
    #[instrument(skip(self))]
    pub async fn check(&self, ctx: CheckContext) -> CheckOutcome {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("session check already in flight, skipping");
            return CheckOutcome::skipped();
        };

        let first_check = !self.first_check_done.swap(true, Ordering::SeqCst);
        match self.run(ctx, first_check).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("session check failed: {e}");
                if let Err(e) = self.state.update(|s| s.clear_payment_flags()) {
                    warn!("failed to clear payment flags: {e}");
                }
                CheckOutcome::remote(
                    Some(Route::Login),
                    vec![Notice::Generic {
                        message: "Something went wrong. Please log in again.".to_string(),
                    }],
                )
            }
        }
    }

    /// Re-run the checker on every auth platform event.
    pub fn spawn_event_loop(self: &Arc<Self>, ctx: CheckContext) -> tokio::task::JoinHandle<()> {
        let checker = Arc::clone(self);
        let mut events = checker.auth.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(?event, "auth event, running session check");
                        let _ = checker.check(ctx).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("auth event receiver lagged, missed {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn run(&self, ctx: CheckContext, first_check: bool) -> Result<CheckOutcome, EngineError> {
        // 1. A deliberate navigation just happened; do not fight it.
        if self.state.read().skip_initial_redirect {
            self.state.update(|s| {
                let _ = s.take_skip_initial_redirect();
            })?;
            debug!("skip-initial-redirect consumed, no check");
            return Ok(CheckOutcome::local());
        }

        // 2. Mid-login: the login flow drives its own state.
        if ctx.on_login_route && !first_check {
            debug!("repeat check on login route, skipping");
            return Ok(CheckOutcome::local());
        }

        let snapshot = self.state.read();
        let post_payment = matches!(
            snapshot.phase,
            Phase::ReconcilingSubscription | Phase::RestoringSession
        ) || snapshot.pending_activation;

        if post_payment {
            self.reconcile(snapshot).await
        } else {
            self.steady_check(ctx).await
        }
    }

    /// Post-payment branch: restore, verify, correct once, poll to
    /// confirmation.
    async fn reconcile(&self, snapshot: ClientState) -> Result<CheckOutcome, EngineError> {
        let Some(restored) = restore_session(self.auth.as_ref(), &self.state).await else {
            // Keep the resume marker; the next successful login picks the
            // reconciliation back up.
            self.state.update(|s| {
                s.pending_activation = true;
                s.phase = s.phase.clone().settle();
            })?;
            info!("post-payment restoration failed, deferring to next login");
            return Ok(CheckOutcome::remote(
                Some(Route::Login),
                vec![Notice::SessionExpired],
            ));
        };

        let user_id = restored.session.user_id.clone();

        let profile = match self.profiles.find(&user_id) {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                // Paid before the account finished: complete signup first.
                return Ok(CheckOutcome::remote(Some(Route::Signup), Vec::new()));
            }
            Err(e) => {
                error!("profile fetch failed, aborting reconcile pass: {e}");
                return Ok(CheckOutcome::remote(None, Vec::new()));
            }
        };

        let mut notices = Vec::new();
        let verified = profile.subscription_status == SubscriptionStatus::Active
            && profile.subscription_plan.is_paid();
        if !verified {
            // One corrective write from the cached checkout choice. Every
            // occurrence is surfaced: this can mask a billing error.
            let written = snapshot.selected_plan.unwrap_or(SubscriptionPlan::Monthly);
            warn!(
                observed_plan = %profile.subscription_plan,
                observed_status = %profile.subscription_status,
                written_plan = %written,
                "profile does not reflect paid checkout, applying corrective update"
            );
            self.profiles
                .update_subscription(&user_id, written, SubscriptionStatus::Active)?;
            notices.push(Notice::BillingMismatch {
                observed: profile.subscription_plan,
                written,
            });
        }

        // Poll until the profile row actually reflects a paid plan. The
        // webhook may still be in flight; access is granted only on
        // confirmation.
        let confirm_config = RetryConfig {
            max_attempts: self.settings.recon.confirm_attempts,
            ..self.settings.recon.retry.clone()
        };
        let profiles = self.profiles.clone();
        let poll_user = user_id.clone();
        let confirmed = retry(
            &confirm_config,
            "subscription confirmation",
            move || {
                let profiles = profiles.clone();
                let poll_user = poll_user.clone();
                async move {
                    match profiles.get(&poll_user) {
                        Ok(p)
                            if p.subscription_status == SubscriptionStatus::Active
                                && p.subscription_plan.is_paid() =>
                        {
                            Ok(p)
                        }
                        Ok(_) => Err(ConfirmError::NotYet),
                        Err(e) => Err(ConfirmError::Store(e)),
                    }
                }
            },
            |_| true,
        )
        .await;

        match confirmed {
            Ok(_) => {
                let record = self
                    .sessions
                    .ensure_active(&user_id, self.settings.store.session_ttl_hours)?;
                let _ = self
                    .sessions
                    .invalidate_others(&user_id, &record.session_token)?;

                let tokens = restored.session.tokens.clone();
                self.state.update(|s| {
                    s.set_tokens(user_id.clone(), tokens.access_token, tokens.refresh_token);
                    s.session_token = Some(record.session_token.clone());
                    s.pending_activation = false;
                    s.clear_payment_flags();
                })?;

                self.ready.complete();
                info!(user_id = %user_id, "subscription reconciled");
                Ok(CheckOutcome::remote(Some(Route::Chat), notices))
            }
            Err(e) => {
                // Not confirmed within the budget; keep the phase and let
                // the next trigger retry.
                warn!("subscription not confirmed yet: {e}");
                Ok(CheckOutcome::remote(None, notices))
            }
        }
    }

    /// Steady state: plain existence + account status checks.
    async fn steady_check(&self, ctx: CheckContext) -> Result<CheckOutcome, EngineError> {
        let Some(session) = self.auth.get_session().await? else {
            if ctx.on_public_route {
                return Ok(CheckOutcome::remote(None, Vec::new()));
            }
            return Ok(CheckOutcome::remote(Some(Route::Login), Vec::new()));
        };

        let user_id = session.user_id.clone();

        let profile = match self.profiles.find(&user_id) {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                return Ok(CheckOutcome::remote(Some(Route::Signup), Vec::new()));
            }
            Err(e) => {
                error!("profile fetch failed, aborting check pass: {e}");
                return Ok(CheckOutcome::remote(None, Vec::new()));
            }
        };

        match profile.account_status {
            AccountStatus::Locked => {
                let _ = self.auth.sign_out().await;
                return Ok(CheckOutcome::remote(
                    Some(Route::Login),
                    vec![Notice::AccountLocked],
                ));
            }
            AccountStatus::Deleted => {
                let _ = self.profiles.reactivate(&user_id)?;
                info!(user_id = %user_id, "reactivated returning account");
            }
            AccountStatus::Active => {}
        }

        // Server-side record upkeep: keep-alive a valid one, otherwise
        // mint the login record and sweep other sessions.
        let snapshot = self.state.read();
        match snapshot.session_token.as_ref() {
            Some(token) if self.sessions.is_valid(token) => self.sessions.touch(token),
            _ => {
                let record = self
                    .sessions
                    .ensure_active(&user_id, self.settings.store.session_ttl_hours)?;
                let _ = self
                    .sessions
                    .invalidate_others(&user_id, &record.session_token)?;
                self.state
                    .update(|s| s.session_token = Some(record.session_token.clone()))?;
            }
        }

        if snapshot.redirect_to_pricing {
            self.state.update(|s| {
                let _ = s.take_redirect_to_pricing();
            })?;
            return Ok(CheckOutcome::remote(Some(Route::Pricing), Vec::new()));
        }

        if ctx.on_login_route {
            // Already authenticated; move off the login page.
            return Ok(CheckOutcome::remote(Some(Route::Chat), Vec::new()));
        }

        Ok(CheckOutcome::remote(None, Vec::new()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use contrail_auth::MemoryAuthPlatform;
    use contrail_core::UserId;
    use tempfile::TempDir;

    const HOUR_MS: i64 = 3_600_000;

    struct Harness {
        auth: Arc<MemoryAuthPlatform>,
        db: Database,
        state: StateStore,
        checker: Arc<SessionChecker>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let auth = Arc::new(MemoryAuthPlatform::new(HOUR_MS));
        let db = Database::in_memory().unwrap();
        let state = StateStore::open(dir.path().join("state.json"));
        let checker = Arc::new(SessionChecker::new(
            auth.clone(),
            db.clone(),
            state.clone(),
            Settings::default(),
            ReadySignal::new(),
        ));
        Harness {
            auth,
            db,
            state,
            checker,
            _dir: dir,
        }
    }

    async fn signed_in_user(h: &Harness, plan: SubscriptionPlan, status: SubscriptionStatus) -> UserId {
        let user_id = h.auth.register("pilot@example.com", "secret");
        let profiles = ProfileRepo::new(h.db.clone());
        profiles
            .create(&user_id, "pilot@example.com", SubscriptionPlan::Free)
            .unwrap();
        profiles.update_subscription(&user_id, plan, status).unwrap();
        h.auth
            .sign_in_with_password("pilot@example.com", "secret")
            .await
            .unwrap();
        user_id
    }

    #[tokio::test]
    async fn skip_initial_redirect_consumed_without_network() {
        let h = harness();
        h.state.update(|s| s.skip_initial_redirect = true).unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert!(!outcome.performed_remote_check);
        assert!(outcome.route.is_none());
        assert!(!h.state.read().skip_initial_redirect);
    }

    #[tokio::test]
    async fn repeat_check_on_login_route_skips() {
        let h = harness();
        let ctx = CheckContext {
            on_login_route: true,
            on_public_route: false,
        };

        let first = h.checker.check(ctx).await;
        assert!(first.performed_remote_check);

        let second = h.checker.check(ctx).await;
        assert!(!second.performed_remote_check);
        assert!(second.route.is_none());
    }

    #[tokio::test]
    async fn concurrent_check_is_coalesced() {
        let h = harness();
        let _held = h.checker.guard.lock().await;

        let outcome = h.checker.check(CheckContext::default()).await;
        assert!(outcome.skipped);
        assert!(!outcome.performed_remote_check);
    }

    #[tokio::test]
    async fn signed_out_routes_to_login() {
        let h = harness();
        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Login));
    }

    #[tokio::test]
    async fn signed_out_on_public_route_stays() {
        let h = harness();
        let outcome = h
            .checker
            .check(CheckContext {
                on_login_route: false,
                on_public_route: true,
            })
            .await;
        assert!(outcome.route.is_none());
        assert!(outcome.performed_remote_check);
    }

    #[tokio::test]
    async fn signed_in_on_login_route_moves_to_chat() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Monthly, SubscriptionStatus::Active).await;

        let outcome = h
            .checker
            .check(CheckContext {
                on_login_route: true,
                on_public_route: false,
            })
            .await;
        assert_eq!(outcome.route, Some(Route::Chat));
    }

    #[tokio::test]
    async fn steady_check_records_server_session() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Free, SubscriptionStatus::Inactive).await;

        let outcome = h.checker.check(CheckContext::default()).await;
        assert!(outcome.route.is_none());

        let token = h.state.read().session_token.unwrap();
        assert!(SessionRepo::new(h.db.clone()).is_valid(&token));
    }

    #[tokio::test]
    async fn locked_account_signed_out() {
        let h = harness();
        let user_id = signed_in_user(&h, SubscriptionPlan::Free, SubscriptionStatus::Inactive).await;
        ProfileRepo::new(h.db.clone())
            .set_account_status(&user_id, AccountStatus::Locked)
            .unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Login));
        assert_eq!(outcome.notices, vec![Notice::AccountLocked]);
        assert!(h.auth.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleted_account_reactivates() {
        let h = harness();
        let user_id = signed_in_user(&h, SubscriptionPlan::Free, SubscriptionStatus::Inactive).await;
        let profiles = ProfileRepo::new(h.db.clone());
        profiles
            .set_account_status(&user_id, AccountStatus::Deleted)
            .unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert!(outcome.route.is_none());
        assert_eq!(
            profiles.get(&user_id).unwrap().account_status,
            AccountStatus::Active
        );
    }

    #[tokio::test]
    async fn missing_profile_routes_to_signup() {
        let h = harness();
        h.auth.register("pilot@example.com", "secret");
        h.auth
            .sign_in_with_password("pilot@example.com", "secret")
            .await
            .unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Signup));
    }

    #[tokio::test]
    async fn reconcile_confirms_when_webhook_landed() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Monthly, SubscriptionStatus::Active).await;
        h.state
            .update(|s| s.phase = Phase::RestoringSession.begin_reconcile())
            .unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Chat));
        // The webhook already landed, so no corrective write happened.
        assert!(outcome.notices.is_empty());

        let state = h.state.read();
        assert_eq!(state.phase, Phase::Idle);
        assert!(!state.pending_activation);
        assert!(state.session_token.is_some());
        assert!(h.checker.ready().is_ready());
    }

    #[tokio::test]
    async fn reconcile_corrects_stale_profile() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Free, SubscriptionStatus::Inactive).await;
        h.state
            .update(|s| {
                s.phase = Phase::RestoringSession.begin_reconcile();
                s.selected_plan = Some(SubscriptionPlan::Annual);
            })
            .unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Chat));
        assert_eq!(
            outcome.notices,
            vec![Notice::BillingMismatch {
                observed: SubscriptionPlan::Free,
                written: SubscriptionPlan::Annual,
            }]
        );

        let profile = ProfileRepo::new(h.db.clone())
            .find_by_email("pilot@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(profile.subscription_plan, SubscriptionPlan::Annual);
        assert_eq!(profile.subscription_status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn corrective_update_defaults_to_monthly() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Free, SubscriptionStatus::Inactive).await;
        h.state
            .update(|s| s.phase = Phase::RestoringSession.begin_reconcile())
            .unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(
            outcome.notices,
            vec![Notice::BillingMismatch {
                observed: SubscriptionPlan::Free,
                written: SubscriptionPlan::Monthly,
            }]
        );
    }

    #[tokio::test]
    async fn reconcile_restoration_failure_defers_to_login() {
        let h = harness();
        h.state
            .update(|s| {
                s.phase = Phase::RestoringSession.begin_reconcile();
                s.access_token = Some("acc_dead".to_string());
                s.refresh_token = Some("ref_dead".to_string());
            })
            .unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Login));
        assert_eq!(outcome.notices, vec![Notice::SessionExpired]);

        let state = h.state.read();
        assert!(state.pending_activation);
        assert_eq!(state.phase, Phase::Idle);
        // Tokens survive for the next restoration attempt.
        assert_eq!(state.access_token.as_deref(), Some("acc_dead"));
    }

    #[tokio::test]
    async fn pending_activation_resumes_after_login() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Monthly, SubscriptionStatus::Active).await;
        h.state.update(|s| s.pending_activation = true).unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Chat));
        assert!(!h.state.read().pending_activation);
    }

    #[tokio::test]
    async fn redirect_to_pricing_hint_consumed() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Free, SubscriptionStatus::Inactive).await;
        h.state.update(|s| s.redirect_to_pricing = true).unwrap();

        let outcome = h.checker.check(CheckContext::default()).await;
        assert_eq!(outcome.route, Some(Route::Pricing));
        assert!(!h.state.read().redirect_to_pricing);
    }

    #[tokio::test]
    async fn event_loop_runs_checks() {
        let h = harness();
        signed_in_user(&h, SubscriptionPlan::Monthly, SubscriptionStatus::Active).await;
        h.state
            .update(|s| s.phase = Phase::RestoringSession.begin_reconcile())
            .unwrap();

        let handle = h.checker.spawn_event_loop(CheckContext::default());

        // A fresh sign-in event triggers the reconcile pass.
        h.auth.sign_out().await.unwrap();
        h.auth
            .sign_in_with_password("pilot@example.com", "secret")
            .await
            .unwrap();

        h.checker.ready().wait().await;
        assert_eq!(h.state.read().phase, Phase::Idle);
        handle.abort();
    }
}
