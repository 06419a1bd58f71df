use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use contrail_auth::{AuthPlatform, HttpAuthPlatform};
use contrail_core::settings::load_settings;
use contrail_core::{CheckoutId, Route, SubscriptionPlan, UserId};
use contrail_engine::{
    apply_gateway_event, CallbackOutcome, CheckContext, GatewayEvent, PaymentCallback,
    ReadySignal, SessionChecker,
};
use contrail_store::{
    Database, PendingSignupRepo, ProfileRepo, SessionRepo, StateStore, SubscriptionRepo,
};

#[derive(Parser)]
#[command(name = "contrail", about = "Session & subscription reconciliation driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and record the server-side session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Run one session checker pass
    Check {
        /// Pretend the current route is /login
        #[arg(long)]
        login_route: bool,
        /// Pretend the current route never forces a login redirect
        #[arg(long)]
        public_route: bool,
    },
    /// Stage a checkout before redirecting to the hosted payment page
    Checkout {
        #[arg(long)]
        plan: String,
        /// Gateway checkout session id
        #[arg(long)]
        checkout: String,
        /// Email for the pay-before-account flow (when not signed in)
        #[arg(long)]
        email: Option<String>,
    },
    /// Handle the redirect back from hosted checkout
    Callback {
        #[arg(long)]
        checkout: String,
    },
    /// Switch the current user's paid plan
    SwitchPlan {
        #[arg(long)]
        plan: String,
    },
    /// Cancel the current user's subscription
    Cancel,
    /// Apply a gateway event locally (webhook simulation)
    Webhook {
        #[arg(long)]
        user: String,
        #[arg(long)]
        plan: String,
        /// When set, apply a subscription update instead of a checkout
        /// completion (active|inactive|cancelled)
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        checkout: Option<String>,
    },
    /// Print client state and the matching profile row
    Status,
    /// Sign out and invalidate the session record
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_settings().context("failed to load settings")?;

    let db = Database::open(Path::new(&settings.store.db_path))
        .context("failed to open database")?;
    let state = StateStore::open(settings.store.state_path.clone());
    let auth: Arc<dyn AuthPlatform> = Arc::new(HttpAuthPlatform::new(
        settings.auth.base_url.clone(),
        settings.auth.token_expiry_buffer_secs,
    ));
    let ready = ReadySignal::new();

    match cli.command {
        Command::Login { email, password } => {
            let session = auth.sign_in_with_password(&email, &password).await?;
            let user_id = session.user_id.clone();

            let profiles = ProfileRepo::new(db.clone());
            if profiles.find(&user_id)?.is_none() {
                let _ = profiles.create(&user_id, &email, SubscriptionPlan::Free)?;
                tracing::info!(user_id = %user_id, "created profile for first login");
            }

            let sessions = SessionRepo::new(db.clone());
            let record = sessions.ensure_active(&user_id, settings.store.session_ttl_hours)?;
            let swept = sessions.invalidate_others(&user_id, &record.session_token)?;
            if swept > 0 {
                tracing::info!(swept, "invalidated other sessions");
            }

            let tokens = session.tokens.clone();
            state.update(|s| {
                s.set_tokens(user_id.clone(), tokens.access_token, tokens.refresh_token);
                s.session_token = Some(record.session_token.clone());
            })?;

            println!("signed in as {email}");
            println!("route: {}", Route::Chat);
        }

        Command::Check {
            login_route,
            public_route,
        } => {
            adopt_stored_session(auth.as_ref(), &state).await;

            let checker = SessionChecker::new(
                auth.clone(),
                db.clone(),
                state.clone(),
                settings.clone(),
                ready.clone(),
            );
            let outcome = checker
                .check(CheckContext {
                    on_login_route: login_route,
                    on_public_route: public_route,
                })
                .await;

            for notice in &outcome.notices {
                println!("notice: {notice}");
            }
            match outcome.route {
                Some(route) => println!("route: {route}"),
                None => println!("route: (stay)"),
            }
        }

        Command::Checkout {
            plan,
            checkout,
            email,
        } => {
            let plan: SubscriptionPlan = plan.parse().map_err(anyhow::Error::msg)?;
            let checkout_id = CheckoutId::from_raw(checkout);

            state.update(|s| {
                s.phase = s.phase.clone().begin_checkout();
                s.selected_plan = Some(plan);
            })?;

            if let Some(email) = email {
                let record =
                    PendingSignupRepo::new(db.clone()).create(&email, plan, &checkout_id)?;
                tracing::info!(signup_id = %record.id, "staged pay-first signup");
            }

            println!("checkout staged for plan {plan}");
            println!("route: hosted checkout ({checkout_id})");
        }

        Command::Callback { checkout } => {
            adopt_stored_session(auth.as_ref(), &state).await;

            let callback = PaymentCallback::new(
                auth.clone(),
                db.clone(),
                state.clone(),
                settings.clone(),
                ready.clone(),
            );
            let outcome = callback.handle(&CheckoutId::from_raw(checkout)).await;

            match outcome {
                CallbackOutcome::Completed {
                    route,
                    method,
                    notice,
                } => {
                    println!("notice: {notice}");
                    println!("restored via {method:?}");
                    println!("route: {route}");
                }
                CallbackOutcome::PendingSignup(record) => {
                    // Out-of-band account completion for the pay-first flow.
                    let profile = PendingSignupRepo::new(db.clone()).promote(&record.id)?;
                    println!(
                        "created account {} on plan {}",
                        profile.email, profile.subscription_plan
                    );
                    println!("route: {}", Route::Login);
                }
                CallbackOutcome::Failed { route, notice } => {
                    println!("notice: {notice}");
                    println!("route: {route}");
                }
            }
        }

        Command::SwitchPlan { plan } => {
            let plan: SubscriptionPlan = plan.parse().map_err(anyhow::Error::msg)?;
            let user_id = state
                .read()
                .user_id
                .context("not signed in")?;

            SubscriptionRepo::new(db.clone()).switch_plan(&user_id, plan)?;
            ProfileRepo::new(db.clone()).update_subscription(
                &user_id,
                plan,
                contrail_core::SubscriptionStatus::Active,
            )?;
            println!("switched to {plan}");
        }

        Command::Cancel => {
            let user_id = state
                .read()
                .user_id
                .context("not signed in")?;

            let subscriptions = SubscriptionRepo::new(db.clone());
            subscriptions.cancel(&user_id)?;

            let profiles = ProfileRepo::new(db.clone());
            let profile = profiles.get(&user_id)?;
            profiles.update_subscription(
                &user_id,
                profile.subscription_plan,
                contrail_core::SubscriptionStatus::Cancelled,
            )?;
            println!("subscription cancelled");
        }

        Command::Webhook {
            user,
            plan,
            status,
            checkout,
        } => {
            let user_id = UserId::from_raw(user);
            let plan: SubscriptionPlan = plan.parse().map_err(anyhow::Error::msg)?;

            let event = match status {
                Some(status) => GatewayEvent::SubscriptionUpdated {
                    user_id,
                    plan,
                    status: status.parse().map_err(anyhow::Error::msg)?,
                },
                None => GatewayEvent::CheckoutCompleted {
                    checkout_id: CheckoutId::from_raw(
                        checkout.context("--checkout is required for a checkout completion")?,
                    ),
                    user_id,
                    plan,
                },
            };

            apply_gateway_event(&db, &event)?;
            println!("gateway event applied");
        }

        Command::Status => {
            let snapshot = state.read();
            println!("phase: {:?}", snapshot.phase);
            println!("pending activation: {}", snapshot.pending_activation);
            println!(
                "tokens: {}",
                if snapshot.has_tokens() { "stored" } else { "none" }
            );
            match &snapshot.user_id {
                Some(user_id) => {
                    println!("user: {user_id}");
                    match ProfileRepo::new(db.clone()).find(user_id)? {
                        Some(profile) => println!(
                            "profile: {} {} ({} queries)",
                            profile.subscription_plan,
                            profile.subscription_status,
                            profile.query_count
                        ),
                        None => println!("profile: none"),
                    }
                }
                None => println!("user: none"),
            }
            match &snapshot.session_token {
                Some(token) => {
                    let valid = SessionRepo::new(db.clone()).is_valid(token);
                    println!("session record: {token} (valid: {valid})");
                }
                None => println!("session record: none"),
            }
        }

        Command::Logout => {
            let snapshot = state.read();
            if let Some(token) = &snapshot.session_token {
                SessionRepo::new(db.clone()).invalidate(token)?;
            }
            auth.sign_out().await?;
            state.update(|s| {
                s.clear_session();
                s.clear_all_flags();
            })?;
            println!("signed out");
            println!("route: {}", Route::Login);
        }
    }

    Ok(())
}

/// Re-adopt the stored token pair into the auth client, the way a browser
/// SDK would rehydrate from local storage. Failures are fine; the checker
/// and callback run their own restoration.
async fn adopt_stored_session(auth: &dyn AuthPlatform, state: &StateStore) {
    let snapshot = state.read();
    if let (Some(access), Some(refresh)) = (&snapshot.access_token, &snapshot.refresh_token) {
        if let Err(e) = auth.set_session(access, refresh).await {
            tracing::debug!("stored session adoption failed: {e}");
        }
    }
}
