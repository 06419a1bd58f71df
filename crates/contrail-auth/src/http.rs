//! REST implementation of [`AuthPlatform`] for the hosted auth service.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast;

use contrail_core::UserId;

use crate::errors::AuthError;
use crate::platform::{AuthEvent, AuthPlatform, AuthSession};
use crate::tokens::{calculate_expires_at, now_ms, TokenPair};

/// How long an adopted access token is trusted when its real expiry is
/// unknown. Short on purpose: the next check refreshes instead of riding
/// an unknown expiry to a 401 mid-operation.
const ADOPTED_ACCESS_TTL_MS: i64 = 60_000;

/// Auth platform client speaking the hosted service's REST dialect.
pub struct HttpAuthPlatform {
    base_url: String,
    token_expiry_buffer_secs: i64,
    http: reqwest::Client,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserPayload,
}

/// User object returned by the token and user endpoints.
#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    email: String,
}

impl HttpAuthPlatform {
    pub fn new(base_url: impl Into<String>, token_expiry_buffer_secs: i64) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            base_url: base_url.into(),
            token_expiry_buffer_secs,
            http: reqwest::Client::new(),
            session: RwLock::new(None),
            events,
        }
    }

    fn token_url(&self, grant_type: &str) -> String {
        format!("{}/auth/v1/token?grant_type={grant_type}", self.base_url)
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<AuthSession, AuthError> {
        let resp = self
            .http
            .post(self.token_url(grant_type))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Platform {
                status,
                message: text,
            });
        }

        let data: TokenResponse = resp.json().await?;
        Ok(AuthSession {
            user_id: UserId::from_raw(data.user.id),
            email: data.user.email,
            tokens: TokenPair {
                access_token: data.access_token,
                refresh_token: data.refresh_token,
                expires_at: calculate_expires_at(data.expires_in, self.token_expiry_buffer_secs),
            },
        })
    }

    async fn fetch_user(&self, access_token: &str) -> Result<UserPayload, AuthError> {
        let resp = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Platform {
                status,
                message: text,
            });
        }

        Ok(resp.json().await?)
    }

    fn store_session(&self, session: AuthSession, event: AuthEvent) -> AuthSession {
        *self.session.write() = Some(session.clone());
        let _ = self.events.send(event);
        session
    }
}

#[async_trait]
impl AuthPlatform for HttpAuthPlatform {
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let held = self.session.read().clone();
        Ok(held.filter(|s| !s.tokens.is_expired()))
    }

    #[tracing::instrument(skip_all)]
    async fn set_session(&self, access: &str, refresh: &str) -> Result<AuthSession, AuthError> {
        match self.fetch_user(access).await {
            Ok(user) => {
                let session = AuthSession {
                    user_id: UserId::from_raw(user.id.clone()),
                    email: user.email,
                    tokens: TokenPair {
                        access_token: access.to_string(),
                        refresh_token: refresh.to_string(),
                        expires_at: now_ms() + ADOPTED_ACCESS_TTL_MS,
                    },
                };
                let user_id = session.user_id.clone();
                Ok(self.store_session(session, AuthEvent::SignedIn { user_id }))
            }
            Err(AuthError::Platform { status: 401, .. }) => {
                tracing::debug!("adopted access token rejected, trying refresh token");
                let session = self
                    .token_grant(
                        "refresh_token",
                        serde_json::json!({ "refresh_token": refresh }),
                    )
                    .await?;
                let user_id = session.user_id.clone();
                Ok(self.store_session(session, AuthEvent::SignedIn { user_id }))
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        let refresh_token = {
            let held = self.session.read();
            held.as_ref()
                .map(|s| s.tokens.refresh_token.clone())
                .ok_or(AuthError::NotAuthenticated)?
        };

        let session = self
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;
        Ok(self.store_session(session, AuthEvent::TokenRefreshed))
    }

    #[tracing::instrument(skip_all, fields(email))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let session = self
            .token_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        let user_id = session.user_id.clone();
        Ok(self.store_session(session, AuthEvent::SignedIn { user_id }))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let access = {
            let held = self.session.read();
            held.as_ref().map(|s| s.tokens.access_token.clone())
        };

        if let Some(access) = access {
            let result = self
                .http
                .post(format!("{}/auth/v1/logout", self.base_url))
                .bearer_auth(access)
                .send()
                .await;
            if let Err(e) = result {
                tracing::warn!("logout request failed, clearing local session anyway: {e}");
            }
        }

        *self.session.write() = None;
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
