//! Deterministic in-process [`AuthPlatform`] for tests and offline runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use contrail_core::UserId;

use crate::errors::AuthError;
use crate::platform::{AuthEvent, AuthPlatform, AuthSession};
use crate::tokens::{now_ms, TokenPair};

#[derive(Default)]
struct Inner {
    /// email -> (password, user id)
    accounts: HashMap<String, (String, UserId)>,
    /// access token -> (user id, email, expires_at ms)
    access: HashMap<String, (UserId, String, i64)>,
    /// refresh token -> (user id, email)
    refresh: HashMap<String, (UserId, String)>,
    current: Option<AuthSession>,
    counter: u64,
}

/// In-memory auth platform. Accounts are registered up front; token pairs
/// are minted with a fixed TTL and refresh tokens rotate on use.
pub struct MemoryAuthPlatform {
    inner: Mutex<Inner>,
    token_ttl_ms: i64,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryAuthPlatform {
    pub fn new(token_ttl_ms: i64) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Mutex::new(Inner::default()),
            token_ttl_ms,
            events,
        }
    }

    /// Register an account and return its user id.
    pub fn register(&self, email: &str, password: &str) -> UserId {
        let mut inner = self.inner.lock();
        let user_id = UserId::new();
        let _ = inner.accounts.insert(
            email.to_string(),
            (password.to_string(), user_id.clone()),
        );
        user_id
    }

    /// Mint a valid token pair for a registered account without signing it
    /// in, e.g. to seed a persisted client state.
    pub fn issue_tokens(&self, email: &str) -> Result<TokenPair, AuthError> {
        let mut inner = self.inner.lock();
        let (_, user_id) = inner
            .accounts
            .get(email)
            .cloned()
            .ok_or(AuthError::Platform {
                status: 400,
                message: "unknown account".to_string(),
            })?;
        Ok(mint(&mut inner, user_id, email.to_string(), self.token_ttl_ms).tokens)
    }

    /// Force the held session's access token past expiry (the refresh
    /// token stays valid), simulating the post-checkout redirect gap.
    pub fn expire_access(&self) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.current.as_mut() {
            session.tokens.expires_at = now_ms() - 1;
            let access = session.tokens.access_token.clone();
            if let Some(entry) = inner.access.get_mut(&access) {
                entry.2 = now_ms() - 1;
            }
        }
    }

    /// Invalidate every issued token, making all restoration strategies
    /// fail.
    pub fn revoke_all(&self) {
        let mut inner = self.inner.lock();
        inner.access.clear();
        inner.refresh.clear();
        if let Some(session) = inner.current.as_mut() {
            session.tokens.expires_at = now_ms() - 1;
        }
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

fn mint(inner: &mut Inner, user_id: UserId, email: String, ttl_ms: i64) -> AuthSession {
    inner.counter += 1;
    let n = inner.counter;
    let tokens = TokenPair {
        access_token: format!("acc_{n}"),
        refresh_token: format!("ref_{n}"),
        expires_at: now_ms() + ttl_ms,
    };
    let _ = inner.access.insert(
        tokens.access_token.clone(),
        (user_id.clone(), email.clone(), tokens.expires_at),
    );
    let _ = inner
        .refresh
        .insert(tokens.refresh_token.clone(), (user_id.clone(), email.clone()));
    AuthSession {
        user_id,
        email,
        tokens,
    }
}

#[async_trait]
impl AuthPlatform for MemoryAuthPlatform {
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let inner = self.inner.lock();
        Ok(inner
            .current
            .clone()
            .filter(|s| !s.tokens.is_expired()))
    }

    async fn set_session(&self, access: &str, refresh: &str) -> Result<AuthSession, AuthError> {
        let session = {
            let mut inner = self.inner.lock();
            if let Some((user_id, email, expires_at)) = inner.access.get(access).cloned() {
                if now_ms() < expires_at {
                    let session = AuthSession {
                        user_id,
                        email,
                        tokens: TokenPair {
                            access_token: access.to_string(),
                            refresh_token: refresh.to_string(),
                            expires_at,
                        },
                    };
                    inner.current = Some(session.clone());
                    Some(session)
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(session) = session {
            let user_id = session.user_id.clone();
            self.emit(AuthEvent::SignedIn { user_id });
            return Ok(session);
        }

        // Access token dead; fall back to the refresh token, rotating it.
        let rotated = {
            let mut inner = self.inner.lock();
            match inner.refresh.remove(refresh) {
                Some((user_id, email)) => {
                    let session = mint(&mut inner, user_id, email, self.token_ttl_ms);
                    inner.current = Some(session.clone());
                    Some(session)
                }
                None => None,
            }
        };

        match rotated {
            Some(session) => {
                let user_id = session.user_id.clone();
                self.emit(AuthEvent::SignedIn { user_id });
                Ok(session)
            }
            None => Err(AuthError::Platform {
                status: 401,
                message: "invalid token pair".to_string(),
            }),
        }
    }

    async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        let rotated = {
            let mut inner = self.inner.lock();
            let refresh_token = inner
                .current
                .as_ref()
                .map(|s| s.tokens.refresh_token.clone())
                .ok_or(AuthError::NotAuthenticated)?;

            match inner.refresh.remove(&refresh_token) {
                Some((user_id, email)) => {
                    let session = mint(&mut inner, user_id, email, self.token_ttl_ms);
                    inner.current = Some(session.clone());
                    Ok(session)
                }
                None => Err(AuthError::Platform {
                    status: 401,
                    message: "refresh token revoked".to_string(),
                }),
            }
        }?;

        self.emit(AuthEvent::TokenRefreshed);
        Ok(rotated)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let session = {
            let mut inner = self.inner.lock();
            let user_id = match inner.accounts.get(email) {
                Some((stored, user_id)) if stored == password => user_id.clone(),
                _ => {
                    return Err(AuthError::Platform {
                        status: 400,
                        message: "invalid login credentials".to_string(),
                    })
                }
            };
            let session = mint(&mut inner, user_id, email.to_string(), self.token_ttl_ms);
            inner.current = Some(session.clone());
            session
        };

        let user_id = session.user_id.clone();
        self.emit(AuthEvent::SignedIn { user_id });
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.lock().current = None;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
