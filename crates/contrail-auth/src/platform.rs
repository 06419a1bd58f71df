//! The auth platform seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use contrail_core::UserId;

use crate::errors::AuthError;
use crate::tokens::TokenPair;

/// The platform's view of an authenticated principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user_id: UserId,
    pub email: String,
    pub tokens: TokenPair,
}

/// Auth state change notifications, delivered over a broadcast channel.
/// Late subscribers miss earlier events; lagged receivers are tolerated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: UserId },
    SignedOut,
    TokenRefreshed,
}

/// Trait implemented by each auth platform backend (hosted HTTP, in-memory).
#[async_trait]
pub trait AuthPlatform: Send + Sync {
    /// The currently held session, if its access token is still live.
    /// Never performs a refresh; that is [`refresh_session`]'s job.
    ///
    /// [`refresh_session`]: AuthPlatform::refresh_session
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError>;

    /// Adopt a stored credential pair. Falls back to the refresh token if
    /// the access token no longer validates.
    async fn set_session(&self, access: &str, refresh: &str) -> Result<AuthSession, AuthError>;

    /// Rotate the held pair via its refresh token.
    async fn refresh_session(&self) -> Result<AuthSession, AuthError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribe to auth state changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
