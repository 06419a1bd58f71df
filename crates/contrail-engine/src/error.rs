//! Engine error types.

use contrail_auth::AuthError;
use contrail_core::CheckoutId;
use contrail_store::StoreError;

/// Errors internal to reconciliation. Public entry points catch these and
/// convert them to a route + notice; library callers see them only from
/// the lower-level building blocks.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// All three restoration strategies failed.
    #[error("session restoration failed")]
    RestorationFailed,

    /// No pending signup matched the gateway checkout id after retries.
    #[error("no pending signup for checkout {0}")]
    SignupNotFound(CheckoutId),

    /// The profile never confirmed the new plan within the polling budget.
    #[error("subscription confirmation timed out")]
    ConfirmationTimeout,
}
