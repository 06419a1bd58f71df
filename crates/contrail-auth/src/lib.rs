//! # contrail-auth
//!
//! Client for the hosted auth platform, consumed as an opaque capability:
//! a service that issues and validates a bearer credential pair and
//! notifies on change.
//!
//! The [`AuthPlatform`] trait is the seam. [`HttpAuthPlatform`] talks to
//! the real platform over REST; [`MemoryAuthPlatform`] is a deterministic
//! in-process double for tests and the CLI's offline mode.

pub mod errors;
pub mod http;
pub mod memory;
pub mod platform;
pub mod tokens;

pub use errors::AuthError;
pub use http::HttpAuthPlatform;
pub use memory::MemoryAuthPlatform;
pub use platform::{AuthEvent, AuthPlatform, AuthSession};
pub use tokens::{calculate_expires_at, now_ms, should_refresh, TokenPair};
