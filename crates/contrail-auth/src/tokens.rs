//! Bearer credential pair and expiry math.

use serde::{Deserialize, Serialize};

/// An access/refresh token pair issued by the auth platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry as milliseconds since the Unix epoch.
    pub expires_at: i64,
}

impl TokenPair {
    /// True once the access token is past its expiry.
    pub fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert the platform's `expires_in` (seconds) to an absolute expiry,
/// pulled forward by the buffer so refresh happens before the edge.
pub fn calculate_expires_at(expires_in_secs: i64, buffer_secs: i64) -> i64 {
    now_ms() + (expires_in_secs - buffer_secs).max(0) * 1000
}

/// Whether the pair should be refreshed now, given a buffer in ms.
pub fn should_refresh(pair: &TokenPair, buffer_ms: i64) -> bool {
    now_ms() + buffer_ms >= pair.expires_at
}
