//! Session restoration: one fallback chain shared by the checker and the
//! payment callback.
//!
//! Strategies, in order — first success wins:
//! 1. direct: the platform still holds a live session
//! 2. refresh: rotate via the platform's refresh token
//! 3. stored tokens: adopt the pair cached in the client state file
//!
//! Failure mutates nothing: tokens are never rewritten on a failed
//! attempt, so running the chain twice with the same stored pair yields
//! the same outcome.

use tracing::{debug, info};

use contrail_auth::{AuthPlatform, AuthSession};
use contrail_store::StateStore;

/// Which strategy produced the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreMethod {
    Direct,
    Refresh,
    StoredTokens,
}

/// A restored session, tagged with the strategy that won.
#[derive(Clone, Debug)]
pub struct RestoredSession {
    pub session: AuthSession,
    pub method: RestoreMethod,
}

/// Run the fallback chain. Returns `None` when every strategy failed.
pub async fn restore_session(
    auth: &dyn AuthPlatform,
    state: &StateStore,
) -> Option<RestoredSession> {
    // 1. Direct
    match auth.get_session().await {
        Ok(Some(session)) => {
            debug!("session restored directly");
            return Some(RestoredSession {
                session,
                method: RestoreMethod::Direct,
            });
        }
        Ok(None) => debug!("no live session held by the platform"),
        Err(e) => debug!("direct session fetch failed: {e}"),
    }

    // 2. Refresh
    match auth.refresh_session().await {
        Ok(session) => {
            info!("session restored via refresh");
            return Some(RestoredSession {
                session,
                method: RestoreMethod::Refresh,
            });
        }
        Err(e) => debug!("session refresh failed: {e}"),
    }

    // 3. Stored token pair
    let snapshot = state.read();
    if let (Some(access), Some(refresh)) = (snapshot.access_token, snapshot.refresh_token) {
        match auth.set_session(&access, &refresh).await {
            Ok(session) => {
                info!("session restored from stored tokens");
                return Some(RestoredSession {
                    session,
                    method: RestoreMethod::StoredTokens,
                });
            }
            Err(e) => debug!("stored token adoption failed: {e}"),
        }
    } else {
        debug!("no stored token pair to fall back to");
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use contrail_auth::MemoryAuthPlatform;
    use tempfile::TempDir;

    const HOUR_MS: i64 = 3_600_000;

    fn state(dir: &TempDir) -> StateStore {
        StateStore::open(dir.path().join("state.json"))
    }

    #[tokio::test]
    async fn direct_wins_when_session_live() {
        let dir = TempDir::new().unwrap();
        let auth = MemoryAuthPlatform::new(HOUR_MS);
        platform_login(&auth).await;

        let restored = restore_session(&auth, &state(&dir)).await.unwrap();
        assert_eq!(restored.method, RestoreMethod::Direct);
    }

    #[tokio::test]
    async fn refresh_wins_when_access_expired() {
        let dir = TempDir::new().unwrap();
        let auth = MemoryAuthPlatform::new(HOUR_MS);
        platform_login(&auth).await;
        auth.expire_access();

        let restored = restore_session(&auth, &state(&dir)).await.unwrap();
        assert_eq!(restored.method, RestoreMethod::Refresh);
    }

    #[tokio::test]
    async fn stored_tokens_win_when_platform_empty() {
        let dir = TempDir::new().unwrap();
        let auth = MemoryAuthPlatform::new(HOUR_MS);
        let user_id = auth.register("pilot@example.com", "secret");
        let pair = auth.issue_tokens("pilot@example.com").unwrap();

        let state = state(&dir);
        state
            .update(|s| {
                s.set_tokens(user_id.clone(), pair.access_token.clone(), pair.refresh_token.clone());
            })
            .unwrap();

        let restored = restore_session(&auth, &state).await.unwrap();
        assert_eq!(restored.method, RestoreMethod::StoredTokens);
        assert_eq!(restored.session.user_id, user_id);
    }

    #[tokio::test]
    async fn all_strategies_fail_returns_none() {
        let dir = TempDir::new().unwrap();
        let auth = MemoryAuthPlatform::new(HOUR_MS);
        auth.register("pilot@example.com", "secret");

        let state = state(&dir);
        state
            .update(|s| {
                s.access_token = Some("acc_dead".to_string());
                s.refresh_token = Some("ref_dead".to_string());
            })
            .unwrap();

        assert!(restore_session(&auth, &state).await.is_none());
    }

    #[tokio::test]
    async fn failure_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let auth = MemoryAuthPlatform::new(HOUR_MS);

        let state = state(&dir);
        state
            .update(|s| {
                s.access_token = Some("acc_dead".to_string());
                s.refresh_token = Some("ref_dead".to_string());
            })
            .unwrap();

        assert!(restore_session(&auth, &state).await.is_none());
        // Stored tokens are untouched by the failed run.
        let snapshot = state.read();
        assert_eq!(snapshot.access_token.as_deref(), Some("acc_dead"));
        assert_eq!(snapshot.refresh_token.as_deref(), Some("ref_dead"));
        // Second run fails identically.
        assert!(restore_session(&auth, &state).await.is_none());
    }

    async fn platform_login(auth: &MemoryAuthPlatform) {
        auth.register("pilot@example.com", "secret");
        auth.sign_in_with_password("pilot@example.com", "secret")
            .await
            .unwrap();
    }
}
