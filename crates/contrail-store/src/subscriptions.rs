use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use contrail_core::{CheckoutId, SubscriptionPlan, SubscriptionStatus, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::parse_column;

/// Billing record written by the gateway webhook and the plan-switch and
/// cancel operations. One row per user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub user_id: UserId,
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub checkout_id: Option<CheckoutId>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct SubscriptionRepo {
    db: Database,
}

impl SubscriptionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the user's billing record.
    #[instrument(skip(self), fields(user_id = %user_id, plan = %plan, status = %status))]
    pub fn upsert(
        &self,
        user_id: &UserId,
        plan: SubscriptionPlan,
        status: SubscriptionStatus,
        checkout_id: Option<&CheckoutId>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO subscriptions (user_id, plan, status, checkout_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     plan = excluded.plan,
                     status = excluded.status,
                     checkout_id = excluded.checkout_id,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    user_id.as_str(),
                    plan.to_string(),
                    status.to_string(),
                    checkout_id.map(CheckoutId::as_str),
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, user_id: &UserId) -> Result<Option<SubscriptionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, plan, status, checkout_id, created_at, updated_at
                 FROM subscriptions WHERE user_id = ?1",
            )?;
            let mut rows = stmt.query([user_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_subscription(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Mark the subscription cancelled. The profile's plan is left to the
    /// gateway webhook, which owns the authoritative downgrade.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn cancel(&self, user_id: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE subscriptions SET status = 'cancelled', updated_at = ?2 WHERE user_id = ?1",
                rusqlite::params![user_id.as_str(), Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("subscription {user_id}")));
            }
            Ok(())
        })
    }

    /// Switch between paid plans without touching status.
    #[instrument(skip(self), fields(user_id = %user_id, plan = %plan))]
    pub fn switch_plan(&self, user_id: &UserId, plan: SubscriptionPlan) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE subscriptions SET plan = ?2, updated_at = ?3 WHERE user_id = ?1",
                rusqlite::params![user_id.as_str(), plan.to_string(), Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("subscription {user_id}")));
            }
            Ok(())
        })
    }
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> Result<SubscriptionRow, StoreError> {
    Ok(SubscriptionRow {
        user_id: UserId::from_raw(row.get::<_, String>(0)?),
        plan: parse_column(row.get(1)?, "plan")?,
        status: parse_column(row.get(2)?, "status")?,
        checkout_id: row.get::<_, Option<String>>(3)?.map(CheckoutId::from_raw),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
