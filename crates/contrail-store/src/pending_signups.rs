use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use contrail_core::{
    AccountStatus, CheckoutId, SignupId, SubscriptionPlan, SubscriptionStatus, UserId,
};

use crate::database::Database;
use crate::error::StoreError;
use crate::profiles::Profile;
use crate::row_helpers::parse_column;

/// Staging record created before payment, promoted to a real account after
/// a successful checkout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingSignup {
    pub id: SignupId,
    pub email: String,
    pub plan: SubscriptionPlan,
    pub checkout_id: CheckoutId,
    pub consumed: bool,
    pub created_at: String,
}

#[derive(Clone)]
pub struct PendingSignupRepo {
    db: Database,
}

const SIGNUP_COLUMNS: &str = "id, email, plan, checkout_id, consumed, created_at";

impl PendingSignupRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stage a signup ahead of checkout.
    #[instrument(skip(self), fields(email, checkout_id = %checkout_id))]
    pub fn create(
        &self,
        email: &str,
        plan: SubscriptionPlan,
        checkout_id: &CheckoutId,
    ) -> Result<PendingSignup, StoreError> {
        let id = SignupId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_signups (id, email, plan, checkout_id, consumed, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![
                    id.as_str(),
                    email,
                    plan.to_string(),
                    checkout_id.as_str(),
                    now
                ],
            )?;

            Ok(PendingSignup {
                id: id.clone(),
                email: email.to_string(),
                plan,
                checkout_id: checkout_id.clone(),
                consumed: false,
                created_at: now,
            })
        })
    }

    /// Find the unconsumed record for a gateway checkout id.
    #[instrument(skip(self), fields(checkout_id = %checkout_id))]
    pub fn find_by_checkout(
        &self,
        checkout_id: &CheckoutId,
    ) -> Result<Option<PendingSignup>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SIGNUP_COLUMNS} FROM pending_signups
                 WHERE checkout_id = ?1 AND consumed = 0
                 ORDER BY created_at DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query([checkout_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_signup(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Mark a record consumed without creating an account.
    pub fn consume(&self, id: &SignupId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE pending_signups SET consumed = 1 WHERE id = ?1",
                [id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("pending signup {id}")));
            }
            Ok(())
        })
    }

    /// Promote a staged signup to a real account: create the profile with
    /// the paid plan already active and consume the record, atomically.
    #[instrument(skip(self), fields(signup_id = %id))]
    pub fn promote(&self, id: &SignupId) -> Result<Profile, StoreError> {
        let user_id = UserId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let (email, plan, consumed) = {
                let mut stmt = tx.prepare(
                    "SELECT email, plan, consumed FROM pending_signups WHERE id = ?1",
                )?;
                let mut rows = stmt.query([id.as_str()])?;
                match rows.next()? {
                    Some(row) => {
                        let email: String = row.get(0)?;
                        let plan: SubscriptionPlan = parse_column(row.get(1)?, "plan")?;
                        let consumed: bool = row.get(2)?;
                        (email, plan, consumed)
                    }
                    None => return Err(StoreError::NotFound(format!("pending signup {id}"))),
                }
            };

            if consumed {
                return Err(StoreError::Conflict(format!(
                    "pending signup {id} already consumed"
                )));
            }

            tx.execute(
                "INSERT INTO profiles (id, email, subscription_plan, subscription_status, query_count, is_admin, account_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'active', 0, 0, 'active', ?4, ?4)",
                rusqlite::params![user_id.as_str(), email, plan.to_string(), now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("profile email {email} already exists"))
                }
                other => StoreError::from(other),
            })?;

            let _ = tx.execute(
                "UPDATE pending_signups SET consumed = 1 WHERE id = ?1",
                [id.as_str()],
            )?;

            tx.commit()?;

            Ok(Profile {
                id: user_id.clone(),
                email,
                subscription_plan: plan,
                subscription_status: SubscriptionStatus::Active,
                query_count: 0,
                is_admin: false,
                account_status: AccountStatus::Active,
                created_at: now.clone(),
                updated_at: now.clone(),
            })
        })
    }
}

fn row_to_signup(row: &rusqlite::Row<'_>) -> Result<PendingSignup, StoreError> {
    Ok(PendingSignup {
        id: SignupId::from_raw(row.get::<_, String>(0)?),
        email: row.get(1)?,
        plan: parse_column(row.get(2)?, "plan")?,
        checkout_id: CheckoutId::from_raw(row.get::<_, String>(3)?),
        consumed: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
