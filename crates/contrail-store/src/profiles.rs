use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use contrail_core::{AccountStatus, SubscriptionPlan, SubscriptionStatus, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::parse_column;

/// The application's user record. Authoritative; never hard-deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub query_count: u32,
    pub is_admin: bool,
    pub account_status: AccountStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct ProfileRepo {
    db: Database,
}

const PROFILE_COLUMNS: &str = "id, email, subscription_plan, subscription_status, query_count, is_admin, account_status, created_at, updated_at";

impl ProfileRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a profile for an auth-platform user. New accounts start
    /// inactive on the given plan.
    #[instrument(skip(self), fields(user_id = %id, email))]
    pub fn create(
        &self,
        id: &UserId,
        email: &str,
        plan: SubscriptionPlan,
    ) -> Result<Profile, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, email, subscription_plan, subscription_status, query_count, is_admin, account_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'inactive', 0, 0, 'active', ?4, ?4)",
                rusqlite::params![id.as_str(), email, plan.to_string(), now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("profile email {email} already exists"))
                }
                other => StoreError::from(other),
            })?;

            Ok(Profile {
                id: id.clone(),
                email: email.to_string(),
                subscription_plan: plan,
                subscription_status: SubscriptionStatus::Inactive,
                query_count: 0,
                is_admin: false,
                account_status: AccountStatus::Active,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Look up a profile by id.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn find(&self, id: &UserId) -> Result<Option<Profile>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_profile(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Look up a profile by email.
    #[instrument(skip(self), fields(email))]
    pub fn find_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles WHERE email = ?1"
            ))?;
            let mut rows = stmt.query([email])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_profile(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Get a profile by id, erroring when absent.
    pub fn get(&self, id: &UserId) -> Result<Profile, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("profile {id}")))
    }

    /// Write the subscription columns. Used by the webhook application and
    /// the corrective update.
    #[instrument(skip(self), fields(user_id = %id, plan = %plan, status = %status))]
    pub fn update_subscription(
        &self,
        id: &UserId,
        plan: SubscriptionPlan,
        status: SubscriptionStatus,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET subscription_plan = ?2, subscription_status = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![
                    id.as_str(),
                    plan.to_string(),
                    status.to_string(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("profile {id}")));
            }
            Ok(())
        })
    }

    /// Bump the usage counter.
    pub fn increment_query_count(&self, id: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET query_count = query_count + 1, updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id.as_str(), Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("profile {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(user_id = %id, status = %status))]
    pub fn set_account_status(&self, id: &UserId, status: AccountStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET account_status = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.as_str(), status.to_string(), Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("profile {id}")));
            }
            Ok(())
        })
    }

    /// Flip a soft-deleted account back to active. Returns whether a row
    /// changed (false when the account was not deleted).
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn reactivate(&self, id: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET account_status = 'active', updated_at = ?2 WHERE id = ?1 AND account_status = 'deleted'",
                rusqlite::params![id.as_str(), Utc::now().to_rfc3339()],
            )?;
            Ok(changed > 0)
        })
    }
}

pub(crate) fn row_to_profile(row: &rusqlite::Row<'_>) -> Result<Profile, StoreError> {
    Ok(Profile {
        id: UserId::from_raw(row.get::<_, String>(0)?),
        email: row.get(1)?,
        subscription_plan: parse_column(row.get(2)?, "subscription_plan")?,
        subscription_status: parse_column(row.get(3)?, "subscription_status")?,
        query_count: row.get(4)?,
        is_admin: row.get(5)?,
        account_status: parse_column(row.get(6)?, "account_status")?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ProfileRepo {
        ProfileRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_and_find() {
        let repo = repo();
        let created = repo
            .create(&UserId::new(), "pilot@example.com", SubscriptionPlan::Free)
            .unwrap();
        assert_eq!(created.subscription_status, SubscriptionStatus::Inactive);
        assert_eq!(created.account_status, AccountStatus::Active);
        assert_eq!(created.query_count, 0);

        let found = repo.find(&created.id).unwrap().unwrap();
        assert_eq!(found, created);

        let by_email = repo.find_by_email("pilot@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
    }

    #[test]
    fn find_missing_is_none() {
        let repo = repo();
        assert!(repo.find(&UserId::from_raw("user_missing")).unwrap().is_none());
        assert!(repo.find_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn get_missing_errors() {
        let repo = repo();
        assert!(matches!(
            repo.get(&UserId::from_raw("user_missing")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_email_conflicts() {
        let repo = repo();
        repo.create(&UserId::new(), "pilot@example.com", SubscriptionPlan::Free).unwrap();
        assert!(matches!(
            repo.create(&UserId::new(), "pilot@example.com", SubscriptionPlan::Free),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn update_subscription_writes_both_columns() {
        let repo = repo();
        let profile = repo.create(&UserId::new(), "pilot@example.com", SubscriptionPlan::Free).unwrap();

        repo.update_subscription(
            &profile.id,
            SubscriptionPlan::Monthly,
            SubscriptionStatus::Active,
        )
        .unwrap();

        let updated = repo.get(&profile.id).unwrap();
        assert_eq!(updated.subscription_plan, SubscriptionPlan::Monthly);
        assert_eq!(updated.subscription_status, SubscriptionStatus::Active);
    }

    #[test]
    fn update_subscription_missing_profile() {
        let repo = repo();
        assert!(matches!(
            repo.update_subscription(
                &UserId::from_raw("user_missing"),
                SubscriptionPlan::Monthly,
                SubscriptionStatus::Active
            ),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn query_count_increments() {
        let repo = repo();
        let profile = repo.create(&UserId::new(), "pilot@example.com", SubscriptionPlan::Free).unwrap();
        repo.increment_query_count(&profile.id).unwrap();
        repo.increment_query_count(&profile.id).unwrap();
        assert_eq!(repo.get(&profile.id).unwrap().query_count, 2);
    }

    #[test]
    fn reactivate_only_deleted() {
        let repo = repo();
        let profile = repo.create(&UserId::new(), "pilot@example.com", SubscriptionPlan::Free).unwrap();

        assert!(!repo.reactivate(&profile.id).unwrap());

        repo.set_account_status(&profile.id, AccountStatus::Deleted).unwrap();
        assert!(repo.reactivate(&profile.id).unwrap());
        assert_eq!(
            repo.get(&profile.id).unwrap().account_status,
            AccountStatus::Active
        );
    }
}
