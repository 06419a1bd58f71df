pub mod database;
pub mod error;
pub mod pending_signups;
pub mod profiles;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod state_file;
pub mod subscriptions;

pub use database::Database;
pub use error::StoreError;
pub use pending_signups::{PendingSignup, PendingSignupRepo};
pub use profiles::{Profile, ProfileRepo};
pub use sessions::{SessionRecord, SessionRepo, SessionStatus};
pub use state_file::StateStore;
pub use subscriptions::{SubscriptionRepo, SubscriptionRow};
