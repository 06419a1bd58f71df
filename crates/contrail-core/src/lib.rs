pub mod domain;
pub mod errors;
pub mod ids;
pub mod phase;
pub mod retry;
pub mod settings;

pub use domain::{
    AccountStatus, Notice, Route, Severity, SubscriptionPlan, SubscriptionStatus,
};
pub use errors::CoreError;
pub use ids::{CheckoutId, SessionToken, SignupId, UserId};
pub use phase::{ClientState, Phase};
pub use retry::RetryConfig;
pub use settings::Settings;
