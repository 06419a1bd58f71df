//! Domain enums and user-facing values shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription plan recorded on a profile.
///
/// `TrialEnded` is a terminal marker plan, not a purchasable one: it is
/// written by the trial-expiry job and treated like `Free` for access
/// decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPlan {
    Free,
    Monthly,
    Annual,
    TrialEnded,
}

impl SubscriptionPlan {
    /// Whether this plan grants access to the paid product surface.
    pub fn is_paid(self) -> bool {
        matches!(self, Self::Monthly | Self::Annual)
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Monthly => write!(f, "monthly"),
            Self::Annual => write!(f, "annual"),
            Self::TrialEnded => write!(f, "trial_ended"),
        }
    }
}

impl FromStr for SubscriptionPlan {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "monthly" => Ok(Self::Monthly),
            "annual" => Ok(Self::Annual),
            "trial_ended" => Ok(Self::TrialEnded),
            other => Err(format!("unknown subscription plan: {other}")),
        }
    }
}

/// Subscription billing status recorded on a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// Account lifecycle status. Profiles are never hard-deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Locked,
    Deleted,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Locked => write!(f, "locked"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "locked" => Ok(Self::Locked),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// Destination the engine asks the embedder to navigate to.
/// Redirects are the engine's only exit-code concept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Login,
    Signup,
    Chat,
    Pricing,
}

impl Route {
    /// The path the embedder should navigate to.
    pub fn path(self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::Signup => "/signup",
            Self::Chat => "/chat",
            Self::Pricing => "/?scrollTo=pricing-section",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Severity of a user-visible notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// User-visible outcome notice. Every failure path in the engine produces
/// one of these instead of propagating an error to the embedder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    SessionExpired,
    PaymentRecorded,
    SignupNotFound,
    AccountLocked,
    BillingMismatch {
        observed: SubscriptionPlan,
        written: SubscriptionPlan,
    },
    Generic {
        message: String,
    },
}

impl Notice {
    pub fn severity(&self) -> Severity {
        match self {
            Self::PaymentRecorded => Severity::Info,
            Self::BillingMismatch { .. } => Severity::Warning,
            Self::SessionExpired | Self::SignupNotFound | Self::AccountLocked | Self::Generic { .. } => {
                Severity::Error
            }
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionExpired => {
                write!(f, "Session expired. Please log in to finish activating your subscription.")
            }
            Self::PaymentRecorded => write!(f, "Payment received. Your subscription is active."),
            Self::SignupNotFound => {
                write!(f, "We couldn't find your signup. Please choose a plan again.")
            }
            Self::AccountLocked => write!(f, "This account is locked. Contact support."),
            Self::BillingMismatch { observed, written } => write!(
                f,
                "Subscription record corrected from {observed} to {written}."
            ),
            Self::Generic { message } => f.write_str(message),
        }
    }
}
