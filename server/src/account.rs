use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Value a verification token is replaced with once it has been consumed.
pub const VERIFICATION_TOKEN_SENTINEL: &str = "-";

/// Subscription tier of an account. New accounts start on `Starter`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Starter,
    Pro,
    Business,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Business => "business",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(SubscriptionTier::Starter),
            "pro" => Ok(SubscriptionTier::Pro),
            "business" => Ok(SubscriptionTier::Business),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("'{0}' is not a recognized subscription")]
pub struct UnknownTier(pub String);

/// The sole persisted entity: a user account with its secret material,
/// verification state, session token, subscription tier and avatar.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    /// Unique identifier, stored case-sensitively.
    pub email: String,
    /// Argon2id hash; the raw password is never stored or serialized.
    pub password_hash: String,
    /// Opaque random token while unverified, `"-"` once consumed.
    pub verification_token: String,
    /// False at creation, set true exactly once, never reset.
    pub verified: bool,
    /// Current session JWT. At most one active session per account; null
    /// when logged out or never logged in.
    pub session_token: Option<String>,
    pub subscription: SubscriptionTier,
    pub avatar_url: String,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl Account {
    /// Build a fresh unverified account with the default tier and a
    /// deterministic placeholder avatar.
    pub fn new(email: &str, password_hash: String, verification_token: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash,
            verification_token,
            verified: false,
            session_token: None,
            subscription: SubscriptionTier::default(),
            avatar_url: default_avatar_url(email),
            created_at_utc: now,
            updated_at_utc: now,
        }
    }
}

/// Gravatar-style placeholder derived from the SHA-256 of the email, so two
/// signups with the same address always get the same default image.
pub fn default_avatar_url(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("https://gravatar.com/avatar/{hex}?d=identicon")
}

/// Public shape returned by signup: `{"user": {...}}`.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: SignupUser,
}

#[derive(Debug, Serialize)]
pub struct SignupUser {
    pub email: String,
    pub subscription: SubscriptionTier,
    /// Session token; always null at creation (login comes after verify).
    pub token: Option<String>,
}

/// Public shape returned by login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: AccountSummary,
}

/// Email + tier pair, used by login and subscription change responses.
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub email: String,
    pub subscription: SubscriptionTier,
}

/// Public shape returned by the current-user read.
#[derive(Debug, Serialize)]
pub struct CurrentUser {
    pub email: String,
    pub subscription: SubscriptionTier,
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parses_and_displays_symmetrically() {
        for tier in [
            SubscriptionTier::Starter,
            SubscriptionTier::Pro,
            SubscriptionTier::Business,
        ] {
            assert_eq!(tier.as_str().parse::<SubscriptionTier>().unwrap(), tier);
        }
        assert!("premium".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn new_account_starts_unverified_on_starter() {
        let account = Account::new("a@x.com", "hash".into(), "tok".into());
        assert!(!account.verified);
        assert_eq!(account.subscription, SubscriptionTier::Starter);
        assert!(account.session_token.is_none());
        assert_eq!(account.verification_token, "tok");
    }

    #[test]
    fn default_avatar_is_deterministic_per_email() {
        let a = default_avatar_url("A@x.com ");
        let b = default_avatar_url("a@x.com");
        assert_eq!(a, b);
        assert!(a.starts_with("https://gravatar.com/avatar/"));
        assert_ne!(a, default_avatar_url("b@x.com"));
    }

    #[test]
    fn current_user_serializes_avatar_as_camel_case() {
        let json = serde_json::to_value(CurrentUser {
            email: "a@x.com".into(),
            subscription: SubscriptionTier::Pro,
            avatar_url: "/avatars/a.png".into(),
        })
        .unwrap();
        assert_eq!(json["avatarURL"], "/avatars/a.png");
        assert_eq!(json["subscription"], "pro");
    }
}
