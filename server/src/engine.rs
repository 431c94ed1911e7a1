use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::account::{
    Account, AccountSummary, AvatarResponse, CurrentUser, LoginResponse, SignupResponse,
    SignupUser, SubscriptionTier, VERIFICATION_TOKEN_SENTINEL,
};
use crate::avatars::{self, AVATAR_SIZE};
use crate::credentials;
use crate::errors::AuthError;
use crate::mailer::{Email, MailerHandle};
use crate::state::Config;
use crate::store::{StoreError, UserStore};

const SAVE_NEW_USER: &str = "Failed to save new user";
const UPDATE_USER_INFO: &str = "Failed to update user's info";
const UPDATE_USER_AVATAR: &str = "Failed to update user's avatar";

/// Orchestrates account state transitions over
/// `{Unverified, Verified, Authenticated}`. Holds no mutable state of its
/// own; everything durable lives behind [`UserStore`], and each operation
/// is an independent read-then-write.
///
/// Operations taking an [`Account`] (`logout`, `current_user`,
/// `change_subscription`, `update_avatar`) trust that the caller already
/// resolved a valid session token to that account.
#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn UserStore>,
    mailer: MailerHandle,
    config: Arc<Config>,
}

fn commit_error(context: &'static str) -> impl Fn(StoreError) -> AuthError {
    move |err| match err {
        StoreError::Duplicate => AuthError::Conflict,
        StoreError::Backend(detail) => {
            error!("{context}: {detail}");
            AuthError::Persistence(context.to_string())
        }
    }
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn UserStore>, mailer: MailerHandle, config: Arc<Config>) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Register a new unverified account and queue its verification email.
    ///
    /// The existence pre-check gives the common case a clean 409; under a
    /// concurrent signup race the store's unique constraint decides, and a
    /// duplicate-key insert surfaces as the same conflict.
    pub async fn signup(&self, email: &str, password: &str) -> Result<SignupResponse, AuthError> {
        let existing = self
            .store
            .find_by_email(email)
            .await
            .map_err(commit_error(SAVE_NEW_USER))?;
        if existing.is_some() {
            return Err(AuthError::Conflict);
        }

        let password_hash = credentials::hash_password(password).map_err(|err| {
            error!("{SAVE_NEW_USER}: {err}");
            AuthError::Persistence(SAVE_NEW_USER.to_string())
        })?;

        let account = Account::new(
            email,
            password_hash,
            credentials::generate_verification_token(),
        );
        let saved = self
            .store
            .insert(&account)
            .await
            .map_err(commit_error(SAVE_NEW_USER))?;

        info!("Created account {} for {}", saved.id, saved.email);
        self.send_verification_email(&saved);

        Ok(SignupResponse {
            user: SignupUser {
                email: saved.email,
                subscription: saved.subscription,
                token: saved.session_token,
            },
        })
    }

    /// Consume a verification token: the single terminal transition out of
    /// `Unverified`. Unknown, already-consumed, and foreign tokens are
    /// indistinguishable to the caller.
    pub async fn verify(&self, verification_token: &str) -> Result<(), AuthError> {
        let account = self
            .store
            .find_by_verification_token(verification_token)
            .await
            .map_err(commit_error(UPDATE_USER_INFO))?;
        let Some(mut account) = account else {
            return Err(AuthError::Verification);
        };

        // Sentinel and flag flip together in one commit.
        account.verification_token = VERIFICATION_TOKEN_SENTINEL.to_string();
        account.verified = true;
        self.store
            .update(&account)
            .await
            .map_err(commit_error(UPDATE_USER_INFO))?;

        info!("Account {} verified", account.id);
        Ok(())
    }

    /// Re-send the verification link for an account that has not finished
    /// verification yet.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let account = self
            .store
            .find_by_email(email)
            .await
            .map_err(commit_error(UPDATE_USER_INFO))?;
        let Some(account) = account else {
            return Err(AuthError::Verification);
        };

        if account.verified {
            return Err(AuthError::Validation(
                "Verification has already been passed".to_string(),
            ));
        }

        self.send_verification_email(&account);
        Ok(())
    }

    /// Authenticate and issue a fresh session token. One active session per
    /// account: the new token overwrites whatever was stored, which is what
    /// invalidates a login elsewhere.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let account = self
            .store
            .find_by_email(email)
            .await
            .map_err(commit_error(UPDATE_USER_INFO))?;

        let mut account = match account {
            Some(account) if account.verified => account,
            // Unknown and unverified emails fail identically.
            _ => return Err(AuthError::Credentials),
        };

        if !credentials::verify_password(&account.password_hash, password) {
            return Err(AuthError::Credentials);
        }

        let token =
            credentials::issue_session_token(account.id, &self.config.jwt_secret).map_err(
                |err| {
                    error!("{UPDATE_USER_INFO}: {err}");
                    AuthError::Persistence(UPDATE_USER_INFO.to_string())
                },
            )?;

        account.session_token = Some(token.clone());
        let updated = self
            .store
            .update(&account)
            .await
            .map_err(commit_error(UPDATE_USER_INFO))?;

        info!("Account {} logged in", updated.id);
        Ok(LoginResponse {
            token,
            user: AccountSummary {
                email: updated.email,
                subscription: updated.subscription,
            },
        })
    }

    /// Clear the current session token. Clearing an already-null token is
    /// harmless.
    pub async fn logout(&self, mut account: Account) -> Result<(), AuthError> {
        account.session_token = None;
        self.store
            .update(&account)
            .await
            .map_err(commit_error(UPDATE_USER_INFO))?;

        info!("Account {} logged out", account.id);
        Ok(())
    }

    /// Pure read of the authenticated account's public fields.
    pub fn current_user(&self, account: &Account) -> CurrentUser {
        CurrentUser {
            email: account.email.clone(),
            subscription: account.subscription,
            avatar_url: account.avatar_url.clone(),
        }
    }

    pub async fn change_subscription(
        &self,
        mut account: Account,
        tier: SubscriptionTier,
    ) -> Result<AccountSummary, AuthError> {
        account.subscription = tier;
        let updated = self
            .store
            .update(&account)
            .await
            .map_err(commit_error(UPDATE_USER_INFO))?;

        Ok(AccountSummary {
            email: updated.email,
            subscription: updated.subscription,
        })
    }

    /// Normalize the uploaded image to a 250x250 cover crop, publish it
    /// under the avatars directory and point the account at it. The temp
    /// upload is gone afterwards whether or not processing succeeded.
    pub async fn update_avatar(
        &self,
        mut account: Account,
        tmp_path: &Path,
    ) -> Result<AvatarResponse, AuthError> {
        let filename = format!("{}.png", account.id);
        let dest = self.config.avatar_dir.join(&filename);

        avatars::normalize_and_store(tmp_path, &dest, AVATAR_SIZE, AVATAR_SIZE)
            .await
            .map_err(|err| {
                error!("{UPDATE_USER_AVATAR}: {err}");
                AuthError::Persistence(UPDATE_USER_AVATAR.to_string())
            })?;

        account.avatar_url = format!("/avatars/{filename}");
        let updated = self
            .store
            .update(&account)
            .await
            .map_err(commit_error(UPDATE_USER_AVATAR))?;

        info!("Account {} avatar updated", updated.id);
        Ok(AvatarResponse {
            avatar_url: updated.avatar_url,
        })
    }

    fn send_verification_email(&self, account: &Account) {
        let link = format!(
            "{}:{}/api/users/verify/{}",
            self.config.base_url, self.config.port, account.verification_token
        );

        self.mailer.send(Email {
            to: account.email.clone(),
            subject: "Verification code".to_string(),
            text: format!("Please complete your verification by following this link: {link}"),
            html: format!(
                "Please complete your verification by following this link: \
                 <a href={link}>{link}</a>"
            ),
        });
    }
}
