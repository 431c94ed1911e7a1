use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::error;

use crate::account::Account;
use crate::credentials;
use crate::errors::AuthError;
use crate::state::AppState;

/// Extractor for operations behind the trust boundary: resolves the Bearer
/// session token to its account before the handler runs.
///
/// A token is only accepted while it equals the account's stored session
/// token, so logout and a newer login both leave older tokens dead even
/// though their signatures still check out.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::Credentials)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::Credentials)?;

        let claims = credentials::verify_session_token(token, &state.config.jwt_secret)
            .ok_or(AuthError::Credentials)?;

        let account = state
            .store
            .find_by_id(claims.sub)
            .await
            .map_err(|err| {
                error!("Failed to load account for session: {err}");
                AuthError::Persistence("Failed to update user's info".to_string())
            })?
            .ok_or(AuthError::Credentials)?;

        if account.session_token.as_deref() != Some(token) {
            return Err(AuthError::Credentials);
        }

        Ok(AuthUser { account })
    }
}
