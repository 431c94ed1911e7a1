use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Classified failures shared by every lifecycle operation.
///
/// The transport layer maps each variant to a status code and message
/// without inspecting engine internals.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Email already registered.
    #[error("Email in use")]
    Conflict,

    /// Unknown or unverified email, or password mismatch. The message is
    /// uniform on purpose so callers cannot probe which check failed.
    #[error("Email or password is wrong, or email doesn't verified.")]
    Credentials,

    /// No unverified account matches the presented verification token.
    #[error("Unverified user with provided token not found")]
    Verification,

    /// The store failed to commit a mutation. Carries the engine's own
    /// description; raw store errors are logged, never surfaced.
    #[error("{0}")]
    Persistence(String),

    /// Malformed input.
    #[error("{0}")]
    Validation(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::Credentials => StatusCode::UNAUTHORIZED,
            AuthError::Verification => StatusCode::NOT_FOUND,
            AuthError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        tracing::error!(status = %self.status(), "Request failed: {self}");

        (self.status(), Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_their_status_codes() {
        assert_eq!(AuthError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::Credentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Verification.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthError::Persistence("Failed to save new user".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthError::Validation("bad input".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn credentials_message_is_uniform() {
        // Anti-enumeration: the same message regardless of which check failed.
        assert_eq!(
            AuthError::Credentials.to_string(),
            "Email or password is wrong, or email doesn't verified."
        );
    }

    #[test]
    fn conflict_message_matches_contract() {
        assert_eq!(AuthError::Conflict.to_string(), "Email in use");
    }
}
