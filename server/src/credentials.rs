use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::Argon2;
use chrono::Utc;
use color_eyre::eyre::eyre;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed lifetime of a session token.
pub const SESSION_TTL_SECS: i64 = 2 * 60 * 60;

const VERIFICATION_TOKEN_LEN: usize = 32;

/// Hash a raw password with Argon2id and a fresh per-hash salt.
pub fn hash_password(raw: &str) -> color_eyre::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(raw.as_bytes(), &salt)
        .map_err(|err| eyre!("Failed to hash password: {err}"))?;

    Ok(hash.to_string())
}

/// Compare a raw password against a stored hash. Argon2 verification is
/// constant-time over the digest; an unparseable hash reads as a mismatch.
pub fn verify_password(password_hash: &str, raw: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(raw.as_bytes(), &parsed)
        .is_ok()
}

/// Opaque single-use token embedded in the verification link.
pub fn generate_verification_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFICATION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Claims carried by a session JWT.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id the session belongs to.
    pub sub: Uuid,
    /// Expiry as a unix timestamp, two hours after issuance.
    pub exp: i64,
    /// Unique token id; makes consecutive logins produce distinct tokens
    /// even within the same second.
    pub jti: Uuid,
}

/// Sign a session token binding the account's identity.
pub fn issue_session_token(account_id: Uuid, secret: &str) -> color_eyre::Result<String> {
    let claims = SessionClaims {
        sub: account_id,
        exp: Utc::now().timestamp() + SESSION_TTL_SECS,
        jti: Uuid::new_v4(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| eyre!("Failed to sign session token: {err}"))
}

/// Verify signature and expiry of a session token. Returns the claims on
/// success, `None` for anything invalid.
pub fn verify_session_token(token: &str, secret: &str) -> Option<SessionClaims> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip_verifies() {
        let hash = hash_password("secret1").unwrap();
        assert!(verify_password(&hash, "secret1"));
        assert!(!verify_password(&hash, "wrong"));
    }

    #[test]
    fn hash_is_salted() {
        let a = hash_password("secret1").unwrap();
        let b = hash_password("secret1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "secret1"));
    }

    #[test]
    fn verification_tokens_are_random_and_sized() {
        let a = generate_verification_token();
        let b = generate_verification_token();
        assert_eq!(a.len(), VERIFICATION_TOKEN_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn session_token_resolves_to_issuing_account() {
        let id = Uuid::new_v4();
        let token = issue_session_token(id, "test-secret").unwrap();

        let claims = verify_session_token(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, id);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn consecutive_tokens_are_distinct() {
        let id = Uuid::new_v4();
        let a = issue_session_token(id, "test-secret").unwrap();
        let b = issue_session_token(id, "test-secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_session_token(Uuid::new_v4(), "test-secret").unwrap();
        assert!(verify_session_token(&token, "other-secret").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = SessionClaims {
            sub: Uuid::new_v4(),
            exp: Utc::now().timestamp() - 10,
            jti: Uuid::new_v4(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(verify_session_token(&token, "test-secret").is_none());
    }
}
