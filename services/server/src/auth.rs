//! Password hashing and opaque session-token issuance/verification (§4.C).
//!
//! Passwords cross the process boundary only in register/login requests and
//! are wrapped in [`zeroize::Zeroizing`] so the plaintext buffer is wiped as
//! soon as it goes out of scope.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Hashes `password` with Argon2id and a fresh random salt. Returns the PHC
/// hash string (salt embedded, per the `argon2` crate convention) plus the
/// raw salt recorded separately in the `users.salt` column for parity with
/// the data model in §3.
pub fn hash_password(password: &str) -> Result<(String, String), AuthError> {
    let password = Zeroizing::new(password.to_owned());
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| AuthError::HashingFailed)?
        .to_string();
    Ok((hash, salt.as_str().to_owned()))
}

/// Verifies `password` against a previously stored Argon2 PHC hash string.
/// Never panics on malformed stored hashes; a corrupt hash simply fails
/// to verify rather than crashing the process.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let password = Zeroizing::new(password.to_owned());
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenBody {
    user_id: i64,
    username: String,
    nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: i64,
    pub username: String,
}

/// Issues a session token: `base64(json(body)) "." hex(hmac(body, secret))`.
/// The token is opaque to clients; only the server ever decodes it.
pub fn issue_token(user_id: i64, username: &str, secret: &[u8]) -> String {
    let body = TokenBody {
        user_id,
        username: username.to_owned(),
        nonce: OsRng.next_u64(),
    };
    let body_json = serde_json::to_vec(&body).expect("TokenBody always serializes");
    let body_b64 = BASE64.encode(&body_json);

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body_b64.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());

    format!("{body_b64}.{sig}")
}

/// Verifies a token's HMAC (constant-time via [`Mac::verify_slice`]) and
/// decodes its claims. Tokens carry no expiry of their own; the caller
/// enforces the idle TTL against the `sessions` table's `last_activity`.
pub fn verify_token(token: &str, secret: &[u8]) -> Option<TokenClaims> {
    let (body_b64, sig_hex) = token.split_once('.')?;
    let sig_bytes = hex::decode(sig_hex).ok()?;

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(body_b64.as_bytes());
    mac.verify_slice(&sig_bytes).ok()?;

    let body_json = BASE64.decode(body_b64).ok()?;
    let body: TokenBody = serde_json::from_slice(&body_json).ok()?;
    Some(TokenClaims {
        user_id: body.user_id,
        username: body.username,
    })
}

/// Register-time username validation (§4.C): non-empty, no whitespace,
/// within the configured length cap.
pub fn validate_username(username: &str, max_len: usize) -> Result<(), AuthError> {
    if username.is_empty()
        || username.len() > max_len
        || username.chars().any(char::is_whitespace)
    {
        return Err(AuthError::InvalidUsername { max: max_len });
    }
    Ok(())
}

pub fn validate_password(password: &str, min_len: usize) -> Result<(), AuthError> {
    if password.len() < min_len {
        return Err(AuthError::WeakPassword { min: min_len });
    }
    Ok(())
}

/// Accepts an optional PEM public key only if it has a well-formed
/// header/footer; a missing key is always fine (optional field).
pub fn validate_public_key(public_key: Option<&str>) -> Result<(), AuthError> {
    match public_key {
        None => Ok(()),
        Some(pem) => {
            let trimmed = pem.trim();
            if trimmed.starts_with("-----BEGIN") && trimmed.ends_with("-----") {
                Ok(())
            } else {
                Err(AuthError::MalformedPublicKey)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let (hash, salt) = hash_password("pw12345678").expect("hash");
        assert!(!salt.is_empty());
        assert!(verify_password("pw12345678", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn token_round_trips_and_rejects_tampering() {
        let secret = b"server-secret";
        let token = issue_token(42, "alice", secret);
        let claims = verify_token(&token, secret).expect("valid token");
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.username, "alice");

        let tampered = format!("{token}x");
        assert!(verify_token(&tampered, secret).is_none());
        assert!(verify_token(&token, b"wrong-secret").is_none());
    }

    #[test]
    fn validate_username_rejects_whitespace_and_overlong() {
        assert!(validate_username("alice", 50).is_ok());
        assert!(validate_username("al ice", 50).is_err());
        assert!(validate_username("", 50).is_err());
        assert!(validate_username(&"a".repeat(51), 50).is_err());
    }

    #[test]
    fn validate_public_key_accepts_none_and_well_formed_pem() {
        assert!(validate_public_key(None).is_ok());
        assert!(validate_public_key(Some(
            "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----"
        ))
        .is_ok());
        assert!(validate_public_key(Some("not a pem")).is_err());
    }
}
