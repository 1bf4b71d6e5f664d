//! Bearer tokens identifying a user.
//!
//! Tokens are HMAC-SHA256 based and scoped to a user id.
//! Format: `collab_ut_<user_id>_<hmac_hex>`

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Token prefix used to identify collab user tokens.
const TOKEN_PREFIX: &str = "collab_ut_";

/// Environment variable holding the hex-encoded signing secret.
pub const TOKEN_SECRET_ENV: &str = "COLLAB_TOKEN_SECRET";

const UUID_LEN: usize = 36;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("invalid user ID in token: {0}")]
    InvalidUserId(String),

    #[error("token HMAC verification failed")]
    HmacMismatch,

    #[error("missing token secret")]
    MissingSecret,
}

/// Signing key for user tokens.
#[derive(Clone)]
pub struct TokenConfig {
    mac: HmacSha256,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig").finish_non_exhaustive()
    }
}

impl TokenConfig {
    /// Build a config from raw secret bytes. An empty secret is rejected.
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::MissingSecret)?;
        Ok(Self { mac })
    }

    /// Build a config from a hex-encoded secret, as written by `collab init`.
    pub fn from_hex(secret_hex: &str) -> Result<Self, TokenError> {
        let secret = hex::decode(secret_hex.trim()).map_err(|e| {
            TokenError::InvalidFormat(format!("token secret is not valid hex: {e}"))
        })?;
        Self::new(&secret)
    }

    fn signer(&self, user_id: Uuid) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(user_id.to_string().as_bytes());
        mac
    }
}

/// Claims extracted from a validated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserClaims {
    pub user_id: Uuid,
}

/// Issue the bearer token for `user_id`.
pub fn generate_token(config: &TokenConfig, user_id: Uuid) -> String {
    let hmac_hex = hex::encode(config.signer(user_id).finalize().into_bytes());
    format!("{TOKEN_PREFIX}{user_id}_{hmac_hex}")
}

/// Validate a bearer token and extract its claims. The HMAC is compared in
/// constant time.
pub fn validate_token(config: &TokenConfig, token: &str) -> Result<UserClaims, TokenError> {
    let rest = token.strip_prefix(TOKEN_PREFIX).ok_or_else(|| {
        TokenError::InvalidFormat(format!("token must start with '{TOKEN_PREFIX}'"))
    })?;

    if rest.len() < UUID_LEN || !rest.is_char_boundary(UUID_LEN) {
        return Err(TokenError::InvalidFormat(
            "token too short to contain a valid UUID".to_string(),
        ));
    }
    let (user_id_str, after_user_id) = rest.split_at(UUID_LEN);

    let user_id =
        Uuid::parse_str(user_id_str).map_err(|e| TokenError::InvalidUserId(e.to_string()))?;

    let hmac_hex = after_user_id.strip_prefix('_').ok_or_else(|| {
        TokenError::InvalidFormat("expected underscore after user_id".to_string())
    })?;

    let provided_mac = hex::decode(hmac_hex)
        .map_err(|e| TokenError::InvalidFormat(format!("invalid hex in hmac: {e}")))?;

    config
        .signer(user_id)
        .verify_slice(&provided_mac)
        .map_err(|_| TokenError::HmacMismatch)?;

    Ok(UserClaims { user_id })
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
