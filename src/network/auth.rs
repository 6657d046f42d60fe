//! Joiner Authentication
//!
//! Optional JWT check on the `Hello` handshake. Tokens are issued by an
//! external provider; the server only validates them. With no key or secret
//! configured every joiner is accepted anonymously.

use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::protocol::ErrorCode;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Skip expiry validation (local testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `SLIPSTREAM_AUTH_*` environment variables.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(format!("SLIPSTREAM_AUTH_{name}")).ok();
        Self {
            issuer: var("ISSUER"),
            audience: var("AUDIENCE"),
            public_key_pem: var("PUBLIC_KEY_PEM"),
            secret: var("SECRET"),
            skip_expiry: var("SKIP_EXPIRY").is_some_and(|v| v == "true" || v == "1"),
        }
    }

    /// HS256 config with a shared secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self { secret: Some(secret.into()), ..Default::default() }
    }

    /// True if joiners must present a token.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn validation(&self) -> Validation {
        let algorithm = if self.public_key_pem.is_some() { Algorithm::RS256 } else { Algorithm::HS256 };
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation.validate_exp = !self.skip_expiry;
        validation
    }
}

/// Claims read from a provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the provider's user id
    pub sub: String,
    /// Expiry (unix seconds, 0 = none)
    #[serde(default)]
    pub exp: u64,
    /// Issued at (unix seconds)
    #[serde(default)]
    pub iat: u64,
    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Stable account id derived from the subject, as 16 hex chars.
    ///
    /// Lets logs correlate reconnects of one account without printing the
    /// provider's raw user id.
    pub fn account_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"slipstream-account:");
        hasher.update(self.sub.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Server requires a token and none was sent.
    #[error("auth token required")]
    MissingToken,
    /// No key or secret configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token is not a well-formed JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature check failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Anything else from the JWT library.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl AuthError {
    /// Code sent back to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Expired => ErrorCode::TokenExpired,
            _ => ErrorCode::AuthFailed,
        }
    }
}

/// Validate a JWT and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let key = if let Some(pem) = &config.public_key_pem {
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {e}")))?
    } else if let Some(secret) = &config.secret {
        DecodingKey::from_secret(secret.as_bytes())
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = decode::<TokenClaims>(token, &key, &config.validation())
        .map_err(map_jwt_error)?
        .claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // no leeway here, unlike the library check
    if !config.skip_expiry && claims.exp > 0 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Check the token carried by a `Hello`.
///
/// Returns `Ok(None)` when the server runs without authentication.
pub fn authenticate_hello(token: Option<&str>, config: &AuthConfig) -> Result<Option<TokenClaims>, AuthError> {
    if !config.is_configured() {
        return Ok(None);
    }
    let token = token.ok_or(AuthError::MissingToken)?;
    validate_token(token, config).map(Some)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
