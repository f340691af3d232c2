//! Token Service: minting, verification, and refresh of HS256 tokens.
//!
//! Both token kinds are signed JWTs over the same [`TokenPayload`]; the
//! `type` claim tells them apart. Access tokens live 15 minutes, refresh
//! tokens 7 days (both configurable via [`JwtConfig`]).
//!
//! Two levels of inspection are offered. [`is_expired`] decodes the claims
//! *without* checking the signature and only looks at `exp`; it is cheap and
//! fails closed. [`TokenService::verify_token`] checks the signature and
//! expiry and is what every trust decision goes through.

use std::collections::HashSet;
use std::fmt;

use brankas_core::error::CoreError;
use brankas_core::types::{UnixSeconds, UserId};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{env_or, ConfigError};

/// Default access token expiry in minutes.
const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;
/// Default refresh token expiry in days.
const DEFAULT_REFRESH_EXPIRY_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Discriminates the two token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Access => f.write_str("access"),
            TokenType::Refresh => f.write_str("refresh"),
        }
    }
}

/// Identity claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Full claim set as encoded on the wire:
/// `{userId, username, email, type, iat, exp, jti}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub payload: TokenPayload,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: UnixSeconds,
    /// Expiration time (UTC Unix timestamp).
    pub exp: UnixSeconds,
    /// Unique token identifier (UUID v4).
    pub jti: String,
}

/// Freshly minted access + refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("expected a {expected} token, got {actual}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl TokenError {
    /// True for "this token is not acceptable"; false for signing failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, TokenError::Signing(_))
    }
}

impl From<TokenError> for CoreError {
    fn from(err: TokenError) -> Self {
        if err.is_rejection() {
            CoreError::Unauthorized(err.to_string())
        } else {
            CoreError::Internal(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for token generation and validation.
#[derive(Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    /// Access token lifetime in minutes (default: 15).
    pub access_token_expiry_mins: i64,
    /// Refresh token lifetime in days (default: 7).
    pub refresh_token_expiry_days: i64,
}

impl JwtConfig {
    /// Config with the default lifetimes.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_expiry_mins: DEFAULT_ACCESS_EXPIRY_MINS,
            refresh_token_expiry_days: DEFAULT_REFRESH_EXPIRY_DAYS,
        }
    }

    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default |
    /// |----------------------------|----------|---------|
    /// | `JWT_SECRET`               | **yes**  | --      |
    /// | `JWT_ACCESS_EXPIRY_MINS`   | no       | `15`    |
    /// | `JWT_REFRESH_EXPIRY_DAYS`  | no       | `7`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        if secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }

        Ok(Self {
            secret,
            access_token_expiry_mins: env_or("JWT_ACCESS_EXPIRY_MINS", DEFAULT_ACCESS_EXPIRY_MINS)?,
            refresh_token_expiry_days: env_or(
                "JWT_REFRESH_EXPIRY_DAYS",
                DEFAULT_REFRESH_EXPIRY_DAYS,
            )?,
        })
    }

    /// Access token lifetime in seconds.
    pub fn access_ttl_secs(&self) -> i64 {
        self.access_token_expiry_mins * 60
    }

    /// Refresh token lifetime in seconds.
    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_token_expiry_days * 24 * 60 * 60
    }

    fn ttl_secs(&self, token_type: TokenType) -> i64 {
        match token_type {
            TokenType::Access => self.access_ttl_secs(),
            TokenType::Refresh => self.refresh_ttl_secs(),
        }
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("access_token_expiry_mins", &self.access_token_expiry_mins)
            .field("refresh_token_expiry_days", &self.refresh_token_expiry_days)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Mints and checks tokens with one symmetric secret. Holds no session state.
pub struct TokenService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Mint an access token and a refresh token for the same identity.
    pub fn generate_token_pair(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
    ) -> Result<TokenPair, TokenError> {
        let now = Utc::now().timestamp();
        let payload = |token_type| TokenPayload {
            user_id: user_id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            token_type,
        };

        Ok(TokenPair {
            access_token: self.issue_at(&payload(TokenType::Access), now)?,
            refresh_token: self.issue_at(&payload(TokenType::Refresh), now)?,
        })
    }

    /// Sign `payload` as if issued at `issued_at`; expiry follows from the
    /// payload's token type.
    pub fn issue_at(
        &self,
        payload: &TokenPayload,
        issued_at: UnixSeconds,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            payload: payload.clone(),
            iat: issued_at,
            exp: issued_at + self.config.ttl_secs(payload.token_type),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(TokenError::Signing)
    }

    /// Check signature and expiry, returning the embedded payload.
    pub fn verify_token(&self, token: &str) -> Result<TokenPayload, TokenError> {
        self.verify_token_at(token, Utc::now().timestamp())
    }

    /// [`verify_token`](Self::verify_token) against an explicit clock.
    ///
    /// A token is expired once `now >= exp` (no leeway).
    pub fn verify_token_at(
        &self,
        token: &str,
        now: UnixSeconds,
    ) -> Result<TokenPayload, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &verifying_validation()).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            },
        )?;

        if data.claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Ok(data.claims.payload)
    }

    /// Exchange a valid refresh token for a new access token.
    ///
    /// The refresh token itself is not rotated.
    pub fn refresh_access_token(&self, refresh_token: &str) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let payload = self.verify_token_at(refresh_token, now)?;

        if payload.token_type != TokenType::Refresh {
            return Err(TokenError::WrongType {
                expected: TokenType::Refresh,
                actual: payload.token_type,
            });
        }

        let access = TokenPayload {
            token_type: TokenType::Access,
            ..payload
        };
        self.issue_at(&access, now)
    }
}

/// Signature + structure checks. `exp` must be present but is compared by
/// the caller, so both paths share one clock and zero leeway.
fn verifying_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.leeway = 0;
    validation.required_spec_claims = HashSet::from(["exp".to_string(), "iat".to_string()]);
    validation
}

// ---------------------------------------------------------------------------
// Unverified inspection
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<UnixSeconds>,
}

fn unverified_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Decode claims without checking the signature. Never use the result for
/// a trust decision.
pub fn decode_unverified(token: &str) -> Option<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &unverified_validation())
        .ok()
        .map(|data| data.claims)
}

/// Whether `token` is past its `exp`, judged without verifying the signature.
///
/// Undecodable tokens and tokens without a numeric `exp` count as expired.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now().timestamp())
}

/// [`is_expired`] against an explicit clock. Expired once `now >= exp`.
pub fn is_expired_at(token: &str, now: UnixSeconds) -> bool {
    decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &unverified_validation())
        .ok()
        .and_then(|data| data.claims.exp)
        .map_or(true, |exp| exp <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// Helper to build a service with a known secret.
    fn service() -> TokenService {
        TokenService::new(JwtConfig::new("test-secret-that-is-long-enough-for-hmac"))
    }

    fn payload(token_type: TokenType) -> TokenPayload {
        TokenPayload {
            user_id: "k3j9x0a1b".into(),
            username: "bob".into(),
            email: "bob@x.com".into(),
            token_type,
        }
    }

    #[test]
    fn access_token_verifies_to_input_claims() {
        let svc = service();
        let pair = svc
            .generate_token_pair("k3j9x0a1b", "bob", "bob@x.com")
            .expect("token generation should succeed");

        let claims = svc.verify_token(&pair.access_token).expect("should verify");
        assert_eq!(claims, payload(TokenType::Access));

        let claims = svc.verify_token(&pair.refresh_token).expect("should verify");
        assert_eq!(claims, payload(TokenType::Refresh));
    }

    #[test]
    fn pair_lifetimes_are_fifteen_minutes_and_seven_days() {
        let svc = service();
        let pair = svc.generate_token_pair("u", "n", "e").unwrap();

        let access = decode_unverified(&pair.access_token).unwrap();
        let refresh = decode_unverified(&pair.refresh_token).unwrap();
        assert_eq!(access.exp - access.iat, 15 * 60);
        assert_eq!(refresh.exp - refresh.iat, 7 * 24 * 60 * 60);
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn wire_format_is_hs256_with_camel_case_claims() {
        let svc = service();
        let pair = svc.generate_token_pair("k3j9x0a1b", "bob", "bob@x.com").unwrap();

        assert_eq!(pair.access_token.split('.').count(), 3);

        let header = jsonwebtoken::decode_header(&pair.access_token).unwrap();
        assert_eq!(header.alg, Algorithm::HS256);
        assert_eq!(header.typ.as_deref(), Some("JWT"));

        let raw = decode::<serde_json::Value>(
            &pair.access_token,
            &DecodingKey::from_secret(&[]),
            &unverified_validation(),
        )
        .unwrap()
        .claims;
        assert_eq!(raw["userId"], "k3j9x0a1b");
        assert_eq!(raw["username"], "bob");
        assert_eq!(raw["email"], "bob@x.com");
        assert_eq!(raw["type"], "access");
        assert!(raw["iat"].is_i64());
        assert!(raw["exp"].is_i64());
    }

    #[test]
    fn is_expired_boundary_is_inclusive() {
        let svc = service();
        let issued = 1_700_000_000;
        let token = svc.issue_at(&payload(TokenType::Access), issued).unwrap();
        let exp = issued + 15 * 60;

        assert!(!is_expired_at(&token, exp - 1));
        assert!(is_expired_at(&token, exp), "exactly at exp counts as expired");
        assert!(is_expired_at(&token, exp + 1));
    }

    #[test]
    fn is_expired_fails_closed() {
        assert!(is_expired("not-a-token"));
        assert!(is_expired(""));
        assert!(is_expired("a.b.c"));
    }

    #[test]
    fn is_expired_ignores_signature() {
        let other = TokenService::new(JwtConfig::new("some-other-secret"));
        let token = other
            .generate_token_pair("u", "n", "e")
            .unwrap()
            .access_token;

        assert!(!is_expired(&token));
        assert_matches!(service().verify_token(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn verify_rejects_expired_token() {
        let svc = service();
        let now = Utc::now().timestamp();
        // Issued 20 minutes ago, expired 5 minutes ago.
        let token = svc
            .issue_at(&payload(TokenType::Access), now - 20 * 60)
            .unwrap();

        assert_matches!(svc.verify_token(&token), Err(TokenError::Expired));
        assert!(is_expired(&token));
    }

    #[test]
    fn verify_at_boundary() {
        let svc = service();
        let issued = Utc::now().timestamp() - 60;
        let token = svc.issue_at(&payload(TokenType::Access), issued).unwrap();
        let exp = issued + 15 * 60;

        assert!(svc.verify_token_at(&token, exp - 1).is_ok());
        assert_matches!(svc.verify_token_at(&token, exp), Err(TokenError::Expired));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert_matches!(service().verify_token("garbage"), Err(TokenError::Malformed));
    }

    #[test]
    fn refresh_mints_access_token_with_same_identity() {
        let svc = service();
        let pair = svc.generate_token_pair("k3j9x0a1b", "bob", "bob@x.com").unwrap();

        let access = svc
            .refresh_access_token(&pair.refresh_token)
            .expect("refresh should succeed");

        assert_ne!(access, pair.access_token);
        let claims = svc.verify_token(&access).unwrap();
        assert_eq!(claims, payload(TokenType::Access));

        let decoded = decode_unverified(&access).unwrap();
        assert_eq!(decoded.exp - decoded.iat, 15 * 60);
    }

    #[test]
    fn refresh_rejects_access_token() {
        let svc = service();
        let pair = svc.generate_token_pair("u", "n", "e").unwrap();

        assert_matches!(
            svc.refresh_access_token(&pair.access_token),
            Err(TokenError::WrongType {
                expected: TokenType::Refresh,
                actual: TokenType::Access,
            })
        );
    }

    #[test]
    fn refresh_rejects_tampered_token() {
        let svc = service();
        let bob = svc.generate_token_pair("u1", "bob", "bob@x.com").unwrap();
        let eve = svc.generate_token_pair("u2", "eve", "eve@x.com").unwrap();

        // Eve's claims under Bob's signature.
        let bob_parts: Vec<&str> = bob.refresh_token.split('.').collect();
        let eve_parts: Vec<&str> = eve.refresh_token.split('.').collect();
        let forged = format!("{}.{}.{}", bob_parts[0], eve_parts[1], bob_parts[2]);

        let err = svc.refresh_access_token(&forged).unwrap_err();
        assert_matches!(err, TokenError::InvalidSignature);
        assert!(err.is_rejection());
    }

    #[test]
    fn refresh_rejects_foreign_secret() {
        let other = TokenService::new(JwtConfig::new("secret-bravo"));
        let pair = other.generate_token_pair("u", "n", "e").unwrap();

        assert_matches!(
            service().refresh_access_token(&pair.refresh_token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn refresh_rejects_expired_refresh_token() {
        let svc = service();
        let eight_days_ago = Utc::now().timestamp() - 8 * 24 * 60 * 60;
        let token = svc
            .issue_at(&payload(TokenType::Refresh), eight_days_ago)
            .unwrap();

        assert_matches!(svc.refresh_access_token(&token), Err(TokenError::Expired));
    }

    #[test]
    fn debug_output_hides_secret() {
        let out = format!("{:?}", JwtConfig::new("super-secret-value"));
        assert!(!out.contains("super-secret-value"));
        assert!(out.contains("access_token_expiry_mins"));
    }
}
