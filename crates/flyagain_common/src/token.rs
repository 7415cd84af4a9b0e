//! Signed session tokens.
//!
//! LoginService mints a token at login; AccountService and WorldService
//! verify it against the same shared secret. Claims: issuer
//! `flyagain-login`, subject = account id, `sid` = session id, `username`,
//! issued-at and expiry.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::unix_now;

pub const TOKEN_ISSUER: &str = "flyagain-login";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// Account id, as a string per JWT convention.
    pub sub: String,
    pub sid: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    pub fn account_id(&self) -> Result<i64, ServiceError> {
        self.sub.parse().map_err(|_| ServiceError::Auth)
    }
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn mint(
        &self,
        account_id: i64,
        session_id: &str,
        username: &str,
    ) -> Result<String, ServiceError> {
        let now = unix_now();
        let claims = TokenClaims {
            iss: TOKEN_ISSUER.to_string(),
            sub: account_id.to_string(),
            sid: session_id.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify signature, issuer, expiry and the required claims. The account
    /// id must parse as a number; any failure is an authentication error.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|_| ServiceError::Auth)?;

        if data.claims.sid.is_empty() {
            return Err(ServiceError::Auth);
        }
        data.claims.account_id()?;
        Ok(data.claims)
    }
}
