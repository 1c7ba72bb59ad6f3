// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use ludo_common::wire::ErrorCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

const ALLOWED_ALGORITHMS: [Algorithm; 5] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
];
const AUDIENCE: &str = "authenticated";

#[derive(Debug, Clone, PartialEq)]
pub struct AuthClaims {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    Invalid(String),
    Expired,
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Invalid(_) => ErrorCode::AuthFailed,
            AuthError::Expired => ErrorCode::AuthExpired,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Invalid(message) => write!(f, "invalid token: {message}"),
            AuthError::Expired => write!(f, "token has expired"),
        }
    }
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Verify a bearer token and extract its subject and expiry.
    async fn validate(&self, token: &str) -> Result<AuthClaims, AuthError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Validates Supabase-issued JWTs against the project JWKS document.
/// Keys are fetched lazily and cached; an unknown `kid` forces a refresh.
pub struct JwksTokenValidator {
    client: reqwest::Client,
    jwks_url: String,
    issuer: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl JwksTokenValidator {
    pub fn new(jwks_url: String, issuer: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            jwks_url,
            issuer,
            keys: RwLock::new(HashMap::new()),
        }
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(key.clone());
        }
        self.refresh_keys().await?;
        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::Invalid(format!("unknown signing key '{kid}'")))
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        debug!(url = %self.jwks_url, "fetching JWKS document");
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::Invalid(format!("JWKS fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Invalid(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::Invalid(format!("invalid JWKS document: {e}")))?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(error) => {
                    warn!(kid = %kid, error = %error, "skipping unusable JWK");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TokenValidator for JwksTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthClaims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::Invalid("missing token".to_string()));
        }

        let header =
            decode_header(token).map_err(|e| AuthError::Invalid(format!("bad header: {e}")))?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::Invalid(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Invalid("token has no key id".to_string()))?;

        let key = self.key_for(&kid).await?;
        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[AUDIENCE]);
        validation.set_issuer(&[self.issuer.clone()]);

        let data = decode::<Claims>(token, &key, &validation).map_err(|error| {
            if matches!(
                error.kind(),
                jsonwebtoken::errors::ErrorKind::ExpiredSignature
            ) {
                AuthError::Expired
            } else {
                AuthError::Invalid(error.to_string())
            }
        })?;

        let user_id = data
            .claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| AuthError::Invalid("subject is not a user id".to_string()))?;
        let expires_at = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or_else(|| AuthError::Invalid("bad expiry claim".to_string()))?;

        Ok(AuthClaims {
            user_id,
            expires_at,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_wire_codes() {
        assert_eq!(
            AuthError::Invalid("x".to_string()).code(),
            ErrorCode::AuthFailed
        );
        assert_eq!(AuthError::Expired.code(), ErrorCode::AuthExpired);
    }

    #[tokio::test]
    async fn empty_tokens_are_rejected_without_io() {
        let validator = JwksTokenValidator::new(
            "http://127.0.0.1:1/jwks.json".to_string(),
            "http://127.0.0.1:1/auth/v1".to_string(),
        );
        let err = validator.validate("  ").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthFailed);
    }

    #[tokio::test]
    async fn symmetric_algorithms_are_rejected_before_key_lookup() {
        // HS256 is outside the allowed set, so the validator must refuse
        // it without ever consulting the (unreachable) JWKS endpoint.
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &serde_json::json!({"sub": Uuid::new_v4(), "exp": 4102444800i64}),
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let validator = JwksTokenValidator::new(
            "http://127.0.0.1:1/jwks.json".to_string(),
            "http://127.0.0.1:1/auth/v1".to_string(),
        );
        let err = validator.validate(&token).await.unwrap_err();
        match err {
            AuthError::Invalid(message) => assert!(message.contains("not allowed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_tokens_fail_header_decoding() {
        let validator = JwksTokenValidator::new(
            "http://127.0.0.1:1/jwks.json".to_string(),
            "http://127.0.0.1:1/auth/v1".to_string(),
        );
        let err = validator.validate("not-a-jwt").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthFailed);
    }
}
