// ABOUTME: Bearer access-token verification for chat endpoints
// ABOUTME: HS256 JWT verifier behind a trait so session issuance can live elsewhere
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Authentication
//!
//! Sessions are issued by an external service. This server only verifies the
//! access token presented in `Authorization: Bearer <token>` and extracts the
//! user id from its `sub` claim.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// Token type accepted on API requests
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// `JWT` claims carried by access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User `ID`
    pub sub: String,
    /// Token type; only `access` tokens authenticate requests
    #[serde(rename = "type")]
    pub token_type: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// Caller identity established from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// User `ID` from the `sub` claim
    pub user_id: String,
}

/// Verifies bearer tokens and yields the caller identity
pub trait TokenVerifier: Send + Sync {
    /// Verify a raw token
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` when the token is malformed, expired, signed with
    /// another key, or not an access token
    fn verify(&self, token: &str) -> AppResult<AuthenticatedUser>;

    /// Verify the `Authorization` header of a request
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` when no bearer token is present, otherwise the
    /// errors of [`TokenVerifier::verify`]
    fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthenticatedUser> {
        let token = bearer_token(headers).ok_or_else(AppError::auth_required)?;
        self.verify(token)
    }
}

/// Extract the token from an `Authorization: Bearer` header
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// HS256 verifier sharing a secret with the session service
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign a token with the shared secret
    ///
    /// Used by tooling and tests; production tokens come from the session service.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded
    pub fn issue_token(
        &self,
        user_id: &str,
        token_type: &str,
        ttl: Duration,
    ) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_owned(),
            token_type: token_type.to_owned(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign token: {e}")))
    }

    fn convert_jwt_error(e: &jsonwebtoken::errors::Error) -> AppError {
        warn!("JWT token validation failed: {e:?}");
        match e.kind() {
            ErrorKind::ExpiredSignature => AppError::auth_invalid("Token expired"),
            ErrorKind::InvalidSignature => {
                AppError::auth_invalid("Token signature verification failed")
            }
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                AppError::auth_invalid("Token is malformed")
            }
            _ => AppError::auth_invalid(format!("Token validation failed: {e}")),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> AppResult<AuthenticatedUser> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| Self::convert_jwt_error(&e))?
            .claims;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AppError::auth_invalid(format!(
                "Expected an access token, got '{}'",
                claims.token_type
            )));
        }

        debug!(user_id = %claims.sub, "Access token verified");
        Ok(AuthenticatedUser {
            user_id: claims.sub,
        })
    }
}
