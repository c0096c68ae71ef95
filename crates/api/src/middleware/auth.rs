//! Request identity extractors.
//!
//! Recipients are identified by a JWT issued elsewhere; this module only
//! validates it. `AuthUser` reads `Authorization: Bearer <token>` or, for
//! EventSource clients that cannot set headers, a `token` query parameter.
//! `DispatchKey` guards the dispatch endpoint with a shared `X-API-Key`.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use herald_common::error::AppError;

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the recipient identity used for addressing
    pub sub: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Authenticated recipient.
///
/// Use as an Axum extractor on scoped routes:
/// ```ignore
/// async fn handler(auth: AuthUser) -> impl IntoResponse {
///     // auth.identity is the recipient's addressing key
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: String,
    pub claims: Claims,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Decode and validate a JWT token.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

fn bearer_or_query_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string());

    bearer.or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
    })
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.jwt_secret.clone();
        let token = bearer_or_query_token(parts);

        async move {
            let token = token.ok_or_else(|| {
                AppError::Auth(
                    "Missing credentials. Use 'Authorization: Bearer <JWT>' or '?token=<JWT>'"
                        .to_string(),
                )
            })?;

            let claims = decode_jwt(&token, &secret)?;
            if claims.sub.trim().is_empty() {
                return Err(AppError::Auth("Token carries no identity".to_string()));
            }

            Ok(AuthUser {
                identity: claims.sub.clone(),
                claims,
            })
        }
    }
}

/// Originating system allowed to dispatch.
///
/// When `DISPATCH_API_KEY` is unset every caller is accepted.
#[derive(Debug, Clone, Copy)]
pub struct DispatchKey;

impl FromRequestParts<AppState> for DispatchKey {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let expected = state.config.dispatch_api_key.clone();
        let presented = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            match expected {
                None => Ok(DispatchKey),
                Some(expected) if presented.as_deref() == Some(expected.as_str()) => {
                    Ok(DispatchKey)
                }
                Some(_) => Err(AppError::Auth(
                    "Missing or invalid X-API-Key header".to_string(),
                )),
            }
        }
    }
}
