//! Bearer-token identity. Tokens are issued elsewhere; this side only
//! verifies them and turns the claims into an [`Identity`].

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use boxoffice_models::{Identity, Role, UserId};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    user_id: Option<Value>,
    #[serde(alias = "userType")]
    role: Option<String>,
    email: Option<String>,
}

/// A verified caller plus the display fields echoed by `verify-token`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: Identity,
    pub email: Option<String>,
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "token verification failed");
                ApiError::Forbidden("Invalid token")
            })?
            .claims;

        let user_id = claims
            .user_id
            .as_ref()
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .ok_or(ApiError::Forbidden("Invalid token format"))?;

        // Tokens without a role predate role claims and belong to attendees.
        let role = match claims.role.as_deref() {
            None => Role::Attendee,
            Some(raw) => Role::parse(raw).ok_or(ApiError::Forbidden("Invalid token format"))?,
        };

        Ok(AuthUser {
            identity: Identity {
                user_id: UserId(user_id),
                role,
            },
            email: claims.email,
        })
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(ApiError::Unauthorized("No authorization header provided"))?;
    let value = header
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid authorization format"))?;

    let mut words = value.split(' ');
    match (words.next(), words.next(), words.next()) {
        (Some("Bearer"), Some(""), None) => Err(ApiError::Unauthorized("No token provided")),
        (Some("Bearer"), Some(token), None) => Ok(token),
        _ => Err(ApiError::Unauthorized("Invalid authorization format")),
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        Arc::<TokenVerifier>::from_ref(state).verify(token)
    }
}
