use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::error::{ApiError, ErrorCode, ErrorResponse};
use tracing::debug;

use crate::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Who is driving a mutating request. Built fresh per request from the
/// bearer token, never from client-side state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSession {
    pub subject: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OperatorSession {
    fn open() -> Self {
        Self {
            subject: "operator".into(),
            expires_at: None,
        }
    }
}

#[derive(Clone)]
pub struct SessionVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<OperatorSession, ApiError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ApiError::new(ErrorCode::Unauthorized, format!("invalid session: {e}")))?;

        let expires_at = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "invalid session expiry"))?;
        if expires_at <= Utc::now() {
            return Err(ApiError::new(ErrorCode::Unauthorized, "session expired"));
        }

        Ok(OperatorSession {
            subject: data.claims.sub,
            expires_at: Some(expires_at),
        })
    }
}

/// Signs a token the way the external login service does.
#[cfg(test)]
pub(crate) fn mint_session_token(
    secret: &str,
    subject: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for OperatorSession {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(verifier) = state.sessions.as_ref() else {
            return Ok(OperatorSession::open());
        };

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                unauthorized(ApiError::new(
                    ErrorCode::Unauthorized,
                    "missing bearer session token",
                ))
            })?;

        let session = verifier.verify(token).map_err(unauthorized)?;
        debug!(subject = %session.subject, expires_at = ?session.expires_at, "operator session verified");
        Ok(session)
    }
}

fn unauthorized(error: ApiError) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::from(error)))
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
