//! Bearer-token auth (SPEC_FULL.md §ambient auth). Three caller roles reach
//! this core: the client and provider identified by a booking, and the
//! platform admin who approves payouts. Client/provider identity is a plain
//! UUID carried in the token (the identity service that issues it lives
//! outside this core); admin identity is checked against the configured
//! `ADMIN_TOKENS` set using the same constant-time comparison pattern the
//! teacher uses for its own API keys.
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::AppState;

/// An authenticated caller identified by a bearer token of the form
/// `<uuid>`. Card/cash claim and confirm handlers extract this and check it
/// against the booking's client/provider id.
pub struct CallerId(pub Uuid);

#[async_trait]
impl FromRequestParts<std::sync::Arc<AppState>> for CallerId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &std::sync::Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;
        let id = Uuid::parse_str(token).map_err(|_| AppError::Unauthorized)?;
        Ok(CallerId(id))
    }
}

/// An authenticated admin caller: the bearer token must constant-time-match
/// one of `ADMIN_TOKENS`. Approve/reject/execute/batch-export endpoints
/// require this.
pub struct AdminId(pub String);

#[async_trait]
impl FromRequestParts<std::sync::Arc<AppState>> for AdminId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &std::sync::Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;
        if !is_admin_token_valid(&state.config.admin_tokens, token) {
            return Err(AppError::Unauthorized);
        }
        Ok(AdminId(token.to_string()))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim)
}

/// Constant-time membership check against the configured admin token list —
/// the same length-then-`ct_eq` pattern the teacher uses for its API keys.
pub fn is_admin_token_valid(admin_tokens: &[String], candidate: &str) -> bool {
    let candidate_bytes = candidate.as_bytes();
    admin_tokens.iter().any(|valid| {
        let valid_bytes = valid.as_bytes();
        candidate_bytes.len() == valid_bytes.len()
            && bool::from(candidate_bytes.ct_eq(valid_bytes))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length_without_panicking() {
        let tokens = vec!["abc".to_string()];
        assert!(!is_admin_token_valid(&tokens, "ab"));
        assert!(!is_admin_token_valid(&tokens, "abcd"));
        assert!(is_admin_token_valid(&tokens, "abc"));
    }
}
