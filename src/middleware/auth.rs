//! Authentication middleware
//!
//! Resolves the gateway API token to a user before any other work

use crate::handlers::AppState;
use crate::utils::error::AppError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The user a request was authenticated as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Authentication middleware
///
/// Requires `Authorization: Bearer <token>` and inserts `AuthenticatedUser`
/// into the request extensions
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&headers) else {
        warn!("Missing or malformed Authorization header");
        return AppError::InvalidCredential("Missing API key".to_string()).into_response();
    };

    if !validate_token_format(token) {
        warn!("Rejected malformed API key");
        return AppError::InvalidCredential("Invalid API key".to_string()).into_response();
    }

    match state.tokens.authenticate(token).await {
        Ok(Some(user_id)) => {
            debug!(user = %user_id, "Authentication successful");
            request.extensions_mut().insert(AuthenticatedUser { user_id });
            next.run(request).await
        }
        Ok(None) => {
            warn!("Unknown API key");
            AppError::InvalidCredential("Invalid API key".to_string()).into_response()
        }
        Err(e) => {
            error!("Token lookup failed: {}", e);
            AppError::Internal(format!("Token lookup failed: {}", e)).into_response()
        }
    }
}

/// Extract the token from a `Bearer` authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Validate token format
pub fn validate_token_format(token: &str) -> bool {
    // Check minimum length
    if token.len() < 8 {
        return false;
    }

    // Check for invalid characters (spaces, newlines, etc.)
    !token.contains(char::is_whitespace)
}
