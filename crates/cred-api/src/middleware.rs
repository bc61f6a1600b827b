use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use cred_types::api::Claims;

use crate::auth::AppState;
use crate::error::AppError;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing access token".into()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected access token: {}", e);
        AppError::Unauthorized("Invalid access token".into())
    })?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

/// Must run inside `require_auth`. Inactive accounts are refused.
pub async fn require_active(req: Request, next: Next) -> Result<Response, AppError> {
    let active = req
        .extensions()
        .get::<Claims>()
        .map(|claims| claims.is_active)
        .ok_or_else(|| AppError::Unauthorized("Missing access token".into()))?;

    if !active {
        return Err(AppError::Forbidden("User account is not active".into()));
    }

    Ok(next.run(req).await)
}

pub fn require_admin(claims: &Claims) -> Result<(), AppError> {
    if claims.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin access required".into()))
    }
}

/// Routes under `/users/{user_id}` act on behalf of that user.
pub fn require_self_or_admin(claims: &Claims, user_id: i64) -> Result<(), AppError> {
    if claims.sub == user_id || claims.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Not allowed to act on behalf of user '{}'",
            user_id
        )))
    }
}
