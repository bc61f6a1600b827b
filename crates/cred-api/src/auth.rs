use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;

use cred_db::Database;
use cred_types::api::{Claims, LoginRequest, RegisterRequest};
use cred_types::models::{PermissionActions, User};

use crate::error::{AppError, AppJson};
use crate::service::user::UserService;
use crate::with_db;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
}

pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = with_db(&state, move |db| UserService::new(db).register(req)).await?;
    let token = create_token(&state, &user)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "message": "User registered",
            "user": user,
            "token": token,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = with_db(&state, move |db| {
        UserService::new(db).authenticate(&req.login, &req.password)
    })
    .await?;
    let token = create_token(&state, &user)?;

    Ok(Json(json!({
        "ok": true,
        "message": "Access token created",
        "token": token,
        "user": user,
    })))
}

/// Signs an access token carrying the user's flags and permission actions.
pub fn create_token(state: &AppStateInner, user: &User) -> Result<String, AppError> {
    let expires_at = chrono::Utc::now()
        .checked_add_signed(state.token_ttl)
        .ok_or_else(|| AppError::Internal(format!("Token lifetime {} overflows", state.token_ttl)))?;

    let permissions = user
        .permissions
        .iter()
        .flatten()
        .map(|(name, perm)| {
            (
                name.clone(),
                PermissionActions {
                    id: None,
                    actions: perm.actions.clone(),
                },
            )
        })
        .collect();

    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        is_active: user.is_active,
        is_admin: user.is_admin,
        permissions,
        exp: expires_at.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token signing failed: {}", e)))
}
