use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use cred_types::api::{
    Claims, CreateResourceRequest, DeleteMetadataRequest, UpdateUserRequest,
    UpsertMetadataRequest,
};

use crate::auth::AppState;
use crate::error::{AppError, AppJson, AppPath};
use crate::middleware::{require_admin, require_self_or_admin};
use crate::service::resource::ResourceService;
use crate::service::user::UserService;
use crate::with_db;

// -- Users --

/// GET /users — admins only.
pub async fn get_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&claims)?;

    let users = with_db(&state, |db| UserService::new(db).list()).await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Found users",
        "users": users,
    })))
}

pub async fn get_user(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let user = with_db(&state, move |db| UserService::new(db).get(user_id)).await?;

    Ok(Json(json!({
        "ok": true,
        "message": "User found",
        "user": user,
    })))
}

/// PUT /users/{user_id} — what the body may change depends on whether the
/// caller is an admin.
pub async fn put_user(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let is_admin = claims.is_admin;
    let user = with_db(&state, move |db| UserService::new(db).update(user_id, req, is_admin)).await?;

    Ok(Json(json!({
        "ok": true,
        "message": "User updated",
        "user": user,
    })))
}

/// DELETE /users/{user_id}/permissions/{resource_name} — admins only.
pub async fn delete_permission(
    State(state): State<AppState>,
    AppPath((user_id, resource_name)): AppPath<(i64, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&claims)?;

    let name = resource_name.clone();
    with_db(&state, move |db| UserService::new(db).delete_permission(user_id, &name)).await?;

    Ok(Json(json!({
        "ok": true,
        "message": format!("Permission for '{}' deleted", resource_name),
    })))
}

// -- Metadata --

pub async fn put_metadata(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<UpsertMetadataRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let metadata = with_db(&state, move |db| {
        UserService::new(db).upsert_metadata(user_id, &req.metadata)
    })
    .await?;

    Ok(Json(json!({
        "ok": true,
        "message": "User metadata updated",
        "metadata": metadata,
    })))
}

pub async fn delete_metadata(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<DeleteMetadataRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let removed = with_db(&state, move |db| {
        UserService::new(db).delete_metadata(user_id, &req.keys)
    })
    .await?;

    Ok(Json(json!({
        "ok": true,
        "message": format!("Deleted {} metadata entries", removed),
    })))
}

// -- Resources --

pub async fn get_resources(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let resources = with_db(&state, |db| ResourceService::new(db).list()).await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Found resources",
        "resources": resources,
    })))
}

/// POST /resources — admins only.
pub async fn post_resource(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<CreateResourceRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&claims)?;

    let resource = with_db(&state, move |db| ResourceService::new(db).create(req)).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "message": "Resource created",
            "resource": resource,
        })),
    ))
}
