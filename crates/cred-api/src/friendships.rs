use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
    routing::{MethodRouter, put},
};
use serde_json::json;

use cred_types::FriendshipStatus;
use cred_types::api::{Claims, CreateFriendshipsRequest, RejectFriendshipsRequest};

use crate::auth::AppState;
use crate::error::{AppError, AppJson, AppPath};
use crate::middleware::require_self_or_admin;
use crate::service::friendship::FriendshipService;
use crate::with_db;

/// GET /users/{user_id}/friendships
pub async fn get_friendships(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let friendships = with_db(&state, move |db| FriendshipService::new(db).list(user_id)).await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Found user friendships",
        "friendships": friendships,
    })))
}

/// POST /users/{user_id}/friendships — body `{user_ids?, emails?, usernames?}`.
pub async fn post_friendships(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<CreateFriendshipsRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let friendships = with_db(&state, move |db| {
        FriendshipService::new(db).create_mutual(user_id, &req)
    })
    .await?;

    Ok(Json(json!({
        "ok": true,
        "message": "User friendships created",
        "friendships": friendships,
    })))
}

/// GET /users/{user_id}/friends — only pairs accepted on both sides.
pub async fn get_friends(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let friends = with_db(&state, move |db| FriendshipService::new(db).active_friends(user_id)).await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Found user friends",
        "friends": friends,
    })))
}

/// GET /friendships/{friendship_id} — visible to both parties and admins.
pub async fn get_friendship(
    State(state): State<AppState>,
    AppPath(friendship_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let friendship = with_db(&state, move |db| {
        FriendshipService::new(db).get_for(friendship_id, claims.sub, claims.is_admin)
    })
    .await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Friendship found",
        "friendship": friendship,
    })))
}

/// DELETE /users/{user_id}/friendships/{friend_id} — marks the edge rejected.
pub async fn delete_friendship(
    State(state): State<AppState>,
    AppPath((user_id, friend_id)): AppPath<(i64, i64)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    with_db(&state, move |db| FriendshipService::new(db).reject(user_id, friend_id)).await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Friendship rejected",
    })))
}

/// DELETE /users/{user_id}/friendships — body `{userIds}`.
pub async fn delete_friendships(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<RejectFriendshipsRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let friendships = with_db(&state, move |db| {
        FriendshipService::new(db).reject_many(user_id, &req.user_ids)
    })
    .await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Friendships rejected.",
        "friendships": friendships,
    })))
}

pub async fn update_friendship_status(
    new_status: FriendshipStatus,
    State(state): State<AppState>,
    AppPath((user_id, friend_id)): AppPath<(i64, i64)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_self_or_admin(&claims, user_id)?;

    let friendship = with_db(&state, move |db| {
        FriendshipService::new(db).change_status(user_id, friend_id, new_status)
    })
    .await?;

    Ok(Json(json!({
        "ok": true,
        "message": format!("Friendship status updated to '{}'", new_status),
        "friendship": friendship,
    })))
}

/// PUT handler for `update_friendship_status` fixed to one target status.
pub fn status_route(new_status: FriendshipStatus) -> MethodRouter<AppState> {
    put(
        move |state: State<AppState>, path: AppPath<(i64, i64)>, claims: Extension<Claims>| {
            update_friendship_status(new_status, state, path, claims)
        },
    )
}
