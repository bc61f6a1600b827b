use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use cred_types::FriendshipStatus;

use crate::auth::{self, AppState};
use crate::error::AppError;
use crate::friendships::{self, status_route};
use crate::middleware::{require_active, require_auth};
use crate::users;

/// All routes. Everything except registration and token creation needs a
/// valid access token for an active account.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/token", post(auth::login))
        .method_not_allowed_fallback(method_not_allowed);

    let protected_routes = Router::new()
        .route("/users", get(users::get_users))
        .route("/users/{user_id}", get(users::get_user).put(users::put_user))
        .route(
            "/users/{user_id}/permissions/{resource_name}",
            delete(users::delete_permission),
        )
        .route(
            "/users/{user_id}/metadata",
            put(users::put_metadata).delete(users::delete_metadata),
        )
        .route("/resources", get(users::get_resources).post(users::post_resource))
        .route(
            "/users/{user_id}/friendships",
            get(friendships::get_friendships)
                .post(friendships::post_friendships)
                .delete(friendships::delete_friendships),
        )
        .route("/users/{user_id}/friends", get(friendships::get_friends))
        .route("/friendships/{friendship_id}", get(friendships::get_friendship))
        .route(
            "/users/{user_id}/friendships/{friend_id}",
            delete(friendships::delete_friendship),
        )
        .route(
            "/users/{user_id}/friendships/{friend_id}/accept",
            status_route(FriendshipStatus::Accepted),
        )
        .route(
            "/users/{user_id}/friendships/{friend_id}/decline",
            status_route(FriendshipStatus::Declined),
        )
        .route(
            "/users/{user_id}/friendships/{friend_id}/reject",
            status_route(FriendshipStatus::Rejected),
        )
        .route(
            "/users/{user_id}/friendships/{friend_id}/ban",
            status_route(FriendshipStatus::Banned),
        )
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn(require_active))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use cred_db::Database;
    use cred_db::queries::UserChanges;

    use super::*;
    use crate::auth::AppStateInner;

    fn app() -> (Router, AppState) {
        let state: AppState = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            token_ttl: chrono::Duration::hours(1),
        });
        (router(state.clone()), state)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Registers a user and returns (id, token).
    async fn register(app: &Router, username: &str, email: &str) -> (i64, String) {
        let (status, body) = send(
            app,
            Method::POST,
            "/register",
            None,
            Some(json!({ "username": username, "email": email, "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn friendship_request_and_accept_flow() {
        let (app, _) = app();
        let (a, token_a) = register(&app, "a", "a@x.com").await;
        let (b, token_b) = register(&app, "b", "b@x.com").await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/users/{}/friendships", a),
            Some(&token_a),
            Some(json!({ "emails": ["b@x.com"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "User friendships created");
        assert_eq!(body["friendships"][0]["status"], "requested");
        assert_eq!(body["friendships"][0]["friend"]["username"], "b");

        let (_, body) = send(&app, Method::GET, &format!("/users/{}/friendships", b), Some(&token_b), None).await;
        assert_eq!(body["friendships"][0]["status"], "pending");

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/users/{}/friendships/{}/accept", b, a),
            Some(&token_b),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Friendship status updated to 'accepted'");
        assert_eq!(body["friendship"]["status"], "accepted");

        let (_, body) = send(&app, Method::GET, &format!("/users/{}/friendships", a), Some(&token_a), None).await;
        assert_eq!(body["friendships"][0]["status"], "accepted");

        let (_, body) = send(&app, Method::GET, &format!("/users/{}/friends", a), Some(&token_a), None).await;
        assert_eq!(body["friends"], json!([{ "id": b, "username": "b" }]));
    }

    #[tokio::test]
    async fn delete_rejects_without_removing() {
        let (app, _) = app();
        let (a, token_a) = register(&app, "a", "a@x.com").await;
        let (b, token_b) = register(&app, "b", "b@x.com").await;

        let (_, body) = send(
            &app,
            Method::POST,
            &format!("/users/{}/friendships", a),
            Some(&token_a),
            Some(json!({ "user_ids": [b] })),
        )
        .await;
        let friendship_id = body["friendships"][0]["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            Method::DELETE,
            &format!("/users/{}/friendships/{}", a, b),
            Some(&token_a),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "message": "Friendship rejected" }));

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/friendships/{}", friendship_id),
            Some(&token_b),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["friendship"]["status"], "rejected");
    }

    #[tokio::test]
    async fn bulk_reject_returns_updated_rows() {
        let (app, _) = app();
        let (a, token_a) = register(&app, "a", "a@x.com").await;
        let (b, _) = register(&app, "b", "b@x.com").await;
        let (c, _) = register(&app, "c", "c@x.com").await;

        send(
            &app,
            Method::POST,
            &format!("/users/{}/friendships", a),
            Some(&token_a),
            Some(json!({ "usernames": ["b", "c"] })),
        )
        .await;

        let (status, body) = send(
            &app,
            Method::DELETE,
            &format!("/users/{}/friendships", a),
            Some(&token_a),
            Some(json!({ "userIds": [b, c] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Friendships rejected.");
        let rows = body["friendships"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|f| f["status"] == "rejected"));
    }

    #[tokio::test]
    async fn error_statuses_use_envelope() {
        let (app, _) = app();
        let (a, token_a) = register(&app, "a", "a@x.com").await;
        let (b, _) = register(&app, "b", "b@x.com").await;

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/users/{}/friendships/{}/ban", a, b),
            Some(&token_a),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/users/{}/friendships", a),
            Some(&token_a),
            Some(json!({ "user_ids": [a] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::GET, "/friendships/999", Some(&token_a), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/users/{}/friendships", a),
            Some(&token_a),
            Some(json!({ "emails": ["nobody@x.com"] })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No matching users found");
    }

    #[tokio::test]
    async fn routing_errors_use_envelope() {
        let (app, _) = app();
        let (_, token_a) = register(&app, "a", "a@x.com").await;

        let (status, body) = send(&app, Method::GET, "/friendships/abc", Some(&token_a), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert!(body["message"].as_str().unwrap().contains("abc"));

        let (status, body) =
            send(&app, Method::PUT, "/users/1/friendships/x/accept", Some(&token_a), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        let (status, body) = send(&app, Method::GET, "/nowhere", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Route not found");

        let (status, body) = send(&app, Method::GET, "/register", None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn outsiders_get_not_found_for_friendships() {
        let (app, _) = app();
        let (a, token_a) = register(&app, "a", "a@x.com").await;
        let (b, _) = register(&app, "b", "b@x.com").await;
        let (_, token_c) = register(&app, "c", "c@x.com").await;

        let (_, body) = send(
            &app,
            Method::POST,
            &format!("/users/{}/friendships", a),
            Some(&token_a),
            Some(json!({ "user_ids": [b] })),
        )
        .await;
        let id = body["friendships"][0]["id"].as_i64().unwrap();

        let (status, body) =
            send(&app, Method::GET, &format!("/friendships/{}", id), Some(&token_c), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);

        let (status, _) =
            send(&app, Method::GET, &format!("/friendships/{}", id), Some(&token_a), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn requires_token_and_ownership() {
        let (app, _) = app();
        let (a, _) = register(&app, "a", "a@x.com").await;
        let (_, token_b) = register(&app, "b", "b@x.com").await;

        let uri = format!("/users/{}/friendships", a);
        let (status, body) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["ok"], false);

        let (status, _) = send(&app, Method::GET, &uri, Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, Method::GET, &uri, Some(&token_b), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn inactive_accounts_are_refused() {
        let (app, state) = app();
        let (a, _) = register(&app, "a", "a@x.com").await;
        state
            .db
            .update_user(
                a,
                &UserChanges {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let (status, _) = send(
            &app,
            Method::POST,
            "/token",
            None,
            Some(json!({ "login": "a", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn login_token_carries_permissions() {
        let (app, state) = app();
        let (a, _) = register(&app, "admin", "admin@x.com").await;
        state
            .db
            .update_user(
                a,
                &UserChanges {
                    is_admin: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let (status, body) = send(
            &app,
            Method::POST,
            "/token",
            None,
            Some(json!({ "login": "admin@x.com", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let admin_token = body["token"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            Method::POST,
            "/resources",
            Some(&admin_token),
            Some(json!({ "name": "reports", "actions": ["read", "write"] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/users/{}", a),
            Some(&admin_token),
            Some(json!({ "permissions": { "reports": { "actions": ["read", "fly"] } } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["permissions"]["reports"]["actions"], json!(["read"]));

        let (_, body) = send(
            &app,
            Method::POST,
            "/token",
            None,
            Some(json!({ "login": "admin", "password": "correct horse" })),
        )
        .await;
        let token = body["token"].as_str().unwrap();
        let claims = jsonwebtoken::decode::<cred_types::api::Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(b"test-secret"),
            &jsonwebtoken::Validation::default(),
        )
        .unwrap()
        .claims;
        assert!(claims.is_admin);
        assert_eq!(claims.permissions["reports"].actions, vec!["read"]);
        assert_eq!(claims.permissions["reports"].id, None);
    }

    #[tokio::test]
    async fn non_admin_cannot_promote_self() {
        let (app, _) = app();
        let (a, token_a) = register(&app, "a", "a@x.com").await;

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/users/{}", a),
            Some(&token_a),
            Some(json!({ "isAdmin": true, "isActive": false, "phone": "555-0100" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["isAdmin"], false);
        assert_eq!(body["user"]["isActive"], true);
        assert_eq!(body["user"]["phone"], "555-0100");

        let (status, _) = send(&app, Method::GET, "/users", Some(&token_a), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (app, _) = app();
        let (a, token_a) = register(&app, "a", "a@x.com").await;

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/users/{}/friendships", a))
            .header(header::AUTHORIZATION, format!("Bearer {}", token_a))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
