use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{Metadata, PermissionMap};

// -- JWT Claims --

/// Access token payload. `sub` is the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub is_active: bool,
    pub is_admin: bool,
    #[serde(default)]
    pub permissions: PermissionMap,
    pub exp: usize,
}

/// Usernames end up in URLs, so only unreserved characters are allowed.
pub fn validate_url_safe(value: &str) -> Result<(), ValidationError> {
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    if safe {
        Ok(())
    } else {
        let mut err = ValidationError::new("url_safe");
        err.message = Some("Username must be URL safe.".into());
        Err(err)
    }
}

// -- Auth --

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(
        length(min = 1, max = 64, message = "Username cannot be blank."),
        custom(function = "validate_url_safe")
    )]
    pub username: String,
    #[validate(email(message = "Must use a valid email address."))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters."))]
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Username or email.
    pub login: String,
    pub password: String,
}

// -- Users --

/// Body of `PUT /users/{user_id}`. Which fields take effect depends on the
/// caller's role; see `UserUpdate` in cred-api.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(
        length(min = 1, max = 64, message = "Username cannot be blank."),
        custom(function = "validate_url_safe")
    )]
    pub username: Option<String>,
    #[validate(email(message = "Must use a valid email address."))]
    pub email: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters."))]
    pub password: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub permissions: Option<PermissionMap>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertMetadataRequest {
    pub metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMetadataRequest {
    pub keys: Vec<String>,
}

// -- Resources --

#[derive(Debug, Deserialize, Validate)]
pub struct CreateResourceRequest {
    #[validate(length(min = 1, message = "Resource name cannot be blank."))]
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

// -- Friendships --

/// Targets of a new mutual friendship. Any combination may be given.
#[derive(Debug, Default, Deserialize)]
pub struct CreateFriendshipsRequest {
    #[serde(default)]
    pub user_ids: Vec<i64>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
}

impl CreateFriendshipsRequest {
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty() && self.emails.is_empty() && self.usernames.is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectFriendshipsRequest {
    #[serde(rename = "userIds", alias = "user_ids")]
    pub user_ids: Vec<i64>,
}
