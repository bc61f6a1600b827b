//! Accounts, permissions and metadata.
//!
//! Normalization and password hashing happen here, explicitly, before any row
//! is written.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::{info, warn};
use validator::Validate;

use cred_db::Database;
use cred_db::models::PermissionRow;
use cred_db::queries::{NewUser, UserChanges};
use cred_types::api::{RegisterRequest, UpdateUserRequest};
use cred_types::models::{Metadata, PermissionActions, PermissionMap, User};

use crate::error::AppError;

/// Trimmed and lowercased. Emails are unique per account in this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The subset of a user update a caller is allowed to apply.
///
/// Built from the raw request by `for_caller`: `isActive`, `isAdmin` and
/// `permissions` only survive for admins, and a blank password means "keep
/// the current one".
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub permissions: Option<PermissionMap>,
}

impl UserUpdate {
    pub fn for_caller(req: UpdateUserRequest, caller_is_admin: bool) -> Self {
        let admin_only = |value: Option<bool>| if caller_is_admin { value } else { None };

        Self {
            username: req.username,
            email: req.email,
            password: req.password.filter(|p| !p.is_empty()),
            phone: req.phone,
            is_active: admin_only(req.is_active),
            is_admin: admin_only(req.is_admin),
            permissions: req.permissions.filter(|_| caller_is_admin),
        }
    }
}

pub struct UserService<'a> {
    db: &'a Database,
}

impl<'a> UserService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn register(&self, mut req: RegisterRequest) -> Result<User, AppError> {
        req.username = req.username.trim().to_string();
        req.email = normalize_email(&req.email);
        req.validate()?;

        if self.db.get_user_by_username(&req.username)?.is_some() {
            return Err(AppError::Conflict(format!(
                "Username '{}' is already taken",
                req.username
            )));
        }
        if self.db.get_user_by_email(&req.email)?.is_some() {
            return Err(AppError::Conflict(format!(
                "Email '{}' is already registered",
                req.email
            )));
        }

        let password_hash = hash_password(&req.password)?;
        let row = self.db.create_user(&NewUser {
            username: &req.username,
            email: &req.email,
            password_hash: Some(&password_hash),
            phone: req.phone.as_deref(),
        })?;

        info!("Registered user {} ({})", row.id, row.username);
        Ok(row.into_model())
    }

    /// Checks a username-or-email and password pair and records the login.
    pub fn authenticate(&self, login: &str, password: &str) -> Result<User, AppError> {
        let login = login.trim();
        let lookup = if login.contains('@') {
            normalize_email(login)
        } else {
            login.to_string()
        };

        let invalid = || AppError::Unauthorized("Invalid login credentials".into());

        let row = self.db.get_user_by_login(&lookup)?.ok_or_else(invalid)?;
        let hash = row.password.as_deref().ok_or_else(invalid)?;
        if !verify_password(password, hash)? {
            warn!("Failed login for user {}", row.id);
            return Err(invalid());
        }
        if !row.is_active {
            return Err(AppError::Forbidden("User account is not active".into()));
        }

        self.db.touch_login(row.id)?;
        self.get(row.id)
    }

    /// Full user view with permissions and metadata.
    pub fn get(&self, user_id: i64) -> Result<User, AppError> {
        let row = self
            .db
            .get_user_by_id(user_id)?
            .ok_or_else(|| user_not_found(user_id))?;

        let mut user = row.into_model();
        user.permissions = Some(permission_map(self.db.list_permissions(user_id)?));
        user.metadata = Some(
            self.db
                .list_metadata(user_id)?
                .into_iter()
                .map(|m| m.into_model())
                .collect(),
        );
        Ok(user)
    }

    pub fn list(&self) -> Result<Vec<User>, AppError> {
        Ok(self
            .db
            .list_users()?
            .into_iter()
            .map(|row| row.into_model())
            .collect())
    }

    pub fn update(
        &self,
        user_id: i64,
        mut req: UpdateUserRequest,
        caller_is_admin: bool,
    ) -> Result<User, AppError> {
        req.username = req.username.map(|u| u.trim().to_string());
        req.email = req.email.as_deref().map(normalize_email);
        req.password = req.password.filter(|p| !p.is_empty());
        req.validate()?;

        let update = UserUpdate::for_caller(req, caller_is_admin);

        let password_hash = update.password.as_deref().map(hash_password).transpose()?;

        let changes = UserChanges {
            username: update.username,
            email: update.email,
            password_hash,
            phone: update.phone,
            is_active: update.is_active,
            is_admin: update.is_admin,
        };
        let grants = match &update.permissions {
            Some(permissions) => self.permission_grants(permissions)?,
            None => Vec::new(),
        };

        self.db
            .update_user_with_permissions(user_id, &changes, &grants)?
            .ok_or_else(|| user_not_found(user_id))?;

        info!("Updated user {}", user_id);
        self.get(user_id)
    }

    /// For every known resource named in `permissions`, stores the valid
    /// subset of the requested actions. Unknown resource names are ignored.
    pub fn update_permissions(
        &self,
        user_id: i64,
        permissions: &PermissionMap,
    ) -> Result<Vec<PermissionRow>, AppError> {
        self.permission_grants(permissions)?
            .into_iter()
            .map(|(resource_id, actions)| {
                self.db
                    .upsert_permission(user_id, resource_id, &actions)
                    .map_err(AppError::from)
            })
            .collect()
    }

    /// `(resource_id, actions)` pairs for the known resources in `permissions`.
    fn permission_grants(
        &self,
        permissions: &PermissionMap,
    ) -> Result<Vec<(i64, Vec<String>)>, AppError> {
        let mut grants = Vec::new();
        for resource in self.db.list_resources()? {
            let Some(requested) = permissions.get(&resource.name) else {
                continue;
            };
            let resource = resource.into_model();
            grants.push((resource.id, resource.valid_actions(&requested.actions)));
        }
        Ok(grants)
    }

    pub fn delete_permission(&self, user_id: i64, resource_name: &str) -> Result<(), AppError> {
        self.require_user(user_id)?;
        if !self.db.delete_permission(user_id, resource_name)? {
            return Err(AppError::NotFound(format!(
                "User '{}' has no matching permission for resource '{}'",
                user_id, resource_name
            )));
        }
        info!("Deleted permission '{}' of user {}", resource_name, user_id);
        Ok(())
    }

    pub fn upsert_metadata(
        &self,
        user_id: i64,
        entries: &[Metadata],
    ) -> Result<Vec<Metadata>, AppError> {
        self.require_user(user_id)?;
        if entries.iter().any(|m| m.key.trim().is_empty()) {
            return Err(AppError::BadRequest("Metadata keys cannot be blank".into()));
        }
        entries
            .iter()
            .map(|m| {
                self.db
                    .upsert_metadata(user_id, m.key.trim(), &m.value)
                    .map(|row| row.into_model())
                    .map_err(AppError::from)
            })
            .collect()
    }

    /// Unknown keys are skipped silently.
    pub fn delete_metadata(&self, user_id: i64, keys: &[String]) -> Result<usize, AppError> {
        self.require_user(user_id)?;
        Ok(self.db.delete_metadata(user_id, keys)?)
    }

    fn require_user(&self, user_id: i64) -> Result<(), AppError> {
        self.db
            .get_user_by_id(user_id)?
            .map(|_| ())
            .ok_or_else(|| user_not_found(user_id))
    }
}

fn user_not_found(user_id: i64) -> AppError {
    AppError::NotFound(format!("User '{}' not found", user_id))
}

fn permission_map(rows: Vec<PermissionRow>) -> PermissionMap {
    rows.into_iter()
        .map(|p| {
            (
                p.resource_name,
                PermissionActions {
                    id: Some(p.id),
                    actions: p.actions,
                },
            )
        })
        .collect()
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Stored password hash is corrupt: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
