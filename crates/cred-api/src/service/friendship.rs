//! Friendship lifecycle.
//!
//! A mutual friendship is two directed edges. Creating one writes
//! `requested` on the initiator's side and `pending` on the target's side.
//! Afterwards each side only ever changes its own edge, except that accepting
//! also confirms a reciprocal edge that is still `requested`/`pending`.

use tracing::info;

use cred_db::Database;
use cred_db::models::FriendshipRow;
use cred_types::FriendshipStatus;
use cred_types::api::CreateFriendshipsRequest;
use cred_types::models::{FriendSummary, Friendship};

use crate::error::AppError;
use crate::service::user::normalize_email;

pub struct FriendshipService<'a> {
    db: &'a Database,
}

impl<'a> FriendshipService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Every edge starting at `user_id`, with the friend embedded.
    pub fn list(&self, user_id: i64) -> Result<Vec<Friendship>, AppError> {
        self.require_user(user_id)?;
        into_models(self.db.list_friendships(user_id)?)
    }

    /// Users whose pair with `user_id` is accepted on both sides.
    pub fn active_friends(&self, user_id: i64) -> Result<Vec<FriendSummary>, AppError> {
        self.require_user(user_id)?;
        let friends = into_models(self.db.list_active_friendships(user_id)?)?
            .into_iter()
            .filter_map(|f| f.friend)
            .collect();
        Ok(friends)
    }

    pub fn get(&self, friendship_id: i64) -> Result<Friendship, AppError> {
        let row = self
            .db
            .get_friendship(friendship_id)?
            .ok_or_else(|| friendship_not_found(friendship_id))?;
        Ok(row.into_model()?)
    }

    /// Like `get`, but a caller who is neither a party nor an admin sees the
    /// same not found error as for a missing id.
    pub fn get_for(
        &self,
        friendship_id: i64,
        caller_id: i64,
        caller_is_admin: bool,
    ) -> Result<Friendship, AppError> {
        let friendship = self.get(friendship_id)?;
        let party = caller_id == friendship.user_id || caller_id == friendship.friend_id;
        if !party && !caller_is_admin {
            return Err(friendship_not_found(friendship_id));
        }
        Ok(friendship)
    }

    /// Resolves the targets and creates a requested/pending pair with each.
    ///
    /// Unmatched identifiers are skipped; if nothing matches the call fails
    /// with not found. Naming the initiator as a target is rejected before
    /// anything is written. Pairs that already exist are returned as they are.
    pub fn create_mutual(
        &self,
        user_id: i64,
        req: &CreateFriendshipsRequest,
    ) -> Result<Vec<Friendship>, AppError> {
        if req.is_empty() {
            return Err(AppError::BadRequest(
                "Provide at least one of user_ids, emails or usernames".into(),
            ));
        }

        self.require_user(user_id)?;

        let emails: Vec<String> = req.emails.iter().map(|e| normalize_email(e)).collect();
        let usernames: Vec<String> = req.usernames.iter().map(|u| u.trim().to_string()).collect();
        let targets = self
            .db
            .find_users_by_targets(&req.user_ids, &emails, &usernames)?;

        if targets.is_empty() {
            return Err(AppError::NotFound("No matching users found".into()));
        }
        if targets.iter().any(|t| t.id == user_id) {
            return Err(AppError::BadRequest("Users cannot befriend themselves".into()));
        }

        let friend_ids: Vec<i64> = targets.iter().map(|t| t.id).collect();
        into_models(self.db.create_mutual_friendships(user_id, &friend_ids)?)
    }

    /// Moves the acting user's edge to `new_status`.
    ///
    /// Only `accepted`, `declined`, `rejected` and `banned` can be requested.
    /// Accepting also confirms a reciprocal edge that is still
    /// `requested`/`pending`; the other statuses never touch the reciprocal edge.
    pub fn change_status(
        &self,
        user_id: i64,
        friend_id: i64,
        new_status: FriendshipStatus,
    ) -> Result<Friendship, AppError> {
        if !new_status.is_terminal() {
            return Err(AppError::BadRequest(format!(
                "Cannot change a friendship status to '{}'",
                new_status
            )));
        }

        self.require_user(user_id)?;
        self.require_user(friend_id)?;

        let current = self
            .db
            .get_edge(user_id, friend_id)?
            .ok_or_else(|| no_edge(user_id, friend_id))?;
        let previous = current.status()?;

        let updated = match new_status {
            FriendshipStatus::Accepted => self.db.accept_edge(user_id, friend_id)?,
            other => self.db.set_edge_status(user_id, friend_id, other)?,
        }
        .ok_or_else(|| no_edge(user_id, friend_id))?;

        info!(
            "Friendship {} -> {}: {} => {}",
            user_id, friend_id, previous, new_status
        );
        Ok(updated.into_model()?)
    }

    /// Marks the edge `user_id` → `friend_id` rejected. The row is kept.
    pub fn reject(&self, user_id: i64, friend_id: i64) -> Result<Friendship, AppError> {
        let row = self
            .db
            .set_edge_status(user_id, friend_id, FriendshipStatus::Rejected)?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No friendship from user '{}' to user '{}'",
                    user_id, friend_id
                ))
            })?;
        info!("Friendship {} -> {} rejected", user_id, friend_id);
        Ok(row.into_model()?)
    }

    /// Rejects every existing edge from `user_id` to the given users and
    /// returns the rows that were updated.
    pub fn reject_many(&self, user_id: i64, friend_ids: &[i64]) -> Result<Vec<Friendship>, AppError> {
        if friend_ids.is_empty() {
            return Err(AppError::BadRequest("userIds cannot be empty".into()));
        }
        let rows = self.db.reject_edges(user_id, friend_ids)?;
        info!("User {} rejected {} friendships", user_id, rows.len());
        into_models(rows)
    }

    fn require_user(&self, user_id: i64) -> Result<(), AppError> {
        match self.db.get_user_by_id(user_id)? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("User '{}' not found", user_id))),
        }
    }
}

fn friendship_not_found(friendship_id: i64) -> AppError {
    AppError::NotFound(format!("Friendship '{}' not found", friendship_id))
}

fn no_edge(user_id: i64, friend_id: i64) -> AppError {
    AppError::Conflict(format!(
        "No friendship exists from user '{}' to user '{}'",
        user_id, friend_id
    ))
}

fn into_models(rows: Vec<FriendshipRow>) -> Result<Vec<Friendship>, AppError> {
    rows.into_iter()
        .map(|row| row.into_model().map_err(AppError::from))
        .collect()
}
