//! Database row types. These map directly to SQLite rows and stay distinct from
//! the cred-types API models; `into_model` does the conversion.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::warn;

use cred_types::FriendshipStatus;
use cred_types::models::{FriendSummary, Friendship, Metadata, Resource, User};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub facebook_id: Option<String>,
    pub github_id: Option<String>,
    pub twitter_id: Option<String>,
    pub google_id: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct FriendshipRow {
    pub id: i64,
    pub user_id: i64,
    pub friend_id: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    /// Filled by queries that join the friend's user row.
    pub friend_username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResourceRow {
    pub id: i64,
    pub name: String,
    pub actions: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PermissionRow {
    pub id: i64,
    pub user_id: i64,
    pub resource_id: i64,
    pub resource_name: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MetadataRow {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub value: String,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}

fn timestamp_or_default(raw: &str, what: &str, id: i64) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt {} '{}' on row {}", what, raw, id);
        DateTime::default()
    })
}

impl UserRow {
    /// API view without permissions or metadata attached.
    pub fn into_model(self) -> User {
        User {
            login_at: self.login_at.as_deref().and_then(parse_timestamp),
            created_at: timestamp_or_default(&self.created_at, "created_at", self.id),
            updated_at: timestamp_or_default(&self.updated_at, "updated_at", self.id),
            id: self.id,
            username: self.username,
            email: self.email,
            phone: self.phone,
            is_active: self.is_active,
            is_admin: self.is_admin,
            facebook_id: self.facebook_id,
            github_id: self.github_id,
            twitter_id: self.twitter_id,
            google_id: self.google_id,
            permissions: None,
            metadata: None,
        }
    }
}

impl FriendshipRow {
    pub fn status(&self) -> Result<FriendshipStatus> {
        self.status
            .parse()
            .map_err(|e| anyhow!("Friendship {}: {}", self.id, e))
    }

    pub fn into_model(self) -> Result<Friendship> {
        let status = self.status()?;
        let friend = self.friend_username.map(|username| FriendSummary {
            id: self.friend_id,
            username,
        });

        Ok(Friendship {
            created_at: timestamp_or_default(&self.created_at, "created_at", self.id),
            updated_at: timestamp_or_default(&self.updated_at, "updated_at", self.id),
            id: self.id,
            user_id: self.user_id,
            friend_id: self.friend_id,
            status,
            friend,
        })
    }
}

impl ResourceRow {
    pub fn into_model(self) -> Resource {
        Resource {
            created_at: timestamp_or_default(&self.created_at, "created_at", self.id),
            id: self.id,
            name: self.name,
            actions: self.actions,
        }
    }
}

impl MetadataRow {
    pub fn into_model(self) -> Metadata {
        Metadata {
            key: self.key,
            value: self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        let naive = parse_timestamp("2024-03-01 12:30:00").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        assert!(parse_timestamp("2024-03-01T12:30:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn corrupt_status_is_an_error() {
        let row = FriendshipRow {
            id: 1,
            user_id: 1,
            friend_id: 2,
            status: "besties".into(),
            created_at: "2024-03-01 12:30:00".into(),
            updated_at: "2024-03-01 12:30:00".into(),
            friend_username: None,
        };
        assert!(row.into_model().is_err());
    }
}
