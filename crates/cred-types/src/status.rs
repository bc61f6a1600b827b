use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one directed friendship edge.
///
/// Stored and serialized in lowercase (`"requested"`, `"pending"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    /// This side sent the request.
    Requested,
    /// This side received a request and has not answered yet.
    Pending,
    Accepted,
    Declined,
    Rejected,
    Banned,
}

impl FriendshipStatus {
    pub const ALL: [FriendshipStatus; 6] = [
        Self::Requested,
        Self::Pending,
        Self::Accepted,
        Self::Declined,
        Self::Rejected,
        Self::Banned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Rejected => "rejected",
            Self::Banned => "banned",
        }
    }

    /// Statuses a user may move their own edge into.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Declined | Self::Rejected | Self::Banned
        )
    }

    /// Declined, rejected and banned override whatever the other side holds.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Declined | Self::Rejected | Self::Banned)
    }

    /// Effective state of a pair given the statuses of both edges.
    ///
    /// A blocking side wins (banned over rejected over declined). Two accepted
    /// edges make an accepted pair; every other combination is still pending.
    pub fn effective(a: FriendshipStatus, b: FriendshipStatus) -> FriendshipStatus {
        for blocking in [Self::Banned, Self::Rejected, Self::Declined] {
            if a == blocking || b == blocking {
                return blocking;
            }
        }

        if a == Self::Accepted && b == Self::Accepted {
            Self::Accepted
        } else {
            Self::Pending
        }
    }
}

impl fmt::Display for FriendshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown friendship status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for FriendshipStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FriendshipStatus::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("ACCEPTED".parse::<FriendshipStatus>().unwrap(), Accepted);
        assert_eq!("banned".parse::<FriendshipStatus>().unwrap(), Banned);
        assert!("friends".parse::<FriendshipStatus>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Pending).unwrap(), "\"pending\"");
        let parsed: FriendshipStatus = serde_json::from_str("\"declined\"").unwrap();
        assert_eq!(parsed, Declined);
    }

    #[test]
    fn blocking_side_overrides_pair() {
        assert_eq!(FriendshipStatus::effective(Accepted, Declined), Declined);
        assert_eq!(FriendshipStatus::effective(Rejected, Accepted), Rejected);
        assert_eq!(FriendshipStatus::effective(Declined, Banned), Banned);
        assert_eq!(FriendshipStatus::effective(Rejected, Declined), Rejected);
    }

    #[test]
    fn accepted_only_when_both_accept() {
        assert_eq!(FriendshipStatus::effective(Accepted, Accepted), Accepted);
        assert_eq!(FriendshipStatus::effective(Accepted, Pending), Pending);
        assert_eq!(FriendshipStatus::effective(Requested, Pending), Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!Requested.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(Accepted.is_terminal());
        assert!(Banned.is_terminal());
    }
}
