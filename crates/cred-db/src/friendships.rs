use anyhow::Result;
use rusqlite::{Connection, Row};
use tracing::{debug, info};

use cred_types::FriendshipStatus;

use crate::Database;
use crate::models::FriendshipRow;
use crate::queries::{OptionalExt, placeholders};

/// Edges are always read with the friend's username joined in.
const FRIENDSHIP_SELECT: &str = "SELECT f.id, f.user_id, f.friend_id, f.status, f.created_at, f.updated_at, u.username
     FROM friendships f
     LEFT JOIN users u ON u.id = f.friend_id";

impl Database {
    pub fn get_friendship(&self, id: i64) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE f.id = ?1", FRIENDSHIP_SELECT);
            Ok(conn.query_row(&sql, [id], map_friendship).optional()?)
        })
    }

    /// The directed edge `user_id` → `friend_id`.
    pub fn get_edge(&self, user_id: i64, friend_id: i64) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| query_edge(conn, user_id, friend_id))
    }

    pub fn list_friendships(&self, user_id: i64) -> Result<Vec<FriendshipRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE f.user_id = ?1 ORDER BY f.id", FRIENDSHIP_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_friendship)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Edges of `user_id` whose pair is accepted on both sides.
    pub fn list_active_friendships(&self, user_id: i64) -> Result<Vec<FriendshipRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} JOIN friendships r ON r.user_id = f.friend_id AND r.friend_id = f.user_id
                 WHERE f.user_id = ?1 AND f.status = ?2 AND r.status = ?2
                 ORDER BY f.id",
                FRIENDSHIP_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id, FriendshipStatus::Accepted.as_str()],
                    map_friendship,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Creates the pair `user_id` → friend (`requested`) and friend → `user_id`
    /// (`pending`) for every friend id. Each pair commits in its own
    /// transaction; edges that already exist keep their status.
    ///
    /// Returns the `user_id`-side edge for every friend, new or existing.
    pub fn create_mutual_friendships(
        &self,
        user_id: i64,
        friend_ids: &[i64],
    ) -> Result<Vec<FriendshipRow>> {
        self.with_conn_mut(|conn| {
            let mut edges = Vec::with_capacity(friend_ids.len());

            for &friend_id in friend_ids {
                let tx = conn.transaction()?;
                let created = insert_edge(&tx, user_id, friend_id, FriendshipStatus::Requested)?
                    + insert_edge(&tx, friend_id, user_id, FriendshipStatus::Pending)?;
                tx.commit()?;

                if created > 0 {
                    info!("Friendship requested: {} -> {}", user_id, friend_id);
                } else {
                    debug!("Friendship {} -> {} already exists", user_id, friend_id);
                }

                if let Some(edge) = query_edge(conn, user_id, friend_id)? {
                    edges.push(edge);
                }
            }

            Ok(edges)
        })
    }

    /// Sets the status of the edge `user_id` → `friend_id` only.
    /// Returns `None` when that edge does not exist.
    pub fn set_edge_status(
        &self,
        user_id: i64,
        friend_id: i64,
        status: FriendshipStatus,
    ) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| {
            let changed = update_edge(conn, user_id, friend_id, status)?;
            if changed == 0 {
                return Ok(None);
            }
            query_edge(conn, user_id, friend_id)
        })
    }

    /// Accepts `user_id` → `friend_id` and, in the same transaction, confirms
    /// the reciprocal edge if it is still `requested` or `pending`.
    pub fn accept_edge(&self, user_id: i64, friend_id: i64) -> Result<Option<FriendshipRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if update_edge(&tx, user_id, friend_id, FriendshipStatus::Accepted)? == 0 {
                return Ok(None);
            }
            tx.execute(
                "UPDATE friendships SET status = ?3, updated_at = datetime('now')
                 WHERE user_id = ?1 AND friend_id = ?2 AND status IN (?4, ?5)",
                rusqlite::params![
                    friend_id,
                    user_id,
                    FriendshipStatus::Accepted.as_str(),
                    FriendshipStatus::Requested.as_str(),
                    FriendshipStatus::Pending.as_str(),
                ],
            )?;
            tx.commit()?;

            query_edge(conn, user_id, friend_id)
        })
    }

    /// Sets every existing edge `user_id` → any of `friend_ids` to `rejected`
    /// and returns the updated rows. Ids without an edge are ignored.
    pub fn reject_edges(&self, user_id: i64, friend_ids: &[i64]) -> Result<Vec<FriendshipRow>> {
        if friend_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn_mut(|conn| {
            let in_list = placeholders(friend_ids.len(), 3);
            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(friend_ids.len() + 2);
            let rejected = FriendshipStatus::Rejected.as_str();
            params.push(&user_id);
            params.push(&rejected);
            params.extend(friend_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "UPDATE friendships SET status = ?2, updated_at = datetime('now')
                     WHERE user_id = ?1 AND friend_id IN ({})",
                    in_list
                ),
                params.as_slice(),
            )?;
            tx.commit()?;

            let sql = format!(
                "{} WHERE f.user_id = ?1 AND f.status = ?2 AND f.friend_id IN ({}) ORDER BY f.id",
                FRIENDSHIP_SELECT, in_list
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), map_friendship)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn insert_edge(
    conn: &Connection,
    user_id: i64,
    friend_id: i64,
    status: FriendshipStatus,
) -> Result<usize> {
    Ok(conn.execute(
        "INSERT INTO friendships (user_id, friend_id, status) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, friend_id) DO NOTHING",
        rusqlite::params![user_id, friend_id, status.as_str()],
    )?)
}

fn update_edge(
    conn: &Connection,
    user_id: i64,
    friend_id: i64,
    status: FriendshipStatus,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE friendships SET status = ?3, updated_at = datetime('now')
         WHERE user_id = ?1 AND friend_id = ?2",
        rusqlite::params![user_id, friend_id, status.as_str()],
    )?)
}

fn query_edge(conn: &Connection, user_id: i64, friend_id: i64) -> Result<Option<FriendshipRow>> {
    let sql = format!("{} WHERE f.user_id = ?1 AND f.friend_id = ?2", FRIENDSHIP_SELECT);
    Ok(conn
        .query_row(&sql, [user_id, friend_id], map_friendship)
        .optional()?)
}

fn map_friendship(row: &Row<'_>) -> rusqlite::Result<FriendshipRow> {
    Ok(FriendshipRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        friend_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        friend_username: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::NewUser;
    use FriendshipStatus::*;

    fn db_with_users(n: usize) -> (Database, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        let ids = (0..n)
            .map(|i| {
                let username = format!("user{}", i);
                let email = format!("user{}@x.com", i);
                db.create_user(&NewUser {
                    username: &username,
                    email: &email,
                    ..Default::default()
                })
                .unwrap()
                .id
            })
            .collect();
        (db, ids)
    }

    fn status(db: &Database, user_id: i64, friend_id: i64) -> FriendshipStatus {
        db.get_edge(user_id, friend_id).unwrap().unwrap().status().unwrap()
    }

    fn count(db: &Database) -> i64 {
        db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM friendships", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn mutual_creation_writes_both_edges_once() {
        let (db, ids) = db_with_users(2);
        let (a, b) = (ids[0], ids[1]);

        let edges = db.create_mutual_friendships(a, &[b]).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].friend_username.as_deref(), Some("user1"));
        assert_eq!(status(&db, a, b), Requested);
        assert_eq!(status(&db, b, a), Pending);

        let again = db.create_mutual_friendships(a, &[b]).unwrap();
        assert_eq!(again[0].id, edges[0].id);
        assert_eq!(count(&db), 2);
    }

    #[test]
    fn existing_edges_keep_their_status() {
        let (db, ids) = db_with_users(2);
        let (a, b) = (ids[0], ids[1]);

        db.create_mutual_friendships(a, &[b]).unwrap();
        db.accept_edge(b, a).unwrap();
        db.create_mutual_friendships(b, &[a]).unwrap();

        assert_eq!(status(&db, a, b), Accepted);
        assert_eq!(status(&db, b, a), Accepted);
        assert_eq!(count(&db), 2);
    }

    #[test]
    fn self_edge_violates_schema() {
        let (db, ids) = db_with_users(1);
        assert!(db.create_mutual_friendships(ids[0], &[ids[0]]).is_err());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn failed_pair_leaves_no_dangling_edge() {
        let (db, ids) = db_with_users(1);
        // The friend id has no user row, so the foreign key fails on the first insert.
        assert!(db.create_mutual_friendships(ids[0], &[4242]).is_err());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn accept_confirms_pending_reciprocal() {
        let (db, ids) = db_with_users(2);
        let (a, b) = (ids[0], ids[1]);
        db.create_mutual_friendships(a, &[b]).unwrap();

        let edge = db.accept_edge(b, a).unwrap().unwrap();
        assert_eq!(edge.status().unwrap(), Accepted);
        assert_eq!(status(&db, a, b), Accepted);
        assert_eq!(db.list_active_friendships(a).unwrap().len(), 1);
    }

    #[test]
    fn accept_leaves_blocking_reciprocal_alone() {
        let (db, ids) = db_with_users(2);
        let (a, b) = (ids[0], ids[1]);
        db.create_mutual_friendships(a, &[b]).unwrap();
        db.set_edge_status(a, b, Banned).unwrap();

        db.accept_edge(b, a).unwrap();
        assert_eq!(status(&db, a, b), Banned);
        assert!(db.list_active_friendships(b).unwrap().is_empty());
    }

    #[test]
    fn missing_edge_is_none() {
        let (db, ids) = db_with_users(2);
        assert!(db.accept_edge(ids[0], ids[1]).unwrap().is_none());
        assert!(db.set_edge_status(ids[0], ids[1], Declined).unwrap().is_none());
    }

    #[test]
    fn reject_edges_only_touches_matches() {
        let (db, ids) = db_with_users(4);
        db.create_mutual_friendships(ids[0], &[ids[1], ids[2]]).unwrap();

        let rejected = db.reject_edges(ids[0], &[ids[1], ids[3]]).unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].friend_id, ids[1]);
        assert_eq!(status(&db, ids[0], ids[1]), Rejected);
        assert_eq!(status(&db, ids[1], ids[0]), Pending);
        assert_eq!(status(&db, ids[0], ids[2]), Requested);
        assert_eq!(count(&db), 4);
    }
}
