use crate::Database;
use crate::models::{MetadataRow, PermissionRow, ResourceRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, email, password, phone, facebook_id, github_id, twitter_id, \
     google_id, is_active, is_admin, login_at, created_at, updated_at";

/// Fields for a new user row. The password must already be hashed.
#[derive(Debug, Default)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub phone: Option<&'a str>,
}

/// Column changes for an existing user; `None` keeps the stored value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password, phone) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user.username, user.email, user.password_hash, user.phone],
            )?;
            let id = conn.last_insert_rowid();
            query_user(conn, "id = ?1", id)?
                .ok_or_else(|| anyhow::anyhow!("User {} vanished after insert", id))
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    /// Looks a user up by username first, then by email.
    pub fn get_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| match query_user(conn, "username = ?1", login)? {
            Some(user) => Ok(Some(user)),
            None => query_user(conn, "email = ?1", login),
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Resolves any mix of ids, emails and usernames to distinct users.
    /// Identifiers that match nobody are skipped.
    pub fn find_users_by_targets(
        &self,
        ids: &[i64],
        emails: &[String],
        usernames: &[String],
    ) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut found: Vec<UserRow> = Vec::new();

            let batches: [(&str, Vec<&dyn rusqlite::types::ToSql>); 3] = [
                ("id", ids.iter().map(|v| v as &dyn rusqlite::types::ToSql).collect()),
                ("email", emails.iter().map(|v| v as &dyn rusqlite::types::ToSql).collect()),
                ("username", usernames.iter().map(|v| v as &dyn rusqlite::types::ToSql).collect()),
            ];

            for (column, params) in batches {
                if params.is_empty() {
                    continue;
                }
                let sql = format!(
                    "SELECT {} FROM users WHERE {} IN ({}) ORDER BY id",
                    USER_COLUMNS,
                    column,
                    placeholders(params.len(), 1)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params.as_slice(), map_user)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                for row in rows {
                    if !found.iter().any(|u| u.id == row.id) {
                        found.push(row);
                    }
                }
            }

            Ok(found)
        })
    }

    pub fn update_user(&self, id: i64, changes: &UserChanges) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            apply_user_changes(conn, id, changes)?;
            query_user(conn, "id = ?1", id)
        })
    }

    /// Applies `changes` and replaces the actions of every `(resource_id,
    /// actions)` grant in one transaction. Nothing is written if any step
    /// fails or the user does not exist.
    pub fn update_user_with_permissions(
        &self,
        id: i64,
        changes: &UserChanges,
        grants: &[(i64, Vec<String>)],
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if apply_user_changes(&tx, id, changes)? == 0 {
                return Ok(None);
            }
            for (resource_id, actions) in grants {
                upsert_permission_row(&tx, id, *resource_id, actions)?;
            }
            let row = query_user(&tx, "id = ?1", id)?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn touch_login(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET login_at = datetime('now') WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Resources --

    pub fn create_resource(&self, name: &str, actions: &[String]) -> Result<ResourceRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO resources (name, actions) VALUES (?1, ?2)",
                rusqlite::params![name, serde_json::to_string(actions)?],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                "SELECT id, name, actions, created_at FROM resources WHERE id = ?1",
                [id],
                map_resource,
            )?;
            Ok(row)
        })
    }

    pub fn list_resources(&self) -> Result<Vec<ResourceRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, actions, created_at FROM resources ORDER BY name")?;
            let rows = stmt
                .query_map([], map_resource)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Permissions --

    pub fn list_permissions(&self, user_id: i64) -> Result<Vec<PermissionRow>> {
        self.with_conn(|conn| query_permissions(conn, user_id))
    }

    /// Replaces the actions of the user's permission on a resource, creating
    /// the permission if it does not exist yet.
    pub fn upsert_permission(
        &self,
        user_id: i64,
        resource_id: i64,
        actions: &[String],
    ) -> Result<PermissionRow> {
        self.with_conn(|conn| upsert_permission_row(conn, user_id, resource_id, actions))
    }

    /// Returns false when the user had no permission on that resource.
    pub fn delete_permission(&self, user_id: i64, resource_name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM permissions
                 WHERE user_id = ?1
                   AND resource_id = (SELECT id FROM resources WHERE name = ?2)",
                rusqlite::params![user_id, resource_name],
            )?;
            Ok(deleted > 0)
        })
    }

    // -- Metadata --

    pub fn list_metadata(&self, user_id: i64) -> Result<Vec<MetadataRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, key, value FROM metadata WHERE user_id = ?1 ORDER BY key",
            )?;
            let rows = stmt
                .query_map([user_id], map_metadata)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn upsert_metadata(&self, user_id: i64, key: &str, value: &str) -> Result<MetadataRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO metadata (user_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value",
                rusqlite::params![user_id, key, value],
            )?;
            let row = conn.query_row(
                "SELECT id, user_id, key, value FROM metadata WHERE user_id = ?1 AND key = ?2",
                rusqlite::params![user_id, key],
                map_metadata,
            )?;
            Ok(row)
        })
    }

    /// Deletes the given keys; unknown keys are ignored. Returns rows removed.
    pub fn delete_metadata(&self, user_id: i64, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM metadata WHERE user_id = ?1 AND key IN ({})",
                placeholders(keys.len(), 2)
            );
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            params.extend(keys.iter().map(|k| k as &dyn rusqlite::types::ToSql));
            Ok(conn.execute(&sql, params.as_slice())?)
        })
    }
}

/// `?start, ?start+1, ...` for an IN clause of `count` values.
pub(crate) fn placeholders(count: usize, start: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, filter: &str, value: P) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], map_user).optional()?;
    Ok(row)
}

fn apply_user_changes(conn: &Connection, id: i64, changes: &UserChanges) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE users SET
            username   = COALESCE(?2, username),
            email      = COALESCE(?3, email),
            password   = COALESCE(?4, password),
            phone      = COALESCE(?5, phone),
            is_active  = COALESCE(?6, is_active),
            is_admin   = COALESCE(?7, is_admin),
            updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![
            id,
            changes.username,
            changes.email,
            changes.password_hash,
            changes.phone,
            changes.is_active,
            changes.is_admin,
        ],
    )?;
    Ok(updated)
}

fn upsert_permission_row(
    conn: &Connection,
    user_id: i64,
    resource_id: i64,
    actions: &[String],
) -> Result<PermissionRow> {
    conn.execute(
        "INSERT INTO permissions (user_id, resource_id, actions) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, resource_id)
         DO UPDATE SET actions = excluded.actions, updated_at = datetime('now')",
        rusqlite::params![user_id, resource_id, serde_json::to_string(actions)?],
    )?;
    let row = conn.query_row(
        "SELECT p.id, p.user_id, p.resource_id, r.name, p.actions
         FROM permissions p
         JOIN resources r ON r.id = p.resource_id
         WHERE p.user_id = ?1 AND p.resource_id = ?2",
        [user_id, resource_id],
        map_permission,
    )?;
    Ok(row)
}

fn query_permissions(conn: &Connection, user_id: i64) -> Result<Vec<PermissionRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.user_id, p.resource_id, r.name, p.actions
         FROM permissions p
         JOIN resources r ON r.id = p.resource_id
         WHERE p.user_id = ?1
         ORDER BY r.name",
    )?;
    let rows = stmt
        .query_map([user_id], map_permission)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        phone: row.get(4)?,
        facebook_id: row.get(5)?,
        github_id: row.get(6)?,
        twitter_id: row.get(7)?,
        google_id: row.get(8)?,
        is_active: row.get(9)?,
        is_admin: row.get(10)?,
        login_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn map_resource(row: &Row<'_>) -> rusqlite::Result<ResourceRow> {
    Ok(ResourceRow {
        id: row.get(0)?,
        name: row.get(1)?,
        actions: actions_column(row, 2)?,
        created_at: row.get(3)?,
    })
}

fn map_permission(row: &Row<'_>) -> rusqlite::Result<PermissionRow> {
    Ok(PermissionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        resource_id: row.get(2)?,
        resource_name: row.get(3)?,
        actions: actions_column(row, 4)?,
    })
}

fn map_metadata(row: &Row<'_>) -> rusqlite::Result<MetadataRow> {
    Ok(MetadataRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
    })
}

/// Action lists are stored as JSON arrays of strings.
fn actions_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
