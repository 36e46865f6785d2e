//! Session-start notification subscriptions.
//!
//! # Storage layout
//!
//! A single SQLite table `notifications`:
//!
//! | column       | type    | description                              |
//! |--------------|---------|------------------------------------------|
//! | user_id      | TEXT    | chat user id, primary key                |
//! | display_name | TEXT    | last known display name                  |
//! | chat_id      | TEXT    | chat the notification is delivered to    |
//! | testday      | INTEGER | `1` when subscribed to test-day starts   |
//! | practice     | INTEGER | `1` when subscribed to practice starts   |
//! | qual         | INTEGER | `1` when subscribed to qualifying starts |
//! | warmup       | INTEGER | `1` when subscribed to warm-up starts    |
//! | race         | INTEGER | `1` when subscribed to race starts       |
//!
//! A user without a row is subscribed to nothing. Every operation runs under
//! one mutex around the connection, so a toggle's read-modify-write is never
//! interleaved with another.
//!
//! # Example
//!
//! ```rust
//! use livetiming_memory::SubscriptionStore;
//!
//! let store = SubscriptionStore::open_in_memory().unwrap();
//! store.toggle("42", "99", "Race").unwrap();
//! assert!(store.list_notifications("42").unwrap().race);
//! ```

use std::sync::{Mutex, MutexGuard};

use livetiming_types::SessionCategory;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Unknown session category: {0}")]
    UnknownCategory(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// The per-category flags of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notifications {
    #[serde(rename = "TestDay")]
    pub testday: bool,
    pub practice: bool,
    pub qual: bool,
    pub warmup: bool,
    pub race: bool,
}

impl Notifications {
    /// Flag of `category`.
    pub fn get(&self, category: SessionCategory) -> bool {
        match category {
            SessionCategory::TestDay => self.testday,
            SessionCategory::Practice => self.practice,
            SessionCategory::Qual => self.qual,
            SessionCategory::Warmup => self.warmup,
            SessionCategory::Race => self.race,
        }
    }

    fn flag_mut(&mut self, category: SessionCategory) -> &mut bool {
        match category {
            SessionCategory::TestDay => &mut self.testday,
            SessionCategory::Practice => &mut self.practice,
            SessionCategory::Qual => &mut self.qual,
            SessionCategory::Warmup => &mut self.warmup,
            SessionCategory::Race => &mut self.race,
        }
    }

    /// Categories currently enabled, in [`SessionCategory::ALL`] order.
    pub fn enabled(&self) -> Vec<SessionCategory> {
        SessionCategory::ALL
            .into_iter()
            .filter(|c| self.get(*c))
            .collect()
    }
}

/// A user to notify for some category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: String,
    pub name: String,
    pub chat_id: String,
}

struct Row {
    display_name: String,
    chat_id: String,
    flags: Notifications,
}

// ─────────────────────────────────────────────────────────────────────────────
// SubscriptionStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed subscription table behind a single mutex.
pub struct SubscriptionStore {
    conn: Mutex<Connection>,
}

impl SubscriptionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &str) -> Result<Self, SubscriptionError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Sqlite`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, SubscriptionError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SubscriptionError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notifications (
                user_id      TEXT NOT NULL PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                chat_id      TEXT NOT NULL,
                testday      INTEGER NOT NULL DEFAULT 0,
                practice     INTEGER NOT NULL DEFAULT 0,
                qual         INTEGER NOT NULL DEFAULT 0,
                warmup       INTEGER NOT NULL DEFAULT 0,
                race         INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flip one category flag of `user_id` and return the resulting flags.
    ///
    /// `category` is a category name such as `"Race"` or `"testday"`.
    pub fn toggle(
        &self,
        user_id: &str,
        chat_id: &str,
        category: &str,
    ) -> Result<Notifications, SubscriptionError> {
        let category = parse_category(category)?;
        self.toggle_category(user_id, None, chat_id, category)
    }

    /// Typed form of [`toggle`](Self::toggle). A `display_name` of `None`
    /// keeps the stored one.
    pub fn toggle_category(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        chat_id: &str,
        category: SessionCategory,
    ) -> Result<Notifications, SubscriptionError> {
        let conn = self.conn();
        let mut row = read_row(&conn, user_id)?.unwrap_or(Row {
            display_name: String::new(),
            chat_id: chat_id.to_string(),
            flags: Notifications::default(),
        });

        let flag = row.flags.flag_mut(category);
        *flag = !*flag;
        if let Some(name) = display_name {
            row.display_name = name.to_string();
        }
        row.chat_id = chat_id.to_string();

        let f = row.flags;
        conn.execute(
            "INSERT INTO notifications (user_id, display_name, chat_id, testday, practice, qual, warmup, race)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                chat_id      = excluded.chat_id,
                testday      = excluded.testday,
                practice     = excluded.practice,
                qual         = excluded.qual,
                warmup       = excluded.warmup,
                race         = excluded.race",
            params![
                user_id,
                row.display_name,
                row.chat_id,
                f.testday,
                f.practice,
                f.qual,
                f.warmup,
                f.race
            ],
        )?;
        debug!(user = %user_id, category = %category, enabled = f.get(category), "notification toggled");
        Ok(f)
    }

    /// The flags of `user_id`; all false when the user has no row.
    pub fn list_notifications(&self, user_id: &str) -> Result<Notifications, SubscriptionError> {
        let conn = self.conn();
        Ok(read_row(&conn, user_id)?.map(|r| r.flags).unwrap_or_default())
    }

    /// Users subscribed to `category` (a category name).
    pub fn list_users_for(&self, category: &str) -> Result<Vec<Recipient>, SubscriptionError> {
        self.list_users_for_category(parse_category(category)?)
    }

    /// [`list_users_for`](Self::list_users_for) with an already parsed category.
    pub fn list_users_for_category(
        &self,
        category: SessionCategory,
    ) -> Result<Vec<Recipient>, SubscriptionError> {
        let conn = self.conn();
        // `column()` only yields fixed identifiers.
        let sql = format!(
            "SELECT user_id, display_name, chat_id FROM notifications
             WHERE {} = 1 ORDER BY user_id ASC",
            category.column()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(Recipient {
                user_id: row.get(0)?,
                name: row.get(1)?,
                chat_id: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(SubscriptionError::Sqlite)
    }
}

fn parse_category(name: &str) -> Result<SessionCategory, SubscriptionError> {
    name.parse()
        .map_err(|_| SubscriptionError::UnknownCategory(name.to_string()))
}

fn read_row(conn: &Connection, user_id: &str) -> Result<Option<Row>, SubscriptionError> {
    let row = conn
        .query_row(
            "SELECT display_name, chat_id, testday, practice, qual, warmup, race
             FROM notifications WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(Row {
                    display_name: row.get(0)?,
                    chat_id: row.get(1)?,
                    flags: Notifications {
                        testday: row.get(2)?,
                        practice: row.get(3)?,
                        qual: row.get(4)?,
                        warmup: row.get(5)?,
                        race: row.get(6)?,
                    },
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SubscriptionStore {
        SubscriptionStore::open_in_memory().unwrap()
    }

    #[test]
    fn absent_user_has_nothing_enabled() {
        let store = make_store();
        assert_eq!(store.list_notifications("nobody").unwrap(), Notifications::default());
        assert!(store.list_users_for("Race").unwrap().is_empty());
    }

    #[test]
    fn toggle_race_for_new_user() {
        let store = make_store();
        store.toggle("42", "99", "Race").unwrap();

        let flags = store.list_notifications("42").unwrap();
        assert_eq!(
            flags,
            Notifications {
                testday: false,
                practice: false,
                qual: false,
                warmup: false,
                race: true,
            }
        );

        let users = store.list_users_for("Race").unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "42");
        assert_eq!(users[0].chat_id, "99");
    }

    #[test]
    fn toggling_twice_disables_again() {
        let store = make_store();
        assert!(store.toggle("1", "10", "Qual").unwrap().qual);
        assert!(!store.toggle("1", "10", "qual").unwrap().qual);
        assert!(store.list_users_for("Qual").unwrap().is_empty());
    }

    #[test]
    fn categories_are_independent() {
        let store = make_store();
        store.toggle("1", "10", "Practice").unwrap();
        store.toggle("1", "10", "Warmup").unwrap();
        store.toggle("2", "20", "Warmup").unwrap();

        let flags = store.list_notifications("1").unwrap();
        assert_eq!(flags.enabled(), vec![SessionCategory::Practice, SessionCategory::Warmup]);

        let warmup: Vec<_> = store
            .list_users_for_category(SessionCategory::Warmup)
            .unwrap()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(warmup, vec!["1", "2"]);
        assert!(store.list_users_for("TestDay").unwrap().is_empty());
    }

    #[test]
    fn display_name_is_kept_unless_given() {
        let store = make_store();
        store
            .toggle_category("7", Some("Ana"), "70", SessionCategory::Race)
            .unwrap();
        store.toggle("7", "71", "TestDay").unwrap();

        let users = store.list_users_for("testday").unwrap();
        assert_eq!(users[0].name, "Ana");
        // The latest chat id wins.
        assert_eq!(users[0].chat_id, "71");
    }

    #[test]
    fn unknown_category_is_rejected() {
        let store = make_store();
        assert!(matches!(
            store.toggle("1", "10", "Sprint"),
            Err(SubscriptionError::UnknownCategory(_))
        ));
        assert!(matches!(
            store.list_users_for("Sprint"),
            Err(SubscriptionError::UnknownCategory(_))
        ));
    }

    #[test]
    fn subscriptions_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("livetiming-bot.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;

        SubscriptionStore::open(path)?.toggle("42", "99", "Race")?;
        let reopened = SubscriptionStore::open(path)?;
        assert!(reopened.list_notifications("42")?.race);
        Ok(())
    }
}
