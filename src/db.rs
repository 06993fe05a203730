use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::error::StoreError;
use crate::models::{ModerationState, Room, RoomType, User};

/// The Persistence Gateway: a pooled handle to the SQLite-backed store.
///
/// Every query goes through a `r2d2` pool rather than a single
/// `Mutex<Connection>` so that a slow write from one session never blocks a
/// read from another.
pub struct Db {
    pool: Pool<SqliteConnectionManager>,
}

impl Db {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::new(manager)?;
        let db = Db { pool };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                ip TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT 'valid',
                reason TEXT,
                timeout TEXT,
                date_creation TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rooms (
                name TEXT PRIMARY KEY,
                room_type TEXT NOT NULL DEFAULT 'public'
            );

            CREATE TABLE IF NOT EXISTS belong (
                user TEXT NOT NULL REFERENCES users(name) ON DELETE CASCADE,
                room TEXT NOT NULL REFERENCES rooms(name) ON DELETE CASCADE,
                pending INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user, room)
            );
            CREATE INDEX IF NOT EXISTS idx_belong_room ON belong(room);
            CREATE INDEX IF NOT EXISTS idx_belong_pending ON belong(room, pending);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user TEXT NOT NULL,
                room TEXT NOT NULL REFERENCES rooms(name) ON DELETE CASCADE,
                date_message TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_room_date ON messages(room, date_message);",
        )?;

        // Idempotent, in case an older copy of the database is missing a
        // column added by a later revision.
        conn.execute_batch("ALTER TABLE users ADD COLUMN ip TEXT NOT NULL DEFAULT '';")
            .ok();

        Ok(())
    }

    /// Seed the configured default room on first boot, if it doesn't exist.
    pub fn ensure_default_room(&self, name: &str) -> Result<(), StoreError> {
        if !self.room_exists(name)? {
            self.insert_room(name, RoomType::Public)?;
        }
        Ok(())
    }

    // --- Users ---

    pub fn user_exists(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_user(&self, name: &str, password_hash: &str, ip: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (name, password_hash, ip, state, date_creation) VALUES (?1, ?2, ?3, 'valid', ?4)",
            params![name, password_hash, ip, now],
        )?;
        Ok(())
    }

    /// The bare password hash, for a signin's initial credential check
    /// before the full account row (moderation state, rooms) is loaded.
    pub fn fetch_user_password(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.pool.get()?;
        let hash = conn
            .query_row(
                "SELECT password_hash FROM users WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .ok();
        Ok(hash)
    }

    /// Full account row, used at signin to decide moderation outcome and to
    /// build the `all_rooms`/`rooms` reply.
    pub fn fetch_user_state(&self, name: &str) -> Result<Option<User>, StoreError> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT name, password_hash, ip, state, reason, timeout, date_creation
                 FROM users WHERE name = ?1",
                params![name],
                |row| {
                    let state: String = row.get(3)?;
                    Ok(User {
                        name: row.get(0)?,
                        password_hash: row.get(1)?,
                        ip: row.get(2)?,
                        state: ModerationState::from_str(&state).unwrap_or(ModerationState::Valid),
                        reason: row.get(4)?,
                        timeout: row.get(5)?,
                        date_creation: row.get(6)?,
                        pending_rooms: Vec::new(),
                    })
                },
            )
            .ok();

        let Some(mut user) = user else {
            return Ok(None);
        };
        user.pending_rooms = self.fetch_pending_rooms(name)?;
        Ok(Some(user))
    }

    /// Account row looked up by last-known IP, for the `kick_ip`/`ban_ip`
    /// admin commands which target a source address rather than a username.
    pub fn fetch_user_by_ip(&self, ip: &str) -> Result<Option<String>, StoreError> {
        let conn = self.pool.get()?;
        let name = conn
            .query_row(
                "SELECT name FROM users WHERE ip = ?1 ORDER BY date_creation DESC LIMIT 1",
                params![ip],
                |r| r.get(0),
            )
            .ok();
        Ok(name)
    }

    /// Every known account's name and last-seen ip, for the admin console's
    /// `users` listing.
    pub fn list_users(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT name, ip FROM users ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn update_user_ip(&self, name: &str, ip: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE users SET ip = ?1 WHERE name = ?2",
            params![ip, name],
        )?;
        Ok(())
    }

    /// Applies a moderation verdict (`kick`, `kick_ip`, `ban`, `ban_ip`, or a
    /// reversal back to `valid`) to every account that shares either the
    /// given username or the given IP, mirroring how the admin console's
    /// `*_ip` variants are meant to catch every account behind that address.
    pub fn update_moderation(
        &self,
        name: Option<&str>,
        ip: Option<&str>,
        state: ModerationState,
        reason: Option<&str>,
        timeout: Option<&str>,
    ) -> Result<u64, StoreError> {
        let conn = self.pool.get()?;
        let affected = match (name, ip) {
            (Some(name), _) => conn.execute(
                "UPDATE users SET state = ?1, reason = ?2, timeout = ?3 WHERE name = ?4",
                params![state.as_str(), reason, timeout, name],
            )?,
            (None, Some(ip)) => conn.execute(
                "UPDATE users SET state = ?1, reason = ?2, timeout = ?3 WHERE ip = ?4",
                params![state.as_str(), reason, timeout, ip],
            )?,
            (None, None) => 0,
        };
        Ok(affected as u64)
    }

    // --- Rooms ---

    pub fn room_exists(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_room(&self, name: &str, room_type: RoomType) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO rooms (name, room_type) VALUES (?1, ?2)",
            params![name, room_type.as_str()],
        )?;
        Ok(())
    }

    pub fn get_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT name, room_type FROM rooms ORDER BY name")?;
        let rooms = stmt
            .query_map([], |row| {
                let room_type: String = row.get(1)?;
                Ok(Room {
                    name: row.get(0)?,
                    room_type: if room_type == "private" {
                        RoomType::Private
                    } else {
                        RoomType::Public
                    },
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rooms)
    }

    pub fn public_room_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT name FROM rooms WHERE room_type = 'public' ORDER BY name")?;
        let rooms = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rooms)
    }

    // --- Membership ---

    pub fn insert_membership(&self, user: &str, room: &str, pending: bool) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO belong (user, room, pending) VALUES (?1, ?2, ?3)",
            params![user, room, pending as i64],
        )?;
        Ok(())
    }

    /// Rooms the user is a confirmed (non-pending) member of.
    pub fn fetch_rooms_for_user(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT room FROM belong WHERE user = ?1 AND pending = 0 ORDER BY room",
        )?;
        let rooms = stmt
            .query_map(params![user], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rooms)
    }

    /// Confirmed members of a room, used to fan a public message out to only
    /// the sessions that actually belong there.
    pub fn fetch_room_members(&self, room: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT user FROM belong WHERE room = ?1 AND pending = 0")?;
        let users = stmt
            .query_map(params![room], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(users)
    }

    pub fn fetch_pending_rooms(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT room FROM belong WHERE user = ?1 AND pending = 1 ORDER BY room",
        )?;
        let rooms = stmt
            .query_map(params![user], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rooms)
    }

    /// Clears the `pending` flag once a room owner accepts the request.
    pub fn confirm_pending_room(&self, user: &str, room: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE belong SET pending = 0 WHERE user = ?1 AND room = ?2",
            params![user, room],
        )?;
        Ok(())
    }

    // --- Messages ---

    pub fn insert_message(&self, user: &str, room: &str, body: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (user, room, date_message, body) VALUES (?1, ?2, ?3, ?4)",
            params![user, room, now, body],
        )?;
        Ok(())
    }

    /// Messages across every room in the last `since_seconds` seconds, for
    /// the admin console's `messages <duration>` command.
    pub fn fetch_messages_since(&self, since_seconds: i64) -> Result<Vec<(String, String, String, String)>, StoreError> {
        let conn = self.pool.get()?;
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(since_seconds)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT user, room, date_message, body FROM messages
             WHERE date_message >= ?1 ORDER BY date_message ASC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
