use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use serde_json::json;

use crate::db::Db;
use crate::error::StoreError;
use crate::models::ModerationState;
use crate::session::SessionHandle;

/// Builds the canonical name of a private room between two users: the two
/// usernames, lexicographically sorted and concatenated with no separator.
/// Sorting makes the name independent of who initiated the conversation, so
/// both sides resolve to the same room.
pub fn private_room_name(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}{b}")
    } else {
        format!("{b}{a}")
    }
}

/// Process-wide shared state: the live session table, the persistence
/// handle, and the flags the admin console's `shutdown`/`kill` commands
/// flip. One `Registry` is built at startup and an `Arc` to it is handed to
/// every connection task and to the admin console task.
pub struct Registry {
    pub db: Arc<Db>,
    pub default_room: String,
    sessions: StdMutex<HashMap<String, SessionHandle>>,
    stopping: AtomicBool,
}

impl Registry {
    pub fn new(db: Db, default_room: String) -> Self {
        Self {
            db: Arc::new(db),
            default_room,
            sessions: StdMutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Flags the server as shutting down. Existing sessions are not torn
    /// down by this call alone; `close_all` does that once the acceptor
    /// has stopped taking new connections.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Registers an authenticated session, replacing (and closing) any
    /// stale session already registered under the same username — this is
    /// what happens when a user signs back in from a new connection without
    /// cleanly disconnecting the old one.
    pub fn register(&self, username: &str, handle: SessionHandle) {
        let previous = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.insert(username.to_string(), handle)
        };
        if let Some(previous) = previous {
            previous.close();
        }
    }

    pub fn unregister(&self, username: &str) {
        self.sessions.lock().unwrap().remove(username);
    }

    pub fn lookup(&self, username: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(username).cloned()
    }

    pub fn connected_usernames(&self) -> Vec<String> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    /// Every live session whose address matches `ip`, used by the `*_ip`
    /// moderation commands to close every connection from that address
    /// regardless of which account it's signed in as.
    fn sessions_by_ip(&self, ip: &str) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.addr.ip().to_string() == ip)
            .cloned()
            .collect()
    }

    /// Closes every currently connected session. Used by `shutdown`.
    pub fn close_all(&self) {
        let handles: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();
        for handle in handles {
            handle.close();
        }
    }

    /// Relays a public message to every confirmed member of `room` who is
    /// currently connected and whose live moderation state is still `valid`
    /// at delivery time, except the sender (who already has its own copy via
    /// the direct reply). Best-effort: one recipient's closed channel never
    /// aborts delivery to the rest.
    pub fn broadcast_public(&self, room: &str, sender: &str, body: &str) -> Result<(), StoreError> {
        let members = self.db.fetch_room_members(room)?;
        let frame = json!({
            "type": "public",
            "room": room,
            "user": sender,
            "message": body,
        });
        for member in members {
            if member == sender {
                continue;
            }
            if let Some(handle) = self.lookup(&member) {
                if handle.state() == ModerationState::Valid {
                    handle.push(frame.clone());
                }
            }
        }
        Ok(())
    }

    // --- Moderation ---

    /// Pushes a verdict frame to every live session scoped by `name` or
    /// `ip`, updates their shared moderation cell so subsequent `public`/
    /// `private` sends observe it without a fresh signin, and forcibly
    /// closes the connection only when `close` is set (true for `ban`/
    /// `ban_ip`, false for `kick`/`kick_ip` per §4.5: a kicked client is
    /// expected to react to the frame on its own, not be cut off).
    fn push_verdict(
        &self,
        name: Option<&str>,
        ip: Option<&str>,
        new_state: ModerationState,
        frame: serde_json::Value,
        close: bool,
    ) {
        let targets: Vec<SessionHandle> = match (name, ip) {
            (Some(name), _) => self.lookup(name).into_iter().collect(),
            (None, Some(ip)) => self.sessions_by_ip(ip),
            (None, None) => Vec::new(),
        };
        for handle in targets {
            handle.set_state(new_state);
            handle.push(frame.clone());
            if close {
                handle.close();
            }
        }
    }

    pub fn kick_user(&self, name: &str, reason: &str, timeout: &str) -> Result<(), StoreError> {
        if !self.db.user_exists(name)? {
            return Err(StoreError::NotFound);
        }
        self.db.update_moderation(
            Some(name),
            None,
            ModerationState::Kick,
            Some(reason),
            Some(timeout),
        )?;
        self.push_verdict(
            Some(name),
            None,
            ModerationState::Kick,
            json!({"type": "kick", "timeout": timeout, "reason": reason}),
            false,
        );
        Ok(())
    }

    pub fn kick_ip(&self, ip: &str, reason: &str, timeout: &str) -> Result<(), StoreError> {
        if self.db.fetch_user_by_ip(ip)?.is_none() {
            return Err(StoreError::NotFound);
        }
        let stored_reason = format!("{ip}:{reason}");
        self.db.update_moderation(
            None,
            Some(ip),
            ModerationState::KickIp,
            Some(&stored_reason),
            Some(timeout),
        )?;
        self.push_verdict(
            None,
            Some(ip),
            ModerationState::KickIp,
            json!({"type": "kick_ip", "timeout": timeout, "reason": reason}),
            false,
        );
        Ok(())
    }

    pub fn ban_user(&self, name: &str, reason: &str) -> Result<(), StoreError> {
        if !self.db.user_exists(name)? {
            return Err(StoreError::NotFound);
        }
        self.db
            .update_moderation(Some(name), None, ModerationState::Ban, Some(reason), None)?;
        self.push_verdict(
            Some(name),
            None,
            ModerationState::Ban,
            json!({"type": "ban", "reason": reason}),
            true,
        );
        Ok(())
    }

    pub fn ban_ip(&self, ip: &str, reason: &str) -> Result<(), StoreError> {
        if self.db.fetch_user_by_ip(ip)?.is_none() {
            return Err(StoreError::NotFound);
        }
        let stored_reason = format!("{ip}:{reason}");
        self.db
            .update_moderation(None, Some(ip), ModerationState::BanIp, Some(&stored_reason), None)?;
        self.push_verdict(
            None,
            Some(ip),
            ModerationState::BanIp,
            json!({"type": "ban_ip", "reason": reason}),
            true,
        );
        Ok(())
    }

    pub fn unkick_user(&self, name: &str) -> Result<(), StoreError> {
        if !self.db.user_exists(name)? {
            return Err(StoreError::NotFound);
        }
        self.db
            .update_moderation(Some(name), None, ModerationState::Valid, None, None)?;
        self.push_verdict(Some(name), None, ModerationState::Valid, json!({"type": "unkick"}), false);
        Ok(())
    }

    pub fn unkick_ip(&self, ip: &str) -> Result<(), StoreError> {
        if self.db.fetch_user_by_ip(ip)?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.db
            .update_moderation(None, Some(ip), ModerationState::Valid, None, None)?;
        self.push_verdict(None, Some(ip), ModerationState::Valid, json!({"type": "unkick_ip"}), false);
        Ok(())
    }

    pub fn unban_user(&self, name: &str) -> Result<(), StoreError> {
        if !self.db.user_exists(name)? {
            return Err(StoreError::NotFound);
        }
        self.db
            .update_moderation(Some(name), None, ModerationState::Valid, None, None)?;
        self.push_verdict(Some(name), None, ModerationState::Valid, json!({"type": "unban"}), false);
        Ok(())
    }

    pub fn unban_ip(&self, ip: &str) -> Result<(), StoreError> {
        if self.db.fetch_user_by_ip(ip)?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.db
            .update_moderation(None, Some(ip), ModerationState::Valid, None, None)?;
        self.push_verdict(None, Some(ip), ModerationState::Valid, json!({"type": "unban_ip"}), false);
        Ok(())
    }

    /// Forcibly disconnects the named live session without touching
    /// persisted moderation state, distinct from `ban`/`kick` which persist
    /// a verdict. Returns whether a live session was found to kill.
    pub fn kill(&self, name: &str, reason: &str) -> bool {
        match self.lookup(name) {
            Some(handle) => {
                handle.push(json!({"type": "kill", "reason": reason}));
                handle.close();
                true
            }
            None => false,
        }
    }
}
