use serde::{Deserialize, Serialize};

/// Wire format for a `kick`/`kick_ip` `timeout`: a space-separated, offset-free
/// timestamp (`"2026-07-28 16:00:00"`), matching the Python original's
/// `str(datetime.now())` and the ISO-ish format §6/§8 document — not
/// `chrono`'s default RFC3339 rendering.
pub const TIMEOUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-account moderation state. Mirrors the `state` column of `users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    Valid,
    Kick,
    KickIp,
    Ban,
    BanIp,
}

impl ModerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationState::Valid => "valid",
            ModerationState::Kick => "kick",
            ModerationState::KickIp => "kick_ip",
            ModerationState::Ban => "ban",
            ModerationState::BanIp => "ban_ip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(ModerationState::Valid),
            "kick" => Some(ModerationState::Kick),
            "kick_ip" => Some(ModerationState::KickIp),
            "ban" => Some(ModerationState::Ban),
            "ban_ip" => Some(ModerationState::BanIp),
            _ => None,
        }
    }

    pub fn is_kick(&self) -> bool {
        matches!(self, ModerationState::Kick | ModerationState::KickIp)
    }

    pub fn is_ban(&self) -> bool {
        matches!(self, ModerationState::Ban | ModerationState::BanIp)
    }
}

/// A persisted account row, as loaded at signin time.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub password_hash: String,
    pub ip: String,
    pub state: ModerationState,
    pub reason: Option<String>,
    /// RFC3339 absolute instant; only meaningful for `Kick`/`KickIp`.
    pub timeout: Option<String>,
    pub date_creation: String,
    pub pending_rooms: Vec<String>,
}

/// `type` ∈ {public, private}. Private rooms are named by lexicographic
/// concatenation of their two members' names (see `registry::private_room_name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Public,
    Private,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Public => "public",
            RoomType::Private => "private",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    pub room_type: RoomType,
}

/// An append-only chat message row.
#[derive(Debug, Clone)]
pub struct Message {
    pub user: String,
    pub room: String,
    pub date_message: String,
    pub body: String,
}

// --- Wire request payloads (client -> server) ---
// One struct per tag in the closed dispatch table of SPEC_FULL §4.4.

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PendingRoomRequest {
    pub room: String,
}

#[derive(Debug, Deserialize)]
pub struct PublicRequest {
    pub room: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PrivateRequest {
    pub to: String,
    #[allow(dead_code)]
    pub user: String,
    pub message: String,
}

/// Envelope used only to read the mandatory `type` discriminator before
/// re-parsing the full payload into the tag-specific struct above.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
}

// --- Wire response payloads (server -> client) ---
//
// `signup`/`signin` share enough optional fields to warrant a struct
// (`AuthResponse`, below), serialized by the dispatcher's `auth_frame` helper
// which adds the `type` tag. Every other frame type is small and
// single-purpose enough that the dispatcher builds it directly with
// `serde_json::json!`, the same way the teacher's route handlers build ad
// hoc `serde_json::json!` bodies instead of a struct for one-off shapes.

/// Shared shape of `signup`/`signin` responses: both ok and error/kick/ban
/// outcomes share a `status` discriminator with optional fields.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_rooms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl AuthResponse {
    pub fn ok_signin(all_rooms: Vec<String>, rooms: Vec<String>) -> Self {
        Self {
            status: "ok",
            reason: None,
            all_rooms: Some(all_rooms),
            rooms: Some(rooms),
            timeout: None,
        }
    }

    pub fn ok_signup() -> Self {
        Self {
            status: "ok",
            reason: None,
            all_rooms: None,
            rooms: None,
            timeout: None,
        }
    }

    pub fn error(reason: &str) -> Self {
        Self {
            status: "error",
            reason: Some(reason.to_string()),
            all_rooms: None,
            rooms: None,
            timeout: None,
        }
    }

    pub fn kick(timeout: String, reason: String) -> Self {
        Self {
            status: "kick",
            reason: Some(reason),
            all_rooms: None,
            rooms: None,
            timeout: Some(timeout),
        }
    }

    pub fn ban(reason: String) -> Self {
        Self {
            status: "ban",
            reason: Some(reason),
            all_rooms: None,
            rooms: None,
            timeout: None,
        }
    }
}
