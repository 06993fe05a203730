use serde_json::{json, Value};

use crate::models::{
    AuthResponse, ModerationState, PendingRoomRequest, PrivateRequest, PublicRequest, RoomType,
    SigninRequest, SignupRequest, TIMEOUT_FORMAT,
};
use crate::registry::{private_room_name, Registry};
use crate::session::SessionState;

/// Every request that reaches the dispatcher ahead of the `not_logged_in`
/// guard below must carry a `type`. This is the closed set of tags the
/// server understands; anything else gets a generic `unknown_type` error
/// rather than falling through silently.
pub async fn dispatch(registry: &Registry, session: &mut SessionState, kind: &str, payload: Value) -> Value {
    match kind {
        "signup" => handle_signup(registry, session, payload).await,
        "signin" => handle_signin(registry, session, payload).await,
        "disconnect" => handle_disconnect(registry, session).await,
        "pending_room" => {
            if let Some(resp) = not_logged_in(session) {
                return resp;
            }
            handle_pending_room(registry, session, payload).await
        }
        "public" => {
            if let Some(resp) = not_logged_in(session) {
                return resp;
            }
            handle_public(registry, session, payload).await
        }
        "private" => {
            if let Some(resp) = not_logged_in(session) {
                return resp;
            }
            handle_private(registry, session, payload).await
        }
        other => json!({"type": other, "status": "error", "reason": "unknown_type"}),
    }
}

/// True when `response` is a reply the connection must be closed after:
/// per §4.3/§4.4, a `signin` that resolves to `ban`/`ban_ip` or a still-active
/// `kick`/`kick_ip` sends its status frame and then closes, same as
/// `disconnect`.
pub fn is_terminal(kind: &str, response: &Value) -> bool {
    kind == "signin" && matches!(response["status"].as_str(), Some("ban") | Some("kick"))
}

/// Tags an `AuthResponse` with its frame `type`, the one field the shared
/// struct doesn't carry since `signup` and `signin` replies need different
/// values for it.
fn auth_frame(kind: &str, resp: AuthResponse) -> Value {
    let mut value = serde_json::to_value(resp).unwrap();
    value["type"] = json!(kind);
    value
}

/// Every handler except `signup`/`signin` requires an authenticated session.
fn not_logged_in(session: &SessionState) -> Option<Value> {
    if session.is_authenticated() {
        None
    } else {
        Some(json!({"status": "error", "reason": "not_logged_in"}))
    }
}

async fn handle_signup(registry: &Registry, session: &mut SessionState, payload: Value) -> Value {
    let req: SignupRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(_) => return json!({"type": "signup", "status": "error", "reason": "bad_request"}),
    };

    let db = registry.db.clone();
    let username = req.username.clone();
    let exists = match db.user_exists(&username) {
        Ok(v) => v,
        Err(e) => return auth_frame("signup", AuthResponse::error(e.reason())),
    };
    if exists {
        return auth_frame("signup", AuthResponse::error("username_already_used"));
    }

    let hash = match bcrypt::hash(&req.password, bcrypt::DEFAULT_COST) {
        Ok(h) => h,
        Err(_) => return auth_frame("signup", AuthResponse::error("bad_request")),
    };
    let ip = session.addr.ip().to_string();
    if let Err(e) = db.insert_user(&username, &hash, &ip) {
        // The `exists` check above and this insert are not atomic: two
        // concurrent signups for the same name can both pass the check, and
        // the loser's INSERT hits the `name` PRIMARY KEY here instead. That's
        // the same collision `exists` was checking for, not a storage fault.
        let reason = if e.is_unique_violation() {
            "username_already_used"
        } else {
            e.reason()
        };
        return auth_frame("signup", AuthResponse::error(reason));
    }
    if let Err(e) = db.insert_membership(&username, &registry.default_room, false) {
        return auth_frame("signup", AuthResponse::error(e.reason()));
    }

    // §4.4: signup transitions the session straight to AUTHENTICATED rather
    // than requiring a separate `signin` round trip on the same connection.
    session.username = Some(username);
    session.set_moderation_state(ModerationState::Valid);
    session.rooms = vec![registry.default_room.clone()];
    session.pending_rooms = Vec::new();

    auth_frame("signup", AuthResponse::ok_signup())
}

async fn handle_signin(registry: &Registry, session: &mut SessionState, payload: Value) -> Value {
    let req: SigninRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(_) => return auth_frame("signin", AuthResponse::error("bad_request")),
    };

    let db = registry.db.clone();

    // Check credentials against the bare password hash before paying for the
    // full moderation-state row below: §4.1 lists `fetch_user_password` and
    // `fetch_user_state` as distinct gateway calls, and there is no reason to
    // load `reason`/`timeout`/`pending_rooms` for a login that's about to be
    // rejected on the password alone.
    let hash = match db.fetch_user_password(&req.username) {
        Ok(Some(h)) => h,
        Ok(None) => return auth_frame("signin", AuthResponse::error("incorrect_username")),
        Err(e) => return auth_frame("signin", AuthResponse::error(e.reason())),
    };
    if !bcrypt::verify(&req.password, &hash).unwrap_or(false) {
        return auth_frame("signin", AuthResponse::error("incorrect_password"));
    }

    let user = match db.fetch_user_state(&req.username) {
        Ok(Some(u)) => u,
        Ok(None) => return auth_frame("signin", AuthResponse::error("incorrect_username")),
        Err(e) => return auth_frame("signin", AuthResponse::error(e.reason())),
    };

    // A timed kick whose timeout has passed reverts to `valid` lazily, the
    // first time the account tries to sign back in.
    let mut state = user.state;
    if state.is_kick() {
        let expired = user
            .timeout
            .as_deref()
            .and_then(|t| chrono::NaiveDateTime::parse_from_str(t, TIMEOUT_FORMAT).ok())
            .map(|t| t < chrono::Utc::now().naive_utc())
            .unwrap_or(true);
        if expired {
            let _ = db.update_moderation(Some(&user.name), None, ModerationState::Valid, None, None);
            state = ModerationState::Valid;
        }
    }

    if state.is_ban() {
        return auth_frame("signin", AuthResponse::ban(user.reason.clone().unwrap_or_default()));
    }
    if state.is_kick() {
        return auth_frame(
            "signin",
            AuthResponse::kick(
                user.timeout.clone().unwrap_or_default(),
                user.reason.clone().unwrap_or_default(),
            ),
        );
    }

    let ip = session.addr.ip().to_string();
    let _ = db.update_user_ip(&user.name, &ip);

    let all_rooms = db.public_room_names().unwrap_or_default();
    let rooms = db.fetch_rooms_for_user(&user.name).unwrap_or_default();

    session.username = Some(user.name.clone());
    session.set_moderation_state(state);
    session.rooms = rooms.clone();
    session.pending_rooms = user.pending_rooms.clone();

    auth_frame("signin", AuthResponse::ok_signin(all_rooms, rooms))
}

async fn handle_disconnect(registry: &Registry, session: &mut SessionState) -> Value {
    if let Some(name) = session.username.take() {
        registry.unregister(&name);
    }
    json!({"type": "disconnect", "status": "ok"})
}

async fn handle_pending_room(registry: &Registry, session: &mut SessionState, payload: Value) -> Value {
    let req: PendingRoomRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(_) => {
            return json!({"type": "pending_room", "status": "error", "reason": "bad_request"})
        }
    };
    let username = session.username.clone().unwrap();
    let db = registry.db.clone();

    if !db.room_exists(&req.room).unwrap_or(false) {
        return json!({"type": "pending_room", "status": "error", "reason": "room_does_not_exist"});
    }
    let already_member = match db.fetch_rooms_for_user(&username) {
        Ok(rooms) => rooms.iter().any(|r| r == &req.room),
        Err(e) => return json!({"type": "pending_room", "status": "error", "reason": e.reason()}),
    };
    if already_member {
        return json!({"type": "pending_room", "status": "error", "reason": "already_in_room"});
    }
    if let Err(e) = db.insert_membership(&username, &req.room, true) {
        return json!({"type": "pending_room", "status": "error", "reason": e.reason()});
    }
    session.pending_rooms.push(req.room.clone());
    // No `ok` frame here: per the operator-approval flow, the client learns
    // of acceptance later via the `pending_room`/`status:ok` push that
    // `addroom` sends when an operator accepts the request.
    json!({"type": "pending_room", "status": "pending", "room": req.room})
}

async fn handle_public(registry: &Registry, session: &mut SessionState, payload: Value) -> Value {
    let req: PublicRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(_) => return json!({"type": "public", "status": "error", "reason": "bad_request"}),
    };
    let username = session.username.clone().unwrap();
    let db = registry.db.clone();

    if session.moderation_state() != ModerationState::Valid {
        return json!({"type": "public", "status": "error", "reason": "not_valid_sender"});
    }
    if let Err(e) = db.insert_message(&username, &req.room, &req.message) {
        return json!({"type": "public", "status": "error", "reason": e.reason()});
    }
    if let Err(e) = registry.broadcast_public(&req.room, &username, &req.message) {
        return json!({"type": "public", "status": "error", "reason": e.reason()});
    }

    json!({"type": "public", "status": "ok", "room": req.room, "user": username, "message": req.message})
}

async fn handle_private(registry: &Registry, session: &mut SessionState, payload: Value) -> Value {
    let req: PrivateRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(_) => return json!({"type": "private", "status": "error", "reason": "bad_request"}),
    };
    let username = session.username.clone().unwrap();
    let db = registry.db.clone();

    if session.moderation_state() != ModerationState::Valid {
        return json!({"type": "private", "status": "error", "reason": "not_valid_sender"});
    }
    if registry.lookup(&req.to).is_none() {
        return json!({"type": "private", "status": "error", "reason": "recipient_not_found"});
    }

    let room = private_room_name(&username, &req.to);
    if !db.room_exists(&room).unwrap_or(false) {
        if db.insert_room(&room, RoomType::Private).is_ok() {
            let _ = db.insert_membership(&username, &room, false);
            let _ = db.insert_membership(&req.to, &room, false);
        }
    }

    // No body relay, and no Message row for it either: `private` only stands
    // up the two-party room and both memberships. `req.message` is never
    // delivered to anyone on this path, so persisting it would plant an
    // orphaned row in the append-only history the `messages` admin command
    // reads. Once both sides belong to `room`, further traffic flows as
    // ordinary `public` frames targeting it, and those go through
    // `handle_public`'s own `insert_message`.
    json!({"type": "private", "status": "ok"})
}
