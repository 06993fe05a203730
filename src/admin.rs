use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::models::{RoomType, TIMEOUT_FORMAT};
use crate::registry::Registry;

/// Parses a duration like `30m`, `2h`, `1d` into seconds. The suffix is one
/// of `s`/`m`/`h`/`d`/`y`; anything else is rejected.
fn parse_duration(raw: &str) -> Option<i64> {
    if raw.len() < 2 {
        return None;
    }
    let (digits, suffix) = raw.split_at(raw.len() - 1);
    let amount: i64 = digits.parse().ok()?;
    let multiplier = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "y" => 31_536_000,
        _ => return None,
    };
    Some(amount * multiplier)
}

const HELP: &str = "\
commands:
  help                                  show this message
  messages <duration>                   show messages sent in the last <duration> (e.g. 30m, 2h, 1d)
  users                                 list known accounts and their moderation state
  rooms                                 list rooms
  add room <r1,r2,...>                  create one or more new public rooms
  pending rooms <user>                  list <user>'s pending join requests
  accept pending <user> (<r1,r2,...>|all)   confirm one, several, or all pending join requests
  kick <user> <duration> <reason>       disconnect <user>, blocked from reconnecting until <duration> passes
  kick ip <ip> <duration> <reason>      same, scoped to every account behind <ip>
  unkick <user> | unkick ip <ip>        lift a kick immediately
  ban <user> <reason>                   permanently block <user>
  ban ip <ip> <reason>                  permanently block every account behind <ip>
  unban <user> | unban ip <ip>          lift a ban
  kill <user> <reason>                  forcibly disconnect <user>'s live session
  shutdown                              stop accepting connections and exit";

/// Runs the admin console to completion: reads commands from stdin until
/// `shutdown` is issued or stdin is closed (EOF), returning once the server
/// should exit.
pub async fn run(registry: Arc<Registry>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("admin console: error reading stdin: {e}");
                break;
            }
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        match words.as_slice() {
            ["help"] => println!("{HELP}"),

            ["messages", duration] => match parse_duration(duration) {
                Some(secs) => match registry.db.fetch_messages_since(secs) {
                    Ok(rows) => {
                        for (user, room, date, body) in rows {
                            println!("[{date}] {room}/{user}: {body}");
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                },
                None => println!("invalid duration: {duration}"),
            },

            ["users"] => match registry.db.list_users() {
                Ok(users) => {
                    let connected = registry.connected_usernames();
                    for (name, ip) in users {
                        let marker = if connected.contains(&name) { "*" } else { " " };
                        println!("{marker} {name} {ip}");
                    }
                }
                Err(e) => eprintln!("error: {e}"),
            },

            ["rooms"] => match registry.db.get_rooms() {
                Ok(rooms) => {
                    for room in rooms {
                        println!("{} ({})", room.name, room.room_type.as_str());
                    }
                }
                Err(e) => eprintln!("error: {e}"),
            },

            ["add", "room", names] => {
                for name in names.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    match registry.db.insert_room(name, RoomType::Public) {
                        Ok(()) => println!("room '{name}' created"),
                        Err(e) => eprintln!("error creating '{name}': {e}"),
                    }
                }
            }

            ["pending", "rooms", user] => match registry.db.fetch_pending_rooms(user) {
                Ok(rooms) => println!("{user}: {}", rooms.join(", ")),
                Err(e) => eprintln!("error: {e}"),
            },

            ["accept", "pending", user, rooms_arg] => {
                let rooms = if *rooms_arg == "all" {
                    match registry.db.fetch_pending_rooms(user) {
                        Ok(rooms) => rooms,
                        Err(e) => {
                            eprintln!("error: {e}");
                            continue;
                        }
                    }
                } else {
                    rooms_arg
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                };

                for room in rooms {
                    match registry.db.confirm_pending_room(user, &room) {
                        Ok(()) => {
                            if let Some(handle) = registry.lookup(user) {
                                handle.push(serde_json::json!({
                                    "type": "pending_room",
                                    "status": "ok",
                                    "room": room,
                                }));
                            }
                            println!("accepted {user} into {room}");
                        }
                        Err(e) => eprintln!("error accepting {user} into {room}: {e}"),
                    }
                }
            }

            ["kick", "ip", ip, duration, reason @ ..] => {
                match parse_duration(duration) {
                    Some(secs) => {
                        let until = (chrono::Utc::now() + chrono::Duration::seconds(secs))
                            .format(TIMEOUT_FORMAT)
                            .to_string();
                        let reason = reason.join(" ");
                        match registry.kick_ip(ip, &reason, &until) {
                            Ok(()) => println!("kicked ip {ip}"),
                            Err(e) => eprintln!("error: {e}"),
                        }
                    }
                    None => println!("invalid duration: {duration}"),
                }
            }
            ["kick", user, duration, reason @ ..] => match parse_duration(duration) {
                Some(secs) => {
                    let until = (chrono::Utc::now() + chrono::Duration::seconds(secs))
                        .format(TIMEOUT_FORMAT)
                        .to_string();
                    let reason = reason.join(" ");
                    match registry.kick_user(user, &reason, &until) {
                        Ok(()) => println!("kicked {user}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                }
                None => println!("invalid duration: {duration}"),
            },

            ["unkick", "ip", ip] => match registry.unkick_ip(ip) {
                Ok(()) => println!("unkicked ip {ip}"),
                Err(e) => eprintln!("error: {e}"),
            },
            ["unkick", user] => match registry.unkick_user(user) {
                Ok(()) => println!("unkicked {user}"),
                Err(e) => eprintln!("error: {e}"),
            },

            ["ban", "ip", ip, reason @ ..] => {
                let reason = reason.join(" ");
                match registry.ban_ip(ip, &reason) {
                    Ok(()) => println!("banned ip {ip}"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            ["ban", user, reason @ ..] => {
                let reason = reason.join(" ");
                match registry.ban_user(user, &reason) {
                    Ok(()) => println!("banned {user}"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }

            ["unban", "ip", ip] => match registry.unban_ip(ip) {
                Ok(()) => println!("unbanned ip {ip}"),
                Err(e) => eprintln!("error: {e}"),
            },
            ["unban", user] => match registry.unban_user(user) {
                Ok(()) => println!("unbanned {user}"),
                Err(e) => eprintln!("error: {e}"),
            },

            ["kill", user, reason @ ..] => {
                let reason = reason.join(" ");
                if registry.kill(user, &reason) {
                    println!("killed {user}");
                } else {
                    println!("{user} is not currently connected");
                }
            }

            ["shutdown"] => {
                println!("shutting down");
                registry.stop();
                registry.close_all();
                break;
            }

            _ => println!("unrecognized command, type 'help' for a list"),
        }
    }
}
