pub mod admin;
pub mod codec;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod registry;
pub mod session;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use codec::JsonLineCodec;
use config::Config;
use db::Db;
use models::Envelope;
use registry::Registry;
use session::{new_channel, Outbound, SessionState};

/// Wires together the persistence gateway and the session registry, binds
/// the listener, and spawns the accept loop as a background task. Returns
/// the bound address and the registry so a caller (the binary's `main`, or
/// a test harness) can drive the rest of the process lifecycle.
pub async fn serve(config: &Config) -> std::io::Result<(std::net::SocketAddr, Arc<Registry>)> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Db::new(&config.db_path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    db.ensure_default_room(&config.default_room)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let registry = Arc::new(Registry::new(db, config.default_room.clone()));

    let listener = TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;
    println!("listening on {addr}");

    let accept_registry = registry.clone();
    tokio::spawn(async move { accept_loop(accept_registry, listener).await });

    Ok((addr, registry))
}

/// Runs the server to completion: binds and accepts connections in the
/// background while the admin console drives the foreground, until
/// `shutdown` is issued on the console or its stdin is closed.
pub async fn run(config: Config) -> std::io::Result<()> {
    let (_addr, registry) = serve(&config).await?;

    admin::run(registry.clone()).await;

    registry.stop();
    registry.close_all();

    Ok(())
}

async fn accept_loop(registry: Arc<Registry>, listener: TcpListener) {
    loop {
        if registry.is_stopping() {
            break;
        }
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("accept error: {e}");
                continue;
            }
        };
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(registry, stream, addr).await {
                eprintln!("connection {addr} ended: {e}");
            }
        });
    }
}

async fn handle_connection(
    registry: Arc<Registry>,
    stream: tokio::net::TcpStream,
    addr: std::net::SocketAddr,
) -> std::io::Result<()> {
    let framed = Framed::new(stream, JsonLineCodec::default());
    let (sink, mut stream) = framed.split();
    let outbound = Outbound::new(sink);
    let mut session = SessionState::new(addr);

    while let Some(frame) = stream.next().await {
        let value = match frame {
            Ok(v) => v,
            Err(e) => {
                eprintln!("codec error from {addr}: {e}");
                break;
            }
        };

        let envelope: Envelope = match serde_json::from_value(value.clone()) {
            Ok(e) => e,
            Err(_) => {
                let _ = outbound
                    .send(serde_json::json!({"status": "error", "reason": "missing_type"}))
                    .await;
                continue;
            }
        };

        // An authenticated session is only reachable from other tasks
        // (broadcasts, moderation) once it is registered; the channel must
        // be wired up before the first `signin` response goes out so a
        // push that races the reply still finds a home.
        let was_authenticated = session.is_authenticated();
        let response = dispatcher::dispatch(&registry, &mut session, &envelope.kind, value).await;

        if !was_authenticated && session.is_authenticated() {
            let handle = new_channel(addr, &outbound, session.state.clone());
            registry.register(session.username.as_ref().unwrap(), handle);
        }

        let terminal = envelope.kind == "disconnect" || dispatcher::is_terminal(&envelope.kind, &response);

        if outbound.send(response).await.is_err() {
            break;
        }

        if terminal {
            break;
        }
    }

    if let Some(name) = session.username.take() {
        registry.unregister(&name);
    }
    Ok(())
}
