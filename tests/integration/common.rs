use std::net::SocketAddr;
use std::sync::Arc;

use parlor::config::Config;
use parlor::registry::Registry;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// A running server bound to an ephemeral port, backed by a temp SQLite
/// file that's removed when the harness drops. Mirrors the teacher's own
/// throwaway-temp-db-per-test pattern, just against a raw TCP client
/// instead of an in-process HTTP client.
///
/// Exposes the `Registry` directly so moderation tests can drive `kick`/
/// `ban`/etc. the way the admin console would, without needing a second
/// stdin-attached process in the test harness.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    _tempdir: tempfile::TempDir,
}

pub async fn start_server() -> TestServer {
    start_server_with_room("general").await
}

pub async fn start_server_with_room(default_room: &str) -> TestServer {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let db_path = tempdir.path().join("chat.db");

    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        db_path: db_path.to_string_lossy().to_string(),
        default_room: default_room.to_string(),
    };

    let (addr, registry) = parlor::serve(&config).await.expect("server starts");

    TestServer {
        addr,
        registry,
        _tempdir: tempdir,
    }
}

/// A minimal client speaking the raw JSON-framed protocol: write one JSON
/// object per call, read exactly one JSON object back.
pub struct TestClient {
    write_half: tokio::net::tcp::OwnedWriteHalf,
    read_half: BufReader<tokio::net::tcp::OwnedReadHalf>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, write_half) = stream.into_split();
        Self {
            write_half,
            read_half: BufReader::new(read_half),
        }
    }

    pub async fn send(&mut self, value: Value) {
        let body = serde_json::to_vec(&value).expect("serialize");
        self.write_half.write_all(&body).await.expect("write");
    }

    /// Reads bytes one at a time until they parse as a complete JSON value.
    /// Frames have no delimiter on the wire, so this mirrors what the
    /// server's own codec does: keep trying to parse, wait for more bytes
    /// on EOF-mid-object.
    pub async fn recv(&mut self) -> Value {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            let n = self.read_half.read(&mut byte).await.expect("read");
            if n == 0 {
                panic!("connection closed before a full frame arrived");
            }
            buf.push(byte[0]);
            if let Ok(value) = serde_json::from_slice::<Value>(&buf) {
                return value;
            }
        }
    }
}
