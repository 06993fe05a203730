use std::env;

/// Process-wide configuration, read once at startup.
///
/// Mirrors `rate_limit::RateLimitConfig::from_env` in spirit: every field has
/// a sensible default and an environment variable that overrides it.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub default_room: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
            db_path: "data/chat.db".to_string(),
            default_room: "general".to_string(),
        }
    }
}

/// Returned when `CHAT_PORT` (or a positional `host:port`) names a port
/// outside `0..=65535`. The binary maps this to exit code 2.
#[derive(Debug)]
pub struct InvalidPort(pub String);

impl Config {
    pub fn from_env() -> Result<Self, InvalidPort> {
        let mut config = Self::default();

        if let Ok(val) = env::var("CHAT_HOST") {
            config.host = val;
        }
        if let Ok(val) = env::var("CHAT_PORT") {
            config.port = val.parse::<u16>().map_err(|_| InvalidPort(val))?;
        }
        if let Ok(val) = env::var("CHAT_DB_PATH") {
            config.db_path = val;
        }
        if let Ok(val) = env::var("CHAT_DEFAULT_ROOM") {
            config.default_room = val;
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
