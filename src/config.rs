// src/config.rs
// Environment-driven configuration, following the teacher's `config/`
// module shape: small `from_env()` constructors, a helpers module for
// parsing, and a single composed config handed to `AppState`.

use std::collections::HashMap;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("AGENT_RELAY_HOST", "0.0.0.0"),
            port: env_parsed("AGENT_RELAY_PORT", 4317u16),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            path: env_or("AGENT_RELAY_DB_PATH", "agent-relay.sqlite3"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: env_or("RUST_LOG", "info"),
        }
    }
}

/// Default session-policy knobs; persisted/overridden at runtime via
/// `SessionConfig` (see `store::session_config`).
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub inactivity_timeout_ms: i64,
    pub max_concurrent_sessions: i64,
    pub auto_resume_enabled: bool,
    pub history_buffer_capacity: usize,
    pub outbound_queue_capacity: usize,
}

impl SessionDefaults {
    pub fn from_env() -> Self {
        Self {
            inactivity_timeout_ms: env_parsed("AGENT_RELAY_INACTIVITY_TIMEOUT_MS", 60_000i64),
            max_concurrent_sessions: env_parsed("AGENT_RELAY_MAX_CONCURRENT_SESSIONS", 20i64),
            auto_resume_enabled: env_parsed("AGENT_RELAY_AUTO_RESUME", true),
            history_buffer_capacity: env_parsed("AGENT_RELAY_HISTORY_CAPACITY", 500usize),
            outbound_queue_capacity: env_parsed("AGENT_RELAY_OUTBOUND_QUEUE_CAPACITY", 256usize),
        }
    }
}

/// Per-tool executable overrides, so a deployment can point `claude` /
/// `cursor-agent` / `gemini` at non-`$PATH` binaries.
#[derive(Debug, Clone)]
pub struct ToolExecutables {
    overrides: HashMap<String, String>,
}

impl ToolExecutables {
    pub fn from_env() -> Self {
        let mut overrides = HashMap::new();
        for (tool, var) in [
            ("claude", "AGENT_RELAY_CLAUDE_BIN"),
            ("cursor-agent", "AGENT_RELAY_CURSOR_AGENT_BIN"),
            ("gemini", "AGENT_RELAY_GEMINI_BIN"),
        ] {
            if let Ok(path) = std::env::var(var) {
                overrides.insert(tool.to_string(), path);
            }
        }
        Self { overrides }
    }

    pub fn resolve(&self, tool: &str, default_bin: &str) -> String {
        self.overrides
            .get(tool)
            .cloned()
            .unwrap_or_else(|| default_bin.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub session_defaults: SessionDefaults,
    pub tools: ToolExecutables,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            logging: LoggingConfig::from_env(),
            session_defaults: SessionDefaults::from_env(),
            tools: ToolExecutables::from_env(),
        }
    }
}
