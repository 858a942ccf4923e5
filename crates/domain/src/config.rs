//! Environment-driven configuration.
//!
//! The service is configured entirely through environment variables
//! (`SCENARIO_DIR`, `CONTEXT_TTL_MS`, `REDIS_URL`, ...). `Config::from_env`
//! reads them once at startup; `Config::validate` reports issues without
//! aborting so the operator sees every problem in one pass.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8000")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_8000(),
            cors: CorsConfig::default(),
            max_concurrent_requests: d_256(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. A trailing `:*` matches any port on that
    /// host; a literal `"*"` allows everything. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Session snapshot TTL in milliseconds.
    #[serde(default = "d_ttl_ms")]
    pub ttl_ms: u64,
    /// When set, snapshots go to Redis instead of process memory.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ttl_ms: d_ttl_ms(),
            redis_url: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Overall deadline for one turn, bounding external-call retries.
    #[serde(default = "d_turn_deadline_ms")]
    pub turn_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            turn_deadline_ms: d_turn_deadline_ms(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScenarioConfig {
    /// Filesystem root holding `<botId>-<botVersion>.json` scenario files.
    /// `None` disables file-based loading; scenarios must then be uploaded.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("HOST") {
            if !host.is_empty() {
                config.server.host = host;
            }
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            config.server.port = port;
        }
        if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
            let parsed: Vec<String> = origins
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.server.cors.allowed_origins = parsed;
            }
        }
        if let Some(max) = env_parse::<usize>("MAX_CONCURRENT_REQUESTS") {
            config.server.max_concurrent_requests = max;
        }
        if let Some(ttl) = env_parse::<u64>("CONTEXT_TTL_MS") {
            config.context.ttl_ms = ttl;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            let url = url.trim().to_owned();
            if !url.is_empty() {
                config.context.redis_url = Some(url);
            }
        }
        if let Some(deadline) = env_parse::<u64>("TURN_DEADLINE_MS") {
            config.engine.turn_deadline_ms = deadline;
        }
        if let Ok(dir) = std::env::var("SCENARIO_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                config.scenario.dir = Some(PathBuf::from(dir));
            }
        }

        config
    }

    /// Validate the configuration, returning every issue found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.context.ttl_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "CONTEXT_TTL_MS must be > 0".into(),
            });
        }
        if self.engine.turn_deadline_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "TURN_DEADLINE_MS must be > 0".into(),
            });
        }
        if self.server.max_concurrent_requests == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "MAX_CONCURRENT_REQUESTS must be > 0".into(),
            });
        }
        if let Some(dir) = &self.scenario.dir {
            if !dir.is_dir() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    message: format!(
                        "SCENARIO_DIR {} does not exist — file-based scenario \
                         loading will fail until it is created",
                        dir.display()
                    ),
                });
            }
        } else {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "SCENARIO_DIR is not set — scenarios must be uploaded per session"
                    .into(),
            });
        }

        issues
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_8000() -> u16 {
    8000
}
fn d_256() -> usize {
    256
}
fn d_ttl_ms() -> u64 {
    4_200_000
}
fn d_turn_deadline_ms() -> u64 {
    30_000
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
