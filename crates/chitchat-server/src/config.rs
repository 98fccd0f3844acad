use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use chitchat_api::auth::AuthConfig;
use chitchat_api::lifecycle::OwnershipPolicy;
use chitchat_gateway::{HeartbeatConfig, OutboundConfig, OverflowPolicy};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

/// Server settings, read once at startup from `CHITCHAT_*` variables.
#[derive(Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub outbound: OutboundConfig,
    pub heartbeat: HeartbeatConfig,
    pub ownership: OwnershipPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults; set but
    /// unparseable values are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("CHITCHAT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("CHITCHAT_JWT_SECRET is unset or still a placeholder");
        }

        let host = get("CHITCHAT_HOST", "0.0.0.0");
        let port: u16 = get("CHITCHAT_PORT", "8080")
            .parse()
            .context("CHITCHAT_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let token_ttl_hours: i64 = get("CHITCHAT_TOKEN_TTL_HOURS", "24")
            .parse()
            .context("CHITCHAT_TOKEN_TTL_HOURS must be an integer")?;
        if token_ttl_hours <= 0 {
            bail!("CHITCHAT_TOKEN_TTL_HOURS must be positive");
        }

        let capacity: usize = get("CHITCHAT_OUTBOUND_CAPACITY", "256")
            .parse()
            .context("CHITCHAT_OUTBOUND_CAPACITY must be an integer")?;
        if capacity == 0 {
            bail!("CHITCHAT_OUTBOUND_CAPACITY must be at least 1");
        }
        let overflow: OverflowPolicy = get("CHITCHAT_OVERFLOW_POLICY", "drop").parse()?;

        let heartbeat_secs: u64 = get("CHITCHAT_HEARTBEAT_SECS", "15")
            .parse()
            .context("CHITCHAT_HEARTBEAT_SECS must be an integer")?;
        if heartbeat_secs == 0 {
            bail!("CHITCHAT_HEARTBEAT_SECS must be at least 1");
        }
        let max_missed: u8 = get("CHITCHAT_MAX_MISSED_PONGS", "2")
            .parse()
            .context("CHITCHAT_MAX_MISSED_PONGS must be 1-255")?;
        if max_missed == 0 {
            bail!("CHITCHAT_MAX_MISSED_PONGS must be at least 1");
        }

        let ownership: OwnershipPolicy = get("CHITCHAT_REVEAL_FORBIDDEN", "false")
            .parse()
            .unwrap_or_default();

        Ok(Self {
            addr,
            db_path: get("CHITCHAT_DB_PATH", "chitchat.db").into(),
            jwt_secret,
            token_ttl_hours,
            outbound: OutboundConfig { capacity, overflow },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(heartbeat_secs),
                max_missed,
            },
            ownership,
        })
    }

    pub fn auth(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.jwt_secret.clone(),
            token_ttl: chrono::Duration::hours(self.token_ttl_hours),
        }
    }
}
