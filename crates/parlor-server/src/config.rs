use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used outside development mode.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Secret used in development mode when none is configured.
pub const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthModeKind {
    Token,
    Development,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub auth_mode: AuthModeKind,
    pub dev_username: String,
    pub token_ttl_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let auth_mode = match get("PARLOR_AUTH_MODE").as_deref().map(str::trim) {
            None | Some("") | Some("token") => AuthModeKind::Token,
            Some("development") => AuthModeKind::Development,
            Some(other) => bail!(
                "PARLOR_AUTH_MODE must be 'token' or 'development', got '{}'",
                other
            ),
        };

        let jwt_secret = get("PARLOR_JWT_SECRET").unwrap_or_default();
        let placeholder = jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str());
        let jwt_secret = match (placeholder, auth_mode) {
            (false, _) => jwt_secret,
            (true, AuthModeKind::Development) if jwt_secret.is_empty() => DEV_SECRET.to_string(),
            (true, AuthModeKind::Development) => jwt_secret,
            (true, AuthModeKind::Token) => bail!(
                "PARLOR_JWT_SECRET is unset or still a placeholder. \
                 Set it in your .env file and restart."
            ),
        };

        let port = match get("PARLOR_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("PARLOR_PORT '{}' is not a valid port", port))?,
            None => 3000,
        };

        let token_ttl_hours: i64 = match get("PARLOR_TOKEN_TTL_HOURS") {
            Some(hours) => hours
                .parse()
                .with_context(|| format!("PARLOR_TOKEN_TTL_HOURS '{}' is not a number", hours))?,
            None => 720,
        };
        if token_ttl_hours <= 0 {
            bail!("PARLOR_TOKEN_TTL_HOURS must be positive");
        }

        Ok(Self {
            host: get("PARLOR_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("PARLOR_DB_PATH")
                .unwrap_or_else(|| "parlor.db".into())
                .into(),
            jwt_secret,
            auth_mode,
            dev_username: get("PARLOR_DEV_USERNAME").unwrap_or_else(|| "developer".into()),
            token_ttl_hours,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
