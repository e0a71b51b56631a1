use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Base URL written into attachment links.
    pub public_url: String,
    pub user_email: String,
    /// Stable identity across runs; a fresh one is generated when unset.
    pub user_id: Option<Uuid>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let host = var("LOBBY_HOST", "127.0.0.1");
        let port: u16 = var("LOBBY_PORT", "3000")
            .parse()
            .context("LOBBY_PORT must be a port number")?;
        let public_url = var("LOBBY_PUBLIC_URL", &format!("http://{}:{}", host, port));
        let user_id = lookup("LOBBY_USER_ID")
            .filter(|v| !v.trim().is_empty())
            .map(|v| Uuid::parse_str(v.trim()))
            .transpose()
            .context("LOBBY_USER_ID must be a UUID")?;

        Ok(Self {
            db_path: PathBuf::from(var("LOBBY_DB_PATH", "lobby.db")),
            blob_dir: PathBuf::from(var("LOBBY_BLOB_DIR", "./uploads")),
            host,
            port,
            public_url,
            user_email: var("LOBBY_USER_EMAIL", "guest@localhost"),
            user_id,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
