//! Configuration file management for cairn.
//!
//! Provides a TOML-based config file at `~/.config/cairn/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cairn_core::gateway::GatewayConfig;
use cairn_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub gateway: GatewaySection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewaySection {
    /// Base URL of an OpenAI-compatible completion endpoint.
    pub base_url: String,
    /// Model identifier sent with every completion request.
    pub model: String,
    /// Bearer token. Omitted for local providers that need none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the cairn config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/cairn` or `~/.config/cairn`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("cairn");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("cairn")
}

/// Return the path to the cairn config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // Set permissions to 0600 (owner read/write only) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CairnConfig {
    pub db_config: DbConfig,
    pub gateway_config: GatewayConfig,
}

impl CairnConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `CAIRN_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Gateway: `CAIRN_GATEWAY_URL` / `CAIRN_GATEWAY_MODEL` / `CAIRN_GATEWAY_KEY` env >
    ///   `config_file.gateway` > [`GatewayConfig::default`] (a local Ollama install)
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        // DB URL resolution.
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("CAIRN_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        // Gateway resolution. Each field falls back independently so a config
        // file can pin the model while the key comes from the environment.
        let defaults = GatewayConfig::default();
        let file_gateway = file_config.as_ref().map(|cfg| &cfg.gateway);

        let base_url = std::env::var("CAIRN_GATEWAY_URL")
            .ok()
            .or_else(|| file_gateway.map(|g| g.base_url.clone()))
            .unwrap_or(defaults.base_url);
        let model = std::env::var("CAIRN_GATEWAY_MODEL")
            .ok()
            .or_else(|| file_gateway.map(|g| g.model.clone()))
            .unwrap_or(defaults.model);
        let api_key = std::env::var("CAIRN_GATEWAY_KEY")
            .ok()
            .or_else(|| file_gateway.and_then(|g| g.api_key.clone()));

        let gateway_config = GatewayConfig {
            base_url,
            model,
            api_key,
            timeout: defaults.timeout,
        };

        Ok(Self {
            db_config,
            gateway_config,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
