//! CLI settings
//!
//! Read from `<config dir>/nftsync/config.json`. Every field is optional; a
//! missing file means defaults, and so does an unreadable one, after a warning.
//!
//! ```json
//! { "nft_program": "/usr/sbin/nft", "apply_timeout_secs": 30, "audit": true }
//! ```

use crate::core::nft::{NFT_ENV, NftConfig};
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Upper bound on the apply timeout, one hour.
pub const MAX_APPLY_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// nft to probe for; `NFTSYNC_NFT` overrides it
    #[serde(default = "default_nft_program")]
    pub nft_program: String,
    /// Timeout for a single apply or reload (default: 30s, max: 3600s)
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,
    /// Record applies and reloads in the audit log
    #[serde(default = "default_true")]
    pub audit: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nft_program: default_nft_program(),
            apply_timeout_secs: default_apply_timeout(),
            audit: true,
        }
    }
}

fn default_nft_program() -> String {
    NftConfig::default().program
}

fn default_apply_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// The nft to probe for, with `NFTSYNC_NFT` taking precedence.
    pub fn nft_config(&self) -> NftConfig {
        if std::env::var_os(NFT_ENV).is_some() {
            NftConfig::from_env()
        } else {
            NftConfig::new(self.nft_program.clone())
        }
    }

    /// Clamped to [`MAX_APPLY_TIMEOUT_SECS`], and at least one second.
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs.clamp(1, MAX_APPLY_TIMEOUT_SECS))
    }
}

/// Loads settings from the standard location.
pub async fn load_settings() -> Settings {
    match get_config_dir() {
        Some(dir) => load_settings_from(&dir.join("config.json")).await,
        None => Settings::default(),
    }
}

/// Loads settings from `path`, falling back to defaults.
pub async fn load_settings_from(path: &Path) -> Settings {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            return Settings::default();
        }
    };
    serde_json::from_str(&json).unwrap_or_else(|e| {
        warn!("Invalid settings in {}: {}, using defaults", path.display(), e);
        Settings::default()
    })
}
