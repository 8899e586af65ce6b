use crate::{engine, marketplace::DEFAULT_MARKETPLACE_URL, paths::SineLayout};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const SUPPORTED_FORKS: [&str; 7] = [
    "firefox",
    "zen",
    "floorp",
    "mullvad",
    "waterfox",
    "librewolf",
    "thunderbird",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Browser profile directory; mods live under `<profile>/chrome`.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
    /// Overrides the engine feed picked from `cosine`.
    #[serde(default)]
    pub engine_feed_url: Option<String>,
    #[serde(default = "default_marketplace_url")]
    pub marketplace_url: String,
    #[serde(default)]
    pub allow_external_marketplace: bool,
    #[serde(default = "default_fork")]
    pub fork: String,
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default)]
    pub cosine: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile_dir: None,
            engine_feed_url: None,
            marketplace_url: default_marketplace_url(),
            allow_external_marketplace: false,
            fork: default_fork(),
            os: default_os(),
            cosine: false,
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&base_data_dir()?)
    }

    pub fn load_or_create_at(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            if !SUPPORTED_FORKS.contains(&config.fork.as_str()) {
                config.fork = default_fork();
                config.save_at(base_dir)?;
            }
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save_at(base_dir)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_at(&base_data_dir()?)
    }

    pub fn save_at(&self, base_dir: &Path) -> Result<()> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn layout(&self) -> Result<SineLayout> {
        let profile = self
            .profile_dir
            .as_deref()
            .context("no browser profile configured (set profile_dir in config.json)")?;
        Ok(SineLayout::from_profile(profile))
    }

    pub fn feed_url(&self, cosine_pref: bool) -> String {
        self.engine_feed_url
            .clone()
            .unwrap_or_else(|| engine::default_feed_url(self.cosine || cosine_pref))
    }

    /// The store listing to use; custom URLs need the external opt-in.
    pub fn effective_marketplace_url(&self) -> &str {
        if self.allow_external_marketplace && !self.marketplace_url.trim().is_empty() {
            &self.marketplace_url
        } else {
            DEFAULT_MARKETPLACE_URL
        }
    }
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve data dir")?;
    Ok(base.data_local_dir().join("sine"))
}

fn default_marketplace_url() -> String {
    DEFAULT_MARKETPLACE_URL.to_string()
}

fn default_fork() -> String {
    "firefox".to_string()
}

fn default_os() -> String {
    match std::env::consts::OS {
        "windows" => "win",
        "macos" => "mac",
        _ => "linux",
    }
    .to_string()
}
