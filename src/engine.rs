use crate::{
    error::{Result, SineError},
    fetch::Fetch,
    fs::ModFs,
    notify::{Notifier, Toast, ToastCategory},
    paths::SineLayout,
    prefs::{self, PrefStore},
    version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

const FEED_BASE: &str = "https://raw.githubusercontent.com/CosmoCreeper/Sine";
const DEFAULT_LOADER: &str = "sine.uc.mjs";
const LOADERS_DIR: &str = "loaders";
const BACKUP_ENGINE_DIR: &str = "engine";

pub fn default_feed_url(cosine: bool) -> String {
    let branch = if cosine { "cosine" } else { "main" };
    format!("{FEED_BASE}/{branch}/deployment/engine.json")
}

/// The remote engine version feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineFeed {
    pub version: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    pub package: String,
    #[serde(default)]
    pub updates: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaders: Option<Vec<String>>,
}

impl EngineFeed {
    /// Top-level loader files that live next to the engine directory.
    pub fn loaders(&self) -> Vec<String> {
        self.loaders
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_LOADER.to_string()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    Idle,
    Checking,
    Updating,
    Success,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The feed could not be fetched or parsed.
    NoFeed,
    UpToDate { latest: String },
    /// A newer engine exists but automatic updates are off.
    Available { latest: String },
    Updated { version: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: Option<String>,
    pub updated_at: String,
    pub latest_version: Option<String>,
    pub pending_restart: bool,
    pub auto_update: bool,
    pub state: UpdateState,
}

pub struct EngineUpdater {
    fetch: Arc<dyn Fetch>,
    fs: Arc<dyn ModFs>,
    prefs: Arc<dyn PrefStore>,
    notifier: Arc<dyn Notifier>,
    layout: SineLayout,
    feed_url: String,
    state: UpdateState,
}

impl EngineUpdater {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        fs: Arc<dyn ModFs>,
        prefs: Arc<dyn PrefStore>,
        notifier: Arc<dyn Notifier>,
        layout: SineLayout,
        feed_url: impl Into<String>,
    ) -> Self {
        Self {
            fetch,
            fs,
            prefs,
            notifier,
            layout,
            feed_url: feed_url.into(),
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            version: self.prefs.get_string(prefs::VERSION),
            updated_at: self.local_updated_at(),
            latest_version: self.prefs.get_string(prefs::LATEST_VERSION),
            pending_restart: self.prefs.get_bool(prefs::PENDING_RESTART, false),
            auto_update: self.prefs.get_bool(prefs::ENGINE_AUTO_UPDATE, true),
            state: self.state,
        }
    }

    fn local_updated_at(&self) -> String {
        self.prefs
            .get_string(prefs::UPDATED_AT)
            .unwrap_or_else(|| prefs::DEFAULT_UPDATED_AT.to_string())
    }

    pub fn fetch_feed(&self) -> Option<EngineFeed> {
        let value = self.fetch.fetch_json(&self.feed_url)?;
        match serde_json::from_value(value) {
            Ok(feed) => Some(feed),
            Err(err) => {
                warn!(url = %self.feed_url, %err, "engine feed malformed");
                None
            }
        }
    }

    /// True when `feed` is newer than the installed engine by timestamp or,
    /// failing that, by version number.
    pub fn is_feed_newer(&self, feed: &EngineFeed) -> bool {
        let local = self.local_updated_at();
        if version::is_newer_timestamp(Some(&feed.updated_at), Some(&local)) {
            return true;
        }
        match self.prefs.get_string(prefs::VERSION) {
            Some(current) => version::is_newer(&feed.version, &current),
            None => false,
        }
    }

    /// Fetches the feed and installs a newer engine when automatic updates
    /// are on or `manual` is set.
    pub fn check_for_updates(&mut self, manual: bool) -> Result<CheckOutcome> {
        self.state = UpdateState::Checking;
        let Some(feed) = self.fetch_feed() else {
            self.state = UpdateState::Idle;
            return Ok(CheckOutcome::NoFeed);
        };
        self.prefs.set_string(prefs::LATEST_VERSION, &feed.version)?;

        if !self.is_feed_newer(&feed) {
            debug!(latest = %feed.version, "engine up to date");
            self.state = UpdateState::Idle;
            return Ok(CheckOutcome::UpToDate {
                latest: feed.version,
            });
        }
        if !manual && !self.prefs.get_bool(prefs::ENGINE_AUTO_UPDATE, true) {
            info!(latest = %feed.version, "engine update available, auto-update off");
            self.state = UpdateState::Idle;
            return Ok(CheckOutcome::Available {
                latest: feed.version,
            });
        }

        self.update_engine(&feed)?;
        Ok(CheckOutcome::Updated {
            version: feed.version,
        })
    }

    /// Replaces the engine with the one in `feed`. On failure the previous
    /// engine is put back before the error is returned.
    pub fn update_engine(&mut self, feed: &EngineFeed) -> Result<()> {
        self.prefs.set_bool(prefs::PENDING_RESTART, false)?;
        self.state = UpdateState::Updating;
        info!(version = %feed.version, package = %feed.package, "updating engine");

        if let Err(err) = self.recover_backup(&feed.loaders()) {
            self.state = UpdateState::Failed;
            error!(%err, "engine backup could not be put back");
            self.notifier.notify(
                Toast::error("The Sine engine could not be restored.")
                    .with_category(ToastCategory::Engine)
                    .with_detail(err.to_string()),
            );
            return Err(err);
        }

        let mut moved = Vec::new();
        if let Err(err) = self.swap_in(feed, &mut moved) {
            error!(%err, "engine update failed, rolling back");
            self.discard_partial();
            return match self.restore(&moved) {
                Ok(()) => {
                    self.state = UpdateState::RolledBack;
                    self.notifier.notify(
                        Toast::error("The Sine engine failed to update.")
                            .with_category(ToastCategory::Engine)
                            .with_detail(err.to_string()),
                    );
                    Err(err)
                }
                Err(rollback) => {
                    self.state = UpdateState::Failed;
                    error!(%rollback, "engine rollback failed");
                    self.notifier.notify(
                        Toast::error("The Sine engine could not be restored.")
                            .with_category(ToastCategory::Engine)
                            .with_detail(rollback.to_string()),
                    );
                    Err(rollback)
                }
            };
        }

        if let Err(err) = self.fs.remove_dir_if_exists(&self.layout.engine_backup_dir()) {
            warn!(%err, "could not remove engine backup");
        }

        self.prefs.set_string(prefs::UPDATED_AT, &feed.updated_at)?;
        self.prefs.set_string(prefs::VERSION, &feed.version)?;
        self.prefs.set_string(prefs::LATEST_VERSION, &feed.version)?;
        self.prefs.set_bool(prefs::PENDING_RESTART, true)?;
        self.state = UpdateState::Success;
        info!(version = %feed.version, "engine updated");
        self.notifier.notify(
            Toast::restart(
                format!("The Sine engine has been updated to v{}.", feed.version),
                ToastCategory::Engine,
            )
            .with_detail("Please restart your browser for the changes to fully take effect."),
        );
        Ok(())
    }

    /// Puts back whatever an earlier failed rollback left only in the backup,
    /// so the backup never holds the sole copy of an engine file when it is
    /// cleared. Returns how many entries were restored.
    fn recover_backup(&self, loaders: &[String]) -> Result<usize> {
        let fs = self.fs.as_ref();
        let backup_dir = self.layout.engine_backup_dir();
        if !fs.is_dir(&backup_dir) {
            return Ok(0);
        }
        let scripts_dir = self.layout.scripts_dir();
        let mut entries = vec![(self.layout.engine_dir(), backup_dir.join(BACKUP_ENGINE_DIR))];
        entries.extend(loaders.iter().map(|loader| {
            (
                scripts_dir.join(loader),
                backup_dir.join(LOADERS_DIR).join(loader),
            )
        }));

        let mut restored = 0;
        for (live, saved) in entries {
            if fs.exists(&live) || !fs.exists(&saved) {
                continue;
            }
            fs.rename(&saved, &live).map_err(|err| SineError::Rollback {
                path: live.clone(),
                reason: err.to_string(),
            })?;
            warn!(path = %live.display(), "recovered engine file left in backup");
            restored += 1;
        }
        Ok(restored)
    }

    /// Moves the live engine aside, extracts the new one and swaps it in.
    /// Every move into the backup is recorded in `moved` as (live, saved).
    fn swap_in(&self, feed: &EngineFeed, moved: &mut Vec<(PathBuf, PathBuf)>) -> Result<()> {
        let fs = self.fs.as_ref();
        let scripts_dir = self.layout.scripts_dir();
        let engine_dir = self.layout.engine_dir();
        let backup_dir = self.layout.engine_backup_dir();
        let temp_dir = self.layout.engine_temp_dir();
        let archive = self.layout.engine_archive();
        let loaders = feed.loaders();

        fs.create_dir_all(&scripts_dir)?;
        fs.remove_dir_if_exists(&temp_dir)?;
        fs.remove_dir_if_exists(&backup_dir)?;
        fs.create_dir_all(&backup_dir)?;

        if fs.exists(&engine_dir) {
            let saved = backup_dir.join(BACKUP_ENGINE_DIR);
            fs.rename(&engine_dir, &saved)?;
            moved.push((engine_dir.clone(), saved));
        }
        for loader in &loaders {
            let live = scripts_dir.join(loader);
            if fs.exists(&live) {
                let saved = backup_dir.join(LOADERS_DIR).join(loader);
                fs.rename(&live, &saved)?;
                moved.push((live, saved));
            }
        }
        debug!(entries = moved.len(), "live engine moved to backup");

        let bytes = self.fetch.fetch_bytes(&feed.package)?;
        if let Some(expected) = &feed.sha256 {
            verify_sha256(&bytes, expected)?;
        }
        fs.write(&archive, &bytes)?;
        let extracted = extract_zip(fs, &bytes, &temp_dir)?;
        fs.remove_file_if_exists(&archive)?;
        debug!(extracted, "engine archive extracted");

        for loader in &loaders {
            let fresh = temp_dir.join(LOADERS_DIR).join(loader);
            let live = scripts_dir.join(loader);
            if fs.exists(&fresh) {
                fs.rename(&fresh, &live)?;
            } else if let Some((_, saved)) = moved.iter().find(|(original, _)| *original == live) {
                let previous = fs.read(saved)?;
                fs.write(&live, &previous)?;
            }
        }
        fs.remove_dir_if_exists(&temp_dir.join(LOADERS_DIR))?;
        fs.rename(&temp_dir, &engine_dir)?;
        Ok(())
    }

    fn discard_partial(&self) {
        let fs = self.fs.as_ref();
        if let Err(err) = fs.remove_dir_if_exists(&self.layout.engine_temp_dir()) {
            warn!(%err, "could not remove partial engine extraction");
        }
        if let Err(err) = fs.remove_file_if_exists(&self.layout.engine_archive()) {
            warn!(%err, "could not remove engine archive");
        }
    }

    fn restore(&self, moved: &[(PathBuf, PathBuf)]) -> Result<()> {
        let fs = self.fs.as_ref();
        for (live, saved) in moved.iter().rev() {
            let rollback_err = |err: std::io::Error| SineError::Rollback {
                path: live.clone(),
                reason: err.to_string(),
            };
            if fs.is_dir(live) {
                fs.remove_dir_all(live).map_err(rollback_err)?;
            } else {
                fs.remove_file_if_exists(live).map_err(rollback_err)?;
            }
            fs.rename(saved, live).map_err(rollback_err)?;
            info!(path = %live.display(), "restored from backup");
        }
        if let Err(err) = fs.remove_dir_if_exists(&self.layout.engine_backup_dir()) {
            warn!(%err, "could not remove engine backup");
        }
        Ok(())
    }
}

pub fn verify_sha256(bytes: &[u8], expected: &str) -> Result<()> {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(8192) {
        hasher.update(chunk);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.trim().to_lowercase() {
        return Err(SineError::Update(format!(
            "checksum mismatch: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}

/// Extracts `bytes` into `dest`, dropping the first path component of every
/// entry. Returns the number of files written.
pub fn extract_zip(fs: &dyn ModFs, bytes: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    fs.create_dir_all(dest)?;
    let mut written = 0;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let Some(name) = file.enclosed_name() else {
            continue;
        };
        let relative: PathBuf = name.components().skip(1).collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = dest.join(relative);
        if file.is_dir() {
            fs.create_dir_all(&out_path)?;
            continue;
        }
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        fs.write(&out_path, &contents)?;
        written += 1;
    }
    if written == 0 {
        return Err(SineError::Update("engine archive is empty".into()));
    }
    Ok(written)
}
