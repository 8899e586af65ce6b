use std::path::{Path, PathBuf};

pub const MODS_DIR_NAME: &str = "sine-mods";
pub const SCRIPTS_DIR_NAME: &str = "JS";
pub const REGISTRY_FILE_NAME: &str = "mods.json";
pub const PREFS_FILE_NAME: &str = "prefs.json";
pub const STAGING_DIR_NAME: &str = ".staging";

/// Canonical on-disk locations, all derived from the profile's chrome dir.
#[derive(Debug, Clone)]
pub struct SineLayout {
    pub chrome_dir: PathBuf,
}

impl SineLayout {
    pub fn new(chrome_dir: impl Into<PathBuf>) -> Self {
        Self {
            chrome_dir: chrome_dir.into(),
        }
    }

    pub fn from_profile(profile_dir: &Path) -> Self {
        Self::new(profile_dir.join("chrome"))
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.chrome_dir.join(MODS_DIR_NAME)
    }

    pub fn registry_file(&self) -> PathBuf {
        self.mods_dir().join(REGISTRY_FILE_NAME)
    }

    pub fn prefs_file(&self) -> PathBuf {
        self.mods_dir().join(PREFS_FILE_NAME)
    }

    pub fn chrome_sheet(&self) -> PathBuf {
        self.mods_dir().join("chrome.css")
    }

    pub fn content_sheet(&self) -> PathBuf {
        self.mods_dir().join("content.css")
    }

    pub fn mod_folder(&self, id: &str) -> PathBuf {
        self.mods_dir().join(id)
    }

    /// Scratch area where a mod's new files are assembled before they
    /// replace the live ones.
    pub fn staging_dir(&self) -> PathBuf {
        self.mods_dir().join(STAGING_DIR_NAME)
    }

    pub fn staging_folder(&self, id: &str) -> PathBuf {
        self.staging_dir().join(id)
    }

    /// Shared scripts directory; mod scripts live here as `{id}_{name}`.
    pub fn scripts_dir(&self) -> PathBuf {
        self.chrome_dir.join(SCRIPTS_DIR_NAME)
    }

    pub fn script_file(&self, id: &str, file_name: &str) -> PathBuf {
        self.scripts_dir().join(format!("{id}_{file_name}"))
    }

    pub fn engine_dir(&self) -> PathBuf {
        self.scripts_dir().join("engine")
    }

    pub fn engine_backup_dir(&self) -> PathBuf {
        self.scripts_dir().join("backupEngine")
    }

    pub fn engine_temp_dir(&self) -> PathBuf {
        self.scripts_dir().join("tempEngine")
    }

    pub fn engine_archive(&self) -> PathBuf {
        self.scripts_dir().join("engine.zip")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.mods_dir().join("logs")
    }
}

/// Joins a POSIX-style relative path onto `root` using native separators.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}
