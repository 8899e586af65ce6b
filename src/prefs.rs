use crate::{error::Result, fs::ModFs};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::warn;

pub const VERSION: &str = "sine.version";
pub const UPDATED_AT: &str = "sine.updated-at";
pub const LATEST_VERSION: &str = "sine.latest-version";
pub const PENDING_RESTART: &str = "sine.engine.pending-restart";
pub const ENGINE_AUTO_UPDATE: &str = "sine.engine.auto-update";
pub const MODS_AUTO_UPDATE: &str = "sine.auto-updates";
pub const DISABLE_ALL: &str = "sine.mods.disable-all";
pub const IS_COSINE: &str = "sine.is-cosine";
const LEGACY_SCRIPT_AUTO_UPDATE: &str = "sine.script.auto-update";

pub const DEFAULT_UPDATED_AT: &str = "1927-02-02 20:20";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    String(String),
}

pub type ObserverId = u64;
pub type Observer = Arc<dyn Fn(&str, Option<&PrefValue>) + Send + Sync>;

/// Typed key/value store for engine state, with change observers.
pub trait PrefStore: Send + Sync {
    fn get(&self, key: &str) -> Option<PrefValue>;
    fn set(&self, key: &str, value: PrefValue) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
    /// Registers `observer` for `key`; it runs after every change to it.
    fn observe(&self, key: &str, observer: Observer) -> ObserverId;
    fn unobserve(&self, id: ObserverId);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(PrefValue::Bool(value)) => value,
            _ => default,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(PrefValue::String(value)) => Some(value),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, PrefValue::Bool(value))
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, PrefValue::String(value.to_string()))
    }
}

#[derive(Default)]
struct PrefState {
    values: BTreeMap<String, PrefValue>,
    observers: Vec<(ObserverId, String, Observer)>,
    next_id: ObserverId,
}

struct PrefFile {
    fs: Arc<dyn ModFs>,
    path: PathBuf,
}

/// Preference store kept in memory and, when opened from a file, written
/// back as flat JSON after every change.
pub struct Prefs {
    file: Option<PrefFile>,
    state: Mutex<PrefState>,
}

impl Prefs {
    pub fn in_memory() -> Self {
        Self {
            file: None,
            state: Mutex::new(PrefState::default()),
        }
    }

    pub fn load_or_create(fs: Arc<dyn ModFs>, path: &Path) -> Result<Self> {
        let values = if fs.exists(path) {
            let raw = fs.read_to_string(path)?;
            match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(err) => {
                    warn!(path = %path.display(), %err, "preferences unreadable, starting fresh");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        let prefs = Self {
            file: Some(PrefFile {
                fs,
                path: path.to_path_buf(),
            }),
            state: Mutex::new(PrefState {
                values,
                ..PrefState::default()
            }),
        };
        prefs.persist(&prefs.lock().values)?;
        Ok(prefs)
    }

    fn lock(&self) -> MutexGuard<'_, PrefState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, values: &BTreeMap<String, PrefValue>) -> Result<()> {
        let Some(PrefFile { fs, path }) = &self.file else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(values)?;
        fs.write_atomic(path, raw.as_bytes())?;
        Ok(())
    }

    fn change(&self, key: &str, value: Option<PrefValue>) -> Result<()> {
        let observers: Vec<Observer> = {
            let mut state = self.lock();
            let previous = match &value {
                Some(value) => state.values.insert(key.to_string(), value.clone()),
                None => state.values.remove(key),
            };
            if previous == value {
                return Ok(());
            }
            if let Err(err) = self.persist(&state.values) {
                match previous {
                    Some(previous) => state.values.insert(key.to_string(), previous),
                    None => state.values.remove(key),
                };
                return Err(err);
            }
            state
                .observers
                .iter()
                .filter(|(_, observed, _)| observed == key)
                .map(|(_, _, observer)| Arc::clone(observer))
                .collect()
        };
        for observer in observers {
            observer(key, value.as_ref());
        }
        Ok(())
    }
}

impl PrefStore for Prefs {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.lock().values.get(key).cloned()
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<()> {
        self.change(key, Some(value))
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.change(key, None)
    }

    fn observe(&self, key: &str, observer: Observer) -> ObserverId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.observers.push((id, key.to_string(), observer));
        id
    }

    fn unobserve(&self, id: ObserverId) {
        self.lock().observers.retain(|(existing, _, _)| *existing != id);
    }
}

/// Browser startup: a restart has just happened, so the pending-restart
/// flag is cleared before the defaults are filled.
pub fn apply_defaults(store: &dyn PrefStore) -> Result<()> {
    store.set_bool(PENDING_RESTART, false)?;
    fill_defaults(store)
}

/// Fills missing toggles and migrates the legacy script auto-update key.
pub fn fill_defaults(store: &dyn PrefStore) -> Result<()> {
    if let Some(PrefValue::Bool(legacy)) = store.get(LEGACY_SCRIPT_AUTO_UPDATE) {
        store.set_bool(ENGINE_AUTO_UPDATE, legacy)?;
        store.clear(LEGACY_SCRIPT_AUTO_UPDATE)?;
    }

    for (key, value) in [
        (IS_COSINE, false),
        (MODS_AUTO_UPDATE, true),
        (ENGINE_AUTO_UPDATE, true),
        (DISABLE_ALL, false),
    ] {
        if !store.has(key) {
            store.set_bool(key, value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn observers_fire_on_change_only() {
        let prefs = Prefs::in_memory();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = prefs.observe(
            DISABLE_ALL,
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        prefs.set_bool(DISABLE_ALL, true).unwrap();
        prefs.set_bool(DISABLE_ALL, true).unwrap();
        prefs.set_bool(MODS_AUTO_UPDATE, false).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        prefs.unobserve(id);
        prefs.set_bool(DISABLE_ALL, false).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn typed_getters_fall_back_on_type_mismatch() {
        let prefs = Prefs::in_memory();
        prefs.set_string(VERSION, "2.0.0").unwrap();
        assert_eq!(prefs.get_string(VERSION).as_deref(), Some("2.0.0"));
        assert!(prefs.get_bool(VERSION, true));
        assert_eq!(prefs.get_string(DISABLE_ALL), None);
    }

    #[test]
    fn defaults_migrate_legacy_key() {
        let prefs = Prefs::in_memory();
        prefs.set_bool(LEGACY_SCRIPT_AUTO_UPDATE, false).unwrap();
        prefs.set_bool(PENDING_RESTART, true).unwrap();
        apply_defaults(&prefs).unwrap();
        assert!(!prefs.get_bool(ENGINE_AUTO_UPDATE, true));
        assert!(!prefs.has(LEGACY_SCRIPT_AUTO_UPDATE));
        assert!(!prefs.get_bool(PENDING_RESTART, true));
        assert!(prefs.get_bool(MODS_AUTO_UPDATE, false));
    }

    #[test]
    fn filling_defaults_keeps_pending_restart() {
        let prefs = Prefs::in_memory();
        prefs.set_bool(PENDING_RESTART, true).unwrap();
        prefs.set_bool(DISABLE_ALL, true).unwrap();
        fill_defaults(&prefs).unwrap();
        assert!(prefs.get_bool(PENDING_RESTART, false));
        assert!(prefs.get_bool(DISABLE_ALL, false));
        assert!(prefs.get_bool(ENGINE_AUTO_UPDATE, false));
    }

    #[test]
    fn file_backed_prefs_survive_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sine-mods").join("prefs.json");
        {
            let prefs = Prefs::load_or_create(Arc::new(OsFs), &path).unwrap();
            prefs.set_string(UPDATED_AT, "2025-01-01 10:00").unwrap();
        }
        assert!(!tmp.path().join("sine-mods").join("prefs.json.tmp").exists());
        let prefs = Prefs::load_or_create(Arc::new(OsFs), &path).unwrap();
        assert_eq!(prefs.get_string(UPDATED_AT).as_deref(), Some("2025-01-01 10:00"));
    }
}
