use crate::{error::Result, fs::ModFs, manifest::ModRecord, repo::RepoRef};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// The installed-mods document: `{ id: ModRecord }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    pub mods: BTreeMap<String, ModRecord>,
}

impl Registry {
    pub fn load_or_create(fs: &dyn ModFs, path: &Path) -> Result<Self> {
        if fs.exists(path) {
            let raw = fs.read_to_string(path)?;
            if raw.trim().is_empty() {
                return Ok(Self::default());
            }
            let mut registry: Registry = serde_json::from_str(&raw)?;
            for (id, record) in registry.mods.iter_mut() {
                if record.id.is_empty() {
                    record.id = id.clone();
                }
            }
            return Ok(registry);
        }

        let registry = Self::default();
        registry.save(fs, path)?;
        Ok(registry)
    }

    pub fn save(&self, fs: &dyn ModFs, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs.write_atomic(path, raw.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ModRecord> {
        self.mods.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.mods.contains_key(id)
    }

    pub fn find_by_homepage(&self, homepage: &str) -> Option<&ModRecord> {
        let wanted = normalize_homepage(homepage);
        self.mods.values().find(|record| {
            record
                .homepage
                .as_deref()
                .is_some_and(|existing| normalize_homepage(existing) == wanted)
        })
    }

    pub fn upsert(&mut self, record: ModRecord) {
        self.mods.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<ModRecord> {
        self.mods.remove(id)
    }

    /// Enabled mods in id order.
    pub fn enabled(&self) -> impl Iterator<Item = &ModRecord> {
        self.mods.values().filter(|record| record.enabled)
    }
}

/// Canonical form of a homepage, so `owner/repo` and its GitHub URL match.
pub fn normalize_homepage(value: &str) -> String {
    match RepoRef::parse(value) {
        Ok(repo) => repo.html_url().to_ascii_lowercase(),
        Err(_) => value.trim().trim_end_matches('/').to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFs;

    #[test]
    fn missing_registry_is_created_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sine-mods").join("mods.json");
        let registry = Registry::load_or_create(&OsFs, &path).unwrap();
        assert!(registry.mods.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn saved_registry_reloads_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mods.json");
        let mut registry = Registry::default();
        registry.upsert(ModRecord {
            id: "abc".into(),
            name: "Dark".into(),
            homepage: Some("foo/bar".into()),
            enabled: true,
            ..Default::default()
        });
        registry.save(&OsFs, &path).unwrap();

        let reloaded = Registry::load_or_create(&OsFs, &path).unwrap();
        assert_eq!(reloaded, registry);
        assert!(reloaded.find_by_homepage("Foo/Bar/").is_some());
        assert!(reloaded
            .find_by_homepage("[bar](https://github.com/foo/bar)")
            .is_some());
        assert!(reloaded.find_by_homepage("foo/other").is_none());
        assert_eq!(reloaded.enabled().count(), 1);
    }
}
