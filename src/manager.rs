use crate::{
    error::{Result, SineError},
    fetch::Fetch,
    files::{self, Stale, SCRIPTS_DIRECTORY},
    fs::ModFs,
    manifest::{Field, ModRecord, PreferencesSpec, THEME_STORE_RAW},
    notify::{Notifier, Toast, ToastCategory},
    paths::{join_relative, SineLayout},
    prefs::{self, PrefStore},
    registry::{normalize_homepage, Registry},
    repo::RepoRef,
    resolver::{self, ResolveOptions},
    scripts, styles,
    stylesheets::{self, Stylesheets},
    version::is_newer_timestamp,
};
use serde_json::Value;
use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex},
    thread,
};
use tracing::{debug, error, info, warn};

const PREFERENCES_FILE: &str = "preferences.json";
const README_FILE: &str = "readme.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// Scheduled sweep; honors the global mods auto-update toggle.
    Auto,
    Manual,
}

/// A mod whose new files sit in its staging folder, with the record it
/// replaces.
struct Staged {
    record: ModRecord,
    previous: Option<ModRecord>,
}

/// Homepages already being installed in one flow. Stops dependency cycles
/// and duplicate installs of a shared module.
#[derive(Default)]
struct InstallBatch {
    claimed: Mutex<HashSet<String>>,
}

impl InstallBatch {
    fn claim(&self, reference: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(normalize_homepage(reference))
    }
}

/// Owns the registry file and every mod folder below the mods directory.
pub struct ModManager {
    fetch: Arc<dyn Fetch>,
    fs: Arc<dyn ModFs>,
    prefs: Arc<dyn PrefStore>,
    notifier: Arc<dyn Notifier>,
    layout: SineLayout,
}

impl ModManager {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        fs: Arc<dyn ModFs>,
        prefs: Arc<dyn PrefStore>,
        notifier: Arc<dyn Notifier>,
        layout: SineLayout,
    ) -> Self {
        Self {
            fetch,
            fs,
            prefs,
            notifier,
            layout,
        }
    }

    pub fn layout(&self) -> &SineLayout {
        &self.layout
    }

    pub fn get_mods(&self) -> Result<Registry> {
        Registry::load_or_create(self.fs.as_ref(), &self.layout.registry_file())
    }

    pub fn rebuild_stylesheets(&self) -> Result<Stylesheets> {
        let registry = self.get_mods()?;
        stylesheets::rebuild(
            self.fs.as_ref(),
            &self.layout,
            &registry,
            self.prefs.as_ref(),
        )
    }

    /// Installs the mod at `repo` and any modules it pulls in, then commits
    /// them to the registry in one write.
    pub fn install_mod(&mut self, repo: &str, reload: bool) -> Result<ModRecord> {
        info!(repo, "installing mod");
        let result = self.try_install(repo);
        let records = match result {
            Ok(records) => records,
            Err(err) => {
                error!(repo, %err, "install failed");
                self.notifier
                    .notify(Toast::error("Failed to install mod").with_detail(err.to_string()));
                return Err(err);
            }
        };

        if reload {
            self.rebuild_stylesheets()?;
        }
        let record = records[0].clone();
        if records.iter().any(ModRecord::ships_scripts) {
            self.notifier.notify(
                Toast::restart("A mod utilizing JS has been installed.", ToastCategory::Scripts)
                    .with_detail("For it to work properly, restart your browser."),
            );
        } else {
            self.notifier
                .notify(Toast::info(format!("{} installed", record.name)));
        }
        info!(mod_id = %record.id, name = %record.name, "mod installed");
        Ok(record)
    }

    fn try_install(&self, repo: &str) -> Result<Vec<ModRecord>> {
        let registry = self.get_mods()?;
        let batch = InstallBatch::default();
        batch.claim(repo);
        self.clear_staging();
        let result = self
            .prepare_install(&registry, repo, &batch)
            .and_then(|staged| self.apply_staged(&staged));
        self.clear_staging();
        let records = result?;
        self.commit(&records)?;
        Ok(records)
    }

    fn prepare_install(
        &self,
        registry: &Registry,
        repo: &str,
        batch: &InstallBatch,
    ) -> Result<Vec<Staged>> {
        let repo_ref = RepoRef::parse(repo)?;
        let seed = ModRecord::from_seed(resolver::fetch_seed(self.fetch.as_ref(), &repo_ref));
        let resolved = resolver::resolve_manifest(
            self.fetch.as_ref(),
            &repo_ref,
            registry,
            seed,
            ResolveOptions::default(),
        )?;
        self.stage_mod(registry, resolved.record, None, batch)
    }

    /// Downloads every file of `record` into its staging folder and returns
    /// what to apply: `record` first, then any newly installed modules. On
    /// error nothing staged by this call is left behind and the live mod
    /// folder is untouched.
    fn stage_mod(
        &self,
        registry: &Registry,
        mut record: ModRecord,
        current: Option<&ModRecord>,
        batch: &InstallBatch,
    ) -> Result<Vec<Staged>> {
        record.normalize_style();
        record.enabled = true;
        record.no_updates = false;
        let staging = self.layout.staging_folder(&record.id);
        self.fs.remove_dir_if_exists(&staging)?;
        let fetch = self.fetch.as_ref();
        let fs = self.fs.as_ref();

        let module_refs: Vec<String> = record
            .module_refs()
            .into_iter()
            .filter(|module| registry.find_by_homepage(module).is_none() && batch.claim(module))
            .collect();

        let (scripts, styles, preferences, readme, modules) = thread::scope(|scope| {
            let record = &record;
            let folder = staging.as_path();
            let scripts = record
                .ships_scripts()
                .then(|| scope.spawn(move || self.sync_scripts(folder, record)));
            let styles = record
                .style
                .as_ref()
                .map(|style| scope.spawn(move || styles::sync_styles(fetch, fs, folder, style)));
            let preferences = record
                .preferences
                .as_ref()
                .map(|spec| scope.spawn(move || self.write_preferences(folder, &record.id, spec)));
            let readme = record
                .readme
                .as_ref()
                .map(|url| scope.spawn(move || self.write_readme(folder, url)));
            let modules: Vec<_> = module_refs
                .iter()
                .map(|module| {
                    (
                        module.as_str(),
                        scope.spawn(move || self.prepare_install(registry, module, batch)),
                    )
                })
                .collect();

            (
                scripts.map(join_worker),
                styles.map(join_worker),
                preferences.map(join_worker),
                readme.map(join_worker),
                modules
                    .into_iter()
                    .map(|(module, handle)| (module, join_worker(handle)))
                    .collect::<Vec<_>>(),
            )
        });

        let collected = (|| -> Result<Vec<String>> {
            let mut paths: Vec<String> = Vec::new();
            if let Some(names) = scripts.transpose()? {
                paths.extend(names.into_iter().map(|name| format!("{SCRIPTS_DIRECTORY}/{name}")));
            }
            if let Some(files) = styles.transpose()? {
                paths.extend(files);
            }
            if preferences.transpose()?.unwrap_or(false) {
                paths.push(PREFERENCES_FILE.to_string());
            }
            if readme.transpose()?.unwrap_or(false) {
                paths.push(README_FILE.to_string());
            }
            Ok(paths)
        })();

        let mut staged_modules = Vec::new();
        for (module, result) in modules {
            match result {
                Ok(installed) => {
                    info!(module, count = installed.len(), "module staged");
                    staged_modules.extend(installed);
                }
                Err(err) => {
                    warn!(module, %err, "module install failed");
                    self.notifier.notify(
                        Toast::error(format!("Failed to install module {module}"))
                            .with_detail(err.to_string()),
                    );
                }
            }
        }

        let paths = match collected {
            Ok(paths) => paths,
            Err(err) => {
                self.discard_staging(&record.id);
                for staged in &staged_modules {
                    self.discard_staging(&staged.record.id);
                }
                return Err(err);
            }
        };
        record.editable_files = files::tree_from_paths(paths);

        let mut staged = vec![Staged {
            record,
            previous: current.cloned(),
        }];
        staged.extend(staged_modules);
        Ok(staged)
    }

    /// Moves every staged file over its live counterpart, then removes what
    /// the previous version owned and the new one no longer lists.
    fn apply_staged(&self, staged: &[Staged]) -> Result<Vec<ModRecord>> {
        let fs = self.fs.as_ref();
        for Staged { record, previous } in staged {
            let staging = self.layout.staging_folder(&record.id);
            let folder = self.layout.mod_folder(&record.id);
            for path in files::flatten(&record.editable_files) {
                let from = join_relative(&staging, &path);
                let to = match path.strip_prefix(&format!("{SCRIPTS_DIRECTORY}/")) {
                    Some(name) => self
                        .layout
                        .script_file(&record.id, &scripts::on_disk_name(name, record.enabled)),
                    None => join_relative(&folder, &path),
                };
                fs.rename(&from, &to)?;
            }
            if let Some(previous) = previous {
                self.remove_stale_files(record, previous)?;
            }
            fs.remove_dir_if_exists(&staging)?;
            debug!(mod_id = %record.id, "staged files applied");
        }
        Ok(staged.iter().map(|staged| staged.record.clone()).collect())
    }

    fn discard_staging(&self, id: &str) {
        if let Err(err) = self.fs.remove_dir_if_exists(&self.layout.staging_folder(id)) {
            warn!(mod_id = id, %err, "could not discard staged files");
        }
    }

    fn clear_staging(&self) {
        let dir = self.layout.staging_dir();
        if !self.fs.exists(&dir) {
            return;
        }
        if let Err(err) = self.fs.remove_dir_all(&dir) {
            warn!(%err, "could not clear staging directory");
        }
    }

    fn sync_scripts(&self, folder: &Path, record: &ModRecord) -> Result<Vec<String>> {
        let Some(homepage) = record.homepage.as_deref() else {
            warn!(mod_id = %record.id, "mod ships scripts but has no homepage, skipping scripts");
            return Ok(Vec::new());
        };
        let repo = RepoRef::parse(homepage)?;
        scripts::sync_scripts(
            self.fetch.as_ref(),
            self.fs.as_ref(),
            &folder.join(SCRIPTS_DIRECTORY),
            record,
            &repo,
        )
    }

    /// Returns whether `preferences.json` was written.
    fn write_preferences(&self, folder: &Path, id: &str, spec: &PreferencesSpec) -> Result<bool> {
        let document = match spec {
            PreferencesSpec::Inline(items) => Some(serde_json::to_string_pretty(items)?),
            PreferencesSpec::Url(url) => {
                let fallback = format!("{THEME_STORE_RAW}/main/themes/{id}/{PREFERENCES_FILE}");
                valid_json(self.fetch.fetch_text(url)).or_else(|| {
                    debug!(url, fallback = %fallback, "preferences invalid, trying theme store");
                    valid_json(self.fetch.fetch_text(&fallback))
                })
            }
        };
        let Some(document) = document else {
            warn!(mod_id = id, "no usable preferences document");
            return Ok(false);
        };
        self.fs
            .write(&folder.join(PREFERENCES_FILE), document.as_bytes())?;
        Ok(true)
    }

    fn write_readme(&self, folder: &Path, url: &str) -> Result<bool> {
        let Some(readme) = self.fetch.fetch_text(url) else {
            warn!(url, "readme unavailable");
            return Ok(false);
        };
        self.fs.write(&folder.join(README_FILE), readme.as_bytes())?;
        Ok(true)
    }

    fn remove_stale_files(&self, record: &ModRecord, current: &ModRecord) -> Result<()> {
        let enabled = current.enabled;
        let script_name = |name: &str| scripts::on_disk_name(name, enabled);
        let stale = files::stale_entries(&current.editable_files, &record.editable_files, &script_name);
        let folder = self.layout.mod_folder(&record.id);
        for entry in stale {
            debug!(mod_id = %record.id, ?entry, "removing stale entry");
            match entry {
                Stale::File(path) => self.fs.remove_file_if_exists(&join_relative(&folder, &path))?,
                Stale::Dir(path) => self.fs.remove_dir_if_exists(&join_relative(&folder, &path))?,
                Stale::Script(name) => self
                    .fs
                    .remove_file_if_exists(&self.layout.script_file(&record.id, &name))?,
            }
        }
        Ok(())
    }

    /// Writes `records` over a freshly loaded registry.
    fn commit(&self, records: &[ModRecord]) -> Result<()> {
        let mut registry = self.get_mods()?;
        for record in records {
            registry.upsert(record.clone());
        }
        registry.save(self.fs.as_ref(), &self.layout.registry_file())
    }

    /// Re-syncs every enabled, updatable mod whose upstream is newer.
    /// Returns whether anything changed.
    pub fn update_mods(&mut self, source: UpdateSource) -> Result<bool> {
        if source == UpdateSource::Auto && !self.prefs.get_bool(prefs::MODS_AUTO_UPDATE, true) {
            debug!("mods auto-update disabled");
            return Ok(false);
        }

        let registry = self.get_mods()?;
        let candidates: Vec<ModRecord> = registry
            .mods
            .values()
            .filter(|record| record.enabled && !record.no_updates && !record.local)
            .cloned()
            .collect();

        let mut changed = false;
        let mut changed_scripts = false;
        for current in candidates {
            self.clear_staging();
            let result = self.update_one(&registry, &current);
            self.clear_staging();
            match result {
                Ok(Some(records)) => {
                    self.commit(&records)?;
                    changed = true;
                    changed_scripts |= records[0].ships_scripts() || current.ships_scripts();
                    info!(mod_id = %current.id, name = %current.name, "mod updated");
                }
                Ok(None) => debug!(mod_id = %current.id, "mod up to date"),
                Err(err) => {
                    warn!(mod_id = %current.id, %err, "mod update failed");
                    self.notifier.notify(
                        Toast::error(format!("Failed to update {}", current.name))
                            .with_detail(err.to_string()),
                    );
                }
            }
        }

        if changed_scripts {
            self.notifier.notify(
                Toast::restart("A mod utilizing JS has been updated.", ToastCategory::Scripts)
                    .with_detail("For it to work properly, restart your browser."),
            );
        }
        if changed {
            self.rebuild_stylesheets()?;
        }
        Ok(changed)
    }

    fn update_one(&self, registry: &Registry, current: &ModRecord) -> Result<Option<Vec<ModRecord>>> {
        let fetch = self.fetch.as_ref();
        let record = match current.homepage.as_deref() {
            Some(homepage) => {
                let repo = RepoRef::parse(homepage)?;
                let upstream = resolver::fetch_seed(fetch, &repo);
                let upstream_record = ModRecord::from_seed(upstream.clone());
                let minimal = resolver::resolve_manifest(
                    fetch,
                    &repo,
                    registry,
                    upstream_record.clone(),
                    ResolveOptions {
                        minimal: true,
                        metadata: None,
                    },
                )?;
                if !is_newer_timestamp(
                    minimal.record.updated_at.as_deref(),
                    current.updated_at.as_deref(),
                ) {
                    return Ok(None);
                }
                info!(mod_id = %current.id, name = %current.name, "newer upstream version found");
                let full = resolver::resolve_manifest(
                    fetch,
                    &repo,
                    registry,
                    minimal.record,
                    ResolveOptions {
                        minimal: false,
                        metadata: minimal.metadata,
                    },
                )?;
                preserve_local_fields(full.record, current, upstream.is_some().then_some(&upstream_record))
            }
            None => {
                let url = format!("{THEME_STORE_RAW}/main/themes/{}/theme.json", current.id);
                let upstream = fetch.fetch_json(&url).filter(Value::is_object);
                let mut record = ModRecord::from_seed(upstream);
                if !is_newer_timestamp(record.updated_at.as_deref(), current.updated_at.as_deref()) {
                    return Ok(None);
                }
                record.id = current.id.clone();
                record
            }
        };

        let batch = InstallBatch::default();
        if let Some(homepage) = &current.homepage {
            batch.claim(homepage);
        }
        let staged = self.stage_mod(registry, record, Some(current), &batch)?;
        self.apply_staged(&staged).map(Some)
    }

    /// Flips `enabled`, renaming the mod's scripts to match.
    pub fn toggle_mod(&mut self, id: &str) -> Result<ModRecord> {
        let mut registry = self.get_mods()?;
        let record = registry
            .mods
            .get_mut(id)
            .ok_or_else(|| SineError::NotFound(format!("mod {id}")))?;
        record.enabled = !record.enabled;
        if record.ships_scripts() {
            scripts::apply_script_state(self.fs.as_ref(), &self.layout, record)?;
        }
        let record = record.clone();
        registry.save(self.fs.as_ref(), &self.layout.registry_file())?;
        self.rebuild_stylesheets()?;

        info!(mod_id = id, enabled = record.enabled, "mod toggled");
        if record.ships_scripts() {
            let state = if record.enabled { "enabled" } else { "disabled" };
            self.notifier.notify(
                Toast::restart(format!("A mod utilizing JS has been {state}."), ToastCategory::Scripts)
                    .with_detail("For usage of it to be fully restored, restart your browser."),
            );
        }
        Ok(record)
    }

    /// Drops the registry entry, the mod folder and the mod's scripts.
    pub fn remove_mod(&mut self, id: &str) -> Result<ModRecord> {
        let mut registry = self.get_mods()?;
        let record = registry
            .remove(id)
            .ok_or_else(|| SineError::NotFound(format!("mod {id}")))?;
        registry.save(self.fs.as_ref(), &self.layout.registry_file())?;
        self.fs.remove_dir_if_exists(&self.layout.mod_folder(id))?;
        let swept = scripts::sweep_scripts(self.fs.as_ref(), &self.layout, id)?;
        self.rebuild_stylesheets()?;

        info!(mod_id = id, swept, "mod removed");
        if record.ships_scripts() {
            self.notifier.notify(
                Toast::restart("A mod utilizing JS has been removed.", ToastCategory::Scripts)
                    .with_detail("For usage of it to be fully halted, restart your browser."),
            );
        } else {
            self.notifier
                .notify(Toast::info(format!("{} removed", record.name)));
        }
        Ok(record)
    }

    pub fn set_no_updates(&mut self, id: &str, no_updates: bool) -> Result<ModRecord> {
        let mut registry = self.get_mods()?;
        let record = registry
            .mods
            .get_mut(id)
            .ok_or_else(|| SineError::NotFound(format!("mod {id}")))?;
        record.no_updates = no_updates;
        let record = record.clone();
        registry.save(self.fs.as_ref(), &self.layout.registry_file())?;
        Ok(record)
    }
}

fn join_worker<T>(handle: thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(SineError::Update("sync worker panicked".into())))
}

fn valid_json(body: Option<String>) -> Option<String> {
    body.filter(|body| serde_json::from_str::<Value>(body).is_ok())
}

/// Carries over what the user's copy has and the new resolution lacks.
fn preserve_local_fields(
    mut record: ModRecord,
    current: &ModRecord,
    upstream: Option<&ModRecord>,
) -> ModRecord {
    record.id = current.id.clone();
    if record.version == crate::manifest::DEFAULT_VERSION && !current.version.is_empty() {
        record.version = current.version.clone();
    }
    record.normalize_style();
    if record.style.is_none() {
        record.style = current.style.clone();
    }
    if record.readme.is_none() {
        record.readme = current.readme.clone();
    }
    if record.preferences.is_none() {
        record.preferences = current.preferences.clone();
    }
    if record.image.is_none() {
        record.image = current.image.clone();
    }
    let upstream_has = |field: Field| upstream.is_some_and(|upstream| upstream.has(field));
    if !upstream_has(Field::Name) && current.has(Field::Name) {
        record.name = current.name.clone();
    }
    if !upstream_has(Field::Description) && current.has(Field::Description) {
        record.description = current.description.clone();
    }
    record
}
