use crate::{
    error::{Result, SineError},
    fetch::Fetch,
    fs::ModFs,
    manifest::{ModRecord, ScriptsSpec},
    paths::SineLayout,
    repo::RepoRef,
};
use serde::Deserialize;
use std::{path::Path, thread};
use tracing::{debug, info, warn};

const DISABLED_EXTENSION: &str = "db";

/// Name a script carries while its mod is disabled. The full file name is
/// kept and `.db` appended, so the module loader no longer picks it up and
/// two scripts of one mod never share a disabled name.
pub fn disabled_name(name: &str) -> String {
    if name.ends_with(".mjs") || name.ends_with(".js") {
        format!("{name}.{DISABLED_EXTENSION}")
    } else {
        name.to_string()
    }
}

pub fn on_disk_name(name: &str, enabled: bool) -> String {
    if enabled {
        name.to_string()
    } else {
        disabled_name(name)
    }
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    name: String,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Downloads every script of `record` into `dest` under its listed name and
/// returns the names. All downloads finish before this returns.
pub fn sync_scripts(
    fetch: &dyn Fetch,
    fs: &dyn ModFs,
    dest: &Path,
    record: &ModRecord,
    repo: &RepoRef,
) -> Result<Vec<String>> {
    let sources = script_sources(fetch, record, repo)?;
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let results: Vec<Result<String>> = thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter()
            .map(|(name, url)| {
                scope.spawn(move || {
                    let bytes = fetch.fetch_bytes(url)?;
                    fs.write(&dest.join(name), &bytes)?;
                    debug!(mod_id = %record.id, script = %name, "script downloaded");
                    Ok(name.clone())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(SineError::Update("script worker panicked".into())))
            })
            .collect()
    });

    let names = results.into_iter().collect::<Result<Vec<_>>>()?;
    info!(mod_id = %record.id, count = names.len(), "scripts synchronized");
    Ok(names)
}

/// A script name must stay inside the scripts directory once prefixed.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn script_sources(
    fetch: &dyn Fetch,
    record: &ModRecord,
    repo: &RepoRef,
) -> Result<Vec<(String, String)>> {
    let base = format!("{}js/", repo.raw_base_url());
    let sources: Vec<(String, String)> = match &record.js {
        Some(ScriptsSpec::Files(names)) => names
            .iter()
            .map(|name| (name.clone(), format!("{base}{name}")))
            .collect(),
        Some(ScriptsSpec::Flag(true)) => {
            let listing = fetch
                .fetch_json(&repo.contents_url("js"))
                .ok_or_else(|| SineError::NotFound(repo.contents_url("js")))?;
            let entries: Vec<ContentsEntry> = serde_json::from_value(listing)?;
            entries
                .into_iter()
                .filter(|entry| entry.kind.is_empty() || entry.kind == "file")
                .map(|entry| {
                    let url = entry
                        .download_url
                        .unwrap_or_else(|| format!("{base}{}", entry.name));
                    (entry.name, url)
                })
                .collect()
        }
        _ => Vec::new(),
    };
    Ok(sources
        .into_iter()
        .filter(|(name, _)| {
            let plain = is_plain_file_name(name);
            if !plain {
                warn!(mod_id = %record.id, script = %name, "script name leaves the scripts directory, skipping");
            }
            plain
        })
        .collect())
}

/// Renames the scripts of `record` from their previous form into the one
/// matching `record.enabled`.
pub fn apply_script_state(fs: &dyn ModFs, layout: &SineLayout, record: &ModRecord) -> Result<()> {
    for name in record.script_files() {
        let from = layout.script_file(&record.id, &on_disk_name(&name, !record.enabled));
        let to = layout.script_file(&record.id, &on_disk_name(&name, record.enabled));
        if from == to {
            continue;
        }
        if !fs.exists(&from) {
            warn!(mod_id = %record.id, script = %name, "script missing on disk, skipping rename");
            continue;
        }
        fs.rename(&from, &to)?;
    }
    Ok(())
}

/// Removes every `{id}_*` file from the shared scripts directory.
pub fn sweep_scripts(fs: &dyn ModFs, layout: &SineLayout, id: &str) -> Result<usize> {
    let dir = layout.scripts_dir();
    if !fs.is_dir(&dir) {
        return Ok(0);
    }
    let prefix = format!("{id}_");
    let mut removed = 0;
    for path in fs.list_dir(&dir)? {
        let matches = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with(&prefix))
            .unwrap_or(false);
        if matches && !fs.is_dir(&path) {
            fs.remove_file_if_exists(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
