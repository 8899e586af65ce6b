use crate::{
    error::{Result, SineError},
    fetch::Fetch,
    manifest::{Field, ModRecord, PreferencesSpec, StyleSpec, DEFAULT_VERSION},
    registry::Registry,
    repo::RepoRef,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::thread;
use tracing::{debug, info, warn};

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_GROUPS: usize = 3;
const ID_GROUP_LEN: usize = 9;

/// Repository metadata from the GitHub API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    #[serde(default)]
    tag_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Only `updatedAt` is needed; skip every file lookup.
    pub minimal: bool,
    /// Metadata already fetched by an earlier minimal pass.
    pub metadata: Option<RepoMetadata>,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub record: ModRecord,
    pub metadata: Option<RepoMetadata>,
}

pub fn generate_id<R: Rng>(rng: &mut R) -> String {
    (0..ID_GROUPS)
        .map(|_| {
            (0..ID_GROUP_LEN)
                .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Draws ids until one is not taken in `registry`.
pub fn unique_id(registry: &Registry) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id = generate_id(&mut rng);
        if !registry.contains(&id) {
            return id;
        }
    }
}

/// Whether `id` can name a mod folder and prefix its scripts: ASCII letters,
/// digits, `-` and `_` only, so it can never leave `sine-mods/`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Tag name of a release as a version: lower-cased, leading `v` dropped.
pub fn release_version(tag: Option<&str>) -> String {
    match tag.map(str::trim).filter(|tag| !tag.is_empty()) {
        Some(tag) => {
            let lowered = tag.to_lowercase();
            lowered.strip_prefix('v').unwrap_or(&lowered).to_string()
        }
        None => DEFAULT_VERSION.to_string(),
    }
}

/// The repository's `theme.json`, when it is a JSON object.
pub fn fetch_seed(fetch: &dyn Fetch, repo: &RepoRef) -> Option<Value> {
    fetch
        .fetch_json(&format!("{}theme.json", repo.raw_base_url()))
        .filter(Value::is_object)
}

pub fn fetch_metadata(fetch: &dyn Fetch, repo: &RepoRef) -> Option<RepoMetadata> {
    let value = fetch.fetch_json(&repo.api_url())?;
    serde_json::from_value(value).ok()
}

fn fetch_release(fetch: &dyn Fetch, repo: &RepoRef) -> String {
    let tag = fetch
        .fetch_json(&repo.releases_url())
        .and_then(|value| serde_json::from_value::<LatestRelease>(value).ok())
        .and_then(|release| release.tag_name);
    release_version(tag.as_deref())
}

fn detect_style(fetch: &dyn Fetch, base: &str) -> Option<StyleSpec> {
    let root = format!("{base}chrome.css");
    if fetch.exists(&root) {
        return Some(StyleSpec::Url(root));
    }
    let mut chrome = None;
    let mut content = None;
    for dir in ["", "chrome/"] {
        let user_chrome = format!("{base}{dir}userChrome.css");
        if fetch.exists(&user_chrome) {
            chrome = Some(user_chrome);
        }
        let user_content = format!("{base}{dir}userContent.css");
        if fetch.exists(&user_content) {
            content = Some(user_content);
        }
    }
    let style = StyleSpec::Split { chrome, content };
    (!style.is_empty()).then_some(style)
}

fn first_available(fetch: &dyn Fetch, base: &str, names: &[&str]) -> Option<String> {
    names
        .iter()
        .map(|name| format!("{base}{name}"))
        .find(|url| fetch.exists(url))
}

fn required_fields(minimal: bool) -> &'static [Field] {
    if minimal {
        &[Field::UpdatedAt]
    } else {
        &[
            Field::Homepage,
            Field::Name,
            Field::Description,
            Field::CreatedAt,
            Field::UpdatedAt,
        ]
    }
}

#[derive(Default)]
struct Discovered {
    metadata: Option<RepoMetadata>,
    style: Option<StyleSpec>,
    preferences: Option<String>,
    readme: Option<String>,
    version: Option<String>,
}

/// Builds a complete record for `repo` from `seed`, filling gaps from the
/// repository files and the GitHub API. Values already in `seed` win unless
/// they are theme-store placeholders.
pub fn resolve_manifest(
    fetch: &dyn Fetch,
    repo: &RepoRef,
    registry: &Registry,
    seed: ModRecord,
    options: ResolveOptions,
) -> Result<Resolved> {
    let seed_present = seed != ModRecord::default();
    let needs_api = options.metadata.is_none()
        && required_fields(options.minimal)
            .iter()
            .any(|field| !seed.has(*field));
    let base = repo.raw_base_url();
    debug!(repo = %base, minimal = options.minimal, needs_api, "resolving manifest");

    let found = if options.minimal {
        Discovered {
            metadata: if needs_api {
                fetch_metadata(fetch, repo)
            } else {
                options.metadata.clone()
            },
            ..Discovered::default()
        }
    } else {
        thread::scope(|scope| {
            let metadata = needs_api.then(|| scope.spawn(|| fetch_metadata(fetch, repo)));
            let style = seed
                .should_apply(Field::Style)
                .then(|| scope.spawn(|| detect_style(fetch, &base)));
            let preferences = seed
                .should_apply(Field::Preferences)
                .then(|| scope.spawn(|| first_available(fetch, &base, &["preferences.json"])));
            let readme = seed
                .should_apply(Field::Readme)
                .then(|| scope.spawn(|| first_available(fetch, &base, &["README.md", "readme.md"])));
            let version = seed
                .should_apply(Field::Version)
                .then(|| scope.spawn(|| fetch_release(fetch, repo)));

            Discovered {
                metadata: match metadata {
                    Some(handle) => handle.join().ok().flatten(),
                    None => options.metadata.clone(),
                },
                style: style.and_then(|handle| handle.join().ok().flatten()),
                preferences: preferences.and_then(|handle| handle.join().ok().flatten()),
                readme: readme.and_then(|handle| handle.join().ok().flatten()),
                version: version.and_then(|handle| handle.join().ok()),
            }
        })
    };

    let mut record = seed;
    if let Some(metadata) = &found.metadata {
        if record.should_apply(Field::UpdatedAt) {
            record.updated_at = metadata.updated_at.clone();
        }
    }

    if options.minimal {
        return Ok(Resolved {
            record,
            metadata: found.metadata,
        });
    }

    let found_files =
        found.style.is_some() || found.preferences.is_some() || found.readme.is_some();
    if !seed_present && found.metadata.is_none() && !found_files {
        return Err(SineError::Unresolvable(repo.html_url()));
    }

    if record.should_apply(Field::Id) || registry.contains(&record.id) {
        record.id = unique_id(registry);
    } else if !is_valid_id(&record.id) {
        warn!(repo = %base, id = %record.id, "manifest id rejected, generating one");
        record.id = unique_id(registry);
    }
    if let Some(style) = found.style {
        record.style = Some(style);
    }
    if let Some(url) = found.preferences {
        record.preferences = Some(PreferencesSpec::Url(url));
    }
    if let Some(url) = found.readme {
        record.readme = Some(url);
    }
    if let Some(version) = found.version {
        record.version = version;
    }

    if let Some(metadata) = &found.metadata {
        if record.should_apply(Field::Name) {
            record.name = metadata.name.clone().unwrap_or_default();
        }
        if record.should_apply(Field::Homepage) {
            record.homepage = if repo.is_subtree() {
                Some(repo.html_url())
            } else {
                metadata.html_url.clone()
            };
        }
        if record.should_apply(Field::Description) {
            record.description = metadata.description.clone().unwrap_or_default();
        }
        if record.should_apply(Field::CreatedAt) {
            record.created_at = metadata.created_at.clone();
        }
    }
    if record.should_apply(Field::Name) {
        record.name = repo.repo.clone();
    }
    if record.should_apply(Field::Homepage) {
        record.homepage = Some(repo.html_url());
    }
    record.normalize_style();

    info!(mod_id = %record.id, name = %record.name, version = %record.version, "manifest resolved");
    Ok(Resolved {
        record,
        metadata: found.metadata,
    })
}
