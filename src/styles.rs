use crate::{
    error::{Result, SineError},
    fetch::Fetch,
    fs::ModFs,
    manifest::StyleSpec,
    paths::join_relative,
};
use regex::Regex;
use std::{
    collections::HashSet,
    path::Path,
    sync::{Mutex, OnceLock},
    thread,
};
use tracing::{debug, info, warn};
use url::Url;

/// References that are loaded by the browser at runtime and never vendored.
const EXTERNAL_PREFIXES: [&str; 7] = [
    "data:",
    "chrome://",
    "resource://",
    "https://",
    "http://",
    "moz-extension:",
    "moz-icon:",
];

pub const URL_STYLE_FILE: &str = "chrome.css";
pub const CHROME_STYLE_FILE: &str = "userChrome.css";
pub const CONTENT_STYLE_FILE: &str = "userContent.css";

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment regex"))
}

fn moz_document_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@-moz-document[^{]*").expect("valid moz-document regex"))
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*['"]?([^'")]+?)['"]?\s*\)|['"]([^'"]+)['"])[^;]*;"#)
            .expect("valid import regex")
    })
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("valid url regex")
    })
}

/// Every `@import` and `url()` target in `css`, comments ignored, first
/// occurrence order, without duplicates. `@-moz-document` conditions are not
/// references.
pub fn css_references(css: &str) -> Vec<String> {
    let without_comments = comment_regex().replace_all(css, "");
    let scanned = moz_document_regex().replace_all(&without_comments, "");

    let imports = import_regex()
        .captures_iter(&scanned)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)));
    let urls = url_regex()
        .captures_iter(&scanned)
        .filter_map(|caps| caps.get(1));

    let mut seen = HashSet::new();
    imports
        .chain(urls)
        .map(|m| m.as_str().trim().to_string())
        .filter(|target| !target.is_empty() && seen.insert(target.clone()))
        .collect()
}

/// True for references the crawler leaves to the browser.
pub fn is_external(target: &str) -> bool {
    let lowered = target.to_ascii_lowercase();
    target.starts_with('/')
        || target.starts_with('#')
        || EXTERNAL_PREFIXES
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
}

/// True when `target`, taken relative to the directory of `current_path`,
/// climbs above the mod root at any point.
pub fn escapes_root(current_path: &str, target: &str) -> bool {
    let mut dir: Vec<&str> = current_path.split('/').collect();
    dir.pop();
    let mut depth: i64 = 0;
    for segment in dir.into_iter().chain(strip_query(target).split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => depth += 1,
        }
    }
    false
}

/// POSIX path of `target` relative to the mod root.
pub fn resolve_relative(current_path: &str, target: &str) -> String {
    let mut segments: Vec<&str> = current_path.split('/').collect();
    segments.pop();
    for segment in strip_query(target).split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn strip_query(target: &str) -> &str {
    target
        .split(|ch| ch == '?' || ch == '#')
        .next()
        .unwrap_or(target)
}

struct Crawler<'a> {
    fetch: &'a dyn Fetch,
    fs: &'a dyn ModFs,
    folder: &'a Path,
    root_url: Url,
    visited: Mutex<HashSet<String>>,
}

impl Crawler<'_> {
    fn claim(&self, path: &str) -> bool {
        self.visited
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_string())
    }

    fn write(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        self.fs.write(&join_relative(self.folder, relative), bytes)?;
        Ok(())
    }

    fn process_css(&self, current_path: &str, bytes: &[u8]) -> Result<Vec<String>> {
        self.write(current_path, bytes)?;
        let css = String::from_utf8_lossy(bytes);

        let targets: Vec<String> = css_references(&css)
            .into_iter()
            .filter(|target| {
                if is_external(target) {
                    return false;
                }
                if escapes_root(current_path, target) {
                    debug!(file = current_path, target = %target, "reference leaves mod root, skipped");
                    return false;
                }
                true
            })
            .map(|target| resolve_relative(current_path, &target))
            .filter(|resolved| !resolved.is_empty() && self.claim(resolved))
            .collect();

        let nested: Vec<Result<Vec<String>>> = thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|resolved| scope.spawn(move || self.process_target(resolved)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(SineError::Update("style worker panicked".into())))
                })
                .collect()
        });

        let mut files = vec![current_path.to_string()];
        for result in nested {
            files.extend(result?);
        }
        Ok(files)
    }

    fn process_target(&self, resolved: &str) -> Result<Vec<String>> {
        let url = self.root_url.join(resolved)?;
        let bytes = match self.fetch.fetch_bytes(url.as_str()) {
            Ok(bytes) => bytes,
            Err(err @ (SineError::NotFound(_) | SineError::Http(_))) => {
                warn!(url = %url, %err, "asset unavailable, skipped");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };
        if resolved.to_ascii_lowercase().ends_with(".css") {
            self.process_css(resolved, &bytes)
        } else {
            self.write(resolved, &bytes)?;
            Ok(vec![resolved.to_string()])
        }
    }
}

/// Downloads the stylesheet at `url` into `mod_folder/local_name` together
/// with everything it pulls in from the mod's own tree. Returns the written
/// POSIX paths, root first.
pub fn sync_stylesheet(
    fetch: &dyn Fetch,
    fs: &dyn ModFs,
    mod_folder: &Path,
    local_name: &str,
    url: &str,
) -> Result<Vec<String>> {
    let crawler = Crawler {
        fetch,
        fs,
        folder: mod_folder,
        root_url: Url::parse(url)?,
        visited: Mutex::new(HashSet::from([local_name.to_string()])),
    };
    let root = fetch.fetch_bytes(url)?;
    crawler.process_css(local_name, &root)
}

/// Materializes every root stylesheet of `style` and its local imports.
pub fn sync_styles(
    fetch: &dyn Fetch,
    fs: &dyn ModFs,
    mod_folder: &Path,
    style: &StyleSpec,
) -> Result<Vec<String>> {
    let roots: Vec<(&str, &str)> = match style {
        StyleSpec::Url(url) => vec![(URL_STYLE_FILE, url.as_str())],
        StyleSpec::Split { chrome, content } => [
            (CHROME_STYLE_FILE, chrome.as_deref()),
            (CONTENT_STYLE_FILE, content.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, url)| url.map(|url| (name, url)))
        .collect(),
    };

    let results: Vec<Result<Vec<String>>> = thread::scope(|scope| {
        let handles: Vec<_> = roots
            .iter()
            .map(|(name, url)| scope.spawn(move || sync_stylesheet(fetch, fs, mod_folder, name, url)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(SineError::Update("style worker panicked".into())))
            })
            .collect()
    });

    let mut files = Vec::new();
    for result in results {
        files.extend(result?);
    }
    info!(folder = %mod_folder.display(), count = files.len(), "styles synchronized");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_imports_and_urls_once() {
        let css = r#"
            /* @import "commented.css"; */
            @import url("theme/colors.css");
            @import 'theme/layout.css' screen;
            @import url(theme/colors.css);
            .tab { background: url('img/tab.png'); mask: url(img/mask.svg#m); }
            @-moz-document url(about:newtab) { body { color: red; } }
        "#;
        assert_eq!(
            css_references(css),
            vec![
                "theme/colors.css",
                "theme/layout.css",
                "img/tab.png",
                "img/mask.svg#m"
            ]
        );
    }

    #[test]
    fn external_references_are_left_alone() {
        for target in [
            "data:image/png;base64,AAAA",
            "chrome://browser/skin/tab.svg",
            "resource://gre/x.css",
            "https://cdn.example/x.css",
            "HTTP://cdn.example/x.css",
            "moz-extension://id/x.png",
            "moz-icon://stock/x",
            "#gradient",
        ] {
            assert!(is_external(target), "{target}");
        }
        assert!(!is_external("./img/a.png"));
    }

    #[test]
    fn scope_rule_counts_directory_depth() {
        assert!(escapes_root("theme/colors.css", "../../etc/passwd"));
        assert!(!escapes_root("theme/colors.css", "../shared/vars.css"));
        assert!(escapes_root("a/b/c.css", "../../../etc/passwd"));
        assert!(!escapes_root("a/b/c.css", "../../etc/passwd"));
        assert!(escapes_root("chrome.css", "../x.png"));
        assert!(escapes_root("a/x.css", "b/../../../y.css"));
    }

    #[test]
    fn relative_paths_collapse_to_mod_root() {
        assert_eq!(resolve_relative("chrome.css", "./theme/a.css"), "theme/a.css");
        assert_eq!(resolve_relative("theme/a.css", "../img/b.png?v=2"), "img/b.png");
        assert_eq!(resolve_relative("theme/a.css", "c.css"), "theme/c.css");
    }
}
