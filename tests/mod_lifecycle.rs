mod common;

use common::{Harness, RAW, REPO};
use serde_json::{json, Value};
use sine::{
    error::SineError,
    files,
    manager::UpdateSource,
    manifest::{ModRecord, StyleSpec, THEME_STORE_RAW},
    notify::ToastLevel,
    prefs::{self, PrefStore},
    registry::Registry,
    resolver,
};

fn manifest(updated_at: &str, scripts: &[&str]) -> Value {
    json!({
        "id": "cool-mod",
        "name": "Cool Mod",
        "description": "Rounded tabs",
        "homepage": "https://github.com/foo/bar",
        "createdAt": "2024-01-01T00:00:00Z",
        "updatedAt": updated_at,
        "version": "1.2.0",
        "style": format!("{RAW}chrome.css"),
        "js": scripts,
        "author": "someone"
    })
}

fn publish(harness: &Harness, updated_at: &str, chrome_css: &str, scripts: &[&str]) {
    harness
        .fetch
        .serve_json(&format!("{RAW}theme.json"), manifest(updated_at, scripts));
    harness.fetch.serve(&format!("{RAW}chrome.css"), chrome_css);
    harness.fetch.serve(
        &format!("{RAW}theme/colors.css"),
        ":root { --bg: url(\"../img/bg.png\"); }",
    );
    harness.fetch.serve(&format!("{RAW}img/bg.png"), vec![0x89, b'P', b'N', b'G']);
    for script in scripts {
        harness
            .fetch
            .serve(&format!("{RAW}js/{script}"), format!("// {script}"));
    }
}

fn has_error_toast(harness: &Harness) -> bool {
    harness
        .toasts
        .active()
        .iter()
        .any(|toast| toast.level == ToastLevel::Error)
}

const FIRST_CSS: &str = "@import \"theme/colors.css\";\n#nav-bar { border: 0; }";
const SECOND_CSS: &str = "#nav-bar { border: 1px solid; }";

#[test]
fn install_then_remove_leaves_no_trace() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", FIRST_CSS, &["tabs.uc.js"]);
    let mut manager = harness.manager();

    let record = manager.install_mod(REPO, true).unwrap();
    assert_eq!(record.id, "cool-mod");
    assert!(record.enabled);
    assert_eq!(record.script_files(), vec!["tabs.uc.js".to_string()]);
    assert_eq!(
        record.extra.get("author").and_then(|value| value.as_str()),
        Some("someone")
    );

    let folder = harness.layout.mod_folder("cool-mod");
    assert!(folder.join("chrome.css").is_file());
    assert!(folder.join("theme").join("colors.css").is_file());
    assert!(folder.join("img").join("bg.png").is_file());
    let script = harness.layout.script_file("cool-mod", "tabs.uc.js");
    assert!(script.is_file());
    assert!(harness.chrome_sheet().contains("cool-mod/chrome.css"));
    assert!(manager.get_mods().unwrap().contains("cool-mod"));
    assert!(harness
        .toasts
        .active()
        .iter()
        .any(|toast| toast.level == ToastLevel::Restart));

    manager.remove_mod("cool-mod").unwrap();
    assert!(!folder.exists());
    assert!(!script.exists());
    assert!(manager.get_mods().unwrap().mods.is_empty());
    assert!(harness.chrome_sheet().is_empty());
    assert!(!harness.layout.staging_dir().exists());

    let missing = manager.remove_mod("cool-mod").unwrap_err();
    assert!(matches!(missing, SineError::NotFound(_)));
}

#[test]
fn second_update_is_a_no_op() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", FIRST_CSS, &["tabs.uc.js"]);
    let mut manager = harness.manager();
    manager.install_mod(REPO, true).unwrap();

    let before = harness.fs.writes();
    assert!(!manager.update_mods(UpdateSource::Manual).unwrap());
    assert!(!manager.update_mods(UpdateSource::Manual).unwrap());
    assert_eq!(harness.fs.writes(), before);
}

#[test]
fn update_removes_files_the_new_version_dropped() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", FIRST_CSS, &["tabs.uc.js"]);
    let mut manager = harness.manager();
    manager.install_mod(REPO, true).unwrap();

    publish(&harness, "2024-07-01T00:00:00Z", SECOND_CSS, &["menu.uc.js"]);
    assert!(manager.update_mods(UpdateSource::Manual).unwrap());

    let folder = harness.layout.mod_folder("cool-mod");
    assert_eq!(
        harness.read(&folder.join("chrome.css")),
        SECOND_CSS
    );
    assert!(!folder.join("theme").exists());
    assert!(!folder.join("img").exists());
    assert!(!harness.layout.script_file("cool-mod", "tabs.uc.js").exists());
    assert!(harness.layout.script_file("cool-mod", "menu.uc.js").is_file());

    let registry = manager.get_mods().unwrap();
    let record = registry.get("cool-mod").unwrap();
    assert_eq!(record.updated_at.as_deref(), Some("2024-07-01T00:00:00Z"));
    assert_eq!(record.script_files(), vec!["menu.uc.js".to_string()]);
}

#[test]
fn toggling_renames_scripts_and_drops_the_import() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", FIRST_CSS, &["tabs.uc.js"]);
    let mut manager = harness.manager();
    manager.install_mod(REPO, true).unwrap();

    let live = harness.layout.script_file("cool-mod", "tabs.uc.js");
    let parked = harness.layout.script_file("cool-mod", "tabs.uc.js.db");

    let record = manager.toggle_mod("cool-mod").unwrap();
    assert!(!record.enabled);
    assert!(!live.exists());
    assert!(parked.is_file());
    assert!(!harness.chrome_sheet().contains("cool-mod"));

    let record = manager.toggle_mod("cool-mod").unwrap();
    assert!(record.enabled);
    assert!(live.is_file());
    assert!(!parked.exists());
    assert!(harness.chrome_sheet().contains("cool-mod/chrome.css"));
}

#[test]
fn pinned_and_disabled_mods_are_not_updated() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", FIRST_CSS, &[]);
    let mut manager = harness.manager();
    manager.install_mod(REPO, true).unwrap();
    manager.set_no_updates("cool-mod", true).unwrap();

    publish(&harness, "2024-07-01T00:00:00Z", SECOND_CSS, &[]);
    assert!(!manager.update_mods(UpdateSource::Manual).unwrap());

    manager.set_no_updates("cool-mod", false).unwrap();
    manager.toggle_mod("cool-mod").unwrap();
    assert!(!manager.update_mods(UpdateSource::Manual).unwrap());

    manager.toggle_mod("cool-mod").unwrap();
    harness.prefs.set_bool(prefs::MODS_AUTO_UPDATE, false).unwrap();
    assert!(!manager.update_mods(UpdateSource::Auto).unwrap());
    assert!(manager.update_mods(UpdateSource::Manual).unwrap());
}

#[test]
fn failed_install_commits_nothing() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", FIRST_CSS, &[]);
    harness.fetch.forget(&format!("{RAW}chrome.css"));
    let mut manager = harness.manager();

    assert!(manager.install_mod(REPO, true).is_err());
    assert!(manager.get_mods().unwrap().mods.is_empty());
    assert!(!harness.layout.mod_folder("cool-mod").exists());
    assert!(!harness.layout.staging_dir().exists());
    assert!(has_error_toast(&harness));
}

#[test]
fn modules_are_installed_once_and_cycles_stop() {
    let harness = Harness::new();
    let module_raw = "https://raw.githubusercontent.com/baz/qux/main/";
    publish(&harness, "2024-06-01T00:00:00Z", SECOND_CSS, &[]);
    harness.fetch.serve_json(
        &format!("{RAW}theme.json"),
        json!({
            "id": "cool-mod",
            "name": "Cool Mod",
            "description": "Rounded tabs",
            "homepage": "https://github.com/foo/bar",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-06-01T00:00:00Z",
            "version": "1.2.0",
            "style": format!("{RAW}chrome.css"),
            "modules": ["baz/qux"]
        }),
    );
    harness.fetch.serve_json(
        &format!("{module_raw}theme.json"),
        json!({
            "id": "qux-mod",
            "name": "Qux",
            "description": "Shared variables",
            "homepage": "https://github.com/baz/qux",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-05-01T00:00:00Z",
            "version": "0.3.0",
            "style": format!("{module_raw}chrome.css"),
            "modules": "foo/bar"
        }),
    );
    harness
        .fetch
        .serve(&format!("{module_raw}chrome.css"), ":root { --qux: 1; }");

    let mut manager = harness.manager();
    let record = manager.install_mod(REPO, true).unwrap();
    assert_eq!(record.id, "cool-mod");

    let registry = manager.get_mods().unwrap();
    assert_eq!(registry.mods.len(), 2);
    assert!(registry.contains("qux-mod"));
    let sheet = harness.chrome_sheet();
    assert!(sheet.contains("cool-mod/chrome.css"));
    assert!(sheet.contains("qux-mod/chrome.css"));
}

#[test]
fn manifest_id_cannot_leave_the_mods_dir() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", SECOND_CSS, &[]);
    let mut doc = manifest("2024-06-01T00:00:00Z", &[]);
    doc["id"] = json!("../../escaped");
    harness.fetch.serve_json(&format!("{RAW}theme.json"), doc);
    let mut manager = harness.manager();

    let record = manager.install_mod(REPO, true).unwrap();
    assert_ne!(record.id, "../../escaped");
    assert!(resolver::is_valid_id(&record.id));
    let folder = harness.layout.mod_folder(&record.id);
    assert_eq!(folder.parent(), Some(harness.layout.mods_dir().as_path()));
    assert!(folder.join("chrome.css").is_file());

    let profile = harness.layout.chrome_dir.parent().unwrap();
    assert!(!profile.join("escaped").exists());
    assert!(!harness.layout.chrome_dir.join("escaped").exists());
}

#[test]
fn failed_update_leaves_the_live_mod_untouched() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", SECOND_CSS, &[]);
    let mut manager = harness.manager();
    manager.install_mod(REPO, true).unwrap();
    let installed = manager.get_mods().unwrap();

    publish(
        &harness,
        "2024-07-01T00:00:00Z",
        "@import \"extra/new.css\";\nb {}",
        &["missing.uc.js"],
    );
    harness.fetch.serve(&format!("{RAW}extra/new.css"), "c {}");
    harness.fetch.forget(&format!("{RAW}js/missing.uc.js"));
    assert!(!manager.update_mods(UpdateSource::Manual).unwrap());

    let folder = harness.layout.mod_folder("cool-mod");
    assert_eq!(harness.read(&folder.join("chrome.css")), SECOND_CSS);
    assert!(!folder.join("extra").exists());
    assert!(!harness.layout.script_file("cool-mod", "missing.uc.js").exists());
    assert!(!harness.layout.staging_dir().exists());
    assert_eq!(manager.get_mods().unwrap(), installed);
    assert!(has_error_toast(&harness));

    publish(&harness, "2024-08-01T00:00:00Z", FIRST_CSS, &[]);
    assert!(manager.update_mods(UpdateSource::Manual).unwrap());
    assert_eq!(harness.read(&folder.join("chrome.css")), FIRST_CSS);
    assert!(!folder.join("extra").exists());
    let registry = manager.get_mods().unwrap();
    let mut listed = files::flatten(&registry.get("cool-mod").unwrap().editable_files);
    listed.sort();
    assert_eq!(
        listed,
        vec!["chrome.css", "img/bg.png", "theme/colors.css"]
    );
}

#[test]
fn invalid_preferences_fall_back_to_the_theme_store() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", SECOND_CSS, &[]);
    let mut doc = manifest("2024-06-01T00:00:00Z", &[]);
    doc["preferences"] = json!(format!("{RAW}preferences.json"));
    harness.fetch.serve_json(&format!("{RAW}theme.json"), doc);
    harness
        .fetch
        .serve(&format!("{RAW}preferences.json"), "404: Not Found");
    let fallback = format!("{THEME_STORE_RAW}/main/themes/cool-mod/preferences.json");
    let store_prefs = json!([{"property": "cool.mod.round", "label": "Round tabs", "type": "checkbox"}]);
    harness.fetch.serve_json(&fallback, store_prefs.clone());
    let mut manager = harness.manager();

    let record = manager.install_mod(REPO, true).unwrap();
    assert!(harness.fetch.requested(&fallback));
    let written = harness.read(&harness.layout.mod_folder("cool-mod").join("preferences.json"));
    assert_eq!(serde_json::from_str::<Value>(&written).unwrap(), store_prefs);
    assert!(files::flatten(&record.editable_files).contains(&"preferences.json".to_string()));
}

#[test]
fn unusable_preferences_are_neither_written_nor_listed() {
    let harness = Harness::new();
    publish(&harness, "2024-06-01T00:00:00Z", SECOND_CSS, &[]);
    let mut doc = manifest("2024-06-01T00:00:00Z", &[]);
    doc["preferences"] = json!(format!("{RAW}preferences.json"));
    harness.fetch.serve_json(&format!("{RAW}theme.json"), doc);
    harness.fetch.serve(&format!("{RAW}preferences.json"), "not json");
    let mut manager = harness.manager();

    let record = manager.install_mod(REPO, true).unwrap();
    assert!(!harness
        .layout
        .mod_folder("cool-mod")
        .join("preferences.json")
        .exists());
    assert_eq!(files::flatten(&record.editable_files), vec!["chrome.css"]);
}

#[test]
fn mods_without_homepage_update_from_the_theme_store() {
    let harness = Harness::new();
    let store = format!("{THEME_STORE_RAW}/main/themes/legacy-mod");
    let legacy = ModRecord {
        id: "legacy-mod".into(),
        name: "Legacy".into(),
        description: "From the old store".into(),
        version: "1.0.0".into(),
        style: Some(StyleSpec::Url(format!("{store}/chrome.css"))),
        updated_at: Some("2024-01-01T00:00:00Z".into()),
        editable_files: files::tree_from_paths(["chrome.css"]),
        enabled: true,
        ..Default::default()
    };
    let mut registry = Registry::default();
    registry.upsert(legacy);
    registry
        .save(&*harness.fs, &harness.layout.registry_file())
        .unwrap();
    let folder = harness.layout.mod_folder("legacy-mod");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("chrome.css"), "a {}").unwrap();

    harness.fetch.serve_json(
        &format!("{store}/theme.json"),
        json!({
            "id": "renamed-upstream",
            "name": "Legacy",
            "description": "From the old store",
            "updatedAt": "2024-09-01T00:00:00Z",
            "style": format!("{store}/chrome.css")
        }),
    );
    harness.fetch.serve(&format!("{store}/chrome.css"), "a { color: red; }");
    let mut manager = harness.manager();

    assert!(manager.update_mods(UpdateSource::Manual).unwrap());
    assert_eq!(harness.read(&folder.join("chrome.css")), "a { color: red; }");
    let registry = manager.get_mods().unwrap();
    assert_eq!(registry.mods.len(), 1);
    let record = registry.get("legacy-mod").unwrap();
    assert_eq!(record.updated_at.as_deref(), Some("2024-09-01T00:00:00Z"));
    assert!(record.homepage.is_none());
    assert!(harness.chrome_sheet().contains("legacy-mod/chrome.css"));

    assert!(!manager.update_mods(UpdateSource::Manual).unwrap());
}
