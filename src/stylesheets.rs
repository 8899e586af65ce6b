use crate::{
    error::Result,
    fs::ModFs,
    manifest::StyleSpec,
    paths::SineLayout,
    prefs::{self, PrefStore},
    registry::Registry,
    styles::{CHROME_STYLE_FILE, CONTENT_STYLE_FILE, URL_STYLE_FILE},
};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheets {
    pub chrome: String,
    pub content: String,
}

fn import_line(mods_dir: &Path, id: &str, file: &str) -> String {
    let path = mods_dir.join(id).join(file);
    let path = path.to_string_lossy().replace('\\', "/");
    format!("@import \"{path}\";\n")
}

/// The two aggregate sheets for the enabled mods of `registry`, in id order.
pub fn render(registry: &Registry, layout: &SineLayout, disable_all: bool) -> Stylesheets {
    let mut sheets = Stylesheets::default();
    if disable_all {
        return sheets;
    }
    let mods_dir = layout.mods_dir();
    for record in registry.enabled() {
        match &record.style {
            Some(StyleSpec::Url(_)) => {
                sheets
                    .chrome
                    .push_str(&import_line(&mods_dir, &record.id, URL_STYLE_FILE));
            }
            Some(StyleSpec::Split { chrome, content }) => {
                if chrome.is_some() {
                    sheets
                        .chrome
                        .push_str(&import_line(&mods_dir, &record.id, CHROME_STYLE_FILE));
                }
                if content.is_some() {
                    sheets
                        .content
                        .push_str(&import_line(&mods_dir, &record.id, CONTENT_STYLE_FILE));
                }
            }
            None => {}
        }
    }
    sheets
}

/// Rewrites `chrome.css` and `content.css` in the mods directory.
pub fn rebuild(
    fs: &dyn ModFs,
    layout: &SineLayout,
    registry: &Registry,
    prefs: &dyn PrefStore,
) -> Result<Stylesheets> {
    let disable_all = prefs.get_bool(prefs::DISABLE_ALL, false);
    let sheets = render(registry, layout, disable_all);
    fs.write_atomic(&layout.chrome_sheet(), sheets.chrome.as_bytes())?;
    fs.write_atomic(&layout.content_sheet(), sheets.content.as_bytes())?;
    info!(disable_all, "stylesheets rebuilt");
    Ok(sheets)
}
