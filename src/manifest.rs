use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// URL prefix of the legacy theme store. String asset URLs pointing there are
/// placeholders that a fresh resolution may replace.
pub const THEME_STORE_RAW: &str = "https://raw.githubusercontent.com/zen-browser/theme-store";

/// Default version reported when a repository has no published release.
pub const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<PreferencesSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Modules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js: Option<ScriptsSpec>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(rename = "editable-files", default)]
    pub editable_files: Vec<FileEntry>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "no-updates", default)]
    pub no_updates: bool,
    #[serde(default)]
    pub local: bool,
    /// Manifest keys the engine does not interpret (author, tags, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModRecord {
    /// Reads a remote `theme.json`. Anything that is not a well-formed object
    /// yields an empty seed.
    pub fn from_seed(value: Option<Value>) -> Self {
        match value {
            Some(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    pub fn ships_scripts(&self) -> bool {
        self.js.as_ref().is_some_and(ScriptsSpec::is_present)
    }

    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::Id => !self.id.is_empty(),
            Field::Name => !self.name.is_empty(),
            Field::Description => !self.description.is_empty(),
            Field::Version => !self.version.is_empty(),
            Field::Homepage => self.homepage.is_some(),
            Field::Style => self.style.is_some(),
            Field::Preferences => self.preferences.is_some(),
            Field::Readme => self.readme.is_some(),
            Field::Image => self.image.is_some(),
            Field::CreatedAt => self.created_at.is_some(),
            Field::UpdatedAt => self.updated_at.is_some(),
        }
    }

    fn placeholder_url(&self, field: Field) -> Option<&str> {
        match field {
            Field::Style => match &self.style {
                Some(StyleSpec::Url(url)) => Some(url),
                _ => None,
            },
            Field::Preferences => match &self.preferences {
                Some(PreferencesSpec::Url(url)) => Some(url),
                _ => None,
            },
            Field::Readme => self.readme.as_deref(),
            Field::Image => self.image.as_deref(),
            _ => None,
        }
    }

    /// Merge rule for resolution: a field is filled when it is missing, or
    /// when it only holds a replaceable theme-store placeholder.
    pub fn should_apply(&self, field: Field) -> bool {
        if !self.has(field) {
            return true;
        }
        field.placeholder_replaceable()
            && self
                .placeholder_url(field)
                .is_some_and(|url| url.starts_with(THEME_STORE_RAW))
    }

    /// Drops an empty `{}` style, which means "no style".
    pub fn normalize_style(&mut self) {
        if self.style.as_ref().is_some_and(StyleSpec::is_empty) {
            self.style = None;
        }
    }

    pub fn module_refs(&self) -> Vec<String> {
        self.modules.as_ref().map(Modules::to_vec).unwrap_or_default()
    }

    /// Names listed under the top-level `js` directory of `editable-files`.
    pub fn script_files(&self) -> Vec<String> {
        self.editable_files
            .iter()
            .find_map(|entry| match entry {
                FileEntry::Dir {
                    directory,
                    contents,
                } if directory == crate::files::SCRIPTS_DIRECTORY => Some(
                    contents
                        .iter()
                        .filter_map(|item| match item {
                            FileEntry::File(name) => Some(name.clone()),
                            FileEntry::Dir { .. } => None,
                        })
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Name,
    Description,
    Version,
    Homepage,
    Style,
    Preferences,
    Readme,
    Image,
    CreatedAt,
    UpdatedAt,
}

impl Field {
    pub fn placeholder_replaceable(self) -> bool {
        matches!(
            self,
            Field::Style | Field::Preferences | Field::Readme | Field::Image
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleSpec {
    Url(String),
    Split {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chrome: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl StyleSpec {
    pub fn is_empty(&self) -> bool {
        matches!(
            self,
            StyleSpec::Split {
                chrome: None,
                content: None
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferencesSpec {
    Url(String),
    Inline(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Modules {
    One(String),
    Many(Vec<String>),
}

impl Modules {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Modules::One(one) => vec![one.clone()],
            Modules::Many(many) => many.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptsSpec {
    Flag(bool),
    Files(Vec<String>),
}

impl ScriptsSpec {
    pub fn is_present(&self) -> bool {
        match self {
            ScriptsSpec::Flag(flag) => *flag,
            ScriptsSpec::Files(files) => !files.is_empty(),
        }
    }
}

/// One node of the `editable-files` tree: a bare file name or a directory
/// with nested contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    File(String),
    Dir {
        directory: String,
        contents: Vec<FileEntry>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_round_trips_registry_keys() {
        let raw = json!({
            "id": "abc",
            "name": "Dark",
            "description": "d",
            "version": "1.2.0",
            "homepage": "foo/bar",
            "style": {"chrome": "https://x/userChrome.css"},
            "editable-files": ["chrome.css", {"directory": "js", "contents": ["a.uc.js"]}],
            "enabled": true,
            "no-updates": false,
            "updatedAt": "2024-01-01T00:00:00Z",
            "author": "someone"
        });
        let record: ModRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(record.script_files(), vec!["a.uc.js".to_string()]);
        assert_eq!(record.extra.get("author"), Some(&json!("someone")));
        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["editable-files"], raw["editable-files"]);
        assert_eq!(back["updatedAt"], raw["updatedAt"]);
    }

    #[test]
    fn placeholders_are_replaceable_but_real_values_are_not() {
        let mut record = ModRecord {
            readme: Some(format!("{THEME_STORE_RAW}/main/themes/x/readme.md")),
            image: Some("https://example.com/i.png".into()),
            name: "Kept".into(),
            ..Default::default()
        };
        assert!(record.should_apply(Field::Readme));
        assert!(!record.should_apply(Field::Image));
        assert!(!record.should_apply(Field::Name));
        assert!(record.should_apply(Field::Style));

        record.name = format!("{THEME_STORE_RAW}/nope");
        assert!(!record.should_apply(Field::Name));
    }

    #[test]
    fn empty_style_object_means_no_style() {
        let mut record = ModRecord::from_seed(Some(json!({"style": {}})));
        assert!(record.style.is_some());
        record.normalize_style();
        assert!(record.style.is_none());
    }

    #[test]
    fn malformed_seed_is_treated_as_empty() {
        assert_eq!(ModRecord::from_seed(Some(json!("404"))), ModRecord::default());
        assert_eq!(
            ModRecord::from_seed(Some(json!({"name": 5}))),
            ModRecord::default()
        );
    }
}
