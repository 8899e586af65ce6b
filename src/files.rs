use crate::manifest::FileEntry;

/// Top-level `editable-files` directory whose entries live in the shared
/// scripts directory instead of the mod folder.
pub const SCRIPTS_DIRECTORY: &str = "js";

/// Something that must be deleted after a re-sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stale {
    /// File inside the mod folder (POSIX relative path).
    File(String),
    /// Whole directory inside the mod folder (POSIX relative path).
    Dir(String),
    /// On-disk script file name inside the shared scripts directory.
    Script(String),
}

/// Builds the nested `editable-files` tree from POSIX relative paths,
/// keeping first-seen order and dropping duplicates.
pub fn tree_from_paths<I, S>(paths: I) -> Vec<FileEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut root = Vec::new();
    for path in paths {
        let segments: Vec<&str> = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        insert(&mut root, &segments);
    }
    root
}

fn insert(entries: &mut Vec<FileEntry>, segments: &[&str]) {
    match segments {
        [] => {}
        [name] => {
            let exists = entries
                .iter()
                .any(|entry| matches!(entry, FileEntry::File(existing) if existing == name));
            if !exists {
                entries.push(FileEntry::File(name.to_string()));
            }
        }
        [dir, rest @ ..] => {
            let index = entries.iter().position(
                |entry| matches!(entry, FileEntry::Dir { directory, .. } if directory == dir),
            );
            let index = match index {
                Some(index) => index,
                None => {
                    entries.push(FileEntry::Dir {
                        directory: dir.to_string(),
                        contents: Vec::new(),
                    });
                    entries.len() - 1
                }
            };
            if let FileEntry::Dir { contents, .. } = &mut entries[index] {
                insert(contents, rest);
            }
        }
    }
}

/// Flattens a tree back into POSIX relative paths.
pub fn flatten(entries: &[FileEntry]) -> Vec<String> {
    let mut out = Vec::new();
    flatten_into(entries, "", &mut out);
    out
}

fn flatten_into(entries: &[FileEntry], prefix: &str, out: &mut Vec<String>) {
    for entry in entries {
        match entry {
            FileEntry::File(name) => out.push(format!("{prefix}{name}")),
            FileEntry::Dir {
                directory,
                contents,
            } => flatten_into(contents, &format!("{prefix}{directory}/"), out),
        }
    }
}

/// Computes what a shrinking `editable-files` tree leaves behind.
///
/// Leaves present in `old` but not in `new` are stale; directories missing
/// from `new` are stale as a whole; directories present in both are
/// compared recursively. The root `js` directory is compared by on-disk
/// script name, as produced by `script_name`.
pub fn stale_entries(
    old: &[FileEntry],
    new: &[FileEntry],
    script_name: &dyn Fn(&str) -> String,
) -> Vec<Stale> {
    let mut out = Vec::new();
    diff_level(old, new, "", true, script_name, &mut out);
    out
}

fn diff_level(
    old: &[FileEntry],
    new: &[FileEntry],
    prefix: &str,
    is_root: bool,
    script_name: &dyn Fn(&str) -> String,
    out: &mut Vec<Stale>,
) {
    for entry in old {
        match entry {
            FileEntry::File(name) => {
                let kept = new
                    .iter()
                    .any(|candidate| matches!(candidate, FileEntry::File(other) if other == name));
                if !kept {
                    out.push(Stale::File(format!("{prefix}{name}")));
                }
            }
            FileEntry::Dir {
                directory,
                contents,
            } => {
                let matching = find_dir(new, directory);
                if is_root && directory == SCRIPTS_DIRECTORY {
                    let kept: Vec<String> = matching
                        .map(|items| file_names(items).map(|name| script_name(name)).collect())
                        .unwrap_or_default();
                    for name in file_names(contents) {
                        let on_disk = script_name(name);
                        if !kept.contains(&on_disk) {
                            out.push(Stale::Script(on_disk));
                        }
                    }
                    continue;
                }
                let path = format!("{prefix}{directory}");
                match matching {
                    None => out.push(Stale::Dir(path)),
                    Some(items) => {
                        diff_level(contents, items, &format!("{path}/"), false, script_name, out)
                    }
                }
            }
        }
    }
}

fn find_dir<'a>(entries: &'a [FileEntry], name: &str) -> Option<&'a [FileEntry]> {
    entries.iter().find_map(|entry| match entry {
        FileEntry::Dir {
            directory,
            contents,
        } if directory == name => Some(contents.as_slice()),
        _ => None,
    })
}

fn file_names(entries: &[FileEntry]) -> impl Iterator<Item = &str> {
    entries.iter().filter_map(|entry| match entry {
        FileEntry::File(name) => Some(name.as_str()),
        FileEntry::Dir { .. } => None,
    })
}
