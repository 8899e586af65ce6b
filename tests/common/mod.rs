#![allow(dead_code)]

use serde_json::Value;
use sine::{
    engine::EngineUpdater,
    error::{Result, SineError},
    fetch::Fetch,
    fs::{ModFs, OsFs},
    manager::ModManager,
    notify::ToastCenter,
    paths::SineLayout,
    prefs::{self, Prefs},
};
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tempfile::TempDir;

pub const REPO: &str = "foo/bar";
pub const RAW: &str = "https://raw.githubusercontent.com/foo/bar/main/";
pub const API: &str = "https://api.github.com/repos/foo/bar";
pub const FEED_URL: &str = "https://example.com/engine.json";
pub const PACKAGE_URL: &str = "https://example.com/engine.zip";

/// Serves canned bodies by exact URL; everything else is a 404.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    pub fn serve_json(&self, url: &str, value: Value) {
        self.serve(url, value.to_string());
    }

    pub fn forget(&self, url: &str) {
        self.bodies.lock().unwrap().remove(url);
    }

    pub fn requested(&self, url: &str) -> bool {
        self.requests.lock().unwrap().iter().any(|seen| seen == url)
    }

    fn lookup(&self, url: &str) -> Option<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies.lock().unwrap().get(url).cloned()
    }
}

impl Fetch for FakeFetcher {
    fn fetch_text(&self, url: &str) -> Option<String> {
        self.lookup(url).and_then(|bytes| String::from_utf8(bytes).ok())
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.lookup(url)
            .ok_or_else(|| SineError::NotFound(url.to_string()))
    }
}

/// `OsFs` that counts mutations and can be told to fail renames into a path.
#[derive(Default)]
pub struct CountingFs {
    writes: AtomicUsize,
    fail_rename_to: Mutex<Option<PathBuf>>,
}

impl CountingFs {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_renames_to(&self, path: &Path) {
        *self.fail_rename_to.lock().unwrap() = Some(path.to_path_buf());
    }

    pub fn allow_renames(&self) {
        *self.fail_rename_to.lock().unwrap() = None;
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl ModFs for CountingFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        OsFs.read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.bump();
        OsFs.write(path, bytes)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.fail_rename_to.lock().unwrap().as_deref() == Some(to) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"));
        }
        self.bump();
        OsFs.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.bump();
        OsFs.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.bump();
        OsFs.remove_dir_all(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        OsFs.create_dir_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        OsFs.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        OsFs.is_dir(path)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        OsFs.list_dir(dir)
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        OsFs.list_files(dir)
    }
}

/// A throwaway browser profile with the engine wired to fakes.
pub struct Harness {
    _dir: TempDir,
    pub layout: SineLayout,
    pub fetch: Arc<FakeFetcher>,
    pub fs: Arc<CountingFs>,
    pub prefs: Arc<Prefs>,
    pub toasts: Arc<ToastCenter>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = SineLayout::from_profile(dir.path());
        let prefs = Prefs::in_memory();
        prefs::apply_defaults(&prefs).unwrap();
        Self {
            _dir: dir,
            layout,
            fetch: Arc::new(FakeFetcher::default()),
            fs: Arc::new(CountingFs::default()),
            prefs: Arc::new(prefs),
            toasts: Arc::new(ToastCenter::new()),
        }
    }

    pub fn manager(&self) -> ModManager {
        ModManager::new(
            self.fetch.clone(),
            self.fs.clone(),
            self.prefs.clone(),
            self.toasts.clone(),
            self.layout.clone(),
        )
    }

    pub fn engine(&self) -> EngineUpdater {
        EngineUpdater::new(
            self.fetch.clone(),
            self.fs.clone(),
            self.prefs.clone(),
            self.toasts.clone(),
            self.layout.clone(),
            FEED_URL,
        )
    }

    pub fn read(&self, path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    pub fn chrome_sheet(&self) -> String {
        self.read(&self.layout.chrome_sheet())
    }
}
