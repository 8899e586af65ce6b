use crate::{
    config::AppConfig,
    engine::{CheckOutcome, EngineUpdater},
    fetch::{Fetch, HttpFetcher},
    fs::{ModFs, OsFs},
    logging,
    manager::{ModManager, UpdateSource},
    manifest::ModRecord,
    marketplace::{self, PER_PAGE},
    notify::{LogNotifier, Notifier},
    paths::SineLayout,
    prefs::{self, PrefStore, Prefs},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    profile: Option<PathBuf>,
}

enum CliCommand {
    ModsList,
    Install(String),
    Update { auto: bool },
    Toggle(String),
    Remove(String),
    NoUpdates { id: String, enabled: bool },
    EngineCheck { manual: bool },
    EngineStatus,
    Marketplace { page: usize },
    Rebuild,
    Paths,
    Help,
    Version,
}

/// Everything a command needs, wired against the real profile.
struct Session {
    config: AppConfig,
    layout: SineLayout,
    fetch: Arc<dyn Fetch>,
    fs: Arc<dyn ModFs>,
    prefs: Arc<dyn PrefStore>,
    notifier: Arc<dyn Notifier>,
}

impl Session {
    fn open(profile: Option<PathBuf>) -> Result<Self> {
        let mut config = AppConfig::load_or_create()?;
        if profile.is_some() {
            config.profile_dir = profile;
        }
        let layout = config.layout()?;
        logging::init(&layout.log_dir()).context("start logging")?;

        let fs: Arc<dyn ModFs> = Arc::new(OsFs);
        let prefs = Prefs::load_or_create(fs.clone(), &layout.prefs_file()).context("load prefs")?;
        prefs::fill_defaults(&prefs).context("apply pref defaults")?;

        Ok(Self {
            config,
            layout,
            fetch: Arc::new(HttpFetcher::new()),
            fs,
            prefs: Arc::new(prefs),
            notifier: Arc::new(LogNotifier),
        })
    }

    fn manager(&self) -> ModManager {
        ModManager::new(
            self.fetch.clone(),
            self.fs.clone(),
            self.prefs.clone(),
            self.notifier.clone(),
            self.layout.clone(),
        )
    }

    fn engine(&self) -> EngineUpdater {
        let cosine = self.prefs.get_bool(prefs::IS_COSINE, false);
        EngineUpdater::new(
            self.fetch.clone(),
            self.fs.clone(),
            self.prefs.clone(),
            self.notifier.clone(),
            self.layout.clone(),
            self.config.feed_url(cosine),
        )
    }
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args)?;
    let command = parse_command(&tokens)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("Sine v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let session = Session::open(global.profile)?;
            run_command(&session, command, global.format)
        }
    }
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut profile = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if arg == "--format" {
            let value = iter.next().context("--format requires a value")?;
            format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--profile=") {
            profile = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--profile" {
            let value = iter.next().context("--profile requires a directory")?;
            profile = Some(PathBuf::from(value));
            continue;
        }
        tokens.push(arg.to_string());
    }

    Ok((GlobalOptions { format, profile }, tokens))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "-h" | "--help" | "help" => CliCommand::Help,
        "-V" | "--version" | "version" => CliCommand::Version,
        "mods" => match rest.first().map(String::as_str) {
            None | Some("list") => CliCommand::ModsList,
            Some(other) => bail!("Unknown mods command: {other} (use 'list')"),
        },
        "install" => CliCommand::Install(required(rest, 0, "install requires a repository")?),
        "update" => CliCommand::Update {
            auto: rest.iter().any(|arg| arg == "--auto"),
        },
        "toggle" => CliCommand::Toggle(required(rest, 0, "toggle requires a mod id")?),
        "remove" => CliCommand::Remove(required(rest, 0, "remove requires a mod id")?),
        "no-updates" => {
            let id = required(rest, 0, "no-updates requires a mod id")?;
            let enabled = match rest.get(1).map(String::as_str) {
                Some("on") | None => true,
                Some("off") => false,
                Some(other) => bail!("Unknown no-updates value: {other} (use 'on' or 'off')"),
            };
            CliCommand::NoUpdates { id, enabled }
        }
        "engine" => match rest.first().map(String::as_str) {
            None | Some("status") => CliCommand::EngineStatus,
            Some("check") => CliCommand::EngineCheck {
                manual: rest.iter().any(|arg| arg == "--manual"),
            },
            Some(other) => bail!("Unknown engine command: {other} (use 'check' or 'status')"),
        },
        "marketplace" => CliCommand::Marketplace {
            page: parse_page(rest)?,
        },
        "rebuild" => CliCommand::Rebuild,
        "paths" => CliCommand::Paths,
        other => bail!("Unknown command: {other} (see 'sine help')"),
    };
    Ok(command)
}

fn required(args: &[String], index: usize, message: &str) -> Result<String> {
    args.get(index)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{message}"))
}

fn parse_page(args: &[String]) -> Result<usize> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = if let Some(value) = arg.strip_prefix("--page=") {
            value
        } else if arg == "--page" {
            iter.next().context("--page requires a number")?.as_str()
        } else {
            continue;
        };
        let page: usize = value
            .parse()
            .with_context(|| format!("invalid page number: {value}"))?;
        return Ok(page.saturating_sub(1));
    }
    Ok(0)
}

fn run_command(session: &Session, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::ModsList => list_mods(session, format),
        CliCommand::Install(repo) => {
            let record = session.manager().install_mod(&repo, true)?;
            print_record(&record, format, "Installed")
        }
        CliCommand::Update { auto } => {
            let source = if auto {
                UpdateSource::Auto
            } else {
                UpdateSource::Manual
            };
            let changed = session.manager().update_mods(source)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "updated": changed })),
                OutputFormat::Text if changed => println!("Mods updated."),
                OutputFormat::Text => println!("All mods are up to date."),
            }
            Ok(())
        }
        CliCommand::Toggle(id) => {
            let record = session.manager().toggle_mod(&id)?;
            let verb = if record.enabled { "Enabled" } else { "Disabled" };
            print_record(&record, format, verb)
        }
        CliCommand::Remove(id) => {
            let record = session.manager().remove_mod(&id)?;
            print_record(&record, format, "Removed")
        }
        CliCommand::NoUpdates { id, enabled } => {
            let record = session.manager().set_no_updates(&id, enabled)?;
            let verb = if enabled { "Pinned" } else { "Unpinned" };
            print_record(&record, format, verb)
        }
        CliCommand::EngineCheck { manual } => engine_check(session, manual, format),
        CliCommand::EngineStatus => {
            let status = session.engine().status();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Text => {
                    let installed = status.version.as_deref().unwrap_or("unknown");
                    let latest = status.latest_version.as_deref().unwrap_or("unknown");
                    println!("Installed: {installed} ({})", status.updated_at);
                    println!("Latest: {latest}");
                    println!("Auto-update: {}", on_off(status.auto_update));
                    if status.pending_restart {
                        println!("Restart the browser to finish the engine update.");
                    }
                }
            }
            Ok(())
        }
        CliCommand::Marketplace { page } => list_marketplace(session, page, format),
        CliCommand::Rebuild => {
            session.manager().rebuild_stylesheets()?;
            if format == OutputFormat::Text {
                println!("Stylesheets rebuilt.");
            }
            Ok(())
        }
        CliCommand::Paths => list_paths(session, format),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

#[derive(Serialize)]
struct ModListItem {
    id: String,
    name: String,
    version: String,
    enabled: bool,
    no_updates: bool,
    updated_at: Option<String>,
    homepage: Option<String>,
}

impl From<&ModRecord> for ModListItem {
    fn from(record: &ModRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            version: record.version.clone(),
            enabled: record.enabled,
            no_updates: record.no_updates,
            updated_at: record.updated_at.clone(),
            homepage: record.homepage.clone(),
        }
    }
}

fn list_mods(session: &Session, format: OutputFormat) -> Result<()> {
    let registry = session.manager().get_mods()?;
    let items: Vec<ModListItem> = registry.mods.values().map(ModListItem::from).collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No mods installed.");
            }
            for item in items {
                let enabled = if item.enabled { "x" } else { " " };
                let pinned = if item.no_updates { " (pinned)" } else { "" };
                println!(
                    "[{enabled}] {id:<29} {version:<10} {name}{pinned}",
                    id = item.id,
                    version = item.version,
                    name = item.name
                );
            }
        }
    }
    Ok(())
}

fn print_record(record: &ModRecord, format: OutputFormat, verb: &str) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ModListItem::from(record))?);
        }
        OutputFormat::Text => println!("{verb} {} ({})", record.name, record.id),
    }
    Ok(())
}

fn engine_check(session: &Session, manual: bool, format: OutputFormat) -> Result<()> {
    let mut engine = session.engine();
    let outcome = engine.check_for_updates(manual)?;
    match format {
        OutputFormat::Json => {
            let value = match &outcome {
                CheckOutcome::NoFeed => serde_json::json!({ "outcome": "no-feed" }),
                CheckOutcome::UpToDate { latest } => {
                    serde_json::json!({ "outcome": "up-to-date", "latest": latest })
                }
                CheckOutcome::Available { latest } => {
                    serde_json::json!({ "outcome": "available", "latest": latest })
                }
                CheckOutcome::Updated { version } => {
                    serde_json::json!({ "outcome": "updated", "version": version })
                }
            };
            println!("{value}");
        }
        OutputFormat::Text => match outcome {
            CheckOutcome::NoFeed => println!("Engine feed unavailable."),
            CheckOutcome::UpToDate { latest } => println!("Engine is up to date ({latest})."),
            CheckOutcome::Available { latest } => {
                println!("Engine {latest} is available; run 'sine engine check --manual'.")
            }
            CheckOutcome::Updated { version } => {
                println!("Engine updated to {version}. Restart the browser to apply it.")
            }
        },
    }
    Ok(())
}

#[derive(Serialize)]
struct MarketplaceItem {
    id: String,
    name: String,
    description: String,
    homepage: Option<String>,
}

#[derive(Serialize)]
struct MarketplaceOutput {
    page: usize,
    total_pages: usize,
    items: Vec<MarketplaceItem>,
}

fn list_marketplace(session: &Session, index: usize, format: OutputFormat) -> Result<()> {
    let config = &session.config;
    let listing = marketplace::fetch_listing(
        session.fetch.as_ref(),
        config.effective_marketplace_url(),
        &config.os,
        &config.fork,
    )?;
    let registry = session.manager().get_mods()?;
    let available = marketplace::available(&listing, &registry);
    let page = marketplace::page(&available, index, PER_PAGE);

    let output = MarketplaceOutput {
        page: page.index + 1,
        total_pages: page.total_pages,
        items: page
            .items
            .into_iter()
            .map(|(id, entry)| MarketplaceItem {
                id,
                name: entry.name,
                description: entry.description,
                homepage: entry.homepage,
            })
            .collect(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            if output.items.is_empty() {
                println!("Nothing new in the marketplace.");
                return Ok(());
            }
            println!("Page {}/{}", output.page, output.total_pages);
            for item in output.items {
                println!("{} ({})", item.name, item.id);
                if !item.description.is_empty() {
                    println!("  {}", item.description);
                }
                if let Some(homepage) = item.homepage {
                    println!("  {homepage}");
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    mods_dir: String,
    registry: String,
    prefs: String,
    chrome_sheet: String,
    content_sheet: String,
    scripts_dir: String,
    engine_dir: String,
    log_dir: String,
}

fn list_paths(session: &Session, format: OutputFormat) -> Result<()> {
    let layout = &session.layout;
    let output = PathsOutput {
        mods_dir: layout.mods_dir().display().to_string(),
        registry: layout.registry_file().display().to_string(),
        prefs: layout.prefs_file().display().to_string(),
        chrome_sheet: layout.chrome_sheet().display().to_string(),
        content_sheet: layout.content_sheet().display().to_string(),
        scripts_dir: layout.scripts_dir().display().to_string(),
        engine_dir: layout.engine_dir().display().to_string(),
        log_dir: layout.log_dir().display().to_string(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Mods: {}", output.mods_dir);
            println!("Registry: {}", output.registry);
            println!("Prefs: {}", output.prefs);
            println!("Chrome sheet: {}", output.chrome_sheet);
            println!("Content sheet: {}", output.content_sheet);
            println!("Scripts: {}", output.scripts_dir);
            println!("Engine: {}", output.engine_dir);
            println!("Logs: {}", output.log_dir);
        }
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn print_help() {
    println!("Sine v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  sine mods list                  List installed mods");
    println!("  sine install <repo>             Install a mod from GitHub");
    println!("  sine update [--auto]            Update installed mods");
    println!("  sine toggle <id>                Enable or disable a mod");
    println!("  sine remove <id>                Remove a mod");
    println!("  sine no-updates <id> [on|off]   Pin a mod at its current version");
    println!("  sine engine status              Show engine version and restart state");
    println!("  sine engine check [--manual]    Check for and apply engine updates");
    println!("  sine marketplace [--page N]     Browse mods not yet installed");
    println!("  sine rebuild                    Regenerate the aggregate stylesheets");
    println!("  sine paths                      Show profile paths");
    println!();
    println!("Global options:");
    println!("  --format <json|text>            Output format");
    println!("  --profile <dir>                 Browser profile directory");
    println!("  -h, --help                      Show help");
    println!("  -V, --version                   Show version");
}
