use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use ignorewatch::config::Settings;
use ignorewatch::engine::Engine;
use tracing::{info, warn};

const BIN_NAME: &str = env!("CARGO_BIN_NAME");

#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about = "Live ignore-rule engine for workspace decorations")]
struct Cli {
    /// Path to the settings YAML file
    #[arg(global = true, short, long, value_name = "PATH")]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Watch ignore files under the configured roots and report changes (default)
    Watch,
    /// Query whether the given paths are ignored
    Check {
        paths: Vec<Utf8PathBuf>,
        /// Print the pattern that decided each verdict
        #[arg(long)]
        explain: bool,
        /// Treat every path as a directory regardless of filesystem state
        #[arg(long)]
        dir: bool,
    },
    /// Create a starter settings file
    Install {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Flip the enabled flag in the settings file
    Toggle,
    /// Inspect or change settings values
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum SettingsCommand {
    /// Print the resolved settings as YAML
    Show,
    /// Update a settings value (e.g. enabled false, add-root /path)
    Set { key: SettingsKey, value: String },
}

#[derive(Debug, Clone, Copy)]
enum SettingsKey {
    Enabled,
    IgnoreFiles,
    AddRoot,
    RemoveRoot,
}

impl FromStr for SettingsKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('_', "-").to_ascii_lowercase().as_str() {
            "enabled" => Ok(Self::Enabled),
            "ignore-files" | "ignorefiles" => Ok(Self::IgnoreFiles),
            "add-root" => Ok(Self::AddRoot),
            "remove-root" => Ok(Self::RemoveRoot),
            other => Err(format!("unknown settings key: {other}")),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let Cli { config, command } = cli;
    match command.unwrap_or(Command::Watch) {
        Command::Watch => handle_watch(config),
        Command::Check { paths, explain, dir } => handle_check(config, paths, explain, dir),
        Command::Install { force } => handle_install(config, force),
        Command::Toggle => handle_toggle(config),
        Command::Settings { command } => handle_settings(config, command),
    }
}

fn handle_watch(config_arg: Option<Utf8PathBuf>) -> Result<()> {
    let (settings, config_path) = Settings::detect_and_load(config_arg)?;
    info!(path = %config_path, "settings loaded");
    if settings.roots.is_empty() {
        warn!("no roots configured, nothing will be watched");
    }

    let engine = Engine::new(&settings);
    engine.start_watching()?;
    let changes = engine.subscribe();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    let (config_tx, config_rx) = crossbeam_channel::unbounded();
    let _settings_watcher = watch_settings_file(&config_path, config_tx)?;

    info!(roots = settings.roots.len(), "ignorewatch running");
    while !shutdown.load(Ordering::SeqCst) {
        crossbeam_channel::select! {
            recv(changes) -> event => match event {
                Ok(_) => info!("ignore rules changed"),
                Err(_) => break,
            },
            recv(config_rx) -> event => {
                if event.is_err() {
                    break;
                }
                match Settings::load_from_path(&config_path) {
                    Ok(updated) => {
                        if let Err(err) = engine.update_settings(&updated) {
                            warn!(?err, "failed to apply updated settings");
                        }
                    }
                    Err(err) => warn!(?err, "settings file changed but could not be reloaded"),
                }
            }
            default(Duration::from_millis(200)) => {}
        }
    }

    info!("ignorewatch shutting down");
    engine.shutdown();
    Ok(())
}

fn watch_settings_file(
    path: &Utf8Path,
    tx: crossbeam_channel::Sender<()>,
) -> Result<notify::RecommendedWatcher> {
    use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};

    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
        _ => Utf8PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .context("settings path has no file name")?
        .to_string();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name.as_str()))
            {
                let _ = tx.send(());
            }
        },
        NotifyConfig::default(),
    )
    .context("failed to create settings watcher")?;
    watcher
        .watch(parent.as_std_path(), RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch settings directory {parent}"))?;
    Ok(watcher)
}

fn handle_check(
    config_arg: Option<Utf8PathBuf>,
    paths: Vec<Utf8PathBuf>,
    explain: bool,
    dir: bool,
) -> Result<()> {
    if paths.is_empty() {
        bail!("no paths given");
    }
    let (settings, _) = Settings::detect_and_load(config_arg)?;
    let engine = Engine::new(&settings);
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .ok()
        .context("working directory is not valid UTF-8")?;

    for path in paths {
        let absolute = if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(&path)
        };
        let is_dir = dir || absolute.as_std_path().is_dir();
        let verdict = engine.query(&absolute, is_dir);
        let label = if verdict.ignored { "ignored" } else { "kept" };
        match verdict.matched {
            Some(pattern) if explain => println!("{label:8} {path}  ({})", pattern.raw),
            _ => println!("{label:8} {path}"),
        }
    }
    Ok(())
}

fn handle_install(config_arg: Option<Utf8PathBuf>, force: bool) -> Result<()> {
    let path = Settings::resolve_path(config_arg)?;
    if path.exists() && !force {
        bail!(
            "settings file already exists at {} (use --force to overwrite)",
            path
        );
    }
    let settings = default_settings();
    settings.save_to_path(&path)?;
    println!("Created settings at {path}. Edit the roots list before running `{BIN_NAME} watch`.");
    Ok(())
}

fn handle_toggle(config_arg: Option<Utf8PathBuf>) -> Result<()> {
    let path = Settings::resolve_path(config_arg)?;
    let mut settings = Settings::load_from_path(&path)?;
    settings.enabled = !settings.enabled;
    settings.save_to_path(&path)?;
    println!(
        "Ignore decorations {} in {path}",
        if settings.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn handle_settings(config_arg: Option<Utf8PathBuf>, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            let (settings, _) = Settings::detect_and_load(config_arg)?;
            let rendered =
                serde_yaml::to_string(&settings).context("failed to render settings as YAML")?;
            println!("{rendered}");
            Ok(())
        }
        SettingsCommand::Set { key, value } => {
            let path = Settings::resolve_path(config_arg)?;
            let mut settings = Settings::load_from_path(&path)?;
            apply_setting(&mut settings, key, &value)?;
            settings.save_to_path(&path)?;
            println!("Updated {key:?} in {path}");
            Ok(())
        }
    }
}

fn apply_setting(settings: &mut Settings, key: SettingsKey, value: &str) -> Result<()> {
    match key {
        SettingsKey::Enabled => settings.enabled = parse_bool(value)?,
        SettingsKey::IgnoreFiles => {
            let names: Vec<String> = value
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
            if names.is_empty() {
                bail!("ignore-files cannot be empty");
            }
            settings.ignore_files = names;
        }
        SettingsKey::AddRoot => {
            let root = Utf8PathBuf::from(value.trim());
            if root.as_str().is_empty() {
                bail!("root cannot be empty");
            }
            if !settings.roots.contains(&root) {
                settings.roots.push(root);
            }
        }
        SettingsKey::RemoveRoot => {
            let root = Utf8PathBuf::from(value.trim());
            let before = settings.roots.len();
            settings.roots.retain(|existing| existing != &root);
            if settings.roots.len() == before {
                bail!("root {root} is not configured");
            }
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => bail!("cannot parse '{other}' as boolean"),
    }
}

fn default_settings() -> Settings {
    let roots = std::env::current_dir()
        .ok()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .map(|dir| vec![dir])
        .unwrap_or_default();
    Settings {
        roots,
        ..Settings::default()
    }
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("IGNOREWATCH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize logging: {err}");
    }
}
