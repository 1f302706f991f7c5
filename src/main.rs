//! Project Scanner CLI
//!
//! Finds project folders under scan folders and deletes, moves or trashes them.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use project_scanner::models::format_size;
use project_scanner::{
    actions, scan, AppSettings, CancelToken, ProgressReporter, ProjectRecord, Result,
    ScanDatabase, ScanError, TrashLocations,
};

const ABOUT: &str = r#"
Project Scanner - find and manage local project folders

Examples:
  project_scanner scan -r ~/code                 Scan one folder
  project_scanner scan -r ~/code -r ~/work       Scan several folders
  project_scanner scan --max-depth 3 --json      Scan saved folders, JSON output
  project_scanner list                           Show cached projects
  project_scanner trash ~/code/old-app           Move a project to the trash
  project_scanner config add-folder ~/code       Remember a scan folder
"#;

/// Find and manage local software projects
#[derive(Parser)]
#[command(name = "project_scanner")]
#[command(author, version, about = ABOUT, long_about = None)]
#[command(help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan folders for projects
    Scan {
        /// Scan folder, may be given several times (defaults to saved folders)
        #[arg(short = 'r', long = "root")]
        roots: Vec<PathBuf>,

        /// Maximum depth below each scan folder
        #[arg(long)]
        max_depth: Option<usize>,

        /// Enter hidden directories
        #[arg(long)]
        include_hidden: bool,

        /// Keep walking below detected projects
        #[arg(long)]
        descend: bool,

        /// Skip size computation
        #[arg(long)]
        no_size: bool,

        /// Threads used for sizes, 0 = auto
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Emit JSON progress lines on stderr
        #[arg(long)]
        progress: bool,

        /// Cancel the scan when a `cancel` line arrives on stdin
        #[arg(long)]
        cancel_on_stdin: bool,

        /// Do not write the result to the cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Show cached projects from the last scans
    List {
        /// Only projects found under this scan folder
        #[arg(long)]
        root: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
    /// Permanently delete project folders
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Confirm permanent deletion
        #[arg(long)]
        yes: bool,
    },
    /// Move project folders to the trash
    Trash {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Maximum simultaneous moves (defaults to the saved setting)
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,

        /// Emit one JSON line per item on stderr
        #[arg(long)]
        progress: bool,
    },
    /// Move a project folder into another directory
    Move { path: PathBuf, dest: PathBuf },
    /// List items in the home trash
    TrashList {
        #[arg(long)]
        json: bool,
    },
    /// Restore an item from the home trash by its trash name
    TrashRestore { name: String },
    /// Show or change saved settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the settings as JSON
    Show,
    /// Remember a scan folder
    AddFolder { path: PathBuf },
    /// Forget a scan folder
    RemoveFolder { path: PathBuf },
    /// Set the default maximum depth
    SetDepth { depth: usize },
    /// Set the default trash concurrency
    SetConcurrency { concurrency: usize },
}

struct Context {
    settings_path: PathBuf,
    settings: AppSettings,
}

impl Context {
    fn load(config: Option<PathBuf>) -> Result<Self> {
        let settings_path = match config {
            Some(p) => p,
            None => AppSettings::default_path()?,
        };
        let settings = AppSettings::load(&settings_path)?;
        Ok(Self {
            settings_path,
            settings,
        })
    }

    fn open_db(&self) -> Result<ScanDatabase> {
        ScanDatabase::open(&self.settings.resolve_db_path(&self.settings_path))
    }

    fn save(&self) -> Result<()> {
        self.settings.save(&self.settings_path)
    }
}

fn print_projects(projects: &[ProjectRecord]) {
    for p in projects {
        let branch = p
            .git
            .as_ref()
            .and_then(|g| g.branch.clone())
            .unwrap_or_else(|| "-".to_string());
        let size = p.size.map(format_size).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<9} {:<16} {:>10}  {}",
            p.name,
            p.package_manager,
            branch,
            size,
            p.path.display()
        );
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel `token` when a `cancel` line is read from stdin
fn watch_stdin(token: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("stdin-cancel".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(l) if l.trim() == "cancel" => {
                        info!("Cancel requested on stdin");
                        token.cancel();
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Could not watch stdin for cancel: {}", e);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_scan(
    ctx: &Context,
    roots: Vec<PathBuf>,
    max_depth: Option<usize>,
    include_hidden: bool,
    descend: bool,
    no_size: bool,
    threads: usize,
    json: bool,
    progress: bool,
    cancel_on_stdin: bool,
    no_cache: bool,
) -> Result<()> {
    let mut config = ctx.settings.to_scan_config();
    if !roots.is_empty() {
        config.roots = roots;
    }
    if config.roots.is_empty() {
        return Err(ScanError::config_error(
            Some(ctx.settings_path.clone()),
            "No scan folders given and none saved; use -r or `config add-folder`",
        ));
    }
    if let Some(depth) = max_depth {
        config.max_depth = depth;
    }
    config.include_hidden |= include_hidden;
    config.descend_into_projects |= descend;
    config.compute_size = !no_size;
    config.num_threads = threads;

    info!("Roots: {:?}", config.roots);
    info!("Max depth: {}", config.max_depth);

    let reporter = ProgressReporter::new(progress, config.progress_interval_ms);
    let cancel = CancelToken::new();
    if cancel_on_stdin {
        watch_stdin(cancel.clone());
    }

    reporter.report_start(&config);
    let result = scan(&config, &cancel, |p| {
        reporter.report_progress(p);
    });
    for err in &result.errors {
        log::warn!("{}", err);
        reporter.report_error(err);
    }
    reporter.report_done(&result);

    if !no_cache && !ctx.open_db()?.store_scan(&config.roots, &result)? {
        info!("Scan cancelled; cache left unchanged");
    }

    if json {
        print_json(&result)?;
    } else {
        print_projects(&result.projects);
        println!(
            "{} projects, {} directories, {} total, {} errors, {}ms{}",
            result.projects.len(),
            result.total_dirs,
            format_size(result.total_size()),
            result.error_count(),
            result.duration_ms,
            if result.cancelled { " (cancelled)" } else { "" }
        );
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        println!("{}", ABOUT);
        println!("Use 'project_scanner --help' for all commands");
        return Ok(());
    };
    let mut ctx = Context::load(cli.config)?;

    match command {
        Commands::Scan {
            roots,
            max_depth,
            include_hidden,
            descend,
            no_size,
            threads,
            json,
            progress,
            cancel_on_stdin,
            no_cache,
        } => run_scan(
            &ctx,
            roots,
            max_depth,
            include_hidden,
            descend,
            no_size,
            threads,
            json,
            progress,
            cancel_on_stdin,
            no_cache,
        )?,
        Commands::List { root, json } => {
            let db = ctx.open_db()?;
            let projects = match root {
                Some(r) => {
                    let r = std::fs::canonicalize(&r).unwrap_or(r);
                    db.load_projects_under(&r)?
                }
                None => db.load_projects()?,
            };
            if json {
                print_json(&projects)?;
            } else {
                print_projects(&projects);
            }
        }
        Commands::Delete { paths, yes } => {
            if !yes {
                return Err(ScanError::refused(
                    paths[0].clone(),
                    "Permanent deletion needs --yes",
                ));
            }
            let mut db = ctx.open_db()?;
            let mut failed = None;
            let mut deleted = Vec::new();
            for path in &paths {
                let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                match actions::delete_project(path) {
                    Ok(()) => deleted.push(key),
                    Err(e) => {
                        log::error!("{}", e);
                        failed = Some(e);
                    }
                }
            }
            db.remove_paths(&deleted)?;
            println!("Deleted {} of {}", deleted.len(), paths.len());
            if let Some(e) = failed {
                return Err(e);
            }
        }
        Commands::Trash {
            paths,
            concurrency,
            progress,
        } => {
            if let Some(c) = concurrency {
                ctx.settings.trash_concurrency = c;
            }
            let keys: Vec<PathBuf> = paths
                .iter()
                .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
                .collect();
            let outcomes = actions::trash_projects(&paths, &ctx.settings)?;
            let reporter = ProgressReporter::new(progress, 0);
            let mut trashed = Vec::new();
            for (outcome, key) in outcomes.iter().zip(keys) {
                reporter.report_trash(outcome);
                match &outcome.result {
                    Ok(to) => {
                        println!("{} -> {}", outcome.path.display(), to.display());
                        trashed.push(key);
                    }
                    Err(e) => log::error!("{}", e),
                }
            }
            ctx.open_db()?.remove_paths(&trashed)?;
            if trashed.len() != paths.len() {
                return Err(ScanError::io_error(
                    None,
                    format!("{} of {} items could not be trashed", paths.len() - trashed.len(), paths.len()),
                ));
            }
        }
        Commands::Move { path, dest } => {
            let old = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            let new = actions::move_project(&path, &dest)?;
            ctx.open_db()?.update_path(&old, &new)?;
            println!("{} -> {}", path.display(), new.display());
        }
        Commands::TrashList { json } => {
            let items = TrashLocations::from_env()?.home().list()?;
            if json {
                print_json(&items)?;
            } else {
                for item in &items {
                    let when = item
                        .deleted_at
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:<24} {:<20} {}", item.name, when, item.original_path.display());
                }
            }
        }
        Commands::TrashRestore { name } => {
            let restored = TrashLocations::from_env()?.home().restore(&name)?;
            println!("Restored {}", restored.display());
        }
        Commands::Config { action } => run_config(&mut ctx, action)?,
    }
    Ok(())
}

fn run_config(ctx: &mut Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# {}", ctx.settings_path.display());
            return print_json(&ctx.settings);
        }
        ConfigAction::AddFolder { path } => {
            let path = absolute(&path);
            if !ctx.settings.add_scan_folder(path.clone()) {
                println!("Already saved: {}", path.display());
                return Ok(());
            }
        }
        ConfigAction::RemoveFolder { path } => {
            let removed = ctx.settings.remove_scan_folder(&path)
                || ctx.settings.remove_scan_folder(&absolute(&path));
            if !removed {
                println!("Not saved: {}", path.display());
                return Ok(());
            }
        }
        ConfigAction::SetDepth { depth } => ctx.settings.max_depth = depth,
        ConfigAction::SetConcurrency { concurrency } => {
            ctx.settings.trash_concurrency = concurrency.max(1)
        }
    }
    ctx.save()?;
    info!("Saved settings to {:?}", ctx.settings_path);
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn main() -> ExitCode {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
