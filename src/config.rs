//! Configuration for the project scanner
//!
//! [`ScanConfig`] drives a single scan. [`AppSettings`] is the JSON file the
//! CLI persists between runs (scan folders, skip list, trash concurrency).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ScanError};

/// Default max depth for recursive scanning (root is depth 0)
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Default minimum interval between directory progress reports
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 200;

/// Default number of concurrent trash moves
pub const DEFAULT_TRASH_CONCURRENCY: usize = 4;

/// Marker for a git checkout (directory or worktree file)
pub const GIT_MARKER: &str = ".git";

/// Configuration for a single scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Scan folders
    pub roots: Vec<PathBuf>,

    /// Directory names that are never entered
    pub skip_dirs: BTreeSet<String>,

    /// Manifest file names that identify a project.
    /// Entries starting with `*.` match by extension.
    pub markers: Vec<String>,

    /// Whether hidden directories are entered
    pub include_hidden: bool,

    /// Maximum depth below each root
    pub max_depth: usize,

    /// Whether to keep walking below a detected project
    pub descend_into_projects: bool,

    /// Whether to follow symlinked directories
    pub follow_links: bool,

    /// Whether to compute project sizes after the walk
    pub compute_size: bool,

    /// Number of threads for size computation
    /// 0 means auto-detect
    pub num_threads: usize,

    /// Minimum interval between directory progress reports
    pub progress_interval_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            skip_dirs: Self::default_skip_dirs(),
            markers: Self::default_markers(),
            include_hidden: false,
            max_depth: DEFAULT_MAX_DEPTH,
            descend_into_projects: false,
            follow_links: false,
            compute_size: true,
            num_threads: 0,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl ScanConfig {
    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Get the default directories to skip
    pub fn default_skip_dirs() -> BTreeSet<String> {
        [
            "node_modules",
            "target",
            "dist",
            "build",
            "vendor",
            ".venv",
            "venv",
            "__pycache__",
            ".cache",
            ".next",
            ".nuxt",
            ".gradle",
            ".idea",
            ".vscode",
            "Pods",
            "DerivedData",
            "bower_components",
            ".tox",
            ".mypy_cache",
            ".pytest_cache",
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Get the default project manifest names
    pub fn default_markers() -> Vec<String> {
        [
            "package.json",
            "Cargo.toml",
            "go.mod",
            "pyproject.toml",
            "requirements.txt",
            "setup.py",
            "Pipfile",
            "composer.json",
            "Gemfile",
            "pom.xml",
            "build.gradle",
            "build.gradle.kts",
            "pubspec.yaml",
            "mix.exs",
            "Package.swift",
            "deno.json",
            "deno.jsonc",
            "CMakeLists.txt",
            "*.csproj",
            "*.sln",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if a directory should be skipped
    pub fn should_skip_dir(&self, name: &str) -> bool {
        if self.skip_dirs.contains(name) || name.starts_with(".Trash") {
            return true;
        }
        name.starts_with('.') && !self.include_hidden
    }

    /// Get the effective number of threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan folders
    pub fn roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.config.roots = roots;
        self
    }

    /// Add a scan folder
    pub fn add_root(mut self, root: PathBuf) -> Self {
        self.config.roots.push(root);
        self
    }

    /// Replace the skip list
    pub fn skip_dirs(mut self, dirs: BTreeSet<String>) -> Self {
        self.config.skip_dirs = dirs;
        self
    }

    /// Add a directory name to skip
    pub fn add_skip_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.skip_dirs.insert(dir.into());
        self
    }

    /// Replace the manifest names
    pub fn markers(mut self, markers: Vec<String>) -> Self {
        self.config.markers = markers;
        self
    }

    /// Enter hidden directories
    pub fn include_hidden(mut self, enabled: bool) -> Self {
        self.config.include_hidden = enabled;
        self
    }

    /// Set the maximum depth below each root
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Keep walking below detected projects
    pub fn descend_into_projects(mut self, enabled: bool) -> Self {
        self.config.descend_into_projects = enabled;
        self
    }

    /// Follow symlinked directories
    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.config.follow_links = enabled;
        self
    }

    /// Enable or disable size computation
    pub fn compute_size(mut self, enabled: bool) -> Self {
        self.config.compute_size = enabled;
        self
    }

    /// Set the number of threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the progress interval
    pub fn progress_interval_ms(mut self, interval: u64) -> Self {
        self.config.progress_interval_ms = interval;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}

/// Settings persisted between CLI runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Scan folders used when none are given on the command line
    pub scan_folders: Vec<PathBuf>,
    /// Directory names skipped in addition to the defaults
    pub extra_skip_dirs: Vec<String>,
    pub max_depth: usize,
    pub include_hidden: bool,
    pub descend_into_projects: bool,
    /// Upper bound on simultaneous trash moves
    pub trash_concurrency: usize,
    /// Cache database path, defaults next to the settings file
    pub db_path: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            scan_folders: Vec::new(),
            extra_skip_dirs: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            include_hidden: false,
            descend_into_projects: false,
            trash_concurrency: DEFAULT_TRASH_CONCURRENCY,
            db_path: None,
        }
    }
}

impl AppSettings {
    /// Default settings location: `<config_dir>/project_scanner/settings.json`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join("project_scanner").join("settings.json"))
            .ok_or_else(|| ScanError::config_error(None, "No config directory for this platform"))
    }

    /// Load settings, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No settings at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => return Err(ScanError::from_io(e, path)),
        };
        serde_json::from_str(&text)
            .map_err(|e| ScanError::config_error(Some(path.to_path_buf()), e.to_string()))
    }

    /// Save settings atomically (write a sibling temp file, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ScanError::from_io(e, parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| ScanError::from_io(e, &tmp))?;
        fs::rename(&tmp, path).map_err(|e| ScanError::from_io(e, path))?;
        Ok(())
    }

    /// Cache database path: explicit setting, or `scan_cache.db` beside `settings_path`
    pub fn resolve_db_path(&self, settings_path: &Path) -> PathBuf {
        match &self.db_path {
            Some(p) => p.clone(),
            None => settings_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("scan_cache.db"),
        }
    }

    /// Add a scan folder; returns false if it was already present
    pub fn add_scan_folder(&mut self, folder: PathBuf) -> bool {
        if self.scan_folders.contains(&folder) {
            return false;
        }
        self.scan_folders.push(folder);
        true
    }

    /// Remove a scan folder; returns whether anything was removed
    pub fn remove_scan_folder(&mut self, folder: &Path) -> bool {
        let before = self.scan_folders.len();
        self.scan_folders.retain(|f| f != folder);
        self.scan_folders.len() != before
    }

    /// Build a scan config from these settings
    pub fn to_scan_config(&self) -> ScanConfig {
        let mut builder = ScanConfig::builder()
            .roots(self.scan_folders.clone())
            .max_depth(self.max_depth)
            .include_hidden(self.include_hidden)
            .descend_into_projects(self.descend_into_projects);
        for dir in &self.extra_skip_dirs {
            builder = builder.add_skip_dir(dir.clone());
        }
        builder.build()
    }
}
