//! Core data models for the project scanner

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::ScanError;

/// Evidence that a directory is a project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// `.git` directory or worktree file
    Git,
    /// A manifest file such as `package.json`
    Manifest(String),
}

impl Marker {
    /// Get string representation
    pub fn as_str(&self) -> &str {
        match self {
            Marker::Git => ".git",
            Marker::Manifest(name) => name,
        }
    }
}

/// Package manager used by a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
    Deno,
    Cargo,
    Go,
    Pip,
    Pipenv,
    Poetry,
    Uv,
    Composer,
    Bundler,
    Maven,
    Gradle,
    Pub,
    Mix,
    SwiftPm,
    DotNet,
    #[default]
    Unknown,
}

impl PackageManager {
    /// Parse the tool name from a `packageManager` field like `pnpm@9.1.0`
    pub fn from_package_manager_field(value: &str) -> Self {
        let tool = value.split('@').next().unwrap_or("").trim();
        match tool {
            "npm" => PackageManager::Npm,
            "yarn" => PackageManager::Yarn,
            "pnpm" => PackageManager::Pnpm,
            "bun" => PackageManager::Bun,
            _ => PackageManager::Unknown,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
            PackageManager::Deno => "deno",
            PackageManager::Cargo => "cargo",
            PackageManager::Go => "go",
            PackageManager::Pip => "pip",
            PackageManager::Pipenv => "pipenv",
            PackageManager::Poetry => "poetry",
            PackageManager::Uv => "uv",
            PackageManager::Composer => "composer",
            PackageManager::Bundler => "bundler",
            PackageManager::Maven => "maven",
            PackageManager::Gradle => "gradle",
            PackageManager::Pub => "pub",
            PackageManager::Mix => "mix",
            PackageManager::SwiftPm => "swiftpm",
            PackageManager::DotNet => "dotnet",
            PackageManager::Unknown => "unknown",
        }
    }

    /// Inverse of [`PackageManager::as_str`]
    pub fn parse(s: &str) -> Self {
        match s {
            "npm" => PackageManager::Npm,
            "yarn" => PackageManager::Yarn,
            "pnpm" => PackageManager::Pnpm,
            "bun" => PackageManager::Bun,
            "deno" => PackageManager::Deno,
            "cargo" => PackageManager::Cargo,
            "go" => PackageManager::Go,
            "pip" => PackageManager::Pip,
            "pipenv" => PackageManager::Pipenv,
            "poetry" => PackageManager::Poetry,
            "uv" => PackageManager::Uv,
            "composer" => PackageManager::Composer,
            "bundler" => PackageManager::Bundler,
            "maven" => PackageManager::Maven,
            "gradle" => PackageManager::Gradle,
            "pub" => PackageManager::Pub,
            "mix" => PackageManager::Mix,
            "swiftpm" => PackageManager::SwiftPm,
            "dotnet" => PackageManager::DotNet,
            _ => PackageManager::Unknown,
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Git state read straight from the `.git` directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    /// Checked-out branch, `None` when HEAD is detached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Commit HEAD points at, when it could be resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<String>,
    pub detached: bool,
    /// URL of the `origin` remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// `.git` is a `gitdir:` file (worktree or submodule)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_worktree: bool,
}

/// A detected project directory with its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Stable id derived from the path
    pub id: String,
    pub path: PathBuf,
    /// Directory name
    pub name: String,
    /// Scan folder this project was found under
    pub root: PathBuf,
    /// Depth below the scan folder (0 = the folder itself)
    pub depth: usize,
    pub markers: Vec<Marker>,
    pub package_manager: PackageManager,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
    /// Apparent size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Directory modification time as Unix timestamp
    pub modified: i64,
    /// RFC 3339 time of the scan that produced this record
    pub scanned_at: String,
}

impl ProjectRecord {
    /// Create a record with no metadata beyond the markers
    pub fn new(path: PathBuf, root: PathBuf, depth: usize, markers: Vec<Marker>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            id: project_id(&path),
            path,
            name,
            root,
            depth,
            markers,
            package_manager: PackageManager::Unknown,
            git: None,
            size: None,
            modified: 0,
            scanned_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Whether the project is a git checkout
    pub fn is_git(&self) -> bool {
        self.markers.contains(&Marker::Git)
    }
}

/// Lowercase hex MD5 of the path with `/` separators
pub fn project_id(path: &Path) -> String {
    use md5::{Digest, Md5};

    let normalized = path.to_string_lossy().replace('\\', "/");
    let mut hasher = Md5::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Format a byte count with binary units and short labels (KB, MB, ...)
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else if b < TB {
        format!("{:.2} GB", b / GB)
    } else {
        format!("{:.2} TB", b / TB)
    }
}

/// Result of a scan operation
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Detected projects, sorted by path
    pub projects: Vec<ProjectRecord>,
    /// Canonical paths of every directory entered
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub visited_dirs: BTreeSet<PathBuf>,
    /// Total number of directories traversed
    pub total_dirs: u64,
    /// Errors encountered during scanning
    #[serde(skip)]
    pub errors: Vec<ScanError>,
    /// Number of errors, kept for serialized output
    pub error_count: usize,
    /// Whether the scan stopped early
    pub cancelled: bool,
    /// Total scan duration in milliseconds
    pub duration_ms: u64,
}

impl ScanResult {
    /// Create a new empty scan result
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of errors
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Check if the scan completed without errors or cancellation
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    /// Sum of known project sizes
    pub fn total_size(&self) -> u64 {
        self.projects.iter().filter_map(|p| p.size).sum()
    }
}

/// Progress information during a scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Number of directories scanned so far
    pub scanned_dirs: u64,
    /// Number of projects found so far
    pub projects_found: u64,
    /// Current directory being scanned
    pub current_dir: String,
    /// Project just found, if this update was triggered by one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<PathBuf>,
    /// Elapsed time in milliseconds
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_manager_field() {
        assert_eq!(
            PackageManager::from_package_manager_field("pnpm@9.1.0"),
            PackageManager::Pnpm
        );
        assert_eq!(
            PackageManager::from_package_manager_field("yarn@4.0.2+sha224.abc"),
            PackageManager::Yarn
        );
        assert_eq!(
            PackageManager::from_package_manager_field("bun"),
            PackageManager::Bun
        );
        assert_eq!(
            PackageManager::from_package_manager_field("cnpm@1"),
            PackageManager::Unknown
        );
    }

    #[test]
    fn test_package_manager_str_roundtrip() {
        for pm in [
            PackageManager::Npm,
            PackageManager::SwiftPm,
            PackageManager::DotNet,
            PackageManager::Unknown,
        ] {
            assert_eq!(PackageManager::parse(pm.as_str()), pm);
        }
    }

    #[test]
    fn test_project_id_is_stable_md5() {
        // md5("/a")
        assert_eq!(
            project_id(Path::new("/a")),
            "0639767f3e9eaad729b54037a7e2abf5"
        );
        assert_eq!(project_id(Path::new("/a")), project_id(Path::new("/a")));
        assert_ne!(project_id(Path::new("/a")), project_id(Path::new("/b")));
    }

    #[test]
    fn test_project_record_creation() {
        let record = ProjectRecord::new(
            PathBuf::from("/code/app"),
            PathBuf::from("/code"),
            1,
            vec![Marker::Git, Marker::Manifest("package.json".to_string())],
        );
        assert_eq!(record.name, "app");
        assert!(record.is_git());
        assert!(record.size.is_none());
        assert_eq!(record.package_manager, PackageManager::Unknown);
    }

    #[test]
    fn test_marker_serialization() {
        assert_eq!(serde_json::to_string(&Marker::Git).unwrap(), "\"git\"");
        assert_eq!(
            serde_json::to_string(&Marker::Manifest("go.mod".into())).unwrap(),
            r#"{"manifest":"go.mod"}"#
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_048_576), "1.0 MB");
        assert_eq!(format_size(1_073_741_824), "1.00 GB");
    }

    #[test]
    fn test_scan_result_default() {
        let result = ScanResult::new();
        assert!(result.projects.is_empty());
        assert_eq!(result.error_count(), 0);
        assert!(result.is_success());
        assert_eq!(result.total_size(), 0);
    }
}
