//! Project detection - markers, package managers, git state and sizes
//!
//! Everything here reads the filesystem directly; no external tools are run.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::GIT_MARKER;
use crate::models::{GitInfo, Marker, PackageManager};
use crate::scanner::CancelToken;

/// Lockfiles checked before anything else, in priority order
const LOCKFILES: &[(&str, PackageManager)] = &[
    ("bun.lockb", PackageManager::Bun),
    ("bun.lock", PackageManager::Bun),
    ("pnpm-lock.yaml", PackageManager::Pnpm),
    ("yarn.lock", PackageManager::Yarn),
    ("package-lock.json", PackageManager::Npm),
    ("poetry.lock", PackageManager::Poetry),
    ("uv.lock", PackageManager::Uv),
    ("Pipfile.lock", PackageManager::Pipenv),
    ("Pipfile", PackageManager::Pipenv),
];

/// Manifests checked after lockfiles and the `packageManager` field
const MANIFESTS: &[(&str, PackageManager)] = &[
    ("package.json", PackageManager::Npm),
    ("Cargo.toml", PackageManager::Cargo),
    ("go.mod", PackageManager::Go),
    ("pyproject.toml", PackageManager::Pip),
    ("requirements.txt", PackageManager::Pip),
    ("setup.py", PackageManager::Pip),
    ("composer.json", PackageManager::Composer),
    ("Gemfile", PackageManager::Bundler),
    ("pom.xml", PackageManager::Maven),
    ("build.gradle", PackageManager::Gradle),
    ("build.gradle.kts", PackageManager::Gradle),
    ("pubspec.yaml", PackageManager::Pub),
    ("mix.exs", PackageManager::Mix),
    ("Package.swift", PackageManager::SwiftPm),
];

/// Deno configs rank below .NET project files
const DENO_CONFIGS: &[&str] = &["deno.json", "deno.jsonc"];

/// Return the project markers present in `dir`
///
/// `.git` always comes first. Markers of the form `*.ext` match any file
/// with that extension.
pub fn detect_markers(dir: &Path, markers: &[String]) -> Vec<Marker> {
    let mut found = Vec::new();
    if dir.join(GIT_MARKER).exists() {
        found.push(Marker::Git);
    }

    let (suffixes, names): (Vec<&String>, Vec<&String>) =
        markers.iter().partition(|m| m.starts_with("*."));

    for name in names {
        if dir.join(name).is_file() {
            found.push(Marker::Manifest(name.clone()));
        }
    }

    if !suffixes.is_empty() {
        if let Ok(entries) = fs::read_dir(dir) {
            let mut matched: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
                .filter(|file| {
                    suffixes
                        .iter()
                        .any(|s| file.len() > s.len() - 1 && file.ends_with(&s[1..]))
                })
                .collect();
            matched.sort();
            found.extend(matched.into_iter().map(Marker::Manifest));
        }
    }

    found
}

/// Detect the package manager of a project directory
pub fn detect_package_manager(dir: &Path) -> PackageManager {
    for (file, pm) in LOCKFILES {
        if dir.join(file).is_file() {
            return *pm;
        }
    }

    if let Some(pm) = package_json_manager_field(&dir.join("package.json")) {
        return pm;
    }

    for (file, pm) in MANIFESTS {
        if dir.join(file).is_file() {
            return *pm;
        }
    }

    if has_extension(dir, &["csproj", "sln", "fsproj"]) {
        return PackageManager::DotNet;
    }

    if DENO_CONFIGS.iter().any(|file| dir.join(file).is_file()) {
        return PackageManager::Deno;
    }

    PackageManager::Unknown
}

fn package_json_manager_field(path: &Path) -> Option<PackageManager> {
    let text = fs::read_to_string(path).ok()?;
    let json: serde_json::Value = serde_json::from_str(&text).ok()?;
    let field = json.get("packageManager")?.as_str()?;
    match PackageManager::from_package_manager_field(field) {
        PackageManager::Unknown => None,
        pm => Some(pm),
    }
}

fn has_extension(dir: &Path, extensions: &[&str]) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                e.path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .map(|x| extensions.contains(&x))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// Resolve the git directory for a checkout: `.git` itself, or the target
/// of a `gitdir:` file. Returns the directory and whether it was a file.
fn resolve_git_dir(project: &Path) -> Option<(PathBuf, bool)> {
    let dot_git = project.join(GIT_MARKER);
    let meta = fs::metadata(&dot_git).ok()?;
    if meta.is_dir() {
        return Some((dot_git, false));
    }

    let content = fs::read_to_string(&dot_git).ok()?;
    let target = content
        .lines()
        .find_map(|l| l.strip_prefix("gitdir:"))
        .map(str::trim)?;
    let target = Path::new(target);
    let git_dir = if target.is_absolute() {
        target.to_path_buf()
    } else {
        project.join(target)
    };
    git_dir.is_dir().then_some((git_dir, true))
}

/// Linked worktrees keep refs and config in the common directory
fn common_git_dir(git_dir: &Path) -> PathBuf {
    match fs::read_to_string(git_dir.join("commondir")) {
        Ok(common) => {
            let common = Path::new(common.trim());
            if common.is_absolute() {
                common.to_path_buf()
            } else {
                git_dir.join(common)
            }
        }
        Err(_) => git_dir.to_path_buf(),
    }
}

fn is_sha(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn resolve_ref(common_dir: &Path, git_dir: &Path, refname: &str) -> Option<String> {
    for dir in [git_dir, common_dir] {
        if let Ok(value) = fs::read_to_string(dir.join(refname)) {
            let value = value.trim();
            if is_sha(value) {
                return Some(value.to_string());
            }
        }
    }

    let packed = fs::read_to_string(common_dir.join("packed-refs")).ok()?;
    packed
        .lines()
        .filter(|l| !l.starts_with('#') && !l.starts_with('^'))
        .find_map(|l| {
            let (sha, name) = l.split_once(' ')?;
            (name.trim() == refname && is_sha(sha)).then(|| sha.to_string())
        })
}

/// Read `url` from the `[remote "origin"]` section of a git config file
fn origin_url(config: &str) -> Option<String> {
    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if in_origin {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "url" {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

/// Read git state for a project, or `None` when it has no usable `.git`
pub fn read_git_info(project: &Path) -> Option<GitInfo> {
    let (git_dir, is_worktree) = resolve_git_dir(project)?;
    let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = head.trim();
    let common = common_git_dir(&git_dir);

    let mut info = GitInfo {
        is_worktree,
        ..Default::default()
    };

    if let Some(refname) = head.strip_prefix("ref:") {
        let refname = refname.trim();
        info.branch = Some(
            refname
                .strip_prefix("refs/heads/")
                .unwrap_or(refname)
                .to_string(),
        );
        info.head_commit = resolve_ref(&common, &git_dir, refname);
    } else if is_sha(head) {
        info.detached = true;
        info.head_commit = Some(head.to_string());
    } else {
        log::debug!("Unrecognised HEAD in {:?}", git_dir);
        return None;
    }

    info.remote_url = fs::read_to_string(common.join("config"))
        .ok()
        .and_then(|c| origin_url(&c));

    Some(info)
}

/// Modification time of a path as Unix timestamp, 0 if unavailable
pub fn modified_secs(path: &Path) -> i64 {
    fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Apparent size of a directory tree in bytes
///
/// Symlinks are counted by their own length and never followed. Unreadable
/// entries are skipped. Stops early with a partial total when cancelled.
pub fn directory_size(path: &Path, cancel: &CancelToken) -> u64 {
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        if cancel.is_cancelled() {
            break;
        }
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_detect_markers() {
        let dir = TempDir::new().unwrap();
        assert!(detect_markers(dir.path(), &ScanConfig::default_markers()).is_empty());

        fs::create_dir(dir.path().join(".git")).unwrap();
        touch(dir.path(), "package.json", "{}");
        touch(dir.path(), "App.csproj", "");

        let markers = detect_markers(dir.path(), &ScanConfig::default_markers());
        assert_eq!(
            markers,
            vec![
                Marker::Git,
                Marker::Manifest("package.json".into()),
                Marker::Manifest("App.csproj".into()),
            ]
        );
    }

    #[test]
    fn test_manifest_directory_is_not_marker() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("package.json")).unwrap();
        assert!(detect_markers(dir.path(), &ScanConfig::default_markers()).is_empty());
    }

    #[test]
    fn test_package_manager_lockfile_priority() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "package.json", r#"{"packageManager": "yarn@4.1.0"}"#);
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Yarn);

        touch(dir.path(), "pnpm-lock.yaml", "");
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Pnpm);

        touch(dir.path(), "bun.lockb", "");
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Bun);
    }

    #[test]
    fn test_package_manager_manifests() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Unknown);

        touch(dir.path(), "package.json", r#"{"name": "x"}"#);
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Npm);

        let rust = TempDir::new().unwrap();
        touch(rust.path(), "Cargo.toml", "[package]");
        assert_eq!(detect_package_manager(rust.path()), PackageManager::Cargo);

        let py = TempDir::new().unwrap();
        touch(py.path(), "pyproject.toml", "");
        touch(py.path(), "poetry.lock", "");
        assert_eq!(detect_package_manager(py.path()), PackageManager::Poetry);

        let net = TempDir::new().unwrap();
        touch(net.path(), "Tool.sln", "");
        assert_eq!(detect_package_manager(net.path()), PackageManager::DotNet);
    }

    #[test]
    fn test_dotnet_outranks_deno() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "deno.jsonc", "{}");
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Deno);

        touch(dir.path(), "App.sln", "");
        assert_eq!(detect_package_manager(dir.path()), PackageManager::DotNet);
    }

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_read_git_info_branch_loose_ref() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".git/HEAD", "ref: refs/heads/main\n");
        touch(dir.path(), ".git/refs/heads/main", &format!("{}\n", SHA));
        touch(
            dir.path(),
            ".git/config",
            "[core]\n\tbare = false\n[remote \"upstream\"]\n\turl = a\n[remote \"origin\"]\n\turl = git@example.com:me/app.git\n",
        );

        let info = read_git_info(dir.path()).unwrap();
        assert_eq!(info.branch.as_deref(), Some("main"));
        assert_eq!(info.head_commit.as_deref(), Some(SHA));
        assert!(!info.detached);
        assert!(!info.is_worktree);
        assert_eq!(info.remote_url.as_deref(), Some("git@example.com:me/app.git"));
    }

    #[test]
    fn test_read_git_info_packed_refs_and_detached() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".git/HEAD", "ref: refs/heads/dev\n");
        touch(
            dir.path(),
            ".git/packed-refs",
            &format!("# pack-refs with: peeled\n{} refs/heads/dev\n", SHA),
        );
        let info = read_git_info(dir.path()).unwrap();
        assert_eq!(info.branch.as_deref(), Some("dev"));
        assert_eq!(info.head_commit.as_deref(), Some(SHA));
        assert!(info.remote_url.is_none());

        touch(dir.path(), ".git/HEAD", SHA);
        let info = read_git_info(dir.path()).unwrap();
        assert!(info.detached);
        assert!(info.branch.is_none());
    }

    #[test]
    fn test_read_git_info_worktree_file() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real-git");
        touch(&real, "HEAD", "ref: refs/heads/feature\n");
        let project = dir.path().join("wt");
        fs::create_dir(&project).unwrap();
        fs::write(project.join(".git"), format!("gitdir: {}\n", real.display())).unwrap();

        let info = read_git_info(&project).unwrap();
        assert!(info.is_worktree);
        assert_eq!(info.branch.as_deref(), Some("feature"));
    }

    #[test]
    fn test_read_git_info_missing() {
        let dir = TempDir::new().unwrap();
        assert!(read_git_info(dir.path()).is_none());
        touch(dir.path(), ".git", "garbage");
        assert!(read_git_info(dir.path()).is_none());
    }

    #[test]
    fn test_directory_size() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.txt", "hello");
        touch(dir.path(), "sub/b.txt", "world!!");
        assert_eq!(directory_size(dir.path(), &CancelToken::new()), 12);

        let cancelled = CancelToken::new();
        cancelled.cancel();
        assert_eq!(directory_size(dir.path(), &cancelled), 0);
    }
}
