//! Scanner module - walks scan folders and collects project directories

use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::detect;
use crate::error::{Result, ScanError, ScanErrorKind};
use crate::models::{Marker, ProjectRecord, ScanProgress, ScanResult};

/// Cooperative cancellation flag shared between a scan and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the scan to stop as soon as possible
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Mutable state threaded through the walk of every root
struct WalkState<'a, F> {
    config: &'a ScanConfig,
    cancel: &'a CancelToken,
    on_progress: F,
    start: Instant,
    last_progress: Instant,
    visited: BTreeSet<PathBuf>,
    projects: Vec<ProjectRecord>,
    errors: Vec<ScanError>,
    total_dirs: u64,
    current_dir: String,
}

impl<F: FnMut(&ScanProgress)> WalkState<'_, F> {
    fn progress(&self, found: Option<PathBuf>) -> ScanProgress {
        ScanProgress {
            scanned_dirs: self.total_dirs,
            projects_found: self.projects.len() as u64,
            current_dir: self.current_dir.clone(),
            found,
            elapsed_ms: self.start.elapsed().as_millis() as u64,
        }
    }

    fn emit(&mut self, found: Option<PathBuf>) {
        let progress = self.progress(found);
        (self.on_progress)(&progress);
        self.last_progress = Instant::now();
    }

    fn maybe_emit(&mut self) {
        if self.last_progress.elapsed().as_millis() as u64 >= self.config.progress_interval_ms {
            self.emit(None);
        }
    }

    /// Walk one scan folder. Returns false when cancelled.
    fn walk_root(&mut self, root: &Path) -> bool {
        let root = match fs::canonicalize(root) {
            Ok(r) if r.is_dir() => r,
            _ => {
                log::warn!("Scan folder {:?} does not exist or is not a directory", root);
                self.errors.push(ScanError::not_found(root.to_path_buf()));
                return true;
            }
        };

        let config = self.config;
        let mut walker = WalkDir::new(&root)
            .max_depth(config.max_depth)
            .follow_links(config.follow_links)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                e.file_type().is_dir()
                    && e
                        .file_name()
                        .to_str()
                        .map(|name| !config.should_skip_dir(name))
                        .unwrap_or(true)
            });

        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let entry = match walker.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    if e.loop_ancestor().is_some() {
                        log::debug!("Symlink loop at {:?}", e.path());
                        continue;
                    }
                    let path = e.path().map(|p| p.to_path_buf());
                    let kind = if e.io_error().map(|e| e.kind())
                        == Some(std::io::ErrorKind::PermissionDenied)
                    {
                        ScanErrorKind::PermissionDenied
                    } else {
                        ScanErrorKind::IoError
                    };
                    log::debug!("Walk error: {}", e);
                    self.errors.push(ScanError::new(kind, path, e.to_string()));
                    continue;
                }
            };

            let path = entry.path();
            let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !self.visited.insert(canonical) {
                walker.skip_current_dir();
                continue;
            }
            self.total_dirs += 1;
            self.current_dir = path.to_string_lossy().to_string();

            let markers = detect::detect_markers(path, &config.markers);
            if !markers.is_empty() {
                log::debug!("Project at {:?} ({:?})", path, markers);
                self.projects.push(ProjectRecord::new(
                    path.to_path_buf(),
                    root.clone(),
                    entry.depth(),
                    markers,
                ));
                self.emit(Some(path.to_path_buf()));
                if !config.descend_into_projects {
                    walker.skip_current_dir();
                }
                continue;
            }

            self.maybe_emit();
        }
        true
    }
}

/// Fill in package manager, git state, mtime and (optionally) size
fn enrich_projects(projects: &mut [ProjectRecord], config: &ScanConfig, cancel: &CancelToken) {
    for project in projects.iter_mut() {
        project.package_manager = detect::detect_package_manager(&project.path);
        if project.markers.contains(&Marker::Git) {
            project.git = detect::read_git_info(&project.path);
        }
        project.modified = detect::modified_secs(&project.path);
    }

    if !config.compute_size || cancel.is_cancelled() {
        return;
    }

    let compute = |projects: &mut [ProjectRecord]| {
        projects.par_iter_mut().for_each(|project| {
            let size = detect::directory_size(&project.path, cancel);
            if !cancel.is_cancelled() {
                project.size = Some(size);
            }
        });
    };

    match rayon::ThreadPoolBuilder::new()
        .num_threads(config.effective_threads())
        .build()
    {
        Ok(pool) => pool.install(|| compute(projects)),
        Err(e) => {
            log::warn!("Failed to build size pool, using global pool: {}", e);
            compute(projects);
        }
    }
}

/// Scan every configured root for project directories
///
/// `on_progress` is called for each project found, at most once per
/// `progress_interval_ms` for directory counts, and once at the end.
/// A cancelled scan returns what it found so far with `cancelled` set.
pub fn scan<F>(config: &ScanConfig, cancel: &CancelToken, on_progress: F) -> ScanResult
where
    F: FnMut(&ScanProgress),
{
    let start = Instant::now();
    let mut state = WalkState {
        config,
        cancel,
        on_progress,
        start,
        last_progress: start,
        visited: BTreeSet::new(),
        projects: Vec::new(),
        errors: Vec::new(),
        total_dirs: 0,
        current_dir: String::new(),
    };

    for root in &config.roots {
        log::info!("Scanning {:?}", root);
        if !state.walk_root(root) {
            log::info!("Scan cancelled in {:?}", root);
            break;
        }
    }

    enrich_projects(&mut state.projects, config, cancel);
    state.projects.sort_by(|a, b| a.path.cmp(&b.path));
    state.emit(None);

    let cancelled = cancel.is_cancelled();
    ScanResult {
        projects: state.projects,
        visited_dirs: state.visited,
        total_dirs: state.total_dirs,
        error_count: state.errors.len(),
        errors: state.errors,
        cancelled,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Progress updates buffered before the scan thread waits for the receiver
const PROGRESS_BUFFER: usize = 64;

/// Handle to a scan running on a background thread
pub struct ScanHandle {
    /// Progress updates from the scan thread
    pub progress_rx: Receiver<ScanProgress>,
    cancel: CancelToken,
    thread: thread::JoinHandle<ScanResult>,
}

impl ScanHandle {
    /// Request the scan to stop as soon as possible
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that cancels this scan
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the scan to finish. Unread progress updates are discarded.
    pub fn join(self) -> Result<ScanResult> {
        let ScanHandle {
            progress_rx,
            thread,
            ..
        } = self;
        drop(progress_rx);
        thread
            .join()
            .map_err(|_| ScanError::io_error(None, "Scan thread panicked"))
    }
}

/// Start a scan on a background thread
pub fn start_scan(config: ScanConfig) -> Result<ScanHandle> {
    let (tx, progress_rx) = mpsc::sync_channel(PROGRESS_BUFFER);
    let cancel = CancelToken::new();
    let thread_cancel = cancel.clone();

    let thread = thread::Builder::new()
        .name("project-scanner".into())
        .spawn(move || {
            scan(&config, &thread_cancel, |p| {
                // Receiver may have been dropped; the scan still completes
                let _ = tx.send(p.clone());
            })
        })
        .map_err(|e| ScanError::io_error(None, format!("Failed to spawn scan thread: {}", e)))?;

    Ok(ScanHandle {
        progress_rx,
        cancel,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PackageManager;
    use tempfile::TempDir;

    fn mkproject(dir: &Path, manifest: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(manifest), "{}").unwrap();
    }

    fn config_for(root: &Path) -> ScanConfig {
        ScanConfig::builder()
            .add_root(root.to_path_buf())
            .progress_interval_ms(0)
            .build()
    }

    #[test]
    fn test_scan_finds_projects_and_prunes_below_them() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("web"), "package.json");
        mkproject(&dir.path().join("web/packages/inner"), "package.json");
        mkproject(&dir.path().join("tools/cli"), "Cargo.toml");
        fs::create_dir_all(dir.path().join("notes/drafts")).unwrap();

        let result = scan(&config_for(dir.path()), &CancelToken::new(), |_| {});
        let names: Vec<_> = result.projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["cli", "web"]);
        assert!(result.is_success());
        assert_eq!(result.projects[0].package_manager, PackageManager::Cargo);
        assert_eq!(result.projects[0].depth, 2);
        assert!(result.projects.iter().all(|p| p.size.is_some()));
    }

    #[test]
    fn test_scan_descend_into_projects() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("web"), "package.json");
        mkproject(&dir.path().join("web/packages/inner"), "package.json");

        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .descend_into_projects(true)
            .build();
        let result = scan(&config, &CancelToken::new(), |_| {});
        assert_eq!(result.projects.len(), 2);
    }

    #[test]
    fn test_scan_skips_and_depth_bound() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("node_modules/dep"), "package.json");
        mkproject(&dir.path().join(".hidden/app"), "package.json");
        mkproject(&dir.path().join("a/b/c/deep"), "go.mod");

        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .max_depth(3)
            .build();
        let result = scan(&config, &CancelToken::new(), |_| {});
        assert!(result.projects.is_empty());

        let canonical = fs::canonicalize(dir.path()).unwrap();
        assert!(result.visited_dirs.contains(&canonical));
        assert!(!result.visited_dirs.contains(&canonical.join("node_modules")));
        assert!(result.visited_dirs.contains(&canonical.join("a/b/c")));
        assert!(!result.visited_dirs.contains(&canonical.join("a/b/c/deep")));
    }

    #[test]
    fn test_root_that_is_a_project() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        let result = scan(&config_for(dir.path()), &CancelToken::new(), |_| {});
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].depth, 0);
        let git = result.projects[0].git.as_ref().unwrap();
        assert_eq!(git.branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_missing_root_is_error_and_scan_continues() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("app"), "package.json");

        let config = ScanConfig::builder()
            .add_root(dir.path().join("missing"))
            .add_root(dir.path().to_path_buf())
            .build();
        let result = scan(&config, &CancelToken::new(), |_| {});
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors[0].kind, ScanErrorKind::NotFound);
    }

    #[test]
    fn test_overlapping_roots_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("group/app"), "package.json");

        let config = ScanConfig::builder()
            .add_root(dir.path().join("group"))
            .add_root(dir.path().to_path_buf())
            .build();
        let result = scan(&config, &CancelToken::new(), |_| {});
        assert_eq!(result.projects.len(), 1);
        assert_eq!(
            result.projects[0].root,
            fs::canonicalize(dir.path().join("group")).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed_by_default() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("real/app"), "package.json");
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        let result = scan(&config_for(dir.path()), &CancelToken::new(), |_| {});
        assert_eq!(result.projects.len(), 1);

        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .follow_links(true)
            .build();
        let result = scan(&config, &CancelToken::new(), |_| {});
        // the linked copy resolves to an already visited directory
        assert_eq!(result.projects.len(), 1);
    }

    #[test]
    fn test_progress_reports_found_projects() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("one"), "package.json");
        mkproject(&dir.path().join("two"), "package.json");

        let mut found = Vec::new();
        let mut calls = 0;
        scan(&config_for(dir.path()), &CancelToken::new(), |p| {
            calls += 1;
            if let Some(path) = &p.found {
                found.push(path.clone());
            }
        });
        assert_eq!(found.len(), 2);
        assert!(calls >= 3);
    }

    #[test]
    fn test_cancelled_scan_returns_partial_result() {
        let dir = TempDir::new().unwrap();
        for i in 0..20 {
            mkproject(&dir.path().join(format!("p{}", i)), "package.json");
        }

        let cancel = CancelToken::new();
        let result = scan(&config_for(dir.path()), &cancel, |p| {
            if p.projects_found >= 3 {
                cancel.cancel();
            }
        });
        assert!(result.cancelled);
        assert!(!result.is_success());
        assert_eq!(result.projects.len(), 3);
        assert!(result.projects.iter().all(|p| p.size.is_none()));
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_link_is_error_and_scan_continues() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("app"), "package.json");
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();

        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .follow_links(true)
            .build();
        let result = scan(&config, &CancelToken::new(), |_| {});
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].name, "app");
        assert!(result.error_count > 0);
        assert_eq!(result.errors[0].kind, ScanErrorKind::IoError);
        assert!(!result.cancelled);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_dir_is_permission_error() {
        use std::os::unix::fs::PermissionsExt;

        // root ignores directory permissions
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("app"), "package.json");
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = scan(&config_for(dir.path()), &CancelToken::new(), |_| {});
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(result.projects.len(), 1);
        assert!(result
            .errors
            .iter()
            .any(|e| e.kind == ScanErrorKind::PermissionDenied));
    }

    #[test]
    fn test_progress_is_throttled() {
        let dir = TempDir::new().unwrap();
        for i in 0..30 {
            fs::create_dir_all(dir.path().join(format!("plain{}/sub", i))).unwrap();
        }
        mkproject(&dir.path().join("one"), "package.json");
        mkproject(&dir.path().join("two"), "package.json");

        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .progress_interval_ms(60_000)
            .build();
        let mut updates = Vec::new();
        let result = scan(&config, &CancelToken::new(), |p| updates.push(p.clone()));

        assert_eq!(updates.len(), 3);
        assert_eq!(updates.iter().filter(|p| p.found.is_some()).count(), 2);
        let last = updates.last().unwrap();
        assert!(last.found.is_none());
        assert_eq!(last.scanned_dirs, result.total_dirs);
        assert_eq!(last.projects_found, 2);
    }

    #[test]
    fn test_cancel_background_scan() {
        let dir = TempDir::new().unwrap();
        let total = PROGRESS_BUFFER + 16;
        for i in 0..total {
            mkproject(&dir.path().join(format!("p{}", i)), "package.json");
        }

        // nobody reads progress, so the scan thread stalls once the buffer fills
        let handle = start_scan(config_for(dir.path())).unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());
        let result = handle.join().unwrap();

        assert!(result.cancelled);
        assert!(result.projects.len() < total);
    }

    #[test]
    fn test_start_scan_background() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("bg"), "Gemfile");

        let handle = start_scan(config_for(dir.path())).unwrap();
        let result = handle.join().unwrap();
        assert_eq!(result.projects.len(), 1);
        assert_eq!(
            result.projects[0].package_manager,
            PackageManager::Bundler
        );
    }

    #[test]
    fn test_start_scan_progress_channel() {
        let dir = TempDir::new().unwrap();
        mkproject(&dir.path().join("x"), "go.mod");

        let handle = start_scan(config_for(dir.path())).unwrap();
        // Blocks until the scan thread drops its sender
        let rx_updates: Vec<ScanProgress> = handle.progress_rx.iter().collect();
        assert!(rx_updates.iter().any(|p| p.found.is_some()));
        assert!(!handle.is_cancelled());
        handle.join().unwrap();
    }
}
