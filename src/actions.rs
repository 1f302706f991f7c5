//! File-management actions on project directories: delete, move and trash

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::AppSettings;
use crate::error::{Result, ScanError};
use crate::trash::{self, TrashLocations, TrashOutcome};

/// Check that `path` exists and is not a filesystem root or the home directory
fn guard(path: &Path) -> Result<PathBuf> {
    fs::symlink_metadata(path).map_err(|e| ScanError::from_io(e, path))?;
    let canonical = fs::canonicalize(path).map_err(|e| ScanError::from_io(e, path))?;

    if canonical.parent().is_none() {
        return Err(ScanError::refused(canonical, "Refusing to touch a filesystem root"));
    }
    if let Some(home) = dirs::home_dir().and_then(|h| fs::canonicalize(h).ok()) {
        if canonical == home {
            return Err(ScanError::refused(canonical, "Refusing to touch the home directory"));
        }
    }
    Ok(canonical)
}

/// Permanently delete a project directory
///
/// A symlink is removed itself; its target is left alone.
pub fn delete_project(path: &Path) -> Result<()> {
    guard(path)?;
    let meta = fs::symlink_metadata(path).map_err(|e| ScanError::from_io(e, path))?;
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| ScanError::from_io(e, path))?;
    log::info!("Deleted {:?}", path);
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(windows)]
fn is_cross_device(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

/// Move a project into `dest_dir`, keeping its name; returns the new path
pub fn move_project(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let src_canonical = guard(src)?;
    let dest_canonical = fs::canonicalize(dest_dir).map_err(|e| ScanError::from_io(e, dest_dir))?;
    if !dest_canonical.is_dir() {
        return Err(ScanError::refused(
            dest_canonical,
            "Destination is not a directory",
        ));
    }
    if dest_canonical.starts_with(&src_canonical) {
        return Err(ScanError::refused(
            dest_canonical,
            "Destination is inside the project being moved",
        ));
    }

    // a symlinked project keeps the link's own name
    let name = src
        .file_name()
        .or_else(|| src_canonical.file_name())
        .ok_or_else(|| ScanError::refused(src.to_path_buf(), "Path has no file name"))?;
    let target = dest_canonical.join(name);
    if fs::symlink_metadata(&target).is_ok() {
        return Err(ScanError::refused(target, "Destination already exists"));
    }

    match fs::rename(src, &target) {
        Ok(()) => {}
        Err(e) if is_cross_device(&e) => {
            log::info!("{:?} -> {:?} crosses devices, copying", src, target);
            if let Err(copy_err) = copy_tree(src, &target) {
                let _ = fs::remove_dir_all(&target);
                return Err(copy_err);
            }
            fs::remove_dir_all(src).map_err(|e| ScanError::from_io(e, src))?;
        }
        Err(e) => return Err(ScanError::from_io(e, src)),
    }
    log::info!("Moved {:?} -> {:?}", src, target);
    Ok(target)
}

/// Copy a file with its modification time preserved
fn copy_file_with_mtime(src: &Path, dst: &Path) -> Result<u64> {
    let bytes = fs::copy(src, dst).map_err(|e| ScanError::from_io(e, src))?;
    if let Ok(mtime) = fs::metadata(src).and_then(|m| m.modified()) {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }
    Ok(bytes)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src).map_err(|e| ScanError::from_io(e, src))?;
    std::os::unix::fs::symlink(target, dst).map_err(|e| ScanError::from_io(e, dst))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    copy_file_with_mtime(src, dst).map(|_| ())
}

/// Recursively copy `src` to a new `dst`, preserving mtimes
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0u64;
    let mut dir_times = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(|p| p.to_path_buf());
            ScanError::io_error(path, e.to_string())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ScanError::io_error(Some(entry.path().to_path_buf()), e.to_string()))?;
        let out = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&out).map_err(|e| ScanError::from_io(e, &out))?;
            if let Ok(mtime) = entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
                dir_times.push((out, mtime));
            }
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &out)?;
        } else {
            copied += copy_file_with_mtime(entry.path(), &out)?;
        }
    }

    // Children first, so setting a parent's time is not undone by later writes
    for (dir, mtime) in dir_times.into_iter().rev() {
        let _ = filetime::set_file_mtime(&dir, filetime::FileTime::from_system_time(mtime));
    }
    Ok(copied)
}

/// Trash projects with the configured concurrency bound
pub fn trash_projects(paths: &[PathBuf], settings: &AppSettings) -> Result<Vec<TrashOutcome>> {
    let locations = TrashLocations::from_env()?;
    Ok(trash_projects_with(
        paths,
        settings.trash_concurrency,
        &locations,
    ))
}

/// Trash projects into explicit locations; outcomes keep input order
pub fn trash_projects_with(
    paths: &[PathBuf],
    concurrency: usize,
    locations: &TrashLocations,
) -> Vec<TrashOutcome> {
    let mut refused: Vec<Option<ScanError>> = Vec::with_capacity(paths.len());
    let mut allowed = Vec::new();
    for path in paths {
        match guard(path) {
            Ok(_) => {
                allowed.push(path.clone());
                refused.push(None);
            }
            Err(e) => refused.push(Some(e)),
        }
    }

    let mut trashed = trash::trash_items(&allowed, concurrency, locations).into_iter();
    paths
        .iter()
        .zip(refused)
        .filter_map(|(path, refusal)| match refusal {
            Some(err) => Some(TrashOutcome {
                path: path.clone(),
                result: Err(err),
            }),
            None => trashed.next(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanErrorKind;
    use tempfile::TempDir;

    fn make_project(dir: &Path) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("package.json"), r#"{"name":"x"}"#).unwrap();
        fs::write(dir.join("src/index.js"), "console.log(1)").unwrap();
    }

    #[test]
    fn test_delete_project() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("app");
        make_project(&project);

        delete_project(&project).unwrap();
        assert!(!project.exists());

        let err = delete_project(&project).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::NotFound);
    }

    #[test]
    fn test_guard_refuses_root_and_home() {
        assert_eq!(guard(Path::new("/")).unwrap_err().kind, ScanErrorKind::Refused);
        if let Some(home) = dirs::home_dir().filter(|h| h.exists()) {
            assert_eq!(guard(&home).unwrap_err().kind, ScanErrorKind::Refused);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_symlink_keeps_target() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("app");
        make_project(&project);
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&project, &link).unwrap();

        delete_project(&link).unwrap();
        assert!(fs::symlink_metadata(&link).is_err());
        assert!(project.join("package.json").is_file());
    }

    #[test]
    fn test_move_project() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("app");
        make_project(&project);
        let dest = dir.path().join("archive");
        fs::create_dir(&dest).unwrap();

        let moved = move_project(&project, &dest).unwrap();
        assert_eq!(moved, fs::canonicalize(&dest).unwrap().join("app"));
        assert!(moved.join("src/index.js").is_file());
        assert!(!project.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_move_symlink_keeps_link_name() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("app");
        make_project(&project);
        let link = dir.path().join("shortcut");
        std::os::unix::fs::symlink(&project, &link).unwrap();
        let dest = dir.path().join("archive");
        fs::create_dir(&dest).unwrap();

        let moved = move_project(&link, &dest).unwrap();
        assert_eq!(moved, fs::canonicalize(&dest).unwrap().join("shortcut"));
        assert!(fs::symlink_metadata(&moved).unwrap().file_type().is_symlink());
        assert!(fs::symlink_metadata(&link).is_err());
        assert!(project.join("package.json").is_file());
    }

    #[test]
    fn test_move_refusals() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("app");
        make_project(&project);

        let err = move_project(&project, &project.join("src")).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::Refused);

        let dest = dir.path().join("archive");
        fs::create_dir_all(dest.join("app")).unwrap();
        let err = move_project(&project, &dest).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::Refused);

        let err = move_project(&project, &dir.path().join("nowhere")).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::NotFound);
        assert!(project.exists());
    }

    #[test]
    fn test_copy_tree_preserves_content_and_mtime() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app");
        make_project(&src);
        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(src.join("package.json"), old).unwrap();

        let dst = dir.path().join("copy");
        let bytes = copy_tree(&src, &dst).unwrap();
        assert_eq!(bytes, 12 + 14);
        assert_eq!(
            fs::read_to_string(dst.join("src/index.js")).unwrap(),
            "console.log(1)"
        );
        let meta = fs::metadata(dst.join("package.json")).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[cfg(unix)]
    #[test]
    fn test_trash_projects_with_mixes_refusals_in_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        make_project(&a);
        make_project(&b);
        let locations = TrashLocations::new(dir.path().join("Trash"), 1000);

        let paths = vec![a.clone(), PathBuf::from("/"), b.clone()];
        let outcomes = trash_projects_with(&paths, 2, &locations);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].path, a);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].path, PathBuf::from("/"));
        assert_eq!(
            outcomes[1].result.as_ref().unwrap_err().kind,
            ScanErrorKind::Refused
        );
        assert_eq!(outcomes[2].path, b);
        assert!(outcomes[2].is_ok());
        assert!(!a.exists() && !b.exists());
    }
}
