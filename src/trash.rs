//! Per-device trash following the freedesktop.org (XDG) trash layout
//!
//! Items on the same device as the home trash go to `$XDG_DATA_HOME/Trash`.
//! Anything else goes to a trash directory at the top of its own mount:
//! `$topdir/.Trash/$uid` when an administrator-provided sticky `.Trash`
//! exists, otherwise `$topdir/.Trash-$uid`. Moves are plain renames, so an
//! item never crosses a device.

use rayon::prelude::*;
use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ScanError, ScanErrorKind};

const INFO_EXTENSION: &str = ".trashinfo";
const DELETION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// An entry found in a trash directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrashedItem {
    /// Name under `files/`
    pub name: String,
    /// Where the item lived before it was trashed
    pub original_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<chrono::NaiveDateTime>,
    /// Current location under `files/`
    pub trashed_path: PathBuf,
}

/// Outcome of trashing one item in a batch
#[derive(Debug)]
pub struct TrashOutcome {
    pub path: PathBuf,
    /// Location under `files/` on success
    pub result: Result<PathBuf>,
}

impl TrashOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// A single trash directory with `files/` and `info/` children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashDir {
    root: PathBuf,
    /// Mount point for top-directory trashes; info paths are relative to it
    topdir: Option<PathBuf>,
}

impl TrashDir {
    /// The home trash; info paths are absolute
    pub fn home(root: PathBuf) -> Self {
        Self { root, topdir: None }
    }

    /// A trash at the top of a mount
    pub fn for_topdir(root: PathBuf, topdir: PathBuf) -> Self {
        Self {
            root,
            topdir: Some(topdir),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn topdir(&self) -> Option<&Path> {
        self.topdir.as_deref()
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn info_dir(&self) -> PathBuf {
        self.root.join("info")
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.files_dir(), self.info_dir()] {
            create_private_dir_all(&dir).map_err(|e| ScanError::from_io(e, &dir))?;
        }
        Ok(())
    }

    /// Path written to the info file for `item`
    fn info_path_for(&self, item: &Path) -> String {
        match &self.topdir {
            Some(top) => match item.strip_prefix(top) {
                Ok(rel) => encode_trash_path(rel),
                Err(_) => encode_trash_path(item),
            },
            None => encode_trash_path(item),
        }
    }

    /// Claim a unique name by creating its info file with `create_new`
    fn claim_name(&self, base: &OsStr) -> Result<(OsString, fs::File)> {
        let info_dir = self.info_dir();
        let files_dir = self.files_dir();

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let candidate = candidate_name(base, attempt);
            let info_path = info_dir.join(info_file_name(&candidate));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&info_path)
            {
                Ok(file) => {
                    // A stray file without info would be overwritten by rename
                    if fs::symlink_metadata(files_dir.join(&candidate)).is_ok() {
                        let _ = fs::remove_file(&info_path);
                        continue;
                    }
                    return Ok((candidate, file));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(ScanError::from_io(e, info_path)),
            }
        }
        Err(ScanError::io_error(
            Some(self.root.clone()),
            "No free name left in trash",
        ))
    }

    /// Move one item into this trash; returns its new location
    ///
    /// `item` must be absolute and on the same device as this trash.
    pub fn put(&self, item: &Path) -> Result<PathBuf> {
        let base = item
            .file_name()
            .ok_or_else(|| ScanError::refused(item.to_path_buf(), "Path has no file name"))?;
        self.ensure_dirs()?;

        let (name, mut info_file) = self.claim_name(base)?;
        let info_path = self.info_dir().join(info_file_name(&name));
        let target = self.files_dir().join(&name);

        let contents = format!(
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            self.info_path_for(item),
            chrono::Local::now().format(DELETION_DATE_FORMAT)
        );
        if let Err(e) = info_file.write_all(contents.as_bytes()) {
            let _ = fs::remove_file(&info_path);
            return Err(ScanError::from_io(e, info_path));
        }
        drop(info_file);

        if let Err(e) = fs::rename(item, &target) {
            let _ = fs::remove_file(&info_path);
            return Err(ScanError::from_io(e, item));
        }
        log::info!("Trashed {:?} -> {:?}", item, target);
        Ok(target)
    }

    /// Entries currently in this trash, sorted by name
    pub fn list(&self) -> Result<Vec<TrashedItem>> {
        let info_dir = self.info_dir();
        let entries = match fs::read_dir(&info_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ScanError::from_io(e, info_dir)),
        };

        let mut items = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(name) = file_name.strip_suffix(INFO_EXTENSION) else {
                continue;
            };
            match self.read_info(name) {
                Ok(item) => items.push(item),
                Err(e) => log::warn!("Skipping unreadable trash info {:?}: {}", entry.path(), e),
            }
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn read_info(&self, name: &str) -> Result<TrashedItem> {
        let info_path = self.info_dir().join(format!("{}{}", name, INFO_EXTENSION));
        let text = fs::read_to_string(&info_path).map_err(|e| ScanError::from_io(e, &info_path))?;
        let (raw_path, deleted_at) = parse_trash_info(&text).ok_or_else(|| {
            ScanError::new(
                ScanErrorKind::InvalidPath,
                Some(info_path.clone()),
                "Malformed trash info",
            )
        })?;

        let decoded = decode_trash_path(&raw_path);
        let original_path = match (&self.topdir, decoded.is_absolute()) {
            (Some(top), false) => top.join(decoded),
            _ => decoded,
        };
        Ok(TrashedItem {
            name: name.to_string(),
            original_path,
            deleted_at,
            trashed_path: self.files_dir().join(name),
        })
    }

    /// Move a trashed item back to where it came from
    pub fn restore(&self, name: &str) -> Result<PathBuf> {
        let item = self.read_info(name)?;
        if fs::symlink_metadata(&item.original_path).is_ok() {
            return Err(ScanError::refused(
                item.original_path,
                "Original location is occupied",
            ));
        }
        if let Some(parent) = item.original_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ScanError::from_io(e, parent))?;
        }
        fs::rename(&item.trashed_path, &item.original_path)
            .map_err(|e| ScanError::from_io(e, &item.trashed_path))?;

        let info_path = self.info_dir().join(format!("{}{}", name, INFO_EXTENSION));
        if let Err(e) = fs::remove_file(&info_path) {
            log::warn!("Restored {:?} but could not remove {:?}: {}", name, info_path, e);
        }
        log::info!("Restored {:?} -> {:?}", item.trashed_path, item.original_path);
        Ok(item.original_path)
    }
}

fn candidate_name(base: &OsStr, attempt: u32) -> OsString {
    let mut name = base.to_os_string();
    if attempt > 1 {
        name.push(format!(".{}", attempt));
    }
    name
}

fn info_file_name(name: &OsStr) -> OsString {
    let mut info = name.to_os_string();
    info.push(INFO_EXTENSION);
    info
}

#[cfg(unix)]
fn create_private_dir_all(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir_all(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn os_bytes(s: &OsStr) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(s.as_bytes())
}

#[cfg(not(unix))]
fn os_bytes(s: &OsStr) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Owned(s.to_string_lossy().into_owned().into_bytes())
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Percent-encode each path component, keeping `/` separators
pub fn encode_trash_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push('/'),
            Component::Normal(part) => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&urlencoding::encode_binary(&os_bytes(part)));
            }
            _ => {}
        }
    }
    out
}

/// Inverse of [`encode_trash_path`]
pub fn decode_trash_path(encoded: &str) -> PathBuf {
    path_from_bytes(&urlencoding::decode_binary(encoded.as_bytes()))
}

/// Parse `Path=` and `DeletionDate=` out of a `.trashinfo` file
fn parse_trash_info(text: &str) -> Option<(String, Option<chrono::NaiveDateTime>)> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next()? != "[Trash Info]" {
        return None;
    }
    let mut path = None;
    let mut deleted_at = None;
    for line in lines {
        if let Some(value) = line.strip_prefix("Path=") {
            path = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("DeletionDate=") {
            deleted_at = chrono::NaiveDateTime::parse_from_str(value, DELETION_DATE_FORMAT).ok();
        }
    }
    Some((path?, deleted_at))
}

/// Absolute form of `path` without resolving the final component
///
/// Trashing a symlink must move the link, not its target.
fn absolute_item(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| ScanError::refused(path.to_path_buf(), "Path has no file name"))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let parent = fs::canonicalize(&parent).map_err(|e| ScanError::from_io(e, &parent))?;
    Ok(parent.join(name))
}

/// Mount point containing `path`: the highest ancestor on the same device
#[cfg(unix)]
pub fn find_mount_point(path: &Path) -> Result<PathBuf> {
    use std::os::unix::fs::MetadataExt;

    let start = fs::canonicalize(path).map_err(|e| ScanError::from_io(e, path))?;
    let dev = fs::metadata(&start)
        .map_err(|e| ScanError::from_io(e, &start))?
        .dev();

    let mut mount = start.clone();
    for ancestor in start.ancestors().skip(1) {
        match fs::metadata(ancestor) {
            Ok(meta) if meta.dev() == dev => mount = ancestor.to_path_buf(),
            _ => break,
        }
    }
    Ok(mount)
}

#[cfg(not(unix))]
pub fn find_mount_point(_path: &Path) -> Result<PathBuf> {
    Err(ScanError::unsupported("Mount point lookup needs a unix platform"))
}

#[cfg(unix)]
fn device_of(path: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    fs::symlink_metadata(path)
        .map(|m| m.dev())
        .map_err(|e| ScanError::from_io(e, path))
}

/// Device of `path`, or of its nearest existing ancestor
#[cfg(unix)]
fn device_of_nearest(path: &Path) -> Result<u64> {
    for ancestor in path.ancestors() {
        if let Ok(dev) = device_of(ancestor) {
            return Ok(dev);
        }
    }
    Err(ScanError::not_found(path.to_path_buf()))
}

/// Pick the trash directory at the top of a mount
#[cfg(unix)]
pub fn select_topdir_trash(topdir: &Path, uid: u32) -> TrashDir {
    use std::os::unix::fs::PermissionsExt;

    let shared = topdir.join(".Trash");
    match fs::symlink_metadata(&shared) {
        Ok(meta) if meta.is_dir() && meta.permissions().mode() & 0o1000 != 0 => {
            let user_dir = shared.join(uid.to_string());
            match create_private_dir_all(&user_dir) {
                Ok(()) => return TrashDir::for_topdir(user_dir, topdir.to_path_buf()),
                Err(e) => log::warn!("Cannot use {:?}: {}", user_dir, e),
            }
        }
        Ok(_) => log::warn!(
            "Ignoring {:?}: not a sticky directory or is a symlink",
            shared
        ),
        Err(_) => {}
    }
    TrashDir::for_topdir(topdir.join(format!(".Trash-{}", uid)), topdir.to_path_buf())
}

/// Resolves which trash directory an item belongs in
#[derive(Debug, Clone)]
pub struct TrashLocations {
    home_trash: PathBuf,
    uid: u32,
}

impl TrashLocations {
    /// Explicit home trash and user id
    pub fn new(home_trash: PathBuf, uid: u32) -> Self {
        Self { home_trash, uid }
    }

    /// Home trash from `$XDG_DATA_HOME` and the current user id
    #[cfg(all(unix, not(target_os = "macos")))]
    pub fn from_env() -> Result<Self> {
        let data = dirs::data_dir()
            .ok_or_else(|| ScanError::unsupported("No data directory for this user"))?;
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        Ok(Self::new(data.join("Trash"), uid))
    }

    #[cfg(not(all(unix, not(target_os = "macos"))))]
    pub fn from_env() -> Result<Self> {
        Err(ScanError::unsupported(
            "Trash is only supported on freedesktop platforms",
        ))
    }

    pub fn home(&self) -> TrashDir {
        TrashDir::home(self.home_trash.clone())
    }

    /// Trash directory for an absolute item path
    #[cfg(unix)]
    pub fn resolve(&self, item: &Path) -> Result<TrashDir> {
        let item_dev = device_of(item)?;
        if device_of_nearest(&self.home_trash)? == item_dev {
            return Ok(self.home());
        }
        let parent = item.parent().unwrap_or(item);
        let topdir = find_mount_point(parent)?;
        log::debug!("{:?} is on mount {:?}", item, topdir);
        Ok(select_topdir_trash(&topdir, self.uid))
    }

    #[cfg(not(unix))]
    pub fn resolve(&self, _item: &Path) -> Result<TrashDir> {
        Err(ScanError::unsupported("Trash resolution needs a unix platform"))
    }
}

/// Move one item to the trash for its device
pub fn trash_item(item: &Path, locations: &TrashLocations) -> Result<PathBuf> {
    let item = absolute_item(item)?;
    if item.parent().is_none() {
        return Err(ScanError::refused(item, "Refusing to trash a filesystem root"));
    }
    let trash = locations.resolve(&item)?;
    if trash.root().starts_with(&item) {
        return Err(ScanError::refused(item, "Item contains its own trash"));
    }
    trash.put(&item)
}

/// Trash many items with at most `concurrency` moves in flight
///
/// Returns one outcome per input, in input order. A failure never stops
/// the remaining moves.
pub fn trash_items(
    paths: &[PathBuf],
    concurrency: usize,
    locations: &TrashLocations,
) -> Vec<TrashOutcome> {
    let run = |p: &PathBuf| TrashOutcome {
        path: p.clone(),
        result: trash_item(p, locations),
    };

    match rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
    {
        Ok(pool) => pool.install(|| paths.par_iter().map(run).collect()),
        Err(e) => {
            log::warn!("Failed to build trash pool, trashing sequentially: {}", e);
            paths.iter().map(run).collect()
        }
    }
}
