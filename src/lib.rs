//! Finds software project folders under local scan folders and manages them
//!
//! A directory is a project when it holds `.git` or a known manifest such as
//! `package.json` or `Cargo.toml`. Scans report size, git state and package
//! manager for each project, support progress callbacks and cooperative
//! cancellation, and cache their results so the last scan of a folder wins.
//! Projects can then be deleted, moved, or sent to the per-device trash.

pub mod actions;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod models;
pub mod progress;
pub mod scanner;
pub mod trash;

pub use actions::{delete_project, move_project, trash_projects, trash_projects_with};
pub use config::{AppSettings, ScanConfig};
pub use db::ScanDatabase;
pub use error::{Result, ScanError, ScanErrorKind};
pub use models::{
    GitInfo, Marker, PackageManager, ProjectRecord, ScanProgress, ScanResult,
};
pub use progress::{
    DoneMessage, ErrorProgressMessage, ProgressMessage, ProgressReporter, ProjectMessage,
    StartMessage, TrashMessage,
};
pub use scanner::{scan, start_scan, CancelToken, ScanHandle};
pub use trash::{
    find_mount_point, trash_items, TrashDir, TrashLocations, TrashOutcome, TrashedItem,
};
