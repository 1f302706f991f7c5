//! Progress reporting module for scan operations
//!
//! This module provides data structures and utilities for reporting
//! scan progress to a front end reading the process's stderr, one JSON
//! object per line.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::models::{project_id, ScanProgress, ScanResult};
use crate::trash::TrashOutcome;

/// Start message sent when scan begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Scan folders
    pub roots: Vec<String>,
    /// Maximum depth below each root
    pub max_depth: usize,
    /// Whether the walk continues below detected projects
    pub descend: bool,
}

impl StartMessage {
    /// Create a new start message
    pub fn new(seq: u64, ts: u64, roots: Vec<String>, max_depth: usize, descend: bool) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            roots,
            max_depth,
            descend,
        }
    }
}

/// Progress message sent during scan
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Number of directories scanned
    #[serde(rename = "d")]
    pub dirs: u64,
    /// Number of projects found
    #[serde(rename = "n")]
    pub projects: u64,
    /// Current directory being scanned
    pub dir: String,
    /// Elapsed time in milliseconds
    pub ms: u64,
}

impl ProgressMessage {
    /// Create a new progress message
    pub fn new(seq: u64, ts: u64, dirs: u64, projects: u64, dir: String, ms: u64) -> Self {
        Self {
            msg_type: "p",
            seq,
            ts,
            dirs,
            projects,
            dir,
            ms,
        }
    }
}

/// Sent as soon as a project directory is found
#[derive(Debug, Clone, Serialize)]
pub struct ProjectMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub path: String,
    pub id: String,
}

impl ProjectMessage {
    pub fn new(seq: u64, ts: u64, path: String, id: String) -> Self {
        Self {
            msg_type: "proj",
            seq,
            ts,
            path,
            id,
        }
    }
}

/// Error message sent when an error occurs during scan
#[derive(Debug, Clone, Serialize)]
pub struct ErrorProgressMessage {
    /// Message type identifier ("err" for error)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Error type/category
    pub error_type: String,
    /// Error message description
    pub message: String,
    /// Path that caused the error (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorProgressMessage {
    /// Create a new error progress message
    pub fn new(
        seq: u64,
        ts: u64,
        error_type: String,
        message: String,
        path: Option<String>,
    ) -> Self {
        Self {
            msg_type: "err",
            seq,
            ts,
            error_type,
            message,
            path,
        }
    }
}

/// Done message sent when scan completes or is cancelled
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Total number of directories scanned
    #[serde(rename = "td")]
    pub total_dirs: u64,
    /// Total number of projects found
    #[serde(rename = "tp")]
    pub total_projects: usize,
    /// Number of errors encountered
    #[serde(rename = "ec")]
    pub error_count: usize,
    /// Total scan duration in milliseconds
    pub ms: u64,
    pub cancelled: bool,
}

impl DoneMessage {
    /// Create a new done message
    pub fn new(
        seq: u64,
        ts: u64,
        total_dirs: u64,
        total_projects: usize,
        error_count: usize,
        ms: u64,
        cancelled: bool,
    ) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            total_dirs,
            total_projects,
            error_count,
            ms,
            cancelled,
        }
    }
}

/// Result of trashing one item
#[derive(Debug, Clone, Serialize)]
pub struct TrashMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub path: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrashMessage {
    pub fn new(seq: u64, ts: u64, path: String, ok: bool, error: Option<String>) -> Self {
        Self {
            msg_type: "trash",
            seq,
            ts,
            path,
            ok,
            error,
        }
    }
}

/// Progress reporter for outputting scan progress to stderr
///
/// This component manages the output of progress messages during scan operations.
/// It handles timing, sequence numbers, and formatting of various message types.
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Reporting interval in milliseconds
    interval_ms: u64,
    /// Last report time
    last_report: std::cell::Cell<Instant>,
    /// Sequence number for messages
    seq: AtomicU64,
    /// Start time of the reporter
    start_time: Instant,
}

impl ProgressReporter {
    /// Create a new ProgressReporter
    ///
    /// # Arguments
    /// * `enabled` - Whether progress reporting is enabled
    /// * `interval_ms` - Minimum interval between progress messages in milliseconds
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            interval_ms,
            last_report: std::cell::Cell::new(now),
            seq: AtomicU64::new(0),
            start_time: now,
        }
    }

    /// Check if enough time has passed since the last report
    pub fn should_report(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let elapsed = self.last_report.get().elapsed().as_millis() as u64;
        elapsed >= self.interval_ms
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Output a serializable message to stderr as JSON
    pub fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            eprintln!("{}", json);
            std::io::stderr().flush().ok();
        }
    }

    /// Report scan start
    pub fn report_start(&self, config: &ScanConfig) {
        if !self.enabled {
            return;
        }

        let roots: Vec<String> = config
            .roots
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        let msg = StartMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            roots,
            config.max_depth,
            config.descend_into_projects,
        );

        self.output_to_stderr(&msg);
    }

    /// Report scan progress
    ///
    /// A found project is always reported. Directory counts respect the
    /// interval. Returns true if a message was actually sent.
    pub fn report_progress(&self, progress: &ScanProgress) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(found) = &progress.found {
            let msg = ProjectMessage::new(
                self.next_seq(),
                self.current_timestamp(),
                found.to_string_lossy().to_string(),
                project_id(found),
            );
            self.output_to_stderr(&msg);
            return true;
        }

        if !self.should_report() {
            return false;
        }

        let msg = ProgressMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            progress.scanned_dirs,
            progress.projects_found,
            progress.current_dir.clone(),
            progress.elapsed_ms,
        );

        self.output_to_stderr(&msg);
        self.last_report.set(Instant::now());
        true
    }

    /// Report an error (ignores interval timing)
    pub fn report_error(&self, error: &ScanError) {
        if !self.enabled {
            return;
        }

        let msg = ErrorProgressMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            format!("{:?}", error.kind),
            error.message.clone(),
            error.path.as_ref().map(|p| p.to_string_lossy().to_string()),
        );

        self.output_to_stderr(&msg);
    }

    /// Report scan completion
    pub fn report_done(&self, result: &ScanResult) {
        if !self.enabled {
            return;
        }

        let msg = DoneMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            result.total_dirs,
            result.projects.len(),
            result.error_count(),
            result.duration_ms,
            result.cancelled,
        );

        self.output_to_stderr(&msg);
    }

    /// Report the outcome of one trash move
    pub fn report_trash(&self, outcome: &TrashOutcome) {
        if !self.enabled {
            return;
        }

        let msg = TrashMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            outcome.path.to_string_lossy().to_string(),
            outcome.is_ok(),
            outcome.result.as_ref().err().map(|e| e.to_string()),
        );

        self.output_to_stderr(&msg);
    }

    /// Check if the reporter is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
