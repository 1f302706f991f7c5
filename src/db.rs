//! Database module - scan cache where the last scan of a root wins

use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{project_id, GitInfo, Marker, PackageManager, ProjectRecord, ScanResult};

const SELECT_COLUMNS: &str = "SELECT id, path, name, root, depth, markers, package_manager, git, size, modified, scanned_at FROM projects";

/// Matches the row for `?1` and every row below it
const UNDER_PATH: &str = "path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'";

fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Database manager for cached scan results
pub struct ScanDatabase {
    conn: Connection,
}

impl ScanDatabase {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                path TEXT PRIMARY KEY,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                root TEXT NOT NULL,
                depth INTEGER NOT NULL,
                markers TEXT NOT NULL,
                package_manager TEXT NOT NULL,
                git TEXT,
                size INTEGER,
                modified INTEGER NOT NULL,
                scanned_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_projects_root ON projects(root);
            CREATE INDEX IF NOT EXISTS idx_projects_id ON projects(id);
            ",
        )?;
        Ok(())
    }

    fn row_to_project(row: &Row<'_>) -> rusqlite::Result<ProjectRecord> {
        let markers: String = row.get(5)?;
        let git: Option<String> = row.get(7)?;
        let size: Option<i64> = row.get(8)?;
        Ok(ProjectRecord {
            id: row.get(0)?,
            path: PathBuf::from(row.get::<_, String>(1)?),
            name: row.get(2)?,
            root: PathBuf::from(row.get::<_, String>(3)?),
            depth: row.get::<_, i64>(4)? as usize,
            markers: serde_json::from_str::<Vec<Marker>>(&markers).unwrap_or_default(),
            package_manager: PackageManager::parse(&row.get::<_, String>(6)?),
            git: git.and_then(|g| serde_json::from_str::<GitInfo>(&g).ok()),
            size: size.map(|s| s as u64),
            modified: row.get(9)?,
            scanned_at: row.get(10)?,
        })
    }

    /// Replace everything cached for `root` with a fresh scan
    pub fn replace_root(&mut self, root: &Path, projects: &[ProjectRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM projects WHERE root = ?1", params![path_key(root)])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO projects
                 (path, id, name, root, depth, markers, package_manager, git, size, modified, scanned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            for project in projects {
                let git = match &project.git {
                    Some(g) => Some(serde_json::to_string(g)?),
                    None => None,
                };
                stmt.execute(params![
                    path_key(&project.path),
                    project.id,
                    project.name,
                    path_key(&project.root),
                    project.depth as i64,
                    serde_json::to_string(&project.markers)?,
                    project.package_manager.as_str(),
                    git,
                    project.size.map(|s| s as i64),
                    project.modified,
                    project.scanned_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Store a finished scan, replacing the cached rows of every scanned root
    ///
    /// Roots that no longer exist are cleared under their literal path.
    /// Returns false, leaving the cache untouched, when the scan was cancelled.
    pub fn store_scan(&mut self, roots: &[PathBuf], result: &ScanResult) -> Result<bool> {
        if result.cancelled {
            return Ok(false);
        }
        for root in roots {
            let root = fs::canonicalize(root).unwrap_or_else(|_| root.clone());
            let found: Vec<ProjectRecord> = result
                .projects
                .iter()
                .filter(|p| p.root == root)
                .cloned()
                .collect();
            self.replace_root(&root, &found)?;
        }
        Ok(true)
    }

    /// All cached projects, sorted by path
    pub fn load_projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY path", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], Self::row_to_project)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    /// Cached projects found under one scan folder
    pub fn load_projects_under(&self, root: &Path) -> Result<Vec<ProjectRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE root = ?1 ORDER BY path", SELECT_COLUMNS))?;
        let rows = stmt.query_map([path_key(root)], Self::row_to_project)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    /// Drop records for paths that were deleted or trashed, nested projects included
    pub fn remove_paths(&mut self, paths: &[PathBuf]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM projects WHERE {}", UNDER_PATH))?;
            for path in paths {
                removed += stmt.execute(params![path_key(path)])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Rewrite records after a project was moved. Nested projects follow
    /// their parent to the new location.
    pub fn update_path(&mut self, old: &Path, new: &Path) -> Result<bool> {
        let old_key = path_key(old);
        let new_key = path_key(new);
        let name = new
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let tx = self.conn.transaction()?;
        let mut changed = 0;
        {
            let mut select = tx.prepare(&format!("SELECT path FROM projects WHERE {}", UNDER_PATH))?;
            let affected = select
                .query_map(params![old_key], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut rename = tx.prepare(
                "UPDATE projects SET path = ?1, id = ?2, name = ?3 WHERE path = ?4",
            )?;
            let mut relocate =
                tx.prepare("UPDATE projects SET path = ?1, id = ?2 WHERE path = ?3")?;
            for path in affected {
                if path == old_key {
                    changed += rename.execute(params![new_key, project_id(new), name, path])?;
                } else {
                    let moved = format!("{}{}", new_key, &path[old_key.len()..]);
                    let id = project_id(Path::new(&moved));
                    changed += relocate.execute(params![moved, id, path])?;
                }
            }
        }
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Get project count
    pub fn project_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
