//! Typed paths into a workspace layout.
//!
//! Centralizing path construction keeps the manager, the drivers and the
//! reduction loop agreeing on where each artifact lives.
use std::path::{Path, PathBuf};

/// Directory under the build tree that holds every workspace.
pub const WORKSPACES_DIR: &str = "reducer";
pub const TEST_SCRIPT: &str = "test.sh";
/// Script used to probe candidate rule subsets during isolation.
pub const PROBE_SCRIPT: &str = "probe.sh";
pub const LOG_FILE: &str = "log.txt";
pub const MANIFEST_FILE: &str = "reduce.json";
pub const SNAPSHOTS_DIR: &str = "snapshots";

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Parent directory of all workspaces for `build_dir`.
    pub fn workspaces_root(build_dir: &Path) -> PathBuf {
        build_dir.join(WORKSPACES_DIR)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `compile_commands.json` path.
    pub fn database_path(&self) -> PathBuf {
        crate::compile_db::database_path(&self.root)
    }

    /// Return the `test.sh` path.
    pub fn test_script_path(&self) -> PathBuf {
        self.root.join(TEST_SCRIPT)
    }

    pub fn probe_script_path(&self) -> PathBuf {
        self.root.join(PROBE_SCRIPT)
    }

    /// Return the `log.txt` path written by the test script.
    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Return the `reduce.json` run manifest path.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn candidate_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Return the `snapshots/` directory path.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    /// Return the snapshot path taken before reducer cycle `cycle`.
    pub fn snapshot_path(&self, file_name: &str, cycle: usize) -> PathBuf {
        self.snapshots_dir().join(format!("{file_name}.{cycle}"))
    }
}
