//! Isolated per-run workspaces.
//!
//! A workspace holds the candidate source, the relocated compile command,
//! auxiliary analyzer configuration, the interestingness script and its log.
//! Workspaces are never deleted by the tool so failures can be inspected.
mod paths;

pub use paths::{
    WorkspacePaths, LOG_FILE, MANIFEST_FILE, PROBE_SCRIPT, SNAPSHOTS_DIR, TEST_SCRIPT,
    WORKSPACES_DIR,
};

use crate::compile_db::{self, CompileEntry};
use crate::driver::DriverKind;
use crate::error::{IoContext, ReduceError, Result};
use crate::util::{path_spellings, replace_path};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current schema version for `reduce.json`.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Run manifest persisted as `reduce.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    pub schema_version: u32,
    pub id: String,
    pub driver: DriverKind,
    /// File name of the candidate inside the workspace.
    pub source_name: String,
    pub original_source: PathBuf,
    pub build_dir: PathBuf,
    pub created_at_epoch_ms: u128,
    /// File names of copied auxiliary files.
    #[serde(default)]
    pub aux_files: Vec<String>,
    /// Stages in the installed `test.sh`, used to bound a whole test run.
    #[serde(default)]
    pub test_stages: usize,
    #[serde(default)]
    pub cycles: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_state: Option<String>,
}

/// An isolated directory owned by exactly one reduction run.
#[derive(Debug, Clone)]
pub struct Workspace {
    paths: WorkspacePaths,
    pub manifest: WorkspaceManifest,
    /// The compile command relocated into this workspace.
    pub entry: CompileEntry,
}

impl Workspace {
    /// Create a fresh workspace under `build_dir` for `source_file`.
    ///
    /// The source and every auxiliary file are copied in; the compile entry
    /// is relocated and written as the workspace's own database.
    pub fn create(
        build_dir: &Path,
        entry: &CompileEntry,
        source_file: &Path,
        aux_files: &[PathBuf],
        driver: DriverKind,
    ) -> Result<Self> {
        let source_name = source_file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                ReduceError::TestBuildFailed(format!(
                    "source path {} has no file name",
                    source_file.display()
                ))
            })?;

        let id = Uuid::new_v4().simple().to_string();
        let root = WorkspacePaths::workspaces_root(build_dir).join(&id);
        fs::create_dir_all(root.parent().unwrap_or(build_dir))
            .io_context(|| format!("create {}", root.display()))?;
        fs::create_dir(&root).io_context(|| format!("create {}", root.display()))?;
        let paths = WorkspacePaths::new(root);

        fs::copy(source_file, paths.candidate_path(&source_name))
            .io_context(|| format!("copy {}", source_file.display()))?;

        let mut copied = Vec::new();
        for aux in aux_files {
            let name = aux
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| {
                    ReduceError::TestBuildFailed(format!(
                        "auxiliary path {} has no file name",
                        aux.display()
                    ))
                })?;
            fs::copy(aux, paths.root().join(&name))
                .io_context(|| format!("copy {}", aux.display()))?;
            copied.push(name);
        }

        let relocated = entry.relocate(source_file, paths.root(), &source_name);
        compile_db::write_database(&paths.database_path(), std::slice::from_ref(&relocated))?;

        let manifest = WorkspaceManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            id,
            driver,
            source_name,
            original_source: source_file.to_path_buf(),
            build_dir: build_dir.to_path_buf(),
            created_at_epoch_ms: now_epoch_ms(),
            aux_files: copied,
            test_stages: 0,
            cycles: 0,
            final_state: None,
        };
        let workspace = Self {
            paths,
            manifest,
            entry: relocated,
        };
        workspace.write_manifest()?;
        tracing::info!(
            id = %workspace.manifest.id,
            root = %workspace.root().display(),
            aux = workspace.manifest.aux_files.len(),
            "created workspace"
        );
        Ok(workspace)
    }

    /// Open a workspace created by an earlier run and check its layout.
    pub fn reopen(path: &Path) -> Result<Self> {
        let corrupt = |reason: String| ReduceError::WorkspaceCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        if !path.is_dir() {
            return Err(corrupt("not a directory".to_string()));
        }
        let root = path
            .canonicalize()
            .io_context(|| format!("resolve {}", path.display()))?;
        let paths = WorkspacePaths::new(root);

        let manifest_path = paths.manifest_path();
        let bytes = fs::read(&manifest_path)
            .map_err(|err| corrupt(format!("read {MANIFEST_FILE}: {err}")))?;
        let manifest: WorkspaceManifest = serde_json::from_slice(&bytes)
            .map_err(|err| corrupt(format!("parse {MANIFEST_FILE}: {err}")))?;
        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported {MANIFEST_FILE} schema_version {}",
                manifest.schema_version
            )));
        }

        let mut entries = compile_db::load_database(&paths.database_path())
            .map_err(|err| corrupt(err.to_string()))?;
        if entries.len() != 1 {
            return Err(corrupt(format!(
                "expected one compile command, found {}",
                entries.len()
            )));
        }
        let entry = entries.remove(0);

        let mut required = vec![
            manifest.source_name.clone(),
            TEST_SCRIPT.to_string(),
        ];
        required.extend(manifest.aux_files.iter().cloned());
        for name in &required {
            if !paths.root().join(name).is_file() {
                return Err(corrupt(format!("missing {name}")));
            }
        }

        tracing::info!(id = %manifest.id, root = %paths.root().display(), "reopened workspace");
        Ok(Self {
            paths,
            manifest,
            entry,
        })
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn source_name(&self) -> &str {
        &self.manifest.source_name
    }

    pub fn candidate_path(&self) -> PathBuf {
        self.paths.candidate_path(&self.manifest.source_name)
    }

    /// Size of the current candidate in bytes.
    pub fn candidate_size(&self) -> Result<u64> {
        let path = self.candidate_path();
        fs::metadata(&path)
            .map(|meta| meta.len())
            .io_context(|| format!("stat {}", path.display()))
    }

    /// Rewrite a user-supplied command so it runs against the workspace.
    ///
    /// The original source becomes the candidate file name and the build
    /// directory becomes the workspace root. The result is checked with
    /// [`Workspace::check_rewritten`].
    pub fn rewrite_command(&self, command: &str) -> Result<String> {
        let rewritten = replace_path(command, &self.manifest.original_source, self.source_name());
        let rewritten = replace_path(
            &rewritten,
            &self.manifest.build_dir,
            &self.root().display().to_string(),
        );
        let mentioned_source = path_spellings(&self.manifest.original_source)
            .iter()
            .any(|spelling| command.contains(spelling.as_str()))
            || command.contains(self.source_name());
        if mentioned_source && !rewritten.contains(self.source_name()) {
            return Err(ReduceError::TestBuildFailed(format!(
                "rewritten command lost the candidate file {}: {rewritten}",
                self.source_name()
            )));
        }
        self.check_rewritten(&rewritten)?;
        Ok(rewritten)
    }

    /// Fail when `text` still names the original source file.
    ///
    /// The reducer runs the test from a scratch directory, so a leftover
    /// absolute path would test the unmodified original forever.
    pub fn check_rewritten(&self, text: &str) -> Result<()> {
        let original = &self.manifest.original_source;
        for spelling in path_spellings(original) {
            if Path::new(&spelling).is_absolute() && text.contains(&spelling) {
                return Err(ReduceError::TestBuildFailed(format!(
                    "interestingness command still references {spelling}"
                )));
            }
        }
        Ok(())
    }

    /// Write an executable script into the workspace after checking that no
    /// original source path survived the rewrite.
    pub fn write_script(&self, path: &Path, content: &str) -> Result<()> {
        self.check_rewritten(content)?;
        fs::write(path, content).io_context(|| format!("write {}", path.display()))?;
        let mut perms = fs::metadata(path)
            .io_context(|| format!("stat {}", path.display()))?
            .permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms).io_context(|| format!("chmod {}", path.display()))?;
        Ok(())
    }

    /// Copy the candidate to `snapshots/<file>.<cycle>`.
    pub fn snapshot(&self, cycle: usize) -> Result<PathBuf> {
        let dir = self.paths.snapshots_dir();
        fs::create_dir_all(&dir).io_context(|| format!("create {}", dir.display()))?;
        let target = self.paths.snapshot_path(self.source_name(), cycle);
        fs::copy(self.candidate_path(), &target)
            .io_context(|| format!("snapshot {}", target.display()))?;
        Ok(target)
    }

    /// Persist the manifest in a stable JSON format.
    pub fn write_manifest(&self) -> Result<()> {
        let path = self.paths.manifest_path();
        let text = serde_json::to_string_pretty(&self.manifest).map_err(|err| {
            ReduceError::io(
                format!("serialize {}", path.display()),
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })?;
        fs::write(&path, text).io_context(|| format!("write {}", path.display()))
    }
}

fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
