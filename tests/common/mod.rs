//! Shared test infrastructure for integration tests.
//!
//! A `Project` is a throwaway source tree with a build directory and a
//! compile-command database. Compilers and reducers are small POSIX shell
//! scripts so the tests need no real toolchain.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Accepts every file; `-E` copies the input without `#` lines.
pub const ACCEPTING_CC: &str = r#"#!/bin/sh
out=''
src=''
pre=0
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -E) pre=1; shift ;;
    -*) shift ;;
    *) src="$1"; shift ;;
  esac
done
if [ "$pre" -eq 1 ]; then
  grep -v '^#' "$src" > "$out"
  exit 0
fi
exit 0
"#;

/// Like `ACCEPTING_CC`, but dies with an internal error on any file that
/// still contains `CRASH`.
pub const CRASHING_CC: &str = r#"#!/bin/sh
out=''
src=''
pre=0
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -E) pre=1; shift ;;
    -*) shift ;;
    *) src="$1"; shift ;;
  esac
done
if [ "$pre" -eq 1 ]; then
  grep -v '^#' "$src" > "$out"
  exit 0
fi
if grep -q CRASH "$src"; then
  echo "internal compiler error: Segmentation fault" >&2
  exit 1
fi
exit 0
"#;

/// Deletes one line at a time, keeping each deletion the test accepts.
/// The script and the candidate are the last two arguments.
pub const LINE_REDUCER: &str = r#"#!/bin/sh
script=''
file=''
for arg; do script="$file"; file="$arg"; done
echo "$@" >> reducer-args
i=1
while [ "$i" -le "$(wc -l < "$file")" ]; do
  cp "$file" "$file.keep"
  sed "${i}d" "$file.keep" > "$file"
  if sh "$script" > /dev/null 2>&1; then :; else cp "$file.keep" "$file"; i=$((i + 1)); fi
done
rm -f "$file.keep"
exit 0
"#;

pub const FAILING_REDUCER: &str = "#!/bin/sh\necho 'reducer exploded' >&2\nexit 7\n";

/// A source tree under a temporary directory.
pub struct Project {
    _dir: TempDir,
    root: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().canonicalize().expect("canonical temp dir");
        fs::create_dir_all(root.join("src")).expect("src dir");
        fs::create_dir_all(root.join("build")).expect("build dir");
        fs::create_dir_all(root.join("tools")).expect("tools dir");
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Write `src/<name>` and return its absolute path.
    pub fn source(&self, name: &str, text: &str) -> PathBuf {
        let path = self.root.join("src").join(name);
        fs::write(&path, text).expect("write source");
        path
    }

    /// Install an executable script under `tools/`.
    pub fn tool(&self, name: &str, script: &str) -> PathBuf {
        let path = self.root.join("tools").join(name);
        fs::write(&path, script).expect("write tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod tool");
        path
    }

    /// Write a one-entry database compiling `source` with `compiler`.
    pub fn compile_db(&self, compiler: &Path, source: &Path) {
        let entries = serde_json::json!([{
            "directory": self.build_dir(),
            "file": source,
            "arguments": [
                compiler,
                "-std=c++17",
                "-c",
                source,
                "-o",
                "CMakeFiles/app.dir/bug.cpp.o"
            ]
        }]);
        let text = serde_json::to_string_pretty(&entries).expect("serialize database");
        fs::write(self.build_dir().join("compile_commands.json"), text).expect("write database");
    }

    /// The single workspace created under the build directory.
    pub fn only_workspace(&self) -> PathBuf {
        let runs = self.build_dir().join("reducer");
        let mut dirs: Vec<PathBuf> = fs::read_dir(&runs)
            .expect("read reducer dir")
            .map(|entry| entry.expect("dir entry").path())
            .filter(|path| path.is_dir())
            .collect();
        assert_eq!(dirs.len(), 1, "expected one workspace in {}", runs.display());
        dirs.remove(0)
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}
