//! Compile-command database lookup and workspace relocation.
//!
//! Resolution is read-only: the entry comes back exactly as the build system
//! wrote it. [`CompileEntry::relocate`] derives the copy that reproduces the
//! same step from inside a workspace.
use crate::error::{IoContext, ReduceError, Result};
use crate::util::{canonical_or_lexical, normalize_lexically, replace_path};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_FILE: &str = "compile_commands.json";
/// Object file name every relocated entry compiles to.
pub const RELOCATED_OUTPUT: &str = "output.cpp.o";
/// Placeholder substituted with the candidate file in argument templates.
pub const FILE_PLACEHOLDER: &str = "$FILE";

const DROPPED_FLAGS: [&str; 4] = ["-fcolor-diagnostics", "-Wdocumentation", "-MD", "-MMD"];
const DROPPED_FLAGS_WITH_VALUE: [&str; 3] = ["-MF", "-MT", "-MQ"];
const PATH_FLAGS: [&str; 6] = [
    "-I",
    "-isystem",
    "-iquote",
    "-idirafter",
    "-include",
    "-imacros",
];

#[derive(Debug, Deserialize)]
struct RawEntry {
    directory: PathBuf,
    file: PathBuf,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    output: Option<PathBuf>,
}

/// One compile step from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileEntry {
    pub directory: PathBuf,
    pub file: PathBuf,
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

pub fn database_path(build_dir: &Path) -> PathBuf {
    build_dir.join(DATABASE_FILE)
}

/// Parse every entry of a compile-command database, accepting both the
/// `arguments` and the `command` record shapes.
pub fn load_database(path: &Path) -> Result<Vec<CompileEntry>> {
    let text = fs::read_to_string(path).map_err(|err| ReduceError::ConfigDatabase {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let raw: Vec<RawEntry> =
        serde_json::from_str(&text).map_err(|err| ReduceError::ConfigDatabase {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    raw.into_iter()
        .map(|entry| entry_from_raw(path, entry))
        .collect()
}

fn entry_from_raw(path: &Path, raw: RawEntry) -> Result<CompileEntry> {
    let arguments = match (raw.arguments, raw.command) {
        (Some(arguments), _) => arguments,
        (None, Some(command)) => {
            shell_words::split(&command).map_err(|err| ReduceError::ConfigDatabase {
                path: path.to_path_buf(),
                reason: format!("cannot split command for {}: {err}", raw.file.display()),
            })?
        }
        (None, None) => {
            return Err(ReduceError::ConfigDatabase {
                path: path.to_path_buf(),
                reason: format!("entry for {} has no command", raw.file.display()),
            })
        }
    };
    if arguments.is_empty() {
        return Err(ReduceError::ConfigDatabase {
            path: path.to_path_buf(),
            reason: format!("entry for {} has an empty command", raw.file.display()),
        });
    }
    let output = raw.output.or_else(|| output_from_arguments(&arguments));
    Ok(CompileEntry {
        directory: raw.directory,
        file: raw.file,
        arguments,
        output,
    })
}

fn output_from_arguments(arguments: &[String]) -> Option<PathBuf> {
    let mut iter = arguments.iter();
    while let Some(arg) = iter.next() {
        if arg == "-o" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(value) = arg.strip_prefix("-o").filter(|value| !value.is_empty()) {
            return Some(PathBuf::from(value));
        }
    }
    None
}

/// Find the entry compiling `source_file` in `build_dir`'s database.
///
/// Paths are compared in canonical absolute form. Duplicate records with
/// identical arguments collapse to one; records that disagree are an error.
pub fn resolve(build_dir: &Path, source_file: &Path) -> Result<CompileEntry> {
    let database = database_path(build_dir);
    let entries = load_database(&database)?;
    let cwd = std::env::current_dir().io_context(|| "read current directory")?;
    let wanted = canonical_or_lexical(source_file, &cwd);

    let mut matches: Vec<CompileEntry> = Vec::new();
    for entry in entries {
        if entry.source_path() != wanted {
            continue;
        }
        if !matches
            .iter()
            .any(|existing| existing.arguments == entry.arguments)
        {
            matches.push(entry);
        }
    }

    match matches.len() {
        0 => Err(ReduceError::ConfigNotFound {
            source_file: source_file.to_path_buf(),
            database,
        }),
        1 => {
            let entry = matches.remove(0);
            tracing::info!(
                file = %entry.file.display(),
                directory = %entry.directory.display(),
                args = entry.arguments.len(),
                "resolved compile command"
            );
            Ok(entry)
        }
        count => Err(ReduceError::ConfigAmbiguous {
            source_file: source_file.to_path_buf(),
            count,
        }),
    }
}

/// Write entries in the standard database shape.
pub fn write_database(path: &Path, entries: &[CompileEntry]) -> Result<()> {
    let text = serde_json::to_string_pretty(entries).map_err(|err| ReduceError::ConfigDatabase {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    fs::write(path, text).io_context(|| format!("write {}", path.display()))
}

impl CompileEntry {
    /// Canonical absolute path of the compiled source.
    pub fn source_path(&self) -> PathBuf {
        let directory = if self.directory.is_absolute() {
            self.directory.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| normalize_lexically(&self.directory, &cwd))
                .unwrap_or_else(|_| self.directory.clone())
        };
        canonical_or_lexical(&self.file, &directory)
    }

    /// The compiler executable (first argument).
    pub fn compiler(&self) -> &str {
        self.arguments.first().map(String::as_str).unwrap_or("")
    }

    /// Value of the last `-std=` flag, if any.
    pub fn language_standard(&self) -> Option<&str> {
        self.arguments
            .iter()
            .rev()
            .find_map(|arg| arg.strip_prefix("-std="))
    }

    /// Rewrite the entry to compile `file_name` from `workspace_root`.
    ///
    /// `original_source` is the path the user asked for; every spelling of it
    /// (and the spelling the database used) becomes the bare file name.
    pub fn relocate(&self, original_source: &Path, workspace_root: &Path, file_name: &str) -> Self {
        let original_dir = if self.directory.is_absolute() {
            self.directory.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| normalize_lexically(&self.directory, &cwd))
                .unwrap_or_else(|_| self.directory.clone())
        };
        let source_abs = self.source_path();
        let source_dir = source_abs
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| original_dir.clone());
        let database_spelling = self.file.display().to_string();

        let mut arguments = Vec::with_capacity(self.arguments.len() + 3);
        let mut iter = self.arguments.iter().enumerate();
        while let Some((index, arg)) = iter.next() {
            if index == 0 {
                arguments.push(arg.clone());
                continue;
            }
            if arg == "-o" {
                iter.next();
                arguments.push("-o".to_string());
                arguments.push(RELOCATED_OUTPUT.to_string());
                continue;
            }
            if arg.starts_with("-o") && arg.len() > 2 {
                arguments.push(format!("-o{RELOCATED_OUTPUT}"));
                continue;
            }
            if arg == "-Werror" || arg.starts_with("-Werror=") {
                continue;
            }
            if DROPPED_FLAGS.contains(&arg.as_str()) {
                continue;
            }
            if DROPPED_FLAGS_WITH_VALUE.contains(&arg.as_str()) {
                iter.next();
                continue;
            }
            if arg == "-fopenmp=libomp" {
                arguments.push("-fopenmp".to_string());
                continue;
            }
            if *arg == database_spelling
                || (!arg.starts_with('-')
                    && canonical_or_lexical(Path::new(arg), &original_dir) == source_abs)
            {
                arguments.push(file_name.to_string());
                continue;
            }
            if PATH_FLAGS.contains(&arg.as_str()) {
                arguments.push(arg.clone());
                if let Some((_, value)) = iter.next() {
                    arguments.push(absolutize(value, &original_dir));
                }
                continue;
            }
            if let Some(joined) = absolutize_joined(arg, &original_dir) {
                arguments.push(joined);
                continue;
            }
            let rewritten = replace_path(arg, original_source, file_name);
            arguments.push(replace_path(&rewritten, &source_abs, file_name));
        }

        let include = format!("-I{}", source_dir.display());
        for extra in [include.as_str(), "-Wfatal-errors", "-fno-color-diagnostics"] {
            if !arguments.iter().any(|arg| arg == extra) {
                arguments.push(extra.to_string());
            }
        }

        CompileEntry {
            directory: workspace_root.to_path_buf(),
            file: PathBuf::from(file_name),
            arguments,
            output: Some(PathBuf::from(RELOCATED_OUTPUT)),
        }
    }

    /// Arguments with the compiled file replaced by [`FILE_PLACEHOLDER`].
    pub fn argument_template(&self) -> Vec<String> {
        let file = self.file.display().to_string();
        self.arguments
            .iter()
            .map(|arg| {
                if *arg == file {
                    FILE_PLACEHOLDER.to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }

    /// Arguments that write the preprocessed source to `output`.
    pub fn preprocess_arguments(&self, output: &str) -> Vec<String> {
        let mut arguments = Vec::with_capacity(self.arguments.len() + 3);
        let mut iter = self.arguments.iter();
        while let Some(arg) = iter.next() {
            if arg == "-o" {
                iter.next();
                continue;
            }
            if arg == "-c" || (arg.starts_with("-o") && arg.len() > 2) {
                continue;
            }
            arguments.push(arg.clone());
        }
        arguments.extend(["-E", "-P", "-o", output].map(str::to_string));
        arguments
    }

    /// Flags to pass to an analyzer after `--`: no compiler, no output and
    /// no input file.
    pub fn analyzer_flags(&self) -> Vec<String> {
        let file = self.file.display().to_string();
        let mut flags = Vec::with_capacity(self.arguments.len());
        let mut iter = self.arguments.iter().skip(1);
        while let Some(arg) = iter.next() {
            if arg == "-o" {
                iter.next();
                continue;
            }
            if arg == "-c" || *arg == file || (arg.starts_with("-o") && arg.len() > 2) {
                continue;
            }
            flags.push(arg.clone());
        }
        flags
    }
}

fn absolutize(value: &str, base: &Path) -> String {
    let path = Path::new(value);
    if path.is_absolute() {
        return value.to_string();
    }
    normalize_lexically(path, base).display().to_string()
}

fn absolutize_joined(arg: &str, base: &Path) -> Option<String> {
    for flag in PATH_FLAGS {
        if let Some(value) = arg.strip_prefix(flag).filter(|value| !value.is_empty()) {
            // `-include-pch` and friends share a prefix with the path flags.
            if flag == "-I" || !value.starts_with('-') {
                return Some(format!("{flag}{}", absolutize(value, base)));
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "compile_db_tests.rs"]
mod tests;
