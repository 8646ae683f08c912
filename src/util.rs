use std::path::{Component, Path, PathBuf};

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Make `path` absolute against `base` and fold `.`/`..` without touching
/// the filesystem.
pub fn normalize_lexically(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical form used for path equality: the real path when it exists,
/// the lexical normalization otherwise.
pub fn canonical_or_lexical(path: &Path, base: &Path) -> PathBuf {
    let lexical = normalize_lexically(path, base);
    lexical.canonicalize().unwrap_or(lexical)
}

/// Every textual spelling a path may take in a command line: as given,
/// absolute, and canonical. Longest first so replacement never leaves a
/// partial prefix behind.
pub fn path_spellings(path: &Path) -> Vec<String> {
    let mut spellings = vec![path.display().to_string()];
    if let Ok(cwd) = std::env::current_dir() {
        spellings.push(normalize_lexically(path, &cwd).display().to_string());
    }
    if let Ok(real) = path.canonicalize() {
        spellings.push(real.display().to_string());
    }
    spellings.retain(|spelling| !spelling.is_empty());
    spellings.sort_by_key(|spelling| std::cmp::Reverse(spelling.len()));
    spellings.dedup();
    spellings
}

/// Replace every spelling of `path` inside `text` with `replacement`.
///
/// Spellings are first swapped for a marker so a replacement that itself
/// contains a shorter spelling is never rewritten twice.
pub fn replace_path(text: &str, path: &Path, replacement: &str) -> String {
    const MARKER: &str = "\u{0}";
    let mut out = text.to_string();
    for spelling in path_spellings(path) {
        out = out.replace(&spelling, MARKER);
    }
    out.replace(MARKER, replacement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_normalization_folds_dots() {
        let base = Path::new("/build/debug");
        assert_eq!(
            normalize_lexically(Path::new("../src/./main.cpp"), base),
            PathBuf::from("/build/src/main.cpp")
        );
        assert_eq!(
            normalize_lexically(Path::new("/abs/x.cpp"), base),
            PathBuf::from("/abs/x.cpp")
        );
    }

    #[test]
    fn replace_path_handles_absolute_spelling() {
        let text = "clang-tidy /proj/src/a.cpp -- -I/proj/src";
        let out = replace_path(text, Path::new("/proj/src/a.cpp"), "a.cpp");
        assert_eq!(out, "clang-tidy a.cpp -- -I/proj/src");
    }

    #[test]
    fn truncate_string_respects_char_boundaries() {
        assert_eq!(truncate_string("héllo", 2), "h");
        assert_eq!(truncate_string("abc", 10), "abc");
    }
}
