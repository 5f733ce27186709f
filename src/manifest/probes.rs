/// Path/file predicate helpers used by framework and language detection.
///
/// The actual filesystem security path-validation helper (symlink escapes,
/// traversal outside the project root, etc.) is an external collaborator;
/// these probes assume `dir` has already been validated by the caller and
/// only answer the yes/no questions detection needs.

use std::path::Path;

pub fn file_exists(dir: &Path, name: &str) -> bool {
    dir.join(name).is_file()
}

pub fn dir_exists(dir: &Path, name: &str) -> bool {
    dir.join(name).is_dir()
}

/// Any file with the given extension exists directly under `dir`.
pub fn any_file_with_ext(dir: &Path, ext: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).any(|e| {
        e.path()
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case(ext))
            .unwrap_or(false)
    })
}

/// Any file with the given extension exists anywhere below `dir` (bounded
/// recursion — framework markers like `*.csproj` are expected near the root).
pub fn any_file_with_ext_recursive(dir: &Path, ext: &str, max_depth: usize) -> bool {
    fn walk(dir: &Path, ext: &str, depth: usize) -> bool {
        if depth == 0 {
            return false;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                if walk(&path, ext, depth - 1) {
                    return true;
                }
            } else if path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case(ext))
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }
    walk(dir, ext, max_depth)
}

pub fn file_contains(dir: &Path, name: &str, substr: &str) -> bool {
    std::fs::read_to_string(dir.join(name))
        .map(|s| s.contains(substr))
        .unwrap_or(false)
}

/// `file_contains`, but across every file matching `ext` directly under `dir`.
pub fn any_file_with_ext_contains(dir: &Path, ext: &str, substr: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).any(|e| {
        let path = e.path();
        let matches_ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case(ext))
            .unwrap_or(false);
        matches_ext
            && std::fs::read_to_string(&path)
                .map(|s| s.contains(substr))
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn file_exists_detects_present_and_absent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert!(file_exists(dir.path(), "package.json"));
        assert!(!file_exists(dir.path(), "go.mod"));
    }

    #[test]
    fn any_file_with_ext_finds_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("App.csproj"), "<Project />").unwrap();
        assert!(any_file_with_ext(dir.path(), "csproj"));
        assert!(!any_file_with_ext(dir.path(), "sln"));
    }

    #[test]
    fn file_contains_checks_substring() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("App.csproj"), "Microsoft.NET.Sdk.Web").unwrap();
        assert!(file_contains(dir.path(), "App.csproj", "Sdk.Web"));
        assert!(!file_contains(dir.path(), "App.csproj", "Sdk.Worker"));
    }
}
