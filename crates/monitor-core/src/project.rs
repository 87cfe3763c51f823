//! Project-name derivation shared by the process scanner and the usage-file
//! scanner, plus the normalized key used to correlate the two with log
//! sessions.

use std::collections::HashMap;
use std::path::{Component, Path};

/// Directory whose presence marks a repository root.
pub const VCS_MARKER: &str = ".git";

/// Directory names whose first child is taken to be a project root.
pub const CONTAINER_DIRS: &[&str] = &["projects"];

/// Name used when nothing better can be derived.
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Derives and memoizes project names from working directories.
///
/// Resolution order:
/// 1. nearest ancestor (or the directory itself) containing [`VCS_MARKER`];
/// 2. the path segment right after a [`CONTAINER_DIRS`] entry;
/// 3. the leaf directory name;
/// 4. [`UNKNOWN_PROJECT`] for empty or root paths.
#[derive(Debug, Default)]
pub struct ProjectNameResolver {
    cache: HashMap<String, String>,
}

impl ProjectNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `cwd`, probing the filesystem only on first sight.
    pub fn resolve(&mut self, cwd: &str) -> String {
        if let Some(name) = self.cache.get(cwd) {
            return name.clone();
        }
        let name = derive_project_name(cwd);
        self.cache.insert(cwd.to_string(), name.clone());
        name
    }

    /// Number of memoized directories.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// Uncached form of [`ProjectNameResolver::resolve`].
pub fn derive_project_name(cwd: &str) -> String {
    let cwd = cwd.trim();
    if cwd.is_empty() || cwd == "/" {
        return UNKNOWN_PROJECT.to_string();
    }
    let path = Path::new(cwd);

    if let Some(root) = path
        .ancestors()
        .filter(|a| a.file_name().is_some())
        .find(|a| a.join(VCS_MARKER).exists())
    {
        if let Some(name) = root.file_name() {
            return name.to_string_lossy().into_owned();
        }
    }

    project_name_from_path(path)
}

/// Path-only heuristics (steps 2–4), no filesystem access.
pub fn project_name_from_path(path: &Path) -> String {
    let segments: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if let Some(idx) = segments
        .iter()
        .position(|s| CONTAINER_DIRS.contains(&s.as_str()))
    {
        if let Some(next) = segments.get(idx + 1) {
            return next.clone();
        }
    }

    segments
        .last()
        .cloned()
        .unwrap_or_else(|| UNKNOWN_PROJECT.to_string())
}

/// Guess a project name from an encoded usage directory name such as
/// `-Users-me-projects-demo`, where every `/` of the original path became
/// `-`. The encoding is lossy, so names containing dashes may be cut short.
pub fn project_name_from_encoded_dir(encoded: &str) -> String {
    let trimmed = encoded.trim_matches('-');
    if trimmed.is_empty() {
        return UNKNOWN_PROJECT.to_string();
    }
    for container in CONTAINER_DIRS {
        let needle = format!("-{container}-");
        if let Some(idx) = trimmed.rfind(&needle) {
            let rest = &trimmed[idx + needle.len()..];
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    trimmed
        .rsplit('-')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_PROJECT)
        .to_string()
}

/// Key used to match process projects with log sessions:
/// lowercase with `-` and `_` removed.
pub fn normalize_project_key(name: &str) -> String {
    name.to_lowercase().replace(['-', '_'], "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_and_root_are_unknown() {
        assert_eq!(derive_project_name(""), UNKNOWN_PROJECT);
        assert_eq!(derive_project_name("/"), UNKNOWN_PROJECT);
    }

    #[test]
    fn test_vcs_ancestor_wins() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("nexus-2");
        let sub = repo.join("apps").join("cli");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::create_dir_all(repo.join(".git")).unwrap();

        assert_eq!(derive_project_name(sub.to_str().unwrap()), "nexus-2");
    }

    #[test]
    fn test_container_segment_without_vcs() {
        assert_eq!(
            project_name_from_path(Path::new("/nonexistent-xyz/projects/alpha/src/bin")),
            "alpha"
        );
    }

    #[test]
    fn test_leaf_fallback() {
        assert_eq!(
            derive_project_name("/nonexistent-xyz/work/beta"),
            "beta"
        );
    }

    #[test]
    fn test_resolver_memoizes() {
        let mut r = ProjectNameResolver::new();
        assert_eq!(r.resolve("/nonexistent-xyz/projects/gamma"), "gamma");
        assert_eq!(r.resolve("/nonexistent-xyz/projects/gamma"), "gamma");
        assert_eq!(r.cached_len(), 1);
    }

    #[test]
    fn test_encoded_dir_names() {
        assert_eq!(project_name_from_encoded_dir("-Users-me-projects-demo"), "demo");
        assert_eq!(project_name_from_encoded_dir("-Users-me-projects-demo-app"), "demo-app");
        assert_eq!(project_name_from_encoded_dir("-home-me-scratch"), "scratch");
        assert_eq!(project_name_from_encoded_dir("---"), UNKNOWN_PROJECT);
    }

    #[test]
    fn test_normalize_project_key() {
        assert_eq!(normalize_project_key("My-Cool_App"), "mycoolapp");
        assert_eq!(
            normalize_project_key("my_cool-app"),
            normalize_project_key("MyCoolApp")
        );
    }
}
