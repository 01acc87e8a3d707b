//! Resolve spec references (`docs/auth.md#login`, `auth`) to document contents.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Looks up the document a spec reference names.
pub trait SpecResolver {
    /// Contents of the referenced document, or `None` when nothing matches.
    fn resolve(&self, reference: &str) -> Result<Option<String>>;
}

/// Resolves references against the project root, then each search path.
#[derive(Debug, Clone)]
pub struct FsSpecResolver {
    root: PathBuf,
    search_paths: Vec<PathBuf>,
}

impl FsSpecResolver {
    pub fn new(root: impl Into<PathBuf>, search_paths: &[String]) -> Self {
        let root = root.into();
        let search_paths = search_paths.iter().map(|dir| root.join(dir)).collect();
        Self { root, search_paths }
    }

    /// Candidate files in lookup order.
    fn candidates(&self, reference: &str) -> Vec<PathBuf> {
        let bare = reference
            .split_once('#')
            .map_or(reference, |(path, _)| path)
            .trim();
        if bare.is_empty() {
            return Vec::new();
        }
        let mut candidates = Vec::new();
        for base in std::iter::once(&self.root).chain(&self.search_paths) {
            candidates.push(base.join(bare));
            if !bare.ends_with(".md") {
                candidates.push(base.join(format!("{bare}.md")));
            }
        }
        candidates
    }
}

impl SpecResolver for FsSpecResolver {
    fn resolve(&self, reference: &str) -> Result<Option<String>> {
        for candidate in self.candidates(reference) {
            if let Some(contents) = read_file(&candidate)? {
                debug!(%reference, path = %candidate.display(), "spec resolved");
                return Ok(Some(contents));
            }
        }
        debug!(%reference, "spec not found");
        Ok(None)
    }
}

fn read_file(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read spec {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> (tempfile::TempDir, FsSpecResolver) {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("docs")).expect("mkdir");
        fs::create_dir_all(temp.path().join("specs")).expect("mkdir");
        fs::write(temp.path().join("docs/auth.md"), "# Auth\n").expect("write");
        fs::write(temp.path().join("README.md"), "# Readme\n").expect("write");
        let resolver = FsSpecResolver::new(
            temp.path(),
            &["docs".to_string(), "specs".to_string()],
        );
        (temp, resolver)
    }

    #[test]
    fn resolves_root_relative_and_search_paths() {
        let (_temp, resolver) = resolver();
        assert_eq!(
            resolver.resolve("README.md").expect("resolve").as_deref(),
            Some("# Readme\n")
        );
        assert_eq!(
            resolver.resolve("auth").expect("resolve").as_deref(),
            Some("# Auth\n")
        );
    }

    #[test]
    fn fragment_is_ignored() {
        let (_temp, resolver) = resolver();
        assert!(resolver.resolve("docs/auth.md#login").expect("resolve").is_some());
    }

    #[test]
    fn unknown_reference_is_none() {
        let (_temp, resolver) = resolver();
        assert!(resolver.resolve("billing").expect("resolve").is_none());
        assert!(resolver.resolve("#only-fragment").expect("resolve").is_none());
        assert!(resolver.resolve("docs").expect("resolve").is_none());
    }
}
