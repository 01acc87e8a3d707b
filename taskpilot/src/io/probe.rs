//! Filesystem-backed [`ReadinessProbe`].

use std::path::Path;

use crate::core::readiness::ReadinessProbe;
use crate::io::spec_resolver::SpecResolver;

/// Answers readiness questions relative to a project root.
pub struct FsProbe<'a, R: SpecResolver + ?Sized> {
    root: &'a Path,
    resolver: &'a R,
}

impl<'a, R: SpecResolver + ?Sized> FsProbe<'a, R> {
    pub fn new(root: &'a Path, resolver: &'a R) -> Self {
        Self { root, resolver }
    }
}

impl<R: SpecResolver + ?Sized> ReadinessProbe for FsProbe<'_, R> {
    fn input_exists(&self, path: &str) -> bool {
        self.root.join(path).exists()
    }

    fn spec_resolves(&self, reference: &str) -> Result<bool, String> {
        self.resolver
            .resolve(reference)
            .map(|found| found.is_some())
            .map_err(|err| format!("{err:#}"))
    }

    fn scope_is_dir(&self, path: &str) -> bool {
        self.root.join(path).is_dir()
    }
}
