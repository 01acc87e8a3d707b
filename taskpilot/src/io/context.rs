//! Context records for `.taskpilot/context/` (regenerated per claim).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use minijinja::context;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::atomic::write_atomic;
use super::templates::Templates;
use crate::core::slug::slugify;

/// A rendered context document for one scope path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRecord {
    pub scope: String,
    pub path: PathBuf,
    /// Files under the scope, relative to it, in walk order.
    pub files: Vec<String>,
}

/// Prepares context for a scope path before execution starts.
pub trait ContextGenerator {
    fn generate(&self, scope: &str) -> Result<ContextRecord>;
}

/// Walks a scope directory and writes a markdown file listing.
pub struct MarkdownContextGenerator {
    root: PathBuf,
    context_dir: PathBuf,
    templates: Templates,
    /// Directory depth walked below the scope.
    pub max_depth: usize,
    /// Listing stops after this many files.
    pub max_entries: usize,
}

impl MarkdownContextGenerator {
    pub fn new(root: impl Into<PathBuf>, context_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            context_dir: context_dir.into(),
            templates: Templates::new()?,
            max_depth: 4,
            max_entries: 500,
        })
    }

    fn record_path(&self, scope: &str) -> PathBuf {
        let slug = slugify(scope);
        let name = if slug.is_empty() { "root" } else { slug.as_str() };
        self.context_dir.join(format!("{name}.md"))
    }
}

impl ContextGenerator for MarkdownContextGenerator {
    fn generate(&self, scope: &str) -> Result<ContextRecord> {
        let dir = self.root.join(scope);
        if !dir.is_dir() {
            return Err(anyhow!("scope {scope} is not a directory"));
        }

        let (files, truncated) = list_files(&dir, self.max_depth, self.max_entries)
            .with_context(|| format!("walk scope {}", dir.display()))?;
        let rendered = self.templates.render(
            "context",
            context! {
                scope => scope,
                generated_at => Utc::now().to_rfc3339(),
                files => &files,
                truncated => truncated,
            },
        )?;

        let path = self.record_path(scope);
        write_atomic(&path, &rendered)
            .with_context(|| format!("write context {}", path.display()))?;
        debug!(%scope, files = files.len(), truncated, path = %path.display(), "context written");
        Ok(ContextRecord {
            scope: scope.to_string(),
            path,
            files,
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn list_files(dir: &Path, max_depth: usize, max_entries: usize) -> Result<(Vec<String>, bool)> {
    let walker = WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if files.len() == max_entries {
            return Ok((files, true));
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        files.push(relative.to_string_lossy().replace('\\', "/"));
    }
    Ok((files, false))
}
