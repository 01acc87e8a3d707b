//! Parse a change's `tasks.md` into ordered task entries.
//!
//! Only top-level numbered (`1. text`) and checkbox (`- [ ] text`) items are
//! entries; indented items are treated as notes on the entry above. An entry
//! may link to a per-task detail document with `(ver [label](path))` or
//! `(see [label](path))`.

use anyhow::Result;

use crate::core::markdown::{Line, tokenize};
use crate::error::FlowError;

/// One task extracted from a task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub title: String,
    /// Link target relative to the task list, if present.
    pub file: Option<String>,
}

/// Extract entries, returning an empty list for template-only documents.
pub fn scan_entries(doc: &str) -> Vec<TaskEntry> {
    tokenize(doc)
        .into_iter()
        .filter_map(|line| match line {
            Line::Numbered { indent: 0, text } | Line::Checkbox { indent: 0, text, .. } => {
                Some(entry_from_text(text))
            }
            _ => None,
        })
        .filter(|entry| !entry.title.is_empty())
        .collect()
}

/// Extract entries, failing when the document has none.
pub fn parse_task_list(doc: &str) -> Result<Vec<TaskEntry>> {
    let entries = scan_entries(doc);
    if entries.is_empty() {
        return Err(FlowError::Validation("no tasks found".to_string()).into());
    }
    Ok(entries)
}

fn entry_from_text(text: &str) -> TaskEntry {
    match split_reference(text) {
        Some((title, file)) => TaskEntry {
            title: clean_title(title),
            file: Some(file.to_string()),
        },
        None => TaskEntry {
            title: clean_title(text),
            file: None,
        },
    }
}

/// Split `title (ver [label](path))` into `(title, path)`.
fn split_reference(text: &str) -> Option<(&str, &str)> {
    for keyword in ["(ver [", "(see ["] {
        let Some(start) = text.rfind(keyword) else {
            continue;
        };
        let rest = &text[start + keyword.len()..];
        let (_label, rest) = rest.split_once("](")?;
        let (path, rest) = rest.split_once(')')?;
        if !rest.trim_start().starts_with(')') || path.trim().is_empty() {
            return None;
        }
        return Some((&text[..start], path.trim()));
    }
    None
}

fn clean_title(raw: &str) -> String {
    let title = raw.trim();
    let title = title
        .strip_prefix("**")
        .and_then(|t| t.strip_suffix("**"))
        .unwrap_or(title);
    title.trim().trim_end_matches(':').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_list_yields_titles_without_files() {
        let entries = parse_task_list("1. First task\n2. Second task\n").expect("parse");
        assert_eq!(
            entries,
            vec![
                TaskEntry {
                    title: "First task".to_string(),
                    file: None
                },
                TaskEntry {
                    title: "Second task".to_string(),
                    file: None
                },
            ]
        );
    }

    #[test]
    fn checkbox_items_of_any_mark_are_entries() {
        let doc = "# Tasks\n\n- [ ] Open\n- [x] Closed\n- [~] Partial\n  - [ ] nested note\n";
        let titles: Vec<_> = scan_entries(doc).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["Open", "Closed", "Partial"]);
    }

    #[test]
    fn inline_reference_extracts_file() {
        let doc = "1. Build parser (ver [detalle](tasks/01-build-parser.md))\n\
                   - [ ] **Wire CLI** (see [details](tasks/02-wire-cli.md))\n";
        let entries = parse_task_list(doc).expect("parse");
        assert_eq!(entries[0].title, "Build parser");
        assert_eq!(entries[0].file.as_deref(), Some("tasks/01-build-parser.md"));
        assert_eq!(entries[1].title, "Wire CLI");
        assert_eq!(entries[1].file.as_deref(), Some("tasks/02-wire-cli.md"));
    }

    #[test]
    fn malformed_reference_is_kept_in_title() {
        let entries = parse_task_list("1. Odd (ver [x](missing-close)\n").expect("parse");
        assert_eq!(entries[0].title, "Odd (ver [x](missing-close)");
        assert!(entries[0].file.is_none());
    }

    #[test]
    fn document_without_list_lines_errors() {
        let err = parse_task_list("# Tasks\n\nNothing here yet.\n").unwrap_err();
        assert!(err.to_string().contains("no tasks found"));
        assert!(scan_entries("").is_empty());
    }
}
