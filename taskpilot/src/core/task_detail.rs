//! Parse per-task detail documents into sections.

use crate::core::markdown::{Line, tokenize};

/// Sections recognized in a task detail document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Description,
    Prerequisites,
    Acceptance,
    TechnicalNotes,
    /// A heading we do not recognize; its body is ignored.
    Unknown,
    /// Content before the first recognized heading (title, preamble).
    Preamble,
}

impl Section {
    fn from_heading(text: &str) -> Section {
        match text.trim().trim_end_matches(':').to_lowercase().as_str() {
            "description" => Section::Description,
            "prerequisites" => Section::Prerequisites,
            "acceptance criteria" => Section::Acceptance,
            "technical notes" => Section::TechnicalNotes,
            _ => Section::Unknown,
        }
    }
}

/// Fields extracted from a task detail document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDetail {
    pub description: String,
    pub prerequisites: Vec<String>,
    pub acceptance: Vec<String>,
    pub technical_notes: String,
    /// Headings that were skipped, for diagnostics.
    pub unknown_sections: Vec<String>,
}

impl TaskDetail {
    /// Description with prerequisites and technical notes folded in.
    pub fn merged_description(&self) -> String {
        let mut parts = Vec::new();
        if !self.description.is_empty() {
            parts.push(self.description.clone());
        }
        if !self.prerequisites.is_empty() {
            let items: Vec<String> = self
                .prerequisites
                .iter()
                .map(|item| format!("- {item}"))
                .collect();
            parts.push(format!("Prerequisites:\n{}", items.join("\n")));
        }
        if !self.technical_notes.is_empty() {
            parts.push(format!("Technical Notes:\n{}", self.technical_notes));
        }
        parts.join("\n\n")
    }
}

/// Accumulate sections line by line. The first level-1 heading is the title
/// and is not part of any section.
pub fn parse_task_detail(doc: &str) -> TaskDetail {
    let mut detail = TaskDetail::default();
    let mut section = Section::Preamble;
    let mut description: Vec<&str> = Vec::new();
    let mut notes: Vec<&str> = Vec::new();

    for line in tokenize(doc) {
        if let Line::Heading { level, text } = line {
            if level == 1 && section == Section::Preamble {
                continue;
            }
            section = Section::from_heading(text);
            if section == Section::Unknown {
                detail.unknown_sections.push(text.to_string());
            }
            continue;
        }
        match section {
            Section::Description => push_text(&mut description, &line),
            Section::TechnicalNotes => push_text(&mut notes, &line),
            Section::Prerequisites => push_item(&mut detail.prerequisites, &line),
            Section::Acceptance => push_item(&mut detail.acceptance, &line),
            Section::Unknown | Section::Preamble => {}
        }
    }

    detail.description = join_block(&description);
    detail.technical_notes = join_block(&notes);
    detail
}

fn push_text<'a>(buf: &mut Vec<&'a str>, line: &Line<'a>) {
    match line {
        Line::Blank => buf.push(""),
        Line::Text(text) => buf.push(*text),
        other => {
            if let Some(text) = other.item_text() {
                buf.push(text);
            }
        }
    }
}

fn push_item(items: &mut Vec<String>, line: &Line<'_>) {
    match line {
        Line::Bullet { text, .. } | Line::Checkbox { text, .. } => items.push(text.to_string()),
        _ => {}
    }
}

fn join_block(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
# Task 01: Build parser

## Description
Write the tokenizer.

It must be line oriented.

## Prerequisites
- Task list format agreed
* Fixtures committed

## Acceptance Criteria
- [ ] Parses numbered lists
- Parses checkbox lists

## Risks
- nothing here counts

## Technical Notes
Prefer a state machine.
";

    #[test]
    fn parses_recognized_sections() {
        let detail = parse_task_detail(DOC);
        assert_eq!(
            detail.description,
            "Write the tokenizer.\n\nIt must be line oriented."
        );
        assert_eq!(
            detail.prerequisites,
            vec!["Task list format agreed", "Fixtures committed"]
        );
        assert_eq!(
            detail.acceptance,
            vec!["Parses numbered lists", "Parses checkbox lists"]
        );
        assert_eq!(detail.technical_notes, "Prefer a state machine.");
        assert_eq!(detail.unknown_sections, vec!["Risks"]);
    }

    #[test]
    fn merged_description_appends_notes() {
        let detail = parse_task_detail(DOC);
        let merged = detail.merged_description();
        assert!(merged.starts_with("Write the tokenizer."));
        assert!(merged.contains("Prerequisites:\n- Task list format agreed"));
        assert!(merged.ends_with("Technical Notes:\nPrefer a state machine."));
    }

    #[test]
    fn empty_document_yields_empty_detail() {
        assert_eq!(parse_task_detail(""), TaskDetail::default());
    }
}
