//! Line-oriented tokenizer for the loosely formatted markdown humans write.
//!
//! Grammar (one token per line, HTML comment blocks skipped):
//!
//! ```text
//! heading   := "#"{1,6} " " text
//! numbered  := digits ("." | ")") " " text
//! checkbox  := ("-" | "*") " [" (" " | "x" | "X" | "~") "] " text
//! bullet    := ("-" | "*") " " text
//! blank     := whitespace*
//! text      := anything else
//! ```

/// Checkbox marker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Open,
    Checked,
    Partial,
}

/// Classified line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    Heading { level: usize, text: &'a str },
    Numbered { indent: usize, text: &'a str },
    Checkbox { indent: usize, mark: Mark, text: &'a str },
    Bullet { indent: usize, text: &'a str },
    Blank,
    Text(&'a str),
}

impl<'a> Line<'a> {
    /// Item text for any list-shaped line.
    pub fn item_text(&self) -> Option<&'a str> {
        match self {
            Line::Numbered { text, .. } | Line::Checkbox { text, .. } | Line::Bullet { text, .. } => {
                Some(*text)
            }
            _ => None,
        }
    }
}

/// Tokenize `doc`, dropping lines inside `<!-- ... -->` blocks.
pub fn tokenize(doc: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut in_comment = false;
    for raw in doc.lines() {
        let trimmed = raw.trim();
        if in_comment {
            if trimmed.contains("-->") {
                in_comment = false;
            }
            continue;
        }
        if trimmed.starts_with("<!--") {
            in_comment = !trimmed.contains("-->");
            continue;
        }
        lines.push(classify(raw));
    }
    lines
}

/// Classify a single line.
pub fn classify(raw: &str) -> Line<'_> {
    let body = raw.trim_start();
    let indent = raw.len() - body.len();
    let body = body.trim_end();

    if body.is_empty() {
        return Line::Blank;
    }
    if let Some(line) = heading(body) {
        return line;
    }
    if let Some(text) = numbered(body) {
        return Line::Numbered { indent, text };
    }
    if let Some(rest) = body.strip_prefix("- ").or_else(|| body.strip_prefix("* ")) {
        if let Some((mark, text)) = checkbox(rest) {
            return Line::Checkbox { indent, mark, text };
        }
        let text = rest.trim();
        if !text.is_empty() {
            return Line::Bullet { indent, text };
        }
    }
    Line::Text(body)
}

fn heading(body: &str) -> Option<Line<'_>> {
    let level = body.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let text = body[level..].strip_prefix(' ')?.trim();
    Some(Line::Heading { level, text })
}

fn numbered(body: &str) -> Option<&str> {
    let digits = body.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &body[digits..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    let text = rest.strip_prefix(' ')?.trim();
    (!text.is_empty()).then_some(text)
}

fn checkbox(rest: &str) -> Option<(Mark, &str)> {
    let rest = rest.strip_prefix('[')?;
    let mut chars = rest.chars();
    let mark = match chars.next()? {
        ' ' => Mark::Open,
        'x' | 'X' => Mark::Checked,
        '~' => Mark::Partial,
        _ => return None,
    };
    let text = chars.as_str().strip_prefix(']')?.trim();
    (!text.is_empty()).then_some((mark, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_line_shape() {
        assert_eq!(
            classify("## Acceptance Criteria"),
            Line::Heading {
                level: 2,
                text: "Acceptance Criteria"
            }
        );
        assert_eq!(
            classify("12. Ship it"),
            Line::Numbered {
                indent: 0,
                text: "Ship it"
            }
        );
        assert_eq!(
            classify("  - [~] Half done"),
            Line::Checkbox {
                indent: 2,
                mark: Mark::Partial,
                text: "Half done"
            }
        );
        assert_eq!(
            classify("* plain"),
            Line::Bullet {
                indent: 0,
                text: "plain"
            }
        );
        assert_eq!(classify("   "), Line::Blank);
        assert_eq!(classify("#hashtag"), Line::Text("#hashtag"));
        assert_eq!(classify("2024 was a year"), Line::Text("2024 was a year"));
        assert_eq!(classify("- [?] odd"), Line::Bullet { indent: 0, text: "[?] odd" });
    }

    #[test]
    fn comment_blocks_are_skipped() {
        let doc = "before\n<!--\n1. hidden\n-->\n<!-- one line -->\n1. shown\n";
        let lines = tokenize(doc);
        assert_eq!(
            lines,
            vec![
                Line::Text("before"),
                Line::Numbered {
                    indent: 0,
                    text: "shown"
                }
            ]
        );
    }
}
