//! Cleanup of raw model output before it is parsed or executed.

use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::OnceLock;

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeError {
    pub excerpt: String,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "content is not valid JSON: {}", self.excerpt)
    }
}

impl std::error::Error for NormalizeError {}

/// First `EXCERPT_CHARS` characters of `text`
pub fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap())
}

fn import_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(import\s+\S|from\s+\S+\s+import\s)").unwrap())
}

/// Remove a surrounding markdown fence, with or without a language tag
pub fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    } else if let Some(last) = lines.last_mut() {
        *last = last.trim_end().trim_end_matches("```");
    }
    lines.join("\n").trim().to_string()
}

/// Drop `import x` and `from x import y` lines
pub fn strip_import_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !import_line_regex().is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trailing `}` characters are dropped when the text never opens a brace
pub fn trim_unmatched_braces(text: &str) -> String {
    if text.contains('{') {
        return text.to_string();
    }
    text.trim_end_matches(|c: char| c == '}' || c.is_whitespace())
        .to_string()
}

/// Full code cleanup pass applied before the guarded executor sees a snippet
pub fn normalize_code(text: &str, strip_imports: bool) -> String {
    let mut code = strip_fences(text);
    code = code.replace('\u{feff}', "");
    code = code
        .trim_matches(|c: char| c == '`' || c.is_whitespace())
        .to_string();
    if strip_imports {
        code = strip_import_lines(&code);
    }
    trim_unmatched_braces(&code).trim().to_string()
}

/// Contents of the first fenced block, if any
pub fn extract_fenced_block(text: &str) -> Option<String> {
    fenced_block_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Outermost `{ ... }` span
fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse model output as JSON, trying progressively looser readings.
///
/// 1. the text as-is
/// 2. with wrapping whitespace, BOM and backticks removed
/// 3. the first fenced block: parsed when it is a JSON object, otherwise
///    wrapped as `{"code": <block>}`
/// 4. the outermost brace span
pub fn recover_json(content: &str) -> Result<Value, NormalizeError> {
    if let Ok(value) = serde_json::from_str::<Value>(content) {
        return Ok(value);
    }

    let trimmed = content.trim_matches(|c: char| c.is_whitespace() || c == '`' || c == '\u{feff}');
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(block) = extract_fenced_block(content) {
        return Ok(match serde_json::from_str::<Value>(&block) {
            Ok(value) if value.is_object() => value,
            _ => json!({ "code": block }),
        });
    }

    if let Some(span) = outer_braces(content) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Ok(value);
        }
    }

    Err(NormalizeError {
        excerpt: excerpt(content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_python_fence() {
        let code = "box = doc.addObject('Part::Box', 'Box')\ndoc.recompute()";
        let fenced = format!("```python\n{}\n```", code);

        assert_eq!(strip_fences(&fenced), code);
        assert_eq!(normalize_code(&fenced, false), code);
    }

    #[test]
    fn test_strip_bare_fence() {
        assert_eq!(strip_fences("```\nx = 1\n```"), "x = 1");
        assert_eq!(strip_fences("```\nx = 1```"), "x = 1");
        assert_eq!(strip_fences("x = 1"), "x = 1");
    }

    #[test]
    fn test_trailing_brace_repair() {
        assert_eq!(normalize_code("doc.recompute()}", false), "doc.recompute()");
        assert_eq!(normalize_code("doc.recompute()}}\n", false), "doc.recompute()");
        assert_eq!(trim_unmatched_braces("d = {'a': 1}"), "d = {'a': 1}");
    }

    #[test]
    fn test_bom_and_backticks_removed() {
        assert_eq!(normalize_code("\u{feff}`x = 1`", false), "x = 1");
    }

    #[test]
    fn test_strip_imports_optional() {
        let code = "import FreeCAD\nfrom FreeCAD import Vector\nx = 1";

        assert_eq!(normalize_code(code, true), "x = 1");
        assert!(normalize_code(code, false).starts_with("import FreeCAD"));
        assert_eq!(strip_import_lines("important = 1"), "important = 1");
    }

    #[test]
    fn test_recover_direct_json() {
        let value = recover_json(r#"{"code": "x = 1"}"#).unwrap();
        assert_eq!(value["code"], "x = 1");
    }

    #[test]
    fn test_recover_fenced_json() {
        let value = recover_json("```json\n{\"code\":\"x=1\"}\n```").unwrap();
        assert_eq!(value["code"], "x=1");
    }

    #[test]
    fn test_recover_fenced_code_wraps_payload() {
        let value = recover_json("Here you go:\n```python\nbox = 1\n```\nEnjoy").unwrap();
        assert_eq!(value["code"], "box = 1");
    }

    #[test]
    fn test_recover_brace_span_from_prose() {
        let value = recover_json("Sure! {\"commands\": []} Hope that helps.").unwrap();
        assert!(value["commands"].is_array());
    }

    #[test]
    fn test_recover_failure_has_excerpt() {
        let long = "no json here ".repeat(40);
        let err = recover_json(&long).unwrap_err();

        assert!(err.to_string().starts_with("content is not valid JSON: no json here"));
        assert_eq!(err.excerpt.chars().count(), 200);
    }
}
