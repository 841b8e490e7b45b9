//! Turning model output into a [`Patch`].
//!
//! Two encodings are supported. Providers that can enforce a JSON schema
//! return a single object with `plan`, `code` and `commit_message`. Providers
//! that cannot are asked to wrap each field in `<name>...</name>` markers,
//! which also lets the fields be applied one by one while the response is
//! still streaming in (see [`SectionTracker`]).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A complete replacement for the implementation file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    pub plan: String,
    pub code: String,
    pub commit_message: String,
}

/// Response to a squash summary request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Summary {
    pub commit_message: String,
}

/// Named region of a delimited response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Plan,
    Code,
    CommitMessage,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Plan, Section::Code, Section::CommitMessage];

    pub fn name(&self) -> &'static str {
        match self {
            Section::Plan => "plan",
            Section::Code => "code",
            Section::CommitMessage => "commit_message",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Section::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a schema-constrained JSON response into a [`Patch`].
pub fn parse_json_patch(raw: &str) -> Result<Patch> {
    parse_json(raw)
}

/// Parse a schema-constrained JSON summary response.
pub fn parse_json_summary(raw: &str) -> Result<Summary> {
    parse_json(raw)
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw.trim()).map_err(|e| {
        warn!(error = %e, raw = %raw, "response did not match schema");
        Error::malformed(e.to_string(), raw)
    })
}

/// Text between the first `<name>` and the first `</name>` after it, with
/// leading whitespace removed. `None` until both markers are present.
pub fn extract_section<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);

    let start = text.find(&open)? + open.len();
    let len = text[start..].find(&close)?;
    Some(text[start..start + len].trim_start())
}

/// Extract every section of a complete delimited response.
pub fn parse_sections_patch(raw: &str) -> Result<Patch> {
    let field = |section: Section| {
        extract_section(raw, section.name())
            .map(str::to_string)
            .ok_or_else(|| {
                warn!(raw = %raw, section = %section, "response is missing a section");
                Error::malformed(format!("missing <{}> section", section), raw)
            })
    };

    Ok(Patch {
        plan: field(Section::Plan)?,
        code: field(Section::Code)?,
        commit_message: field(Section::CommitMessage)?,
    })
}

/// Extract the commit message from a delimited summary response.
pub fn parse_sections_summary(raw: &str) -> Result<Summary> {
    extract_section(raw, Section::CommitMessage.name())
        .map(|m| Summary {
            commit_message: m.trim_end().to_string(),
        })
        .ok_or_else(|| Error::malformed("missing <commit_message> section", raw))
}

fn close_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</([A-Za-z_][A-Za-z0-9_]*)>").expect("valid regex"))
}

/// Yields sections of a growing response buffer as their close markers appear.
///
/// Call [`feed`](Self::feed) with the whole buffer after every increment. Each
/// known section is returned once, in the order its close marker shows up.
/// Unknown and repeated sections are logged and skipped.
#[derive(Debug, Default)]
pub struct SectionTracker {
    yielded: HashSet<Section>,
    closes_seen: usize,
}

impl SectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, buffer: &str) -> Vec<(Section, String)> {
        let mut complete = Vec::new();

        // Close markers are fully delimited, so matches found in an earlier,
        // shorter buffer are the same leading matches here.
        let closes: Vec<_> = close_marker_re().captures_iter(buffer).collect();
        for caps in closes.iter().skip(self.closes_seen) {
            let name = &caps[1];
            let Some(section) = Section::from_name(name) else {
                warn!(section = name, "ignoring unknown section");
                continue;
            };

            if self.yielded.contains(&section) {
                debug!(section = name, "ignoring repeated section");
                continue;
            }

            match extract_section(buffer, name) {
                Some(text) => {
                    self.yielded.insert(section);
                    complete.push((section, text.to_string()));
                }
                None => warn!(section = name, "close marker without open marker"),
            }
        }
        self.closes_seen = closes.len();

        complete
    }

    pub fn has(&self, section: Section) -> bool {
        self.yielded.contains(&section)
    }

    /// Sections that never completed
    pub fn missing(&self) -> Vec<Section> {
        Section::ALL
            .into_iter()
            .filter(|s| !self.yielded.contains(s))
            .collect()
    }
}

fn fence_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*```[\w+#.-]*[ \t]*\r?\n").expect("valid regex"))
}

fn fence_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r?\n?```\s*$").expect("valid regex"))
}

/// Remove an optional markdown fence around generated code.
pub fn strip_code_fence(code: &str) -> String {
    let without_open = fence_open_re().replace(code, "");
    fence_close_re().replace(&without_open, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delimited(plan: &str, code: &str, message: &str) -> String {
        format!(
            "Sure.\n<plan>{}</plan>\n<code>{}</code>\n<commit_message>{}</commit_message>\n",
            plan, code, message
        )
    }

    #[test]
    fn test_parse_json_patch() {
        let raw = r#"{"plan":"add Foo","code":"package main\n","commit_message":"Add Foo"}"#;
        let patch = parse_json_patch(raw).unwrap();
        assert_eq!(patch.plan, "add Foo");
        assert_eq!(patch.code, "package main\n");
        assert_eq!(patch.commit_message, "Add Foo");
    }

    #[test]
    fn test_parse_json_patch_missing_field() {
        let raw = r#"{"plan":"add Foo","code":"package main"}"#;
        match parse_json_patch(raw).unwrap_err() {
            Error::MalformedResponse { raw: kept, reason } => {
                assert_eq!(kept, raw);
                assert!(reason.contains("commit_message"));
            }
            other => panic!("Expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_patch_rejects_extra_fields_and_wrong_types() {
        let extra = r#"{"plan":"p","code":"c","commit_message":"m","notes":"x"}"#;
        assert!(parse_json_patch(extra).is_err());

        let wrong_type = r#"{"plan":"p","code":42,"commit_message":"m"}"#;
        assert!(parse_json_patch(wrong_type).is_err());

        assert!(parse_json_patch("I think the fix is...").is_err());
    }

    #[test]
    fn test_parse_json_summary() {
        let summary = parse_json_summary(r#"{"commit_message":"Implement Foo"}"#).unwrap();
        assert_eq!(summary.commit_message, "Implement Foo");
    }

    #[test]
    fn test_extract_section_strips_leading_whitespace_only() {
        let text = "<plan>\n\n  do it  \n</plan>";
        assert_eq!(extract_section(text, "plan"), Some("do it  \n"));
    }

    #[test]
    fn test_extract_section_uses_first_markers() {
        let text = "<plan>one</plan><plan>two</plan>";
        assert_eq!(extract_section(text, "plan"), Some("one"));
    }

    #[test]
    fn test_extract_section_requires_close_marker() {
        assert_eq!(extract_section("<code>package main", "code"), None);
        assert_eq!(extract_section("</code><code>x", "code"), None);
        assert_eq!(extract_section("nothing here", "code"), None);
    }

    #[test]
    fn test_sections_roundtrip() {
        let code = "package main\n\nfunc Foo() int { return 1 }\n";
        let raw = delimited("  \n add Foo", code, "\nAdd Foo");
        let patch = parse_sections_patch(&raw).unwrap();
        assert_eq!(patch.plan, "add Foo");
        assert_eq!(patch.code, code);
        assert_eq!(patch.commit_message, "Add Foo");
    }

    #[test]
    fn test_sections_patch_missing_close_marker() {
        let raw = "<plan>p</plan><code>package main\n<commit_message>m</commit_message>";
        match parse_sections_patch(raw).unwrap_err() {
            Error::MalformedResponse { reason, .. } => assert!(reason.contains("<code>")),
            other => panic!("Expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_sections_summary_trims() {
        let summary = parse_sections_summary("<commit_message>\n Add Foo\n</commit_message>").unwrap();
        assert_eq!(summary.commit_message, "Add Foo");
        assert!(parse_sections_summary("Add Foo").is_err());
    }

    #[test]
    fn test_tracker_yields_in_close_order_once() {
        let raw = delimited("p", "c", "m");
        let mut tracker = SectionTracker::new();
        let mut buffer = String::new();
        let mut seen = Vec::new();

        for ch in raw.chars() {
            buffer.push(ch);
            seen.extend(tracker.feed(&buffer));
        }

        assert_eq!(
            seen,
            vec![
                (Section::Plan, "p".to_string()),
                (Section::Code, "c".to_string()),
                (Section::CommitMessage, "m".to_string()),
            ]
        );
        assert!(tracker.missing().is_empty());
    }

    #[test]
    fn test_tracker_follows_response_order_not_request_order() {
        let raw = "<commit_message>m</commit_message><code>c</code><plan>p</plan>";
        let mut tracker = SectionTracker::new();
        let names: Vec<_> = tracker.feed(raw).into_iter().map(|(s, _)| s).collect();
        assert_eq!(names, vec![Section::CommitMessage, Section::Code, Section::Plan]);
    }

    #[test]
    fn test_tracker_never_yields_partial_section() {
        let mut tracker = SectionTracker::new();
        assert_eq!(tracker.feed("<plan>p</plan><code>package ma").len(), 1);
        assert!(tracker.feed("<plan>p</plan><code>package main</co").is_empty());
        assert!(!tracker.has(Section::Code));

        let done = tracker.feed("<plan>p</plan><code>package main</code>");
        assert_eq!(done, vec![(Section::Code, "package main".to_string())]);
    }

    #[test]
    fn test_tracker_ignores_unknown_and_repeated() {
        let mut tracker = SectionTracker::new();
        let raw = "<thinking>hmm</thinking><plan>first</plan><plan>second</plan>";
        let out = tracker.feed(raw);
        assert_eq!(out, vec![(Section::Plan, "first".to_string())]);
        assert_eq!(tracker.missing(), vec![Section::Code, Section::CommitMessage]);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(
            strip_code_fence("```go\npackage main\n\nfunc main() {}\n```"),
            "package main\n\nfunc main() {}"
        );
        assert_eq!(strip_code_fence("```\nx := 1\n```\n"), "x := 1");
        assert_eq!(strip_code_fence("package main\n"), "package main\n");
    }

    #[test]
    fn test_strip_code_fence_one_sided() {
        assert_eq!(strip_code_fence("```go\npackage main\n"), "package main\n");
        assert_eq!(strip_code_fence("package main\n```"), "package main");
    }
}
