//! Header-delimited sections for paragraph-mode documents.
//!
//! Paragraph content is a sequence of Markdown ATX sections:
//!
//! ```text
//! ## Install Guide
//! Download the installer.
//!
//! ## Requirements
//! 4 GB RAM.
//! ```
//!
//! Text before the first heading belongs to a section headed by the
//! document or topic title. Headings inside fenced code blocks are body text.
//! A section body never leaves a fence open: an unclosed fence is closed at
//! the end of its section, so it cannot swallow the headings that follow.

use std::collections::HashSet;

/// Level used for sections synthesized from a title.
pub const DEFAULT_LEVEL: u8 = 2;

/// Word-set Jaccard similarity at which two headers are the same section.
pub const HEADER_JACCARD_THRESHOLD: f32 = 0.8;

/// One header-delimited section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// ATX level, 1..=6
    pub level: u8,
    pub header: String,
    pub body: String,
}

impl Section {
    /// Create a section.
    pub fn new(level: u8, header: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: level.clamp(1, 6),
            header: header.into(),
            body: close_fence(body.into()),
        }
    }

    fn render(&self) -> String {
        let heading = format!("{} {}", "#".repeat(self.level as usize), self.header);
        if self.body.is_empty() {
            heading
        } else {
            format!("{}\n{}", heading, close_fence(self.body.clone()))
        }
    }
}

/// What a section merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionMergeStats {
    /// Incoming bodies appended to an existing section
    pub appended: usize,
    /// Incoming sections added at the end
    pub added: usize,
    /// Incoming sections already fully present
    pub unchanged: usize,
}

impl SectionMergeStats {
    /// Whether the merge changed anything.
    pub fn changed(&self) -> bool {
        self.appended + self.added > 0
    }
}

/// Parse an ATX heading line into (level, text).
fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let hashes = rest.len() - rest.trim_start_matches('#').len();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let after = &rest[hashes..];
    if !after.is_empty() && !after.starts_with(' ') && !after.starts_with('\t') {
        return None;
    }

    // Optional closing sequence: "## Title ##"
    let text = after.trim();
    let text = match text.trim_end_matches('#') {
        stripped if stripped.len() < text.len() && (stripped.is_empty() || stripped.ends_with(' ')) => {
            stripped.trim_end()
        }
        _ => text,
    };
    Some((hashes as u8, text))
}

/// The fence marker a line opens or closes, if any.
fn fence_marker(line: &str) -> Option<&'static str> {
    let t = line.trim_start();
    if t.starts_with("```") {
        Some("```")
    } else if t.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Track fence state across one line.
fn step_fence(open: &mut Option<&'static str>, line: &str) {
    match (fence_marker(line), *open) {
        (Some(marker), None) => *open = Some(marker),
        (Some(marker), Some(current)) if marker == current => *open = None,
        _ => {}
    }
}

fn close_fence(mut body: String) -> String {
    let mut open = None;
    for line in body.lines() {
        step_fence(&mut open, line);
    }
    if let Some(marker) = open {
        body.push('\n');
        body.push_str(marker);
    }
    body
}

/// Split text into blank-line separated blocks, trimmed, empties dropped.
fn blocks(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .collect()
}

/// Whether every block of `needle` appears, in order and adjacent, among
/// the blocks of `haystack`.
fn contains_blocks(haystack: &str, needle: &str) -> bool {
    let needle = blocks(needle);
    if needle.is_empty() {
        return true;
    }
    blocks(haystack)
        .windows(needle.len())
        .any(|window| window == needle.as_slice())
}

/// Split content into sections.
///
/// Leading text (or all text when there are no headings) becomes a section
/// headed by `default_title`. Empty headings also take `default_title`.
pub fn parse_sections(content: &str, default_title: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<(u8, String)> = None;
    let mut body: Vec<&str> = Vec::new();
    let mut fence: Option<&'static str> = None;

    let mut flush = |current: Option<(u8, String)>, body: &mut Vec<&str>| {
        let text = body.join("\n").trim().to_string();
        body.clear();
        match current {
            Some((level, header)) => sections.push(Section::new(level, header, text)),
            None if !text.is_empty() => {
                sections.push(Section::new(DEFAULT_LEVEL, default_title.trim(), text))
            }
            None => {}
        }
    };

    for line in content.lines() {
        let was_open = fence.is_some();
        step_fence(&mut fence, line);
        let heading = if was_open || fence.is_some() {
            None
        } else {
            parse_heading(line)
        };
        match heading {
            Some((level, text)) => {
                flush(current.take(), &mut body);
                let header = if text.is_empty() { default_title.trim() } else { text };
                current = Some((level, header.to_string()));
            }
            None => body.push(line),
        }
    }
    flush(current, &mut body);

    sections
}

/// Render sections back to paragraph-mode content.
pub fn render_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(Section::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lowercase, punctuation folded to spaces, whitespace collapsed.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn word_jaccard(a: &str, b: &str) -> f32 {
    let a: HashSet<&str> = a.split_whitespace().collect();
    let b: HashSet<&str> = b.split_whitespace().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(&b).count();
    let union = a.union(&b).count();
    inter as f32 / union as f32
}

/// Whether two headers name the same section.
pub fn headers_match(a: &str, b: &str) -> bool {
    let a = normalize_header(a);
    let b = normalize_header(b);
    a == b || word_jaccard(&a, &b) >= HEADER_JACCARD_THRESHOLD
}

/// Merge incoming sections into existing ones.
///
/// A matching header receives the incoming body appended after a blank
/// line; an unmatched one is added at the end. Bodies already present in
/// the matched section (as whole blank-line separated blocks) are skipped,
/// so replaying a merge is a no-op.
pub fn merge_sections(
    existing: Vec<Section>,
    incoming: Vec<Section>,
) -> (Vec<Section>, SectionMergeStats) {
    let mut merged = existing;
    let mut stats = SectionMergeStats::default();

    for section in incoming {
        let target = merged
            .iter_mut()
            .find(|s| headers_match(&s.header, &section.header));

        match target {
            Some(target) => {
                let body = section.body.trim();
                if body.is_empty() || contains_blocks(&target.body, body) {
                    stats.unchanged += 1;
                } else if target.body.is_empty() {
                    target.body = body.to_string();
                    stats.appended += 1;
                } else {
                    target.body = format!("{}\n\n{}", target.body.trim_end(), body);
                    stats.appended += 1;
                }
            }
            None => {
                merged.push(section);
                stats.added += 1;
            }
        }
    }

    (merged, stats)
}

/// Append flat text with a blank-line separator.
///
/// Returns `None` when the blocks of `addition` are already present in
/// `existing`.
pub fn append_flat(existing: &str, addition: &str) -> Option<String> {
    let addition = addition.trim();
    if addition.is_empty() || contains_blocks(existing, addition) {
        return None;
    }
    let existing = existing.trim_end();
    if existing.is_empty() {
        return Some(addition.to_string());
    }
    Some(format!("{}\n\n{}", existing, addition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_leading_text_uses_title() {
        let sections = parse_sections("Download the installer.\n\n## Requirements\n4 GB RAM", "Install Guide");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].header, "Install Guide");
        assert_eq!(sections[0].level, DEFAULT_LEVEL);
        assert_eq!(sections[0].body, "Download the installer.");
        assert_eq!(sections[1].header, "Requirements");
        assert_eq!(sections[1].body, "4 GB RAM");
    }

    #[test]
    fn test_parse_without_headings() {
        let sections = parse_sections("Just text.", "Notes");
        assert_eq!(sections, vec![Section::new(2, "Notes", "Just text.")]);
        assert!(parse_sections("   \n", "Notes").is_empty());
    }

    #[test]
    fn test_parse_heading_rules() {
        assert_eq!(parse_heading("# One"), Some((1, "One")));
        assert_eq!(parse_heading("###### Six"), Some((6, "Six")));
        assert_eq!(parse_heading("## Closed ##"), Some((2, "Closed")));
        assert_eq!(parse_heading("   ## Indented"), Some((2, "Indented")));
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("####### Seven"), None);
        assert_eq!(parse_heading("    ## Code"), None);
        assert_eq!(parse_heading("## C#"), Some((2, "C#")));
    }

    #[test]
    fn test_headings_in_fences_are_body() {
        let content = "## Setup\n```sh\n# install deps\nmake\n```";
        let sections = parse_sections(content, "T");
        assert_eq!(sections.len(), 1);
        assert!(sections[0].body.contains("# install deps"));
    }

    #[test]
    fn test_unclosed_fence_is_closed_at_section_end() {
        let sections = parse_sections("Use:\n```sh\nmake", "Setup");
        assert_eq!(sections[0].body, "Use:\n```sh\nmake\n```");

        let mut paragraph = render_sections(&sections);
        for body in ["X", "Y"] {
            let existing = parse_sections(&paragraph, "Setup");
            let incoming = parse_sections(body, "Other");
            let (merged, _) = merge_sections(existing, incoming);
            paragraph = render_sections(&merged);
        }

        let reparsed = parse_sections(&paragraph, "Setup");
        let headers: Vec<&str> = reparsed.iter().map(|s| s.header.as_str()).collect();
        assert_eq!(headers, vec!["Setup", "Other"]);
        assert_eq!(reparsed[1].body, "X\n\nY");
    }

    #[test]
    fn test_mismatched_fence_markers_stay_open() {
        let sections = parse_sections("```\n~~~\n## Not a heading", "Code");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, "```\n~~~\n## Not a heading\n```");
    }

    #[test]
    fn test_render_then_parse() {
        let sections = vec![
            Section::new(2, "Install Guide", "Download."),
            Section::new(3, "Windows", "Run setup.exe"),
        ];
        let rendered = render_sections(&sections);
        assert_eq!(rendered, "## Install Guide\nDownload.\n\n### Windows\nRun setup.exe");
        assert_eq!(parse_sections(&rendered, "ignored"), sections);
    }

    #[test]
    fn test_headers_match() {
        assert!(headers_match("Install Guide", "install guide"));
        assert!(headers_match("Install: Guide!", "install guide"));
        assert!(headers_match(
            "Install guide for the desktop client",
            "The desktop client install guide"
        ));
        assert!(!headers_match("Install Guide", "Install Steps"));
        assert!(!headers_match("Install Guide", "Uninstall Guide"));
    }

    #[test]
    fn test_merge_appends_to_matching_section() {
        let existing = vec![Section::new(2, "Install Guide", "Download the installer.")];
        let incoming = vec![
            Section::new(2, "install guide", "Run setup.exe."),
            Section::new(2, "Troubleshooting", "Reboot."),
        ];

        let (merged, stats) = merge_sections(existing, incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].header, "Install Guide");
        assert_eq!(merged[0].body, "Download the installer.\n\nRun setup.exe.");
        assert_eq!(merged[1].header, "Troubleshooting");
        assert_eq!(stats, SectionMergeStats { appended: 1, added: 1, unchanged: 0 });
    }

    #[test]
    fn test_merge_skips_present_body() {
        let existing = vec![Section::new(2, "Install Guide", "Download.\n\nRun setup.exe.")];
        let incoming = vec![Section::new(2, "Install Guide", "Run setup.exe.")];
        let (merged, stats) = merge_sections(existing.clone(), incoming);
        assert_eq!(merged, existing);
        assert!(!stats.changed());
    }

    #[test]
    fn test_merge_appends_body_found_only_inside_a_block() {
        let existing = vec![Section::new(2, "Troubleshooting", "Reboot. Then check the cable.")];
        let incoming = vec![Section::new(2, "Troubleshooting", "Reboot.")];
        let (merged, stats) = merge_sections(existing, incoming);
        assert_eq!(merged[0].body, "Reboot. Then check the cable.\n\nReboot.");
        assert_eq!(stats.appended, 1);
    }

    #[test]
    fn test_append_flat() {
        assert_eq!(append_flat("A", "B").as_deref(), Some("A\n\nB"));
        assert_eq!(append_flat("A\n\nB", "B"), None);
        assert_eq!(append_flat("A\n\nB\n\nC", "B\n\nC"), None);
        assert_eq!(
            append_flat("Reboot the router.", "Reboot.").as_deref(),
            Some("Reboot the router.\n\nReboot.")
        );
        assert_eq!(append_flat("", "B").as_deref(), Some("B"));
        assert_eq!(append_flat("A", "  "), None);
    }

    fn header_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "Install Guide",
            "install guide",
            "Install: Guide",
            "Requirements",
            "Troubleshooting",
            "FAQ",
            "Uninstall",
        ])
        .prop_map(String::from)
    }

    fn sections_strategy() -> impl Strategy<Value = Vec<Section>> {
        prop::collection::vec(
            (1u8..=3, header_strategy(), "[a-z]{1,12}( [a-z]{1,12}){0,4}\\."),
            0..6,
        )
        .prop_map(|items| {
            items
                .into_iter()
                .map(|(level, header, body)| Section::new(level, header, body))
                .collect()
        })
    }

    fn fenced_sections_strategy() -> impl Strategy<Value = Vec<Section>> {
        prop::collection::vec(
            (
                header_strategy(),
                "[a-z]{1,12}\\.",
                prop::sample::select(vec!["", "\n```", "\n```sh\n## Install Guide", "\n~~~"]),
            ),
            0..4,
        )
        .prop_map(|items| {
            items
                .into_iter()
                .map(|(header, text, tail)| Section::new(2, header, format!("{}{}", text, tail)))
                .collect()
        })
    }

    fn has_duplicate_headers(sections: &[Section]) -> bool {
        let mut seen = HashSet::new();
        sections
            .iter()
            .any(|s| !seen.insert(normalize_header(&s.header)))
    }

    proptest! {
        #[test]
        fn prop_merge_never_duplicates_headers(
            batches in prop::collection::vec(sections_strategy(), 1..5)
        ) {
            let mut doc: Vec<Section> = Vec::new();
            for batch in batches {
                let (next, _) = merge_sections(doc, batch);
                doc = next;
            }
            prop_assert!(!has_duplicate_headers(&doc));
        }

        #[test]
        fn prop_fenced_bodies_never_duplicate_headers_across_renders(
            batches in prop::collection::vec(fenced_sections_strategy(), 1..5)
        ) {
            let mut paragraph = String::new();
            for batch in batches {
                let existing = parse_sections(&paragraph, "Untitled");
                let (merged, _) = merge_sections(existing, batch);
                paragraph = render_sections(&merged);
            }
            prop_assert!(!has_duplicate_headers(&parse_sections(&paragraph, "Untitled")));
        }

        #[test]
        fn prop_merge_is_idempotent(
            base in sections_strategy(),
            incoming in sections_strategy()
        ) {
            let (once, _) = merge_sections(base, incoming.clone());
            let (twice, stats) = merge_sections(once.clone(), incoming);
            prop_assert_eq!(once, twice);
            prop_assert!(!stats.changed());
        }

        #[test]
        fn prop_merged_sections_survive_render(
            base in sections_strategy(),
            incoming in sections_strategy()
        ) {
            let (merged, _) = merge_sections(base, incoming);
            let reparsed = parse_sections(&render_sections(&merged), "Untitled");
            prop_assert_eq!(reparsed, merged);
        }
    }
}
