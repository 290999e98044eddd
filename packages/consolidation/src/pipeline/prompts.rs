//! LLM prompt and response parsing for merge verification.

use serde::{Deserialize, Serialize};

use crate::traits::verifier::Verdict;

/// Longest candidate excerpt sent to the verifier, in characters.
pub const MAX_CANDIDATE_CHARS: usize = 6_000;

/// Prompt for deciding whether a topic belongs in an existing document.
pub const VERIFY_PROMPT: &str = r#"You maintain a deduplicated knowledge base. Decide whether a new topic
describes the same subject as an existing document and should be merged into it,
or whether it is a different subject and needs its own document.

Merge when the topic adds detail, steps, or corrections to the same subject.
Create when the topic is about a different product, procedure, or audience,
even if the wording is similar.

Vector similarity between the two: {score}

NEW TOPIC
Title: {title}
Content:
{content}

EXISTING DOCUMENT
Title: {candidate_title}
Content:
{candidate_content}

Output JSON:
{
    "merge": true | false,
    "reason": "one sentence explaining the decision"
}"#;

/// Structured verifier answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openai", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct VerifyResponse {
    /// Whether the topic belongs in the existing document
    pub merge: bool,

    /// One-sentence justification
    pub reason: String,
}

impl From<VerifyResponse> for Verdict {
    fn from(r: VerifyResponse) -> Self {
        if r.merge {
            Verdict::Merge { reason: r.reason }
        } else {
            Verdict::Create { reason: r.reason }
        }
    }
}

/// Format the verify prompt.
pub fn format_verify_prompt(
    title: &str,
    content: &str,
    candidate_title: &str,
    candidate_content: &str,
    score: f32,
) -> String {
    VERIFY_PROMPT
        .replace("{score}", &format!("{:.3}", score))
        .replace("{title}", title)
        .replace("{content}", content)
        .replace("{candidate_title}", candidate_title)
        .replace("{candidate_content}", truncate_chars(candidate_content, MAX_CANDIDATE_CHARS))
}

/// Parse a verifier reply into a verdict.
///
/// Accepts bare JSON or JSON inside a Markdown code fence. Anything else is
/// `Verdict::Unparsable` carrying the raw text.
pub fn parse_verdict(raw: &str) -> Verdict {
    let body = strip_code_fence(raw.trim());
    match serde_json::from_str::<VerifyResponse>(body) {
        Ok(response) => response.into(),
        Err(_) => Verdict::Unparsable {
            raw: raw.to_string(),
        },
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_verify_prompt() {
        let prompt = format_verify_prompt("Install Steps", "Run setup.exe", "Install Guide", "Download", 0.7);
        assert!(prompt.contains("Title: Install Steps"));
        assert!(prompt.contains("Title: Install Guide"));
        assert!(prompt.contains("0.700"));
        assert!(!prompt.contains("{candidate_content}"));
    }

    #[test]
    fn test_candidate_is_truncated() {
        let long = "é".repeat(MAX_CANDIDATE_CHARS + 50);
        let prompt = format_verify_prompt("t", "c", "T", &long, 0.6);
        assert_eq!(prompt.matches('é').count(), MAX_CANDIDATE_CHARS);
    }

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict(r#"{"merge": true, "reason": "same product"}"#);
        assert_eq!(
            v,
            Verdict::Merge {
                reason: "same product".into()
            }
        );

        let v = parse_verdict("```json\n{\"merge\": false, \"reason\": \"different OS\"}\n```");
        assert!(matches!(v, Verdict::Create { .. }));
    }

    #[test]
    fn test_parse_verdict_unparsable() {
        let v = parse_verdict("I think they should probably merge.");
        assert!(matches!(v, Verdict::Unparsable { .. }));

        let v = parse_verdict(r#"{"merge": "yes"}"#);
        assert!(matches!(v, Verdict::Unparsable { .. }));
    }
}
