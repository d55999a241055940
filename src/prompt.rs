//! Prompt assembly and answer parsing.
//!
//! [`build_messages`] produces a fixed two-message prompt: the system
//! instructions, then one user message whose sections always appear in
//! this order:
//!
//! ```text
//! <conversation_history> … </conversation_history>
//! <context> … </context>
//! <query> … </query>
//! ```
//!
//! [`parse_completion`] turns a [`Completion`] into a [`StructuredAnswer`]
//! in three tiers: the provider's structured fields, then a JSON object
//! recovered from the raw text (fenced code blocks first, then the
//! outermost `{…}` span), then the raw text itself.

use serde::Deserialize;

use crate::llm::{Completion, Message};
use crate::models::{Chunk, DialogTurn, ParseTier, StructuredAnswer};

/// Reply the model must give to off-topic queries.
pub const REFUSAL: &str = "Out of scope. I only assist with this repository's code and structure.";

pub const SYSTEM_PROMPT: &str = r#"**Identity:** You are a Repository Intelligence Bot. Your knowledge is strictly limited to the provided files.

**Operational Mandates:**
1. **Scope:** ONLY answer questions using the provided repository context.
2. **Refusal:** If a query is off-topic (general knowledge, news, tutorials, or unrelated code), reply ONLY with: "Out of scope. I only assist with this repository's code and structure."
3. **Logic:** Analyze code step-by-step. Map every answer to specific files/lines.
4. **Accuracy:** Never hallucinate features or external documentation. If it's not in the files, it doesn't exist.
5. **Formatting:** Use Markdown headers, **bolding**, and code blocks for clarity.

**Strict Prohibition:** Do not engage in general conversation or provide "helpful" outside context before refusing off-topic prompts.

**Output Format:** Respond with a single JSON object with exactly two string fields:
- "rationale": your step-by-step reasoning over the context.
- "answer": the final answer shown to the user (Markdown allowed)."#;

const NO_HISTORY: &str = "(no previous conversation)";
const NO_CONTEXT: &str = "(no repository context was retrieved)";

/// Assemble the prompt for one query.
pub fn build_messages(query: &str, context: &[Chunk], history: &[DialogTurn]) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(render_user_message(query, context, history)),
    ]
}

fn render_user_message(query: &str, context: &[Chunk], history: &[DialogTurn]) -> String {
    let mut out = String::new();

    out.push_str("<conversation_history>\n");
    if history.is_empty() {
        out.push_str(NO_HISTORY);
        out.push('\n');
    }
    for turn in history {
        out.push_str(&format!(
            "<turn index=\"{}\">\nUser: {}\nAssistant: {}\n</turn>\n",
            turn.ordinal, turn.query, turn.response
        ));
    }
    out.push_str("</conversation_history>\n\n");

    out.push_str("<context>\n");
    if context.is_empty() {
        out.push_str(NO_CONTEXT);
        out.push('\n');
    }
    for (i, chunk) in context.iter().enumerate() {
        out.push_str(&format!(
            "<chunk index=\"{}\" file_path=\"{}\" type=\"{}\">\n{}\n</chunk>\n",
            i + 1,
            chunk.document.path,
            chunk.document.file_type,
            chunk.text
        ));
    }
    out.push_str("</context>\n\n");

    out.push_str("<query>\n");
    out.push_str(query);
    out.push_str("\n</query>");
    out
}

#[derive(Deserialize)]
struct AnswerObject {
    #[serde(default)]
    rationale: Option<serde_json::Value>,
    #[serde(default)]
    answer: Option<serde_json::Value>,
}

/// Render a JSON field as text; strings verbatim, other values as JSON.
fn field_text(value: Option<serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Non-empty `rationale`/`answer` fields of a decoded object.
fn answer_fields(obj: AnswerObject) -> Option<(String, String)> {
    let rationale = field_text(obj.rationale);
    let answer = field_text(obj.answer);
    if rationale.trim().is_empty() && answer.trim().is_empty() {
        return None;
    }
    Some((rationale, answer))
}

/// Contents of each fenced code block in `text`, in order, with any
/// language tag removed.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let Some(close) = after_fence.find("```") else {
            break;
        };
        blocks.push(strip_info_string(&after_fence[..close]));
        rest = &after_fence[close + 3..];
    }
    blocks
}

/// Drop a leading info string such as `json`; the body may share its line.
fn strip_info_string(block: &str) -> &str {
    if block.starts_with(|c: char| c.is_whitespace() || c == '{' || c == '[') {
        return block;
    }
    match block.find(char::is_whitespace) {
        Some(end) => &block[end..],
        None => "",
    }
}

/// The first JSON object in `text` that carries an answer. Each `{` is
/// tried as a start; trailing text after the object is ignored.
fn first_answer_object(text: &str) -> Option<(String, String)> {
    text.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<AnswerObject>()
            .next()?
            .ok()
            .and_then(answer_fields)
    })
}

/// Recover `(rationale, answer)` from free text that embeds a JSON object.
pub fn extract_json_object(text: &str) -> Option<(String, String)> {
    fenced_blocks(text)
        .into_iter()
        .find_map(first_answer_object)
        .or_else(|| first_answer_object(text))
}

/// Apply the three-tier parsing policy to a provider response.
pub fn parse_completion(completion: &Completion) -> StructuredAnswer {
    if let Completion::Structured {
        rationale, answer, ..
    } = completion
    {
        if !(rationale.trim().is_empty() && answer.trim().is_empty()) {
            return StructuredAnswer {
                rationale: rationale.clone(),
                answer: answer.clone(),
                tier: ParseTier::Native,
            };
        }
    }

    let raw = completion.raw_text();
    if let Some((rationale, answer)) = extract_json_object(raw) {
        return StructuredAnswer {
            rationale,
            answer,
            tier: ParseTier::RecoveredJson,
        };
    }

    StructuredAnswer {
        rationale: String::new(),
        answer: raw.trim().to_string(),
        tier: ParseTier::RawText,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, DocumentMetadata};
    use std::sync::Arc;
    use uuid::Uuid;

    fn chunk(path: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            document: Arc::new(DocumentMetadata {
                path: path.to_string(),
                file_type: path.rsplit('.').next().unwrap_or_default().to_string(),
                kind: DocumentKind::Code,
                is_implementation: true,
            }),
            ordinal: 0,
        }
    }

    fn turn(q: &str, r: &str, ordinal: usize) -> DialogTurn {
        DialogTurn {
            id: Uuid::new_v4(),
            query: q.to_string(),
            response: r.to_string(),
            ordinal,
        }
    }

    #[test]
    fn test_section_order_query_last() {
        let msgs = build_messages(
            "what does x do?",
            &[chunk("x.py", "def x(): pass")],
            &[turn("hi", "hello", 0)],
        );
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, SYSTEM_PROMPT);

        let user = &msgs[1].content;
        let h = user.find("<conversation_history>").unwrap();
        let c = user.find("<context>").unwrap();
        let q = user.find("<query>").unwrap();
        assert!(h < c && c < q);
        assert!(user.trim_end().ends_with("</query>"));
        assert!(user.contains("file_path=\"x.py\""));
        assert!(user.contains("type=\"py\""));
        assert!(user.contains("User: hi\nAssistant: hello"));
    }

    #[test]
    fn test_empty_sections_render_markers() {
        let msgs = build_messages("q", &[], &[]);
        assert!(msgs[1].content.contains(NO_HISTORY));
        assert!(msgs[1].content.contains(NO_CONTEXT));
    }

    #[test]
    fn test_system_prompt_contains_refusal() {
        assert!(SYSTEM_PROMPT.contains(REFUSAL));
    }

    #[test]
    fn test_native_tier() {
        let parsed = parse_completion(&Completion::Structured {
            rationale: "r".into(),
            answer: "a".into(),
            raw: String::new(),
        });
        assert_eq!(parsed.tier, ParseTier::Native);
        assert_eq!(parsed.answer, "a");
    }

    #[test]
    fn test_fenced_json_recovered() {
        let raw = "Here you go:\n```json\n{\"rationale\":\"r\",\"answer\":\"a\"}\n```\n";
        let parsed = parse_completion(&Completion::Raw(raw.into()));
        assert_eq!(parsed.tier, ParseTier::RecoveredJson);
        assert_eq!(parsed.rationale, "r");
        assert_eq!(parsed.answer, "a");
    }

    #[test]
    fn test_fenced_block_preferred_over_bare_object() {
        let raw = "{not json} then ```\n{\"answer\":\"inner\"}\n``` and }";
        let parsed = parse_completion(&Completion::Raw(raw.into()));
        assert_eq!(parsed.answer, "inner");
        assert_eq!(parsed.rationale, "");
    }

    #[test]
    fn test_one_line_fence_followed_by_code_recovered() {
        let raw = "```json {\"rationale\":\"r\",\"answer\":\"a\"} ```\nSee `fn main() {}` in main.rs";
        let parsed = parse_completion(&Completion::Raw(raw.into()));
        assert_eq!(parsed.tier, ParseTier::RecoveredJson);
        assert_eq!(parsed.rationale, "r");
        assert_eq!(parsed.answer, "a");
    }

    #[test]
    fn test_object_followed_by_braces_in_prose_recovered() {
        let raw = "{\"rationale\":\"r\",\"answer\":\"a\"}\nNote: the struct is `Foo {}`.";
        let parsed = parse_completion(&Completion::Raw(raw.into()));
        assert_eq!(parsed.tier, ParseTier::RecoveredJson);
        assert_eq!(parsed.answer, "a");
    }

    #[test]
    fn test_object_after_code_braces_recovered() {
        let raw = "Given `impl Foo {}` here is the result: {\"answer\":\"ok\"}";
        let (_, answer) = extract_json_object(raw).unwrap();
        assert_eq!(answer, "ok");
    }

    #[test]
    fn test_bare_object_in_prose_recovered() {
        let raw = "Sure! {\"rationale\": \"because\", \"answer\": \"yes\"} Hope that helps.";
        let parsed = parse_completion(&Completion::Raw(raw.into()));
        assert_eq!(parsed.tier, ParseTier::RecoveredJson);
        assert_eq!(parsed.answer, "yes");
    }

    #[test]
    fn test_empty_structured_falls_through_to_raw_json() {
        let parsed = parse_completion(&Completion::Structured {
            rationale: String::new(),
            answer: String::new(),
            raw: "```json\n{\"rationale\":\"r2\",\"answer\":\"a2\"}\n```".into(),
        });
        assert_eq!(parsed.tier, ParseTier::RecoveredJson);
        assert_eq!(parsed.answer, "a2");
    }

    #[test]
    fn test_raw_text_fallback() {
        let parsed = parse_completion(&Completion::Raw("  Just prose. {broken  ".into()));
        assert_eq!(parsed.tier, ParseTier::RawText);
        assert_eq!(parsed.answer, "Just prose. {broken");
        assert_eq!(parsed.rationale, "");
        assert!(parsed.tier.is_fallback());
    }

    #[test]
    fn test_object_without_answer_fields_not_recovered() {
        let parsed = parse_completion(&Completion::Raw("{\"foo\": 1}".into()));
        assert_eq!(parsed.tier, ParseTier::RawText);
    }

    #[test]
    fn test_non_string_answer_rendered_as_json() {
        let (_, answer) = extract_json_object("{\"answer\": [1, 2]}").unwrap();
        assert_eq!(answer, "[1,2]");
    }
}
