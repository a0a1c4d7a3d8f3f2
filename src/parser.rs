//! Structured-Response Parsing
//!
//! Backends wrap their JSON payloads in prose, markdown fences, or nothing at
//! all. This module isolates the extraction grammar (optional fence, first
//! balanced-looking object) in one place and turns free-form replies into
//! [`ParsedResponse`] values. The parsers are total: every input maps to
//! either `Success` or `Failure`, never a panic.

use crate::models::{LearningPath, ParsedResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Matches a fenced code block with an optional `json` tag and captures the
/// first non-greedy `{...}` object inside it, across multiple lines.
static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("fenced JSON pattern is valid")
});

/// Extracts the JSON payload from a free-form backend reply.
///
/// Prefers an object embedded in a fenced code block; otherwise falls back to
/// the trimmed whole text. Residual fence markers are stripped either way,
/// which tolerates models that only partially close their fences.
pub fn extract_json_payload(text: &str) -> String {
    let candidate = FENCED_JSON
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| text.trim().to_string());

    candidate
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

fn deserialize_payload(text: &str) -> Result<Value, ParsedResponse> {
    let payload = extract_json_payload(text);
    serde_json::from_str(&payload).map_err(|err| {
        debug!(error = %err, "backend reply was not valid JSON");
        ParsedResponse::Failure {
            error: err.to_string(),
            raw_text: text.to_string(),
        }
    })
}

fn has_questions(data: &Value) -> bool {
    data.get("questions")
        .and_then(Value::as_array)
        .is_some_and(|questions| !questions.is_empty())
}

fn is_complete(data: &Value) -> bool {
    data.get("learningPath")
        .and_then(|path| serde_json::from_value::<LearningPath>(path.clone()).ok())
        .is_some_and(|path| path.is_complete())
}

/// Interprets a learning-path analysis reply.
///
/// Valid payloads carry a `learningPath` object, a `questions` array, or both.
pub fn parse_learning_path_response(text: &str) -> ParsedResponse {
    let data = match deserialize_payload(text) {
        Ok(value) => value,
        Err(failure) => return failure,
    };

    let has_learning_path = data.get("learningPath").is_some_and(|v| !v.is_null());
    let has_question_field = data.get("questions").is_some_and(|v| !v.is_null());
    if !has_learning_path && !has_question_field {
        return ParsedResponse::Failure {
            error: "Invalid response structure".to_string(),
            raw_text: text.to_string(),
        };
    }

    ParsedResponse::Success {
        has_questions: has_questions(&data),
        is_complete: is_complete(&data),
        data,
    }
}

/// Interprets a practice-question generation reply.
///
/// Valid payloads carry an `answers` array of question/answer/explanation
/// entries.
pub fn parse_qa_response(text: &str) -> ParsedResponse {
    let data = match deserialize_payload(text) {
        Ok(value) => value,
        Err(failure) => return failure,
    };

    if !data.get("answers").is_some_and(Value::is_array) {
        return ParsedResponse::Failure {
            error: "Invalid Q&A response structure".to_string(),
            raw_text: text.to_string(),
        };
    }

    ParsedResponse::Success {
        has_questions: has_questions(&data),
        is_complete: is_complete(&data),
        data,
    }
}

/// Renders a learning path as labeled lines for display.
pub fn format_learning_path(path: &LearningPath) -> String {
    let mut parts = Vec::new();
    if let Some(topic) = path.topic.as_deref().filter(|t| !t.is_empty()) {
        parts.push(format!("Topic: {topic}"));
    }
    if let Some(subtopic) = path.subtopic.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Subtopic: {subtopic}"));
    }
    if let Some(level) = path.level.as_deref().filter(|l| !l.is_empty()) {
        parts.push(format!("Level: {level}"));
    }
    parts.join("\n")
}

/// Builds the follow-up prompt that interleaves each clarifying question with
/// the answer collected for it, closing with an instruction to reply in the
/// original JSON format.
pub fn build_follow_up_prompt(
    original_prompt: &str,
    questions: &[String],
    answers: &[String],
) -> String {
    let mut prompt = format!("Based on the original request: \"{original_prompt}\"\n\n");
    prompt.push_str("Here are the additional details provided:\n");

    for (index, question) in questions.iter().enumerate() {
        let answer = answers
            .get(index)
            .map(String::as_str)
            .unwrap_or("No answer provided");
        prompt.push_str(&format!("Q: {question}\n"));
        prompt.push_str(&format!("A: {answer}\n\n"));
    }

    prompt.push_str("Please provide the complete learning path information in the same JSON format.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json_with_prose_prefix() {
        let text = "Here is JSON: ```json\n{\"learningPath\":{\"topic\":\"Go\"}}\n```";
        match parse_learning_path_response(text) {
            ParsedResponse::Success {
                has_questions,
                is_complete,
                data,
            } => {
                assert!(!has_questions);
                assert!(!is_complete);
                assert_eq!(data["learningPath"]["topic"], "Go");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_json_with_questions() {
        let text = r#"{"questions":["What is your goal?"]}"#;
        match parse_learning_path_response(text) {
            ParsedResponse::Success {
                has_questions,
                is_complete,
                ..
            } => {
                assert!(has_questions);
                assert!(!is_complete);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_non_json_input_is_failure_with_raw_text() {
        let text = "not json at all";
        match parse_learning_path_response(text) {
            ParsedResponse::Failure { raw_text, .. } => assert_eq!(raw_text, text),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_json_without_expected_fields_is_failure() {
        let text = r#"{"something":"else"}"#;
        match parse_learning_path_response(text) {
            ParsedResponse::Failure { error, raw_text } => {
                assert_eq!(error, "Invalid response structure");
                assert_eq!(raw_text, text);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_null_fields_count_as_absent() {
        let text = r#"{"learningPath":null,"questions":null}"#;
        assert!(matches!(
            parse_learning_path_response(text),
            ParsedResponse::Failure { .. }
        ));
    }

    #[test]
    fn test_complete_learning_path() {
        let text = r#"{"learningPath":{"topic":"Go","subtopic":"goroutines","level":"advanced"}}"#;
        match parse_learning_path_response(text) {
            ParsedResponse::Success { is_complete, .. } => assert!(is_complete),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_questions_array_is_not_has_questions() {
        let text = r#"{"questions":[]}"#;
        match parse_learning_path_response(text) {
            ParsedResponse::Success { has_questions, .. } => assert!(!has_questions),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_object_inside_fence_is_captured_whole() {
        let text = "```json\n{\"learningPath\":{\"topic\":\"Rust\",\"subtopic\":\"lifetimes\",\"level\":\"expert\"}}\n```";
        match parse_learning_path_response(text) {
            ParsedResponse::Success { is_complete, .. } => assert!(is_complete),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_fence_falls_back_to_stripping() {
        let text = "```json\n{\"questions\":[\"q1\"]}";
        match parse_learning_path_response(text) {
            ParsedResponse::Success { has_questions, .. } => assert!(has_questions),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_qa_response_with_answers() {
        let text = r#"```json
{"answers":[{"question":"Q1","answer":"A1","explanation":"E1"}]}
```"#;
        match parse_qa_response(text) {
            ParsedResponse::Success { data, .. } => {
                assert_eq!(data["answers"][0]["question"], "Q1");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_qa_response_requires_answers_array() {
        let text = r#"{"answers":"not a list"}"#;
        match parse_qa_response(text) {
            ParsedResponse::Failure { error, .. } => {
                assert_eq!(error, "Invalid Q&A response structure");
            }
            other => panic!("expected failure, got {other:?}"),
        }

        assert!(matches!(
            parse_qa_response("{}"),
            ParsedResponse::Failure { .. }
        ));
    }

    #[test]
    fn test_qa_response_garbage_input() {
        match parse_qa_response("oops") {
            ParsedResponse::Failure { raw_text, .. } => assert_eq!(raw_text, "oops"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_format_learning_path_skips_empty_fields() {
        let path = LearningPath {
            topic: Some("Rust".to_string()),
            subtopic: None,
            level: Some("beginner".to_string()),
        };
        assert_eq!(format_learning_path(&path), "Topic: Rust\nLevel: beginner");

        assert_eq!(format_learning_path(&LearningPath::default()), "");
    }

    #[test]
    fn test_follow_up_prompt_interleaves_answers() {
        let questions = vec!["What language?".to_string(), "How deep?".to_string()];
        let answers = vec!["Rust".to_string()];
        let prompt = build_follow_up_prompt("teach me systems", &questions, &answers);

        assert!(prompt.starts_with("Based on the original request: \"teach me systems\""));
        assert!(prompt.contains("Q: What language?\nA: Rust\n\n"));
        assert!(prompt.contains("Q: How deep?\nA: No answer provided\n\n"));
        assert!(prompt.ends_with(
            "Please provide the complete learning path information in the same JSON format."
        ));
    }

    #[test]
    fn test_extract_json_payload_prefers_fenced_block() {
        let text = "noise {\"decoy\":1} ```json {\"questions\":[\"q\"]} ``` trailing";
        assert_eq!(extract_json_payload(text), "{\"questions\":[\"q\"]}");
    }
}
