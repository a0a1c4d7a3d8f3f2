//! Core Data Model
//!
//! This module defines the data structures shared by the conversation engine,
//! the response parser, and the session store. Everything serializes as
//! camelCase JSON so persisted sessions and exported files keep the layout
//! the rest of the application expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The learning path the conversation converges on.
///
/// A path is complete once all three fields carry non-empty values; until
/// then the backend is expected to keep asking clarifying questions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtopic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl LearningPath {
    /// True when topic, subtopic and level are all present and non-empty.
    pub fn is_complete(&self) -> bool {
        [&self.topic, &self.subtopic, &self.level]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

/// Who authored a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Bot => write!(f, "bot"),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A single transcript entry.
///
/// The transcript is append-only except that placeholder messages (those with
/// `is_processing` set) are removed once the backend call they stand in for
/// settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_processing: bool,
}

/// The outcome of interpreting one backend reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ParsedResponse {
    /// The reply contained a structurally valid JSON payload.
    Success {
        data: Value,
        /// True iff `data.questions` is a non-empty array.
        has_questions: bool,
        /// True iff `data.learningPath` has topic, subtopic and level populated.
        is_complete: bool,
    },
    /// The reply could not be interpreted. The raw text is kept for diagnostics.
    Failure { error: String, raw_text: String },
}

impl ParsedResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, ParsedResponse::Success { .. })
    }

    /// The learning path embedded in a successful payload, if any.
    pub fn learning_path(&self) -> Option<LearningPath> {
        match self {
            ParsedResponse::Success { data, .. } => data
                .get("learningPath")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            ParsedResponse::Failure { .. } => None,
        }
    }

    /// The clarifying questions embedded in a successful payload.
    ///
    /// Non-string entries are rendered through their JSON form rather than
    /// dropped, so the question count always matches the backend's list.
    pub fn questions(&self) -> Vec<String> {
        match self {
            ParsedResponse::Success { data, .. } => data
                .get("questions")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|q| q.as_str().map(str::to_owned).unwrap_or_else(|| q.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            ParsedResponse::Failure { .. } => Vec::new(),
        }
    }
}

/// One generated practice question with its answer and explanation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QAEntry {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

/// Practice questions generated for a completed learning path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QAData {
    #[serde(default)]
    pub answers: Vec<QAEntry>,
}

/// The conversation engine's externally observable state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Initial,
    Processing,
    WaitingForAnswers,
    GeneratingQa,
    Ready,
}

/// A durable snapshot of one conversation's full state.
///
/// `created_at`/`updated_at` are stamped by the session store on save; a
/// snapshot built by the engine leaves them unset so the store can preserve
/// the original creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub state: EngineState,
    #[serde(default)]
    pub original_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_response: Option<ParsedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_data: Option<QAData>,
    /// Denormalized from `parsed_response` so listings avoid re-parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_path: Option<LearningPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
}

impl Session {
    /// An empty snapshot carrying only an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            messages: Vec::new(),
            state: EngineState::Initial,
            original_prompt: String::new(),
            parsed_response: None,
            qa_data: None,
            learning_path: None,
            imported_at: None,
        }
    }
}

/// Projection of a session used by listing UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub topic: String,
    pub subtopic: String,
    pub level: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub has_questions: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_learning_path_completeness() {
        let empty = LearningPath::default();
        assert!(!empty.is_complete());

        let partial = LearningPath {
            topic: Some("Rust".to_string()),
            subtopic: None,
            level: Some("beginner".to_string()),
        };
        assert!(!partial.is_complete());

        let blank_field = LearningPath {
            topic: Some("Rust".to_string()),
            subtopic: Some(String::new()),
            level: Some("beginner".to_string()),
        };
        assert!(!blank_field.is_complete());

        let full = LearningPath {
            topic: Some("Rust".to_string()),
            subtopic: Some("ownership".to_string()),
            level: Some("beginner".to_string()),
        };
        assert!(full.is_complete());
    }

    #[test]
    fn test_sender_serialization() {
        assert_eq!(serde_json::to_string(&Sender::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Sender::Bot).unwrap(), "\"bot\"");
        assert_eq!(format!("{}", Sender::User), "user");
        assert_eq!(format!("{}", Sender::Bot), "bot");
    }

    #[test]
    fn test_engine_state_tags() {
        assert_eq!(
            serde_json::to_string(&EngineState::WaitingForAnswers).unwrap(),
            "\"waiting_for_answers\""
        );
        assert_eq!(
            serde_json::to_string(&EngineState::GeneratingQa).unwrap(),
            "\"generating_qa\""
        );
        let state: EngineState = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(state, EngineState::Ready);
    }

    #[test]
    fn test_message_serialization_skips_processing_flag() {
        let message = Message {
            id: 3,
            text: "hello".to_string(),
            sender: Sender::User,
            timestamp: Utc::now(),
            is_processing: false,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("isProcessing"));

        let placeholder = Message {
            is_processing: true,
            ..message
        };
        let json = serde_json::to_string(&placeholder).unwrap();
        assert!(json.contains("\"isProcessing\":true"));
    }

    #[test]
    fn test_parsed_response_learning_path_accessor() {
        let parsed = ParsedResponse::Success {
            data: json!({
                "learningPath": {"topic": "Go", "subtopic": "channels", "level": "intermediate"}
            }),
            has_questions: false,
            is_complete: true,
        };
        let path = parsed.learning_path().unwrap();
        assert_eq!(path.topic.as_deref(), Some("Go"));
        assert!(path.is_complete());

        let failure = ParsedResponse::Failure {
            error: "bad".to_string(),
            raw_text: "raw".to_string(),
        };
        assert!(failure.learning_path().is_none());
    }

    #[test]
    fn test_parsed_response_questions_accessor() {
        let parsed = ParsedResponse::Success {
            data: json!({"questions": ["What is your goal?", 42]}),
            has_questions: true,
            is_complete: false,
        };
        assert_eq!(
            parsed.questions(),
            vec!["What is your goal?".to_string(), "42".to_string()]
        );
    }

    #[test]
    fn test_session_round_trip_uses_camel_case() {
        let session = Session {
            original_prompt: "learn rust".to_string(),
            learning_path: Some(LearningPath {
                topic: Some("Rust".to_string()),
                subtopic: Some("traits".to_string()),
                level: Some("advanced".to_string()),
            }),
            ..Session::new("session_1")
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"originalPrompt\""));
        assert!(json.contains("\"learningPath\""));

        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_qa_data_tolerates_missing_fields() {
        let qa: QAData =
            serde_json::from_value(json!({"answers": [{"question": "Q1"}]})).unwrap();
        assert_eq!(qa.answers.len(), 1);
        assert_eq!(qa.answers[0].question, "Q1");
        assert!(qa.answers[0].answer.is_empty());
    }
}
