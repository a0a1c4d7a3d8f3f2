//! Conversation Orchestration Engine
//!
//! A finite-state machine that drives the learning-path dialogue: it
//! sequences user input, builds outbound prompts, interprets backend replies,
//! collects clarifying-question answers, and persists session snapshots.
//!
//! States: `Initial` → `Processing` → (`WaitingForAnswers` | `GeneratingQa` |
//! `Ready`). There is no terminal state; `Ready` keeps accepting free-form
//! chat turns. All failures are handled locally: a failed backend call or an
//! unparseable reply becomes a bot transcript message and a fallback to a
//! safe state, never an error surfaced to the caller.

use crate::llm::{ModelTier, TextGenerator};
use crate::models::{EngineState, LearningPath, Message, ParsedResponse, QAData, Sender, Session};
use crate::parser;
use crate::prompt::PromptTemplates;
use crate::store::{self, SessionStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MSG_ANALYZING: &str = "Analyzing your learning path...";
const MSG_ANALYZED: &str = "Learning path analyzed! Check the main window for details.";
const MSG_ANSWER_INSTRUCTIONS: &str =
    "Please answer these questions one by one. I'll process your responses as you send them.";
const MSG_REQUEST_FAILED: &str = "Error processing your request. Please try again.";
const MSG_PROCESSING_ANSWERS: &str = "Processing your complete information...";
const MSG_ANSWERS_FAILED: &str = "Error processing your answers. Please try again.";
const MSG_PATH_UPDATED: &str = "Complete! Your learning path has been updated.";
const MSG_QA_PLACEHOLDER_INITIAL: &str = "Generating practice questions for your learning path...";
const MSG_QA_PLACEHOLDER_FOLLOW_UP: &str =
    "Learning path complete! Generating practice questions...";
const MSG_QA_GENERATED: &str =
    "Practice questions generated! Check the main window to start practicing.";
const MSG_QA_FAILED_INITIAL: &str = "Error generating questions. Please try again.";
const MSG_QA_FAILED_FOLLOW_UP: &str =
    "Learning path complete, but failed to generate practice questions.";
const MSG_CHAT_FAILED: &str = "Sorry, I encountered an error processing your request.";
const MSG_REGENERATED: &str = "Questions regenerated successfully!";
const MSG_REGENERATE_FAILED: &str = "Failed to regenerate questions. Please try again.";

/// The conversation state machine.
///
/// The engine exclusively owns the in-memory conversation state; the injected
/// [`SessionStore`] owns the durable copy and the current-session pointer.
pub struct ConversationEngine {
    generator: Arc<dyn TextGenerator>,
    store: SessionStore,
    templates: PromptTemplates,

    state: EngineState,
    messages: Vec<Message>,
    next_message_id: u64,
    parsed_response: Option<ParsedResponse>,
    qa_data: Option<QAData>,
    current_session_id: Option<String>,
    original_prompt: String,
    pending_questions: Vec<String>,
    collected_answers: Vec<String>,
    /// Bumped whenever the conversation identity changes (new or loaded
    /// session). Each in-flight backend call captures the value at call time;
    /// a completion whose token no longer matches is discarded so a stale
    /// continuation cannot clobber newer state.
    generation: u64,
}

impl ConversationEngine {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: SessionStore,
        templates: PromptTemplates,
    ) -> Self {
        Self {
            generator,
            store,
            templates,
            state: EngineState::Initial,
            messages: Vec::new(),
            next_message_id: 0,
            parsed_response: None,
            qa_data: None,
            current_session_id: None,
            original_prompt: String::new(),
            pending_questions: Vec::new(),
            collected_answers: Vec::new(),
            generation: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn parsed_response(&self) -> Option<&ParsedResponse> {
        self.parsed_response.as_ref()
    }

    pub fn qa_data(&self) -> Option<&QAData> {
        self.qa_data.as_ref()
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn pending_questions(&self) -> &[String] {
        &self.pending_questions
    }

    pub fn collected_answers(&self) -> &[String] {
        &self.collected_answers
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The learning path from the most recent successful analysis, if any.
    pub fn learning_path(&self) -> Option<LearningPath> {
        self.parsed_response
            .as_ref()
            .and_then(ParsedResponse::learning_path)
    }

    /// Dispatches one user message according to the current state.
    pub async fn handle_user_message(&mut self, text: &str) {
        self.push_message(text, Sender::User, false);

        match self.state {
            EngineState::Initial => self.handle_initial_message(text).await,
            EngineState::WaitingForAnswers => self.handle_answer(text).await,
            EngineState::Ready => self.handle_chat_turn(text).await,
            EngineState::Processing | EngineState::GeneratingQa => {
                debug!(state = ?self.state, "message received while a backend call is in flight");
            }
        }

        self.autosave();
    }

    /// First turn of a fresh conversation: analyze the request as a learning
    /// path and branch on what the backend sends back.
    async fn handle_initial_message(&mut self, text: &str) {
        if self.current_session_id.is_none() {
            let id = store::generate_session_id();
            info!(session_id = %id, "allocated session for new conversation");
            self.current_session_id = Some(id);
        }
        self.original_prompt = text.to_string();
        self.state = EngineState::Processing;
        self.push_message(MSG_ANALYZING, Sender::Bot, true);

        let token = self.generation;
        let prompt = self.templates.build_full_prompt(text);
        let result = self.generator.generate(&prompt, ModelTier::Fast).await;
        if token != self.generation {
            debug!("discarding stale analysis reply");
            return;
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "backend call failed during analysis");
                self.clear_processing();
                self.push_message(MSG_REQUEST_FAILED, Sender::Bot, false);
                self.state = EngineState::Initial;
                return;
            }
        };

        let parsed = parser::parse_learning_path_response(&reply);
        self.clear_processing();
        match &parsed {
            ParsedResponse::Success { .. } => self.push_message(MSG_ANALYZED, Sender::Bot, false),
            ParsedResponse::Failure { error, .. } => {
                self.push_message(format!("Error: {error}"), Sender::Bot, false)
            }
        }
        self.parsed_response = Some(parsed.clone());

        match &parsed {
            ParsedResponse::Success {
                has_questions: true,
                ..
            } => {
                self.pending_questions = parsed.questions();
                self.collected_answers.clear();
                self.state = EngineState::WaitingForAnswers;

                for (index, question) in self.pending_questions.clone().iter().enumerate() {
                    self.push_message(
                        format!("Question {}: {}", index + 1, question),
                        Sender::Bot,
                        false,
                    );
                }
                self.push_message(MSG_ANSWER_INSTRUCTIONS, Sender::Bot, false);
            }
            ParsedResponse::Success {
                is_complete: true, ..
            } => {
                self.run_qa_generation(MSG_QA_PLACEHOLDER_INITIAL, MSG_QA_FAILED_INITIAL)
                    .await;
            }
            _ => {
                self.state = EngineState::Ready;
            }
        }
    }

    /// Collects one answer to the pending clarifying questions; the final
    /// answer triggers the follow-up analysis call.
    async fn handle_answer(&mut self, text: &str) {
        self.collected_answers.push(text.to_string());

        if self.collected_answers.len() < self.pending_questions.len() {
            let remaining = self.pending_questions.len() - self.collected_answers.len();
            let plural = if remaining > 1 { "s" } else { "" };
            self.push_message(
                format!("Got it! {remaining} more question{plural} to go."),
                Sender::Bot,
                false,
            );
            return;
        }

        self.state = EngineState::Processing;
        self.push_message(MSG_PROCESSING_ANSWERS, Sender::Bot, true);

        let follow_up = parser::build_follow_up_prompt(
            &self.original_prompt,
            &self.pending_questions,
            &self.collected_answers,
        );
        let prompt = self.templates.build_full_prompt(&follow_up);

        let token = self.generation;
        let result = self.generator.generate(&prompt, ModelTier::Fast).await;
        if token != self.generation {
            debug!("discarding stale follow-up reply");
            return;
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "backend call failed during follow-up");
                self.retry_last_answer();
                return;
            }
        };

        let parsed = parser::parse_learning_path_response(&reply);
        self.parsed_response = Some(parsed.clone());
        match &parsed {
            ParsedResponse::Success {
                is_complete: true, ..
            } => {
                self.run_qa_generation(MSG_QA_PLACEHOLDER_FOLLOW_UP, MSG_QA_FAILED_FOLLOW_UP)
                    .await;
            }
            ParsedResponse::Success { .. } => {
                self.clear_processing();
                self.push_message(MSG_PATH_UPDATED, Sender::Bot, false);
                self.state = EngineState::Ready;
            }
            ParsedResponse::Failure { error, .. } => {
                debug!(%error, "follow-up reply failed to parse");
                self.retry_last_answer();
            }
        }
    }

    /// Falls back to `WaitingForAnswers` after a failed follow-up turn. The
    /// last collected answer is dropped so resending it cannot duplicate an
    /// entry and the answer-count invariant keeps holding.
    fn retry_last_answer(&mut self) {
        self.collected_answers.pop();
        self.clear_processing();
        self.push_message(MSG_ANSWERS_FAILED, Sender::Bot, false);
        self.state = EngineState::WaitingForAnswers;
    }

    /// Free-form chat turn once the learning path work is done.
    async fn handle_chat_turn(&mut self, text: &str) {
        let prompt = self.templates.build_full_prompt(text);
        let token = self.generation;
        let result = self.generator.generate(&prompt, ModelTier::Fast).await;
        if token != self.generation {
            debug!("discarding stale chat reply");
            return;
        }

        match result {
            Ok(reply) => self.push_message(reply, Sender::Bot, false),
            Err(err) => {
                warn!(error = %err, "backend call failed during chat turn");
                self.push_message(MSG_CHAT_FAILED, Sender::Bot, false);
            }
        }
    }

    /// Generates practice questions for the current learning path. A failure
    /// appends `failure_notice` but never blocks the conversation: the engine
    /// always ends up in `Ready`.
    async fn run_qa_generation(&mut self, placeholder: &str, failure_notice: &str) {
        self.state = EngineState::GeneratingQa;
        self.clear_processing();
        self.push_message(placeholder, Sender::Bot, true);

        let token = self.generation;
        let outcome = self.generate_qa_data().await;
        if token != self.generation {
            debug!("discarding stale practice question reply");
            return;
        }

        self.clear_processing();
        match outcome {
            Some(qa) => {
                self.qa_data = Some(qa);
                self.push_message(MSG_QA_GENERATED, Sender::Bot, false);
            }
            None => self.push_message(failure_notice, Sender::Bot, false),
        }
        self.state = EngineState::Ready;
    }

    /// Calls the accurate model with the Q&A prompt and parses the result.
    /// Any failure collapses to `None`; the caller decides the user-facing
    /// message.
    async fn generate_qa_data(&self) -> Option<QAData> {
        let path = self.learning_path()?;
        let prompt = self.templates.build_qa_prompt(&path);

        let reply = match self.generator.generate(&prompt, ModelTier::Accurate).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "backend call failed during practice question generation");
                return None;
            }
        };

        match parser::parse_qa_response(&reply) {
            ParsedResponse::Success { data, .. } => match serde_json::from_value(data) {
                Ok(qa) => Some(qa),
                Err(err) => {
                    warn!(error = %err, "practice question payload has an unexpected shape");
                    None
                }
            },
            ParsedResponse::Failure { error, .. } => {
                warn!(%error, "practice question reply failed to parse");
                None
            }
        }
    }

    /// Re-runs Q&A generation against the stored learning path. A no-op when
    /// no complete path exists; on failure existing Q&A data stays untouched.
    pub async fn regenerate_questions(&mut self) {
        if self.learning_path().is_none() {
            debug!("no learning path available; nothing to regenerate");
            return;
        }

        let token = self.generation;
        let outcome = self.generate_qa_data().await;
        if token != self.generation {
            debug!("discarding stale regeneration reply");
            return;
        }

        match outcome {
            Some(qa) => {
                self.qa_data = Some(qa);
                self.push_message(MSG_REGENERATED, Sender::Bot, false);
            }
            None => self.push_message(MSG_REGENERATE_FAILED, Sender::Bot, false),
        }
        self.autosave();
    }

    /// Resets all conversation state and adopts the given session id.
    pub fn create_new_session(&mut self, session_id: impl Into<String>) {
        self.generation += 1;
        self.current_session_id = Some(session_id.into());
        self.state = EngineState::Initial;
        self.messages.clear();
        self.next_message_id = 0;
        self.parsed_response = None;
        self.qa_data = None;
        self.original_prompt.clear();
        self.pending_questions.clear();
        self.collected_answers.clear();
        info!(session_id = ?self.current_session_id, "started new session");
    }

    /// Restores a stored session and marks it current. Unknown ids are a
    /// silent no-op.
    pub fn load_session(&mut self, session_id: &str) {
        let Some(session) = self.store.get(session_id) else {
            debug!(%session_id, "session not found; load is a no-op");
            return;
        };
        let id = session.id.clone();
        self.adopt_session(session);
        if let Err(err) = self.store.set_current(&id) {
            warn!(error = %err, "failed to update current session pointer");
        }
    }

    /// Restores whatever session the store's current-session pointer refers
    /// to, typically at startup.
    pub fn restore_current_session(&mut self) {
        if let Some(session) = self.store.get_current() {
            self.adopt_session(session);
        }
    }

    fn adopt_session(&mut self, session: Session) {
        self.generation += 1;
        info!(session_id = %session.id, "restoring session");
        self.current_session_id = Some(session.id);
        self.next_message_id = session
            .messages
            .iter()
            .map(|m| m.id + 1)
            .max()
            .unwrap_or(0);
        self.messages = session.messages;
        self.state = session.state;
        self.original_prompt = session.original_prompt;
        self.parsed_response = session.parsed_response;
        self.qa_data = session.qa_data;
        self.pending_questions.clear();
        self.collected_answers.clear();
    }

    fn push_message(&mut self, text: impl Into<String>, sender: Sender, is_processing: bool) {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.messages.push(Message {
            id,
            text: text.into(),
            sender,
            timestamp: Utc::now(),
            is_processing,
        });
    }

    fn clear_processing(&mut self) {
        self.messages.retain(|m| !m.is_processing);
    }

    /// Persists a snapshot of the live conversation. Failures are logged and
    /// deliberately discarded: losing session durability is preferable to
    /// interrupting an active conversation.
    fn autosave(&mut self) {
        let Some(id) = self.current_session_id.clone() else {
            return;
        };
        let snapshot = Session {
            messages: self.messages.clone(),
            state: self.state,
            original_prompt: self.original_prompt.clone(),
            parsed_response: self.parsed_response.clone(),
            qa_data: self.qa_data.clone(),
            learning_path: self.learning_path(),
            ..Session::new(id)
        };
        if let Err(err) = self.store.save(snapshot) {
            warn!(error = %err, "failed to persist session snapshot");
        }
    }
}
