//! Prompt Template Handling
//!
//! Templates are plain markdown files with a literal placeholder token. They
//! are loaded once at startup from the configured prompts directory; a missing
//! template degrades to passing the user text through unmodified.

use crate::models::LearningPath;
use std::path::Path;
use tracing::warn;

/// Placeholder replaced by the user's message in the analysis template.
pub const PROMPT_PLACEHOLDER: &str = "[PROMPT]";
/// Placeholder replaced by the serialized learning path in the Q&A template.
pub const PLAN_PLACEHOLDER: &str = "[PLAN]";

pub const ANALYZE_TEMPLATE_FILE: &str = "analyze_prompt.md";
pub const QA_TEMPLATE_FILE: &str = "create_questions_and_answers.md";

/// The pair of templates the engine builds outbound prompts from.
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    pub analyze: Option<String>,
    pub qa: Option<String>,
}

impl PromptTemplates {
    /// Loads both templates from `dir`. Unreadable files are logged and
    /// treated as absent rather than failing startup.
    pub fn load(dir: &Path) -> Self {
        Self {
            analyze: read_template(&dir.join(ANALYZE_TEMPLATE_FILE)),
            qa: read_template(&dir.join(QA_TEMPLATE_FILE)),
        }
    }

    /// Substitutes the first placeholder occurrence in the analysis template,
    /// or passes the user text through when no template is available.
    pub fn build_full_prompt(&self, user_prompt: &str) -> String {
        match &self.analyze {
            Some(template) => template.replacen(PROMPT_PLACEHOLDER, user_prompt, 1),
            None => user_prompt.to_string(),
        }
    }

    /// Builds the Q&A generation prompt from a learning path. Without a
    /// template the serialized path is sent on its own.
    pub fn build_qa_prompt(&self, learning_path: &LearningPath) -> String {
        let plan = serde_json::to_string(learning_path).unwrap_or_default();
        match &self.qa {
            Some(template) => template.replacen(PLAN_PLACEHOLDER, &plan, 1),
            None => plan,
        }
    }
}

fn read_template(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "prompt template unavailable");
            None
        }
    }
}
