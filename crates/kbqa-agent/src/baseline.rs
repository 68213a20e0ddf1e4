//! Prompt-only comparison agent: one model call, no tools.

use serde::{Deserialize, Serialize};

use crate::answer::{finalize_answer, REFUSAL};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ModelTurn};
use crate::prompts::prompt_only_system_prompt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineAnswer {
    pub answer: String,
    pub raw: Option<String>,
    pub error: Option<String>,
}

pub struct PromptOnlyAgent {
    model: Box<dyn ChatModel>,
}

impl PromptOnlyAgent {
    pub fn new(model: Box<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn answer(&self, question: &str) -> BaselineAnswer {
        let messages = [ChatMessage::User {
            content: question.to_string(),
        }];
        let request = ChatRequest {
            system: prompt_only_system_prompt(),
            messages: &messages,
            tools: &[],
        };
        match self.model.chat(&request) {
            Ok(ModelTurn::Text { text }) | Ok(ModelTurn::ToolCalls { text, .. }) => BaselineAnswer {
                answer: finalize_answer(&text, question),
                raw: Some(text),
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "prompt-only model call failed");
                BaselineAnswer {
                    answer: REFUSAL.to_string(),
                    raw: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
