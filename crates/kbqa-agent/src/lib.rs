//! # kbqa-agent
//!
//! A tool-using question-answering agent that grounds every claim in a
//! knowledge graph before answering, plus a prompt-only baseline for
//! comparison.
//!
//! ```text
//! question ─▶ GroundedAgent ──ChatModel──▶ tool calls ─▶ Toolkit ─▶ kbqa-graph
//!                 │                               ▲            │
//!                 │                               └─ProtocolState (per run)
//!                 ▼
//!        AnswerSanitizer ─▶ Run { final_answer, tool_calls, ... }
//! ```
//!
//! The tool order (search → properties → escalation → article) is enforced
//! by [`ProtocolState`], not by prompting alone: property fetches only
//! accept ids a search returned, and the article fallback only opens after
//! an escalation query was attempted.

pub mod agent;
pub mod answer;
pub mod baseline;
pub mod llm;
pub mod prompts;
pub mod protocol;
pub mod run;
pub mod tools;

pub use agent::{AgentOptions, AgentState, GroundedAgent};
pub use answer::{finalize_answer, is_process_message, sanitize_answer, AnswerSanitizer, REFUSAL};
pub use baseline::{BaselineAnswer, PromptOnlyAgent};
pub use llm::{
    build_chat_model, ChatMessage, ChatModel, ChatRequest, LlmBackend, LlmError, LlmSettings,
    ModelTurn, RawToolCall, ScriptedModel, ToolSpec,
};
pub use protocol::ProtocolState;
pub use run::{Run, StopReason, ToolCallRecord};
pub use tools::{OutcomeKind, ToolOutcome, ToolRequest, ToolSettings, Toolkit};
