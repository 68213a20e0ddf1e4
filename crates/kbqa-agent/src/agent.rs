//! The retrieval agent's control loop.
//!
//! ```text
//! Reasoning ──tool calls──▶ ToolCall ──results──▶ Reasoning
//!     │
//!     └──final text──▶ Responding ──sanitize──▶ Done
//! ```
//!
//! Every model turn and every tool execution costs one step. Process chatter
//! (planning text, tool names written as prose, serialized tool calls) does
//! not end the loop: the model is nudged to continue instead.

use kbqa_graph::config::env_usize;
use kbqa_graph::GraphResult;
use serde_json::Value;

use crate::answer::{finalize_answer, is_process_message, REFUSAL};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ModelTurn, RawToolCall};
use crate::prompts::{retrieval_system_prompt, CONTINUE_NUDGE};
use crate::protocol::ProtocolState;
use crate::run::{Run, StopReason, ToolCallRecord};
use crate::tools::{ToolOutcome, ToolRequest, Toolkit};

pub const MAX_STEPS_ENV: &str = "KBQA_MAX_STEPS";
pub const MAX_CONSECUTIVE_TOOL_ERRORS_ENV: &str = "KBQA_MAX_CONSECUTIVE_TOOL_ERRORS";

pub const DEFAULT_MAX_STEPS: usize = 40;
pub const DEFAULT_MAX_CONSECUTIVE_TOOL_ERRORS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Reasoning,
    ToolCall,
    Responding,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentOptions {
    pub max_steps: usize,
    pub max_consecutive_tool_errors: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_consecutive_tool_errors: DEFAULT_MAX_CONSECUTIVE_TOOL_ERRORS,
        }
    }
}

impl AgentOptions {
    pub fn from_env() -> GraphResult<Self> {
        Ok(Self {
            max_steps: env_usize(MAX_STEPS_ENV, DEFAULT_MAX_STEPS, 1, 500)?,
            max_consecutive_tool_errors: env_usize(
                MAX_CONSECUTIVE_TOOL_ERRORS_ENV,
                DEFAULT_MAX_CONSECUTIVE_TOOL_ERRORS,
                1,
                100,
            )?,
        })
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

/// Loop bookkeeping for a single run.
struct Progress {
    phase: AgentState,
    steps: usize,
    consecutive_errors: usize,
    records: Vec<ToolCallRecord>,
    last_chatter: Option<String>,
}

impl Progress {
    fn new() -> Self {
        Self {
            phase: AgentState::Reasoning,
            steps: 0,
            consecutive_errors: 0,
            records: Vec::new(),
            last_chatter: None,
        }
    }

    fn enter(&mut self, next: AgentState) {
        if self.phase != next {
            tracing::trace!(from = ?self.phase, to = ?next, "agent transition");
            self.phase = next;
        }
    }

    /// Consume one step, or report that the ceiling was reached.
    fn take_step(&mut self, max_steps: usize) -> bool {
        if self.steps >= max_steps {
            return false;
        }
        self.steps += 1;
        true
    }
}

pub struct GroundedAgent {
    model: Box<dyn ChatModel>,
    toolkit: Toolkit,
    options: AgentOptions,
}

impl GroundedAgent {
    pub fn new(model: Box<dyn ChatModel>, toolkit: Toolkit) -> Self {
        Self {
            model,
            toolkit,
            options: AgentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> AgentOptions {
        self.options
    }

    pub fn model(&self) -> &dyn ChatModel {
        self.model.as_ref()
    }

    /// Answer one question with fresh protocol state.
    pub fn answer(&self, question: &str) -> Run {
        let mut state = ProtocolState::new();
        self.answer_with_state(question, &mut state)
    }

    /// Answer one question, resetting `state` first so no authorization
    /// leaks in from a previous run.
    pub fn answer_with_state(&self, question: &str, state: &mut ProtocolState) -> Run {
        state.reset();
        tracing::info!(question = %question, model = %self.model.describe(), "run started");

        let tools = self.toolkit.specs();
        let mut messages = vec![ChatMessage::User {
            content: question.to_string(),
        }];
        let mut progress = Progress::new();
        let mut final_text: Option<String> = None;
        let mut error: Option<String> = None;

        let stop_reason = 'run: loop {
            progress.enter(AgentState::Reasoning);
            if !progress.take_step(self.options.max_steps) {
                break 'run StopReason::StepLimit;
            }

            let request = ChatRequest {
                system: retrieval_system_prompt(),
                messages: &messages,
                tools: &tools,
            };
            let turn = match self.model.chat(&request) {
                Ok(turn) => turn,
                Err(e) => {
                    tracing::warn!(error = %e, step = progress.steps, "model call failed");
                    error = Some(e.to_string());
                    break 'run StopReason::ModelError;
                }
            };

            let text = match turn {
                ModelTurn::ToolCalls { text, calls } if !calls.is_empty() => {
                    progress.enter(AgentState::ToolCall);
                    let calls = assign_call_ids(calls, progress.records.len());
                    messages.push(ChatMessage::Assistant {
                        content: text,
                        tool_calls: calls.clone(),
                    });
                    for call in &calls {
                        if !progress.take_step(self.options.max_steps) {
                            break 'run StopReason::StepLimit;
                        }
                        let outcome = self.dispatch(state, &call.name, &call.arguments);
                        if outcome.kind.is_error() {
                            progress.consecutive_errors += 1;
                        } else {
                            progress.consecutive_errors = 0;
                        }
                        messages.push(ChatMessage::Tool {
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                            content: outcome.text.clone(),
                        });
                        progress.records.push(ToolCallRecord {
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                            output: outcome.text,
                            outcome: outcome.kind,
                        });
                        if progress.consecutive_errors >= self.options.max_consecutive_tool_errors {
                            tracing::warn!(
                                errors = progress.consecutive_errors,
                                "too many consecutive tool errors"
                            );
                            break 'run StopReason::ToolErrors;
                        }
                    }
                    continue 'run;
                }
                ModelTurn::ToolCalls { text, .. } | ModelTurn::Text { text } => text,
            };

            if is_process_message(&text) {
                tracing::warn!(step = progress.steps, text = %text, "process chatter instead of an answer");
                messages.push(ChatMessage::Assistant {
                    content: text.clone(),
                    tool_calls: Vec::new(),
                });
                messages.push(ChatMessage::User {
                    content: CONTINUE_NUDGE.to_string(),
                });
                progress.last_chatter = Some(text);
                continue 'run;
            }

            progress.enter(AgentState::Responding);
            final_text = Some(text);
            break 'run StopReason::Answered;
        };

        let raw_answer = final_text.or(progress.last_chatter.take());
        // Cleanup can leave chatter intact (a tool named in prose); never return it.
        let final_answer = match raw_answer.as_deref().map(|raw| finalize_answer(raw, question)) {
            Some(answer) if !is_process_message(&answer) => answer,
            _ => REFUSAL.to_string(),
        };
        progress.enter(AgentState::Done);

        tracing::info!(
            steps = progress.steps,
            tool_calls = progress.records.len(),
            stop = ?stop_reason,
            "run finished"
        );

        Run {
            question: question.to_string(),
            tool_calls: progress.records,
            final_answer,
            raw_answer,
            steps: progress.steps,
            stop_reason,
            error,
        }
    }

    fn dispatch(&self, state: &mut ProtocolState, name: &str, arguments: &Value) -> ToolOutcome {
        let outcome = match ToolRequest::parse(name, arguments) {
            Ok(request) => self.toolkit.execute(state, &request),
            Err(outcome) => outcome,
        };
        tracing::debug!(tool = %name, outcome = ?outcome.kind, "tool executed");
        outcome
    }
}

/// Providers may omit call ids; tool messages still need one to refer to.
fn assign_call_ids(calls: Vec<RawToolCall>, offset: usize) -> Vec<RawToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, mut call)| {
            if call.id.trim().is_empty() {
                call.id = format!("call_{}", offset + i + 1);
            }
            call
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::tools::{OutcomeKind, SEARCH_ENTITY_CANDIDATES};
    use kbqa_graph::{FnEndpoint, GraphError, StaticDocuments};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn offline_toolkit() -> Toolkit {
        Toolkit::new(
            Box::new(FnEndpoint::new(|_query: &str| Ok(Vec::new()))),
            Box::new(StaticDocuments::new()),
        )
    }

    fn agent(turns: Vec<ModelTurn>) -> GroundedAgent {
        GroundedAgent::new(Box::new(ScriptedModel::new(turns)), offline_toolkit())
    }

    #[test]
    fn plain_answer_ends_the_loop() {
        let run = agent(vec![ModelTurn::text("Paris is the capital of France.")])
            .answer("What is the capital of France?");
        assert_eq!(run.final_answer, "Paris is the capital of France.");
        assert_eq!(run.stop_reason, StopReason::Answered);
        assert_eq!(run.steps, 1);
        assert!(run.tool_calls.is_empty());
    }

    #[test]
    fn tool_calls_are_recorded_and_fed_back() {
        let run = agent(vec![
            ModelTurn::tool_call(SEARCH_ENTITY_CANDIDATES, json!({"entity_name": "Helena Vargass"})),
            ModelTurn::text("I cannot verify that Helena Vargass exists."),
        ])
        .answer("Who is Helena Vargass?");

        assert_eq!(run.tool_calls.len(), 1);
        assert_eq!(run.tool_calls[0].outcome, OutcomeKind::NoData);
        assert!(run.tool_calls[0].output.starts_with("NO CANDIDATES FOUND"));
        assert_eq!(run.final_answer, "I cannot verify that Helena Vargass exists.");
        // model, tool, model
        assert_eq!(run.steps, 3);
    }

    #[test]
    fn chatter_is_nudged_not_returned() {
        let run = agent(vec![
            ModelTurn::text("Let me search for the capital first."),
            ModelTurn::text("Paris is the capital of France."),
        ])
        .answer("What is the capital of France?");
        assert_eq!(run.final_answer, "Paris is the capital of France.");
        assert_eq!(run.stop_reason, StopReason::Answered);
    }

    #[test]
    fn chatter_only_run_resolves_to_refusal() {
        let run = agent(vec![ModelTurn::text(
            "<|python_tag|>{\"name\": \"search_entity_candidates\", \"parameters\": {\"entity_name\": \"France\"}}",
        )])
        .answer("What is the capital of France?");
        assert_eq!(run.final_answer, REFUSAL);
        assert_eq!(run.stop_reason, StopReason::ModelError);
        assert!(run.error.is_some());
    }

    #[test]
    fn step_ceiling_yields_refusal() {
        let turns = (0..10)
            .map(|_| ModelTurn::tool_call("no_such_tool", json!({})))
            .collect();
        let run = agent(turns)
            .with_options(AgentOptions {
                max_steps: 5,
                max_consecutive_tool_errors: 100,
            })
            .answer("q");
        assert_eq!(run.stop_reason, StopReason::StepLimit);
        assert_eq!(run.steps, 5);
        assert_eq!(run.final_answer, REFUSAL);
    }

    #[test]
    fn chatter_naming_a_tool_is_never_the_fallback_answer() {
        let turns = (0..10)
            .map(|_| ModelTurn::text("I must call search_entity_candidates to verify France."))
            .collect();
        let run = agent(turns)
            .with_options(AgentOptions::default().with_max_steps(3))
            .answer("What is the capital of France?");
        assert_eq!(run.stop_reason, StopReason::StepLimit);
        assert_eq!(
            run.raw_answer.as_deref(),
            Some("I must call search_entity_candidates to verify France.")
        );
        assert_eq!(run.final_answer, REFUSAL);
    }

    /// Replays scripted turns and records every tool call id it is sent back.
    struct IdRecordingModel {
        inner: ScriptedModel,
        seen_ids: Rc<RefCell<Vec<String>>>,
    }

    impl ChatModel for IdRecordingModel {
        fn describe(&self) -> String {
            "id-recording".into()
        }

        fn chat(&self, request: &ChatRequest<'_>) -> Result<ModelTurn, crate::llm::LlmError> {
            let ids = request.messages.iter().filter_map(|message| match message {
                ChatMessage::Tool { call_id, .. } => Some(call_id.clone()),
                _ => None,
            });
            *self.seen_ids.borrow_mut() = ids.collect();
            self.inner.chat(request)
        }
    }

    #[test]
    fn call_ids_stay_unique_across_turns() {
        let seen_ids = Rc::new(RefCell::new(Vec::new()));
        let model = IdRecordingModel {
            inner: ScriptedModel::new(vec![
                ModelTurn::tool_call(SEARCH_ENTITY_CANDIDATES, json!({"entity_name": "France"})),
                ModelTurn::tool_call(SEARCH_ENTITY_CANDIDATES, json!({"entity_name": "Paris"})),
                ModelTurn::text("I cannot verify that."),
            ]),
            seen_ids: Rc::clone(&seen_ids),
        };
        let run = GroundedAgent::new(Box::new(model), offline_toolkit())
            .answer("What is the capital of France?");

        assert_eq!(run.tool_calls.len(), 2);
        assert_eq!(*seen_ids.borrow(), vec!["call_1".to_string(), "call_2".to_string()]);
    }

    #[test]
    fn consecutive_tool_errors_trip_the_breaker() {
        let turns = (0..10)
            .map(|_| ModelTurn::tool_call("fetch_entity_properties", json!({"qid": "Q42"})))
            .collect();
        let run = agent(turns)
            .with_options(AgentOptions {
                max_steps: 100,
                max_consecutive_tool_errors: 3,
            })
            .answer("q");
        assert_eq!(run.stop_reason, StopReason::ToolErrors);
        assert_eq!(run.tool_calls.len(), 3);
        assert!(run
            .tool_calls
            .iter()
            .all(|c| c.outcome == OutcomeKind::ProtocolViolation));
        assert_eq!(run.final_answer, REFUSAL);
    }

    #[test]
    fn upstream_failures_do_not_surface_in_the_answer() {
        let toolkit = Toolkit::new(
            Box::new(FnEndpoint::new(|_query: &str| {
                Err(GraphError::Network("connection refused".into()))
            })),
            Box::new(StaticDocuments::new()),
        );
        let model = ScriptedModel::new(vec![
            ModelTurn::tool_call(SEARCH_ENTITY_CANDIDATES, json!({"entity_name": "France"})),
            ModelTurn::text("I cannot verify that France exists."),
        ]);
        let run = GroundedAgent::new(Box::new(model), toolkit).answer("Where is France?");
        assert!(!run.final_answer.contains("connection refused"));
        assert_eq!(run.stop_reason, StopReason::Answered);
    }

    #[test]
    fn missing_call_ids_are_filled() {
        let calls = vec![
            RawToolCall {
                id: String::new(),
                name: "a".into(),
                arguments: Value::Null,
            },
            RawToolCall {
                id: "given".into(),
                name: "b".into(),
                arguments: Value::Null,
            },
        ];
        let ids: Vec<String> = assign_call_ids(calls, 2).into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["call_3".to_string(), "given".to_string()]);
    }
}
