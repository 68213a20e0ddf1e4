//! Language-model boundary.
//!
//! The agent talks to the model through [`ChatModel`]: it sends the system
//! prompt, the conversation so far and the advertised tools, and gets back a
//! [`ModelTurn`] (tool calls or free text).
//!
//! Backends:
//! - `Mock`: a [`ScriptedModel`] replaying a fixed list of turns (tests, demos)
//! - `Ollama`: native `/api/chat` with tool calling (feature `llm-ollama`)
//! - `OpenAI`: `/v1/chat/completions` with tool calling (feature `llm-openai`)

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;

use kbqa_graph::config::{env_f32, env_string, env_usize};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const LLM_BACKEND_ENV: &str = "KBQA_LLM_BACKEND";
pub const LLM_MODEL_ENV: &str = "KBQA_LLM_MODEL";
pub const LLM_TEMPERATURE_ENV: &str = "KBQA_LLM_TEMPERATURE";
pub const LLM_TIMEOUT_SECS_ENV: &str = "KBQA_LLM_TIMEOUT_SECS";
pub const MOCK_SCRIPT_ENV: &str = "KBQA_MOCK_SCRIPT";
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "gpt-oss:120b-cloud";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_LLM_TIMEOUT_SECS: usize = 180;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("scripted model has no turns left")]
    ScriptExhausted,
}

// ============================================================================
// Conversation types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default)]
        tool_calls: Vec<RawToolCall>,
    },
    Tool {
        call_id: String,
        name: String,
        content: String,
    },
}

/// One model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelTurn {
    ToolCalls {
        #[serde(default)]
        text: String,
        calls: Vec<RawToolCall>,
    },
    Text {
        text: String,
    },
}

impl ModelTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCalls {
            text: String::new(),
            calls: vec![RawToolCall {
                id: String::new(),
                name: name.into(),
                arguments,
            }],
        }
    }
}

pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
}

pub trait ChatModel {
    /// Short human-readable description (`ollama(http://…) model=…`).
    fn describe(&self) -> String;

    fn chat(&self, request: &ChatRequest<'_>) -> Result<ModelTurn, LlmError>;
}

impl<T: ChatModel + ?Sized> ChatModel for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn chat(&self, request: &ChatRequest<'_>) -> Result<ModelTurn, LlmError> {
        (**self).chat(request)
    }
}

/// Flatten provider message content into plain text.
///
/// Content may be a string, a list of strings, or a list of typed blocks
/// (`{"type": "text", "text": ...}`). Some providers stream incremental
/// prefixes as separate parts; in that case only the final part is kept.
pub fn content_to_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("content"))
            .map(content_to_text)
            .unwrap_or_default(),
        Value::Array(parts) => {
            let texts: Vec<String> = parts
                .iter()
                .map(content_to_text)
                .filter(|t| !t.trim().is_empty())
                .collect();
            let incremental = texts.len() > 1
                && texts
                    .windows(2)
                    .all(|pair| pair[1].trim_start().starts_with(pair[0].trim()));
            if incremental {
                texts.last().cloned().unwrap_or_default()
            } else {
                texts.join(" ")
            }
        }
        other => other.to_string(),
    }
}

// ============================================================================
// Scripted model
// ============================================================================

/// Replays a fixed sequence of turns, one per `chat` call.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    turns: RefCell<VecDeque<ModelTurn>>,
    calls: Cell<usize>,
    last_message_count: Cell<usize>,
}

impl ScriptedModel {
    pub fn new(turns: impl IntoIterator<Item = ModelTurn>) -> Self {
        Self {
            turns: RefCell::new(turns.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Parse a JSON array of turns, e.g.
    /// `[{"type": "tool_calls", "calls": [{"name": "...", "arguments": {...}}]},
    ///   {"type": "text", "text": "..."}]`.
    pub fn from_json(text: &str) -> Result<Self, LlmError> {
        let turns: Vec<ModelTurn> = serde_json::from_str(text)
            .map_err(|e| LlmError::Config(format!("invalid mock script: {e}")))?;
        Ok(Self::new(turns))
    }

    /// Number of `chat` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Conversation length seen by the most recent `chat` call.
    pub fn last_message_count(&self) -> usize {
        self.last_message_count.get()
    }

    pub fn remaining(&self) -> usize {
        self.turns.borrow().len()
    }
}

impl ChatModel for ScriptedModel {
    fn describe(&self) -> String {
        "mock(scripted)".to_string()
    }

    fn chat(&self, request: &ChatRequest<'_>) -> Result<ModelTurn, LlmError> {
        self.calls.set(self.calls.get() + 1);
        self.last_message_count.set(request.messages.len());
        self.turns
            .borrow_mut()
            .pop_front()
            .ok_or(LlmError::ScriptExhausted)
    }
}

// ============================================================================
// Backend selection
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LlmBackend {
    /// Scripted turns loaded from a JSON file (`KBQA_MOCK_SCRIPT`).
    Mock { script: Option<PathBuf> },
    /// Local Ollama server. Override the host via `OLLAMA_HOST`.
    #[cfg(feature = "llm-ollama")]
    Ollama { host: String },
    /// OpenAI-compatible API. Requires `OPENAI_API_KEY`; base URL via
    /// `OPENAI_BASE_URL`.
    #[cfg(feature = "llm-openai")]
    OpenAI { base_url: String },
}

impl LlmBackend {
    /// Parse a backend name (`mock`, `ollama`, `openai`) using env defaults
    /// for host/base URL.
    pub fn parse(name: &str) -> Result<Self, LlmError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock {
                script: env_string(MOCK_SCRIPT_ENV)
                    .map_err(|e| LlmError::Config(e.to_string()))?
                    .map(PathBuf::from),
            }),
            #[cfg(feature = "llm-ollama")]
            "ollama" => Ok(Self::Ollama {
                host: normalize_http_base_url(
                    &env_string(OLLAMA_HOST_ENV)
                        .map_err(|e| LlmError::Config(e.to_string()))?
                        .unwrap_or_default(),
                    DEFAULT_OLLAMA_HOST,
                ),
            }),
            #[cfg(feature = "llm-openai")]
            "openai" => Ok(Self::OpenAI {
                base_url: normalize_http_base_url(
                    &env_string(OPENAI_BASE_URL_ENV)
                        .map_err(|e| LlmError::Config(e.to_string()))?
                        .unwrap_or_default(),
                    DEFAULT_OPENAI_BASE_URL,
                ),
            }),
            other => Err(LlmError::Config(format!(
                "unknown LLM backend {other:?} (expected one of: {})",
                Self::available().join(", ")
            ))),
        }
    }

    pub fn available() -> Vec<&'static str> {
        let mut out = vec!["mock"];
        #[cfg(feature = "llm-ollama")]
        out.push("ollama");
        #[cfg(feature = "llm-openai")]
        out.push("openai");
        out
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Mock { .. } => "scripted",
            #[cfg(feature = "llm-ollama")]
            Self::Ollama { .. } => DEFAULT_OLLAMA_MODEL,
            #[cfg(feature = "llm-openai")]
            Self::OpenAI { .. } => DEFAULT_OPENAI_MODEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl LlmSettings {
    /// Resolve settings from `KBQA_LLM_*` variables. The backend defaults to
    /// Ollama when compiled in, otherwise the scripted mock.
    pub fn from_env() -> Result<Self, LlmError> {
        let config = |e: kbqa_graph::GraphError| LlmError::Config(e.to_string());

        let backend = match env_string(LLM_BACKEND_ENV).map_err(config)? {
            Some(name) => LlmBackend::parse(&name)?,
            None => LlmBackend::parse(default_backend_name())?,
        };
        let model = env_string(LLM_MODEL_ENV)
            .map_err(config)?
            .unwrap_or_else(|| backend.default_model().to_string());
        Ok(Self {
            model,
            temperature: env_f32(LLM_TEMPERATURE_ENV, DEFAULT_TEMPERATURE).map_err(config)?,
            timeout_secs: env_usize(LLM_TIMEOUT_SECS_ENV, DEFAULT_LLM_TIMEOUT_SECS, 1, 3600)
                .map_err(config)? as u64,
            backend,
        })
    }

    pub fn with_backend(mut self, backend: LlmBackend) -> Self {
        self.model = backend.default_model().to_string();
        self.backend = backend;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn status_line(&self) -> String {
        let backend = match &self.backend {
            LlmBackend::Mock { script } => match script {
                Some(path) => format!("mock({})", path.display()),
                None => "mock".to_string(),
            },
            #[cfg(feature = "llm-ollama")]
            LlmBackend::Ollama { host } => format!("ollama({host})"),
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI { base_url } => format!("openai({base_url})"),
        };
        format!(
            "llm: backend={backend} model={} temperature={}",
            self.model, self.temperature
        )
    }
}

fn default_backend_name() -> &'static str {
    if cfg!(feature = "llm-ollama") {
        "ollama"
    } else {
        "mock"
    }
}

pub fn build_chat_model(settings: &LlmSettings) -> Result<Box<dyn ChatModel>, LlmError> {
    match &settings.backend {
        LlmBackend::Mock { script } => {
            let Some(path) = script else {
                return Err(LlmError::Config(format!(
                    "mock backend needs a script file (set {MOCK_SCRIPT_ENV})"
                )));
            };
            let text = std::fs::read_to_string(path).map_err(|e| {
                LlmError::Config(format!("failed to read mock script {}: {e}", path.display()))
            })?;
            Ok(Box::new(ScriptedModel::from_json(&text)?))
        }
        #[cfg(feature = "llm-ollama")]
        LlmBackend::Ollama { host } => Ok(Box::new(ollama::OllamaChat::new(host, settings)?)),
        #[cfg(feature = "llm-openai")]
        LlmBackend::OpenAI { base_url } => {
            Ok(Box::new(openai::OpenAiChat::new(base_url, settings)?))
        }
    }
}

/// Trim, add `http://` if no scheme, drop trailing slashes.
pub fn normalize_http_base_url(raw: &str, default: &str) -> String {
    let mut url = raw.trim().to_string();
    if url.is_empty() {
        url = default.to_string();
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{url}");
    }
    url.trim_end_matches('/').to_string()
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai"))]
fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, LlmError> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Config(format!("failed to build http client: {e}")))
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai"))]
fn read_json_response(resp: reqwest::blocking::Response) -> Result<Value, LlmError> {
    let status = resp.status();
    let text = resp
        .text()
        .map_err(|e| LlmError::Network(format!("failed to read response body: {e}")))?;
    if !status.is_success() {
        return Err(LlmError::Api {
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text)
        .map_err(|e| LlmError::InvalidResponse(format!("model returned invalid JSON: {e}")))
}

// ============================================================================
// Ollama backend (native /api/chat)
// ============================================================================

#[cfg(feature = "llm-ollama")]
mod ollama {
    use serde_json::{json, Value};

    use super::{
        content_to_text, http_client, read_json_response, ChatMessage, ChatModel, ChatRequest,
        LlmError, LlmSettings, ModelTurn, RawToolCall,
    };

    pub struct OllamaChat {
        client: reqwest::blocking::Client,
        host: String,
        model: String,
        temperature: f32,
    }

    impl OllamaChat {
        pub fn new(host: &str, settings: &LlmSettings) -> Result<Self, LlmError> {
            Ok(Self {
                client: http_client(settings.timeout_secs)?,
                host: host.to_string(),
                model: settings.model.clone(),
                temperature: settings.temperature,
            })
        }
    }

    pub(super) fn encode_messages(system: &str, messages: &[ChatMessage]) -> Vec<Value> {
        let mut out = vec![json!({ "role": "system", "content": system })];
        for message in messages {
            out.push(match message {
                ChatMessage::User { content } => json!({ "role": "user", "content": content }),
                ChatMessage::Assistant {
                    content,
                    tool_calls,
                } => {
                    let calls: Vec<Value> = tool_calls
                        .iter()
                        .map(|c| json!({ "function": { "name": c.name, "arguments": c.arguments } }))
                        .collect();
                    if calls.is_empty() {
                        json!({ "role": "assistant", "content": content })
                    } else {
                        json!({ "role": "assistant", "content": content, "tool_calls": calls })
                    }
                }
                ChatMessage::Tool { name, content, .. } => {
                    json!({ "role": "tool", "tool_name": name, "content": content })
                }
            });
        }
        out
    }

    pub(super) fn decode_turn(body: &Value) -> Result<ModelTurn, LlmError> {
        let message = body
            .get("message")
            .ok_or_else(|| LlmError::InvalidResponse("ollama response has no message".into()))?;
        let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
        let calls: Vec<RawToolCall> = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                // Ollama sends no call ids; the agent assigns run-wide ones.
                calls
                    .iter()
                    .filter_map(|call| {
                        let function = call.get("function")?;
                        Some(RawToolCall {
                            id: String::new(),
                            name: function.get("name")?.as_str()?.to_string(),
                            arguments: function.get("arguments").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(if calls.is_empty() {
            ModelTurn::Text { text }
        } else {
            ModelTurn::ToolCalls { text, calls }
        })
    }

    impl ChatModel for OllamaChat {
        fn describe(&self) -> String {
            format!("ollama({}) model={}", self.host, self.model)
        }

        fn chat(&self, request: &ChatRequest<'_>) -> Result<ModelTurn, LlmError> {
            let url = format!("{}/api/chat", self.host);
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": { "name": t.name, "description": t.description, "parameters": t.parameters }
                    })
                })
                .collect();
            let mut body = json!({
                "model": self.model,
                "stream": false,
                "messages": encode_messages(request.system, request.messages),
                "options": { "temperature": self.temperature },
            });
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools);
            }

            let resp = self.client.post(&url).json(&body).send().map_err(|e| {
                LlmError::Network(format!(
                    "failed to reach ollama at {url} (is it running?) ({e}). Try `ollama serve` or set OLLAMA_HOST"
                ))
            })?;
            decode_turn(&read_json_response(resp)?)
        }
    }
}

// ============================================================================
// OpenAI backend (chat completions)
// ============================================================================

#[cfg(feature = "llm-openai")]
mod openai {
    use serde_json::{json, Value};

    use super::{
        content_to_text, http_client, read_json_response, ChatMessage, ChatModel, ChatRequest,
        LlmError, LlmSettings, ModelTurn, RawToolCall, OPENAI_API_KEY_ENV,
    };

    pub struct OpenAiChat {
        client: reqwest::blocking::Client,
        base_url: String,
        api_key: String,
        model: String,
        temperature: f32,
    }

    fn openai_api_key() -> Result<String, LlmError> {
        let key = std::env::var(OPENAI_API_KEY_ENV).unwrap_or_default();
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(LlmError::Config(format!(
                "OpenAI backend requires {OPENAI_API_KEY_ENV} (set it in your env; do not hardcode secrets)"
            )));
        }
        Ok(key)
    }

    impl OpenAiChat {
        pub fn new(base_url: &str, settings: &LlmSettings) -> Result<Self, LlmError> {
            Ok(Self {
                client: http_client(settings.timeout_secs)?,
                base_url: base_url.to_string(),
                api_key: openai_api_key()?,
                model: settings.model.clone(),
                temperature: settings.temperature,
            })
        }
    }

    pub(super) fn encode_messages(system: &str, messages: &[ChatMessage]) -> Vec<Value> {
        let mut out = vec![json!({ "role": "system", "content": system })];
        for message in messages {
            out.push(match message {
                ChatMessage::User { content } => json!({ "role": "user", "content": content }),
                ChatMessage::Assistant {
                    content,
                    tool_calls,
                } => {
                    if tool_calls.is_empty() {
                        json!({ "role": "assistant", "content": content })
                    } else {
                        let calls: Vec<Value> = tool_calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": { "name": c.name, "arguments": c.arguments.to_string() }
                                })
                            })
                            .collect();
                        json!({ "role": "assistant", "content": content, "tool_calls": calls })
                    }
                }
                ChatMessage::Tool {
                    call_id, content, ..
                } => json!({ "role": "tool", "tool_call_id": call_id, "content": content }),
            });
        }
        out
    }

    pub(super) fn decode_turn(body: &Value) -> Result<ModelTurn, LlmError> {
        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices[0].message".into()))?;
        let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
        let calls: Vec<RawToolCall> = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let function = call.get("function")?;
                        let arguments = match function.get("arguments") {
                            Some(Value::String(raw)) => serde_json::from_str(raw)
                                .unwrap_or_else(|_| Value::String(raw.clone())),
                            Some(other) => other.clone(),
                            None => Value::Null,
                        };
                        Some(RawToolCall {
                            id: call
                                .get("id")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_default(),
                            name: function.get("name")?.as_str()?.to_string(),
                            arguments,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(if calls.is_empty() {
            ModelTurn::Text { text }
        } else {
            ModelTurn::ToolCalls { text, calls }
        })
    }

    impl ChatModel for OpenAiChat {
        fn describe(&self) -> String {
            format!("openai({}) model={}", self.base_url, self.model)
        }

        fn chat(&self, request: &ChatRequest<'_>) -> Result<ModelTurn, LlmError> {
            let url = format!("{}/v1/chat/completions", self.base_url);
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": { "name": t.name, "description": t.description, "parameters": t.parameters }
                    })
                })
                .collect();
            let mut body = json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": encode_messages(request.system, request.messages),
            });
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools);
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .map_err(|e| LlmError::Network(format!("failed to reach {url}: {e}")))?;
            decode_turn(&read_json_response(resp)?)
        }
    }
}
