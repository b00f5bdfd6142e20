//! The logical request handed to the dispatcher.

use super::message::Message;
use super::tool::ToolDefinition;
use crate::candidate::CandidateOverrides;

/// "Send this conversation to a language model."
///
/// Borrowed immutably for the whole dispatch; candidates are derived from it,
/// never written back into it.
#[derive(Debug, Clone, Default)]
pub struct LogicalRequest {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
    /// Response-format hint, e.g. `{"type": "json_schema", "json_schema": {...}}`.
    pub response_format: Option<serde_json::Value>,
    /// Per-call overrides merged onto every base candidate configuration.
    pub overrides: CandidateOverrides,
    /// Caller-supplied context forwarded to the response filter.
    pub context: Option<serde_json::Value>,
}

impl LogicalRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_response_format(mut self, format: serde_json::Value) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_overrides(mut self, overrides: CandidateOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}
