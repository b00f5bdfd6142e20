//! HTTP backend that forwards LLM queries to an agent kernel.
//!
//! Wire format: `POST {base}/query` with
//! `{"query_type": "llm", "agent_name": ..., "query_data": {...}}`; the kernel
//! answers `{"response": {"response_message", "tool_calls", "finished", "error", "status_code"}}`.

use super::{Backend, BackendError, BackendErrorKind, BackendParams};
use crate::error::{Error, ErrorContext};
use crate::types::{LlmResponse, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

/// Environment variable for the kernel base URL.
pub const KERNEL_URL_ENV: &str = "AI_DISPATCH_KERNEL_URL";
const HTTP_TIMEOUT_ENV: &str = "AI_DISPATCH_HTTP_TIMEOUT_SECS";
const DEFAULT_KERNEL_URL: &str = "http://localhost:8000";
const DEFAULT_AGENT_NAME: &str = "ai-dispatch";

#[derive(Debug, Serialize)]
struct QueryEnvelope<'a> {
    query_type: &'static str,
    agent_name: &'a str,
    query_data: LlmQuery<'a>,
}

#[derive(Debug, Serialize)]
struct LlmQuery<'a> {
    query_class: &'static str,
    llms: Vec<LlmSelector<'a>>,
    messages: &'a [crate::types::Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    action_type: &'static str,
    message_return_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct LlmSelector<'a> {
    name: &'a str,
    backend: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_type: Option<&'a str>,
    #[serde(flatten)]
    sampling: &'a crate::candidate::SamplingParams,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    response: KernelResponse,
}

#[derive(Debug, Deserialize)]
struct KernelResponse {
    #[serde(default)]
    response_message: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default = "default_status")]
    status_code: u16,
}

fn default_status() -> u16 {
    200
}

/// Backend speaking the kernel `/query` protocol over reqwest.
#[derive(Debug, Clone)]
pub struct KernelBackend {
    client: reqwest::Client,
    base_url: url::Url,
    agent_name: String,
}

impl KernelBackend {
    pub fn builder() -> KernelBackendBuilder {
        KernelBackendBuilder::default()
    }

    /// Build with `AI_DISPATCH_KERNEL_URL` / `AI_DISPATCH_HTTP_TIMEOUT_SECS` defaults.
    pub fn from_env() -> crate::Result<Self> {
        Self::builder().build()
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    fn endpoint(&self, params: &BackendParams) -> Result<url::Url, BackendError> {
        let base = match params.base_url.as_deref() {
            Some(raw) => url::Url::parse(raw)
                .map_err(|e| BackendError::connect(format!("invalid base_url '{}': {}", raw, e)))?,
            None => self.base_url.clone(),
        };
        join_query(&base).map_err(|e| BackendError::connect(e.to_string()))
    }
}

fn join_query(base: &url::Url) -> Result<url::Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("query")
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::timeout(e.to_string()).with_code("timeout")
    } else if e.is_decode() {
        BackendError::new(BackendErrorKind::Decode, e.to_string())
    } else {
        BackendError::connect(e.to_string())
    }
}

/// Pull a provider error code out of an error body, if there is one.
fn error_code(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.pointer("/error/code")
        .or_else(|| v.get("code"))
        .or_else(|| v.pointer("/response/error_code"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

fn error_from_status(status: u16, detail: String, code: Option<String>) -> BackendError {
    let mut err = match code.as_deref() {
        Some("content_filter") => BackendError::content_filter(detail),
        _ if detail.contains("content_filter") => BackendError::content_filter(detail),
        _ => BackendError::http(status, detail),
    };
    if let Some(code) = code {
        err = err.with_code(code);
    }
    err
}

#[async_trait]
impl Backend for KernelBackend {
    async fn call(&self, params: &BackendParams) -> Result<LlmResponse, BackendError> {
        let url = self.endpoint(params)?;
        let tools = params.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": t,
                    })
                })
                .collect::<Vec<_>>()
        });
        let has_tools = tools.is_some();
        let body = QueryEnvelope {
            query_type: "llm",
            agent_name: &self.agent_name,
            query_data: LlmQuery {
                query_class: "llm",
                llms: vec![LlmSelector {
                    name: &params.model,
                    backend: &params.target,
                    api_type: params.api_type.as_deref(),
                    sampling: &params.sampling,
                }],
                messages: &params.messages,
                tools,
                action_type: if has_tools { "tool_use" } else { "chat" },
                message_return_type: if params.response_format.is_some() {
                    "json"
                } else {
                    "text"
                },
                response_format: params.response_format.as_ref(),
            },
        };

        debug!(url = %url, target = %params.target, model = %params.model, "kernel query");

        let mut req = self.client.post(url).json(&body);
        if let Some(timeout) = params.timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(map_reqwest_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            let code = error_code(&text);
            return Err(error_from_status(status.as_u16(), text, code));
        }

        let envelope: ResponseEnvelope = serde_json::from_str(&text).map_err(|e| {
            BackendError::new(BackendErrorKind::Decode, format!("invalid kernel response: {}", e))
        })?;
        let r = envelope.response;

        if let Some(err) = r.error.filter(|e| !e.is_empty()) {
            let status = if r.status_code < 400 { 500 } else { r.status_code };
            let code = error_code(&err);
            return Err(error_from_status(status, err, code));
        }
        if r.status_code >= 400 {
            return Err(BackendError::http(
                r.status_code,
                "kernel reported failure without a message",
            ));
        }

        Ok(LlmResponse {
            content: r.response_message,
            tool_calls: r.tool_calls.unwrap_or_default(),
            usage: None,
            cost: None,
            model: Some(params.model.clone()),
        })
    }

    fn name(&self) -> &str {
        "kernel"
    }
}

/// Builder for [`KernelBackend`]. Unset fields fall back to the environment.
#[derive(Debug, Default)]
pub struct KernelBackendBuilder {
    base_url: Option<String>,
    agent_name: Option<String>,
    timeout: Option<Duration>,
}

impl KernelBackendBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Client-wide request timeout. Candidate `timeout_ms` still applies per call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> crate::Result<KernelBackend> {
        let raw = self
            .base_url
            .or_else(|| env::var(KERNEL_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_KERNEL_URL.to_string());
        let base_url = url::Url::parse(&raw).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid kernel url '{}': {}", raw, e),
                ErrorContext::new()
                    .with_field_path("kernel.base_url")
                    .with_source("kernel_backend"),
            )
        })?;

        let timeout = self.timeout.unwrap_or_else(|| {
            Duration::from_secs(
                env::var(HTTP_TIMEOUT_ENV)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60),
            )
        });

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build http client: {}", e),
                    ErrorContext::new().with_source("kernel_backend"),
                )
            })?;

        Ok(KernelBackend {
            client,
            base_url,
            agent_name: self
                .agent_name
                .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
        })
    }
}
