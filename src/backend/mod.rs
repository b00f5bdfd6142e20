//! # Backend Module
//!
//! The live-call collaborator. The dispatcher only ever talks to a
//! [`Backend`]; provider wire formats stay behind this trait.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Backend`] | `call(params) -> LlmResponse | BackendError` |
//! | [`BackendParams`] | Fully resolved request for one candidate |
//! | [`BackendError`] | Failure with a kind the classifier understands |
//! | [`BackendRouter`] | Routes by candidate target name |
//! | [`KernelBackend`] | HTTP backend speaking the kernel `/query` protocol |

mod kernel;

pub use kernel::{KernelBackend, KernelBackendBuilder, KERNEL_URL_ENV};

use crate::candidate::SamplingParams;
use crate::types::{LlmResponse, Message, ToolDefinition};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fully resolved request parameters for one candidate.
///
/// Serialization covers exactly the fields that identify a request for
/// caching; transport knobs (`base_url`, `timeout`) are skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendParams {
    pub target: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_type: Option<String>,
    #[serde(skip)]
    pub base_url: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    pub sampling: SamplingParams,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendErrorKind {
    Timeout,
    /// Connection refused, reset, DNS, TLS.
    Connect,
    Http { status: u16 },
    /// Provider refused the content on policy grounds.
    ContentFilter,
    /// Body could not be decoded.
    Decode,
    /// Call succeeded but carried nothing usable.
    EmptyResponse,
    /// No backend registered for the target.
    Unavailable,
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connect"),
            Self::Http { status } => write!(f, "http {}", status),
            Self::ContentFilter => write!(f, "content_filter"),
            Self::Decode => write!(f, "decode"),
            Self::EmptyResponse => write!(f, "empty_response"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Failure reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// Provider error code, e.g. `content_filter`, `rate_limit_exceeded`.
    pub code: Option<String>,
    pub detail: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, detail)
    }

    pub fn connect(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connect, detail)
    }

    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Http { status }, detail)
    }

    pub fn content_filter(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ContentFilter, detail).with_code("content_filter")
    }

    pub fn empty_response(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::EmptyResponse, detail)
    }

    pub fn other(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, detail)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Live-call collaborator.
///
/// Implementations must report timeouts as [`BackendErrorKind::Timeout`]
/// (or a `timeout` code) so they are not lumped in with transport errors.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, params: &BackendParams) -> Result<LlmResponse, BackendError>;

    fn name(&self) -> &str {
        "backend"
    }
}

/// Routes each call to the backend registered for its target name.
#[derive(Default)]
pub struct BackendRouter {
    routes: HashMap<String, Arc<dyn Backend>>,
    fallback: Option<Arc<dyn Backend>>,
}

impl BackendRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, target: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.routes.insert(target.into(), backend);
        self
    }

    /// Backend used for targets without an explicit route.
    pub fn default_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.fallback = Some(backend);
        self
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(|s| s.as_str())
    }
}

#[async_trait]
impl Backend for BackendRouter {
    async fn call(&self, params: &BackendParams) -> Result<LlmResponse, BackendError> {
        let backend = self
            .routes
            .get(&params.target)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorKind::Unavailable,
                    format!("no backend registered for target '{}'", params.target),
                )
            })?;
        backend.call(params).await
    }

    fn name(&self) -> &str {
        "router"
    }
}
