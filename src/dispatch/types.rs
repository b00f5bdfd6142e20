//! Dispatch outcomes, attempt records and cancellation.

use super::classify::FailureKind;
use crate::cache::RequestFingerprint;
use crate::candidate::CandidateConfig;
use crate::types::LlmResponse;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

/// What the filter said about a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterVerdict {
    Accepted,
    Rejected,
    /// Rejected, but returned anyway because it came from the last candidate.
    ForceAccepted,
}

impl FilterVerdict {
    /// Whether the dispatch returns this response.
    pub fn returns(&self) -> bool {
        !matches!(self, FilterVerdict::Rejected)
    }
}

/// A failed live call, as recorded for telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub detail: String,
}

/// One candidate tried during a dispatch. Forwarded to the telemetry sink and
/// not retained afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub invocation_id: String,
    pub candidate_index: usize,
    /// Candidate target name.
    pub candidate: String,
    pub model: String,
    pub fingerprint: RequestFingerprint,
    pub cached: bool,
    /// `None` when the attempt failed before a response existed.
    pub verdict: Option<FilterVerdict>,
    pub cost: f64,
    /// Unix seconds at the start of the attempt.
    pub timestamp: f64,
    pub duration_ms: u64,
    pub error: Option<AttemptFailure>,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub response: LlmResponse,
    pub invocation_id: String,
    pub candidate_index: usize,
    pub candidate: String,
    pub model: String,
    pub fingerprint: RequestFingerprint,
    pub cached: bool,
    pub cost: f64,
    /// True when the filter rejected the response and it was returned
    /// only because no candidate remained.
    pub forced: bool,
}

impl Accepted {
    pub fn content(&self) -> &str {
        self.response.content_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    /// Malformed request or candidate list; raised before any attempt.
    Config,
    Timeout,
    Transport,
    ContentPolicy,
    Unknown,
    ExhaustedCandidates,
    Cancelled,
}

impl From<FailureKind> for DispatchErrorKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Timeout => DispatchErrorKind::Timeout,
            FailureKind::Transport => DispatchErrorKind::Transport,
            FailureKind::ContentPolicy => DispatchErrorKind::ContentPolicy,
            FailureKind::Unknown => DispatchErrorKind::Unknown,
        }
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchErrorKind::Config => "config",
            DispatchErrorKind::Timeout => "timeout",
            DispatchErrorKind::Transport => "transport",
            DispatchErrorKind::ContentPolicy => "content_policy",
            DispatchErrorKind::Unknown => "unknown",
            DispatchErrorKind::ExhaustedCandidates => "exhausted_candidates",
            DispatchErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal dispatch failure.
///
/// Carries only classified kinds and strings; transport library errors never
/// cross this boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("dispatch failed ({kind}){}: {detail}", candidate_suffix(.candidate_index, .candidate))]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub candidate_index: Option<usize>,
    pub candidate: Option<CandidateConfig>,
    pub detail: String,
    /// Failure came from the last candidate after every earlier one fell through.
    pub exhausted: bool,
    pub invocation_id: Option<String>,
}

fn candidate_suffix(index: &Option<usize>, candidate: &Option<CandidateConfig>) -> String {
    match (index, candidate) {
        (Some(i), Some(c)) => format!(" at candidate {} ({})", i, c.name),
        (Some(i), None) => format!(" at candidate {}", i),
        _ => String::new(),
    }
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            candidate_index: None,
            candidate: None,
            detail: detail.into(),
            exhausted: false,
            invocation_id: None,
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Config, detail)
    }

    pub fn cancelled() -> Self {
        Self::new(DispatchErrorKind::Cancelled, "dispatch cancelled")
    }

    pub(crate) fn at(mut self, index: usize, candidate: &CandidateConfig) -> Self {
        self.candidate_index = Some(index);
        self.candidate = Some(candidate.clone());
        self
    }

    pub(crate) fn with_invocation(mut self, id: &str) -> Self {
        self.invocation_id = Some(id.to_string());
        self
    }

    pub(crate) fn exhausted(mut self, yes: bool) -> Self {
        self.exhausted = yes;
        self
    }

    pub fn is_config(&self) -> bool {
        self.kind == DispatchErrorKind::Config
    }
}

pub type DispatchOutcome = std::result::Result<Accepted, DispatchError>;

/// Create a linked cancel handle and token.
///
/// Cancelling is observed before each candidate's cache check and before its
/// live call; a call already in flight runs to completion.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
