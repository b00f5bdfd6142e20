//! Backend failure classification.

use crate::backend::{BackendError, BackendErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified live-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    ContentPolicy,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport",
            FailureKind::ContentPolicy => "content_policy",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a backend failure onto the dispatch taxonomy.
///
/// Provider codes take precedence over the transport-level kind: a 400 that
/// carries `content_filter` is a policy rejection, not a transport error.
pub(crate) fn classify(err: &BackendError) -> FailureKind {
    if let Some(code) = err.code.as_deref() {
        match code {
            "content_filter" | "content_policy_violation" | "responsible_ai_policy_violation" => {
                return FailureKind::ContentPolicy
            }
            "timeout" | "request_timeout" | "deadline_exceeded" => return FailureKind::Timeout,
            _ => {}
        }
    }
    match &err.kind {
        BackendErrorKind::ContentFilter => FailureKind::ContentPolicy,
        BackendErrorKind::Timeout => FailureKind::Timeout,
        BackendErrorKind::Http { status } => match status {
            408 | 504 => FailureKind::Timeout,
            429 | 500..=599 => FailureKind::Transport,
            _ => FailureKind::Unknown,
        },
        BackendErrorKind::Connect | BackendErrorKind::Unavailable => FailureKind::Transport,
        BackendErrorKind::Decode | BackendErrorKind::EmptyResponse | BackendErrorKind::Other => {
            FailureKind::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_beats_kind() {
        let err = BackendError::http(400, "blocked").with_code("content_filter");
        assert_eq!(classify(&err), FailureKind::ContentPolicy);
        let err = BackendError::other("slow").with_code("deadline_exceeded");
        assert_eq!(classify(&err), FailureKind::Timeout);
    }

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(classify(&BackendError::timeout("t")), FailureKind::Timeout);
        assert_eq!(classify(&BackendError::connect("refused")), FailureKind::Transport);
        assert_eq!(classify(&BackendError::http(504, "gw")), FailureKind::Timeout);
        assert_eq!(classify(&BackendError::http(503, "busy")), FailureKind::Transport);
        assert_eq!(classify(&BackendError::http(429, "slow down")), FailureKind::Transport);
        assert_eq!(classify(&BackendError::http(401, "auth")), FailureKind::Unknown);
        assert_eq!(classify(&BackendError::content_filter("no")), FailureKind::ContentPolicy);
        assert_eq!(classify(&BackendError::empty_response("")), FailureKind::Unknown);
        assert_eq!(
            classify(&BackendError::new(BackendErrorKind::Unavailable, "x")),
            FailureKind::Transport
        );
    }
}
