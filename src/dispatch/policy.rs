//! Fallthrough policy after a failed attempt.

use super::classify::FailureKind;

/// How the loop proceeds after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Try the next candidate.
    Fallback,
    /// Stop and surface this failure.
    Fail,
}

/// Content-policy rejections are terminal at once; everything else falls
/// through while candidates remain.
pub(crate) fn decide(kind: FailureKind, is_last: bool) -> Decision {
    match kind {
        FailureKind::ContentPolicy => Decision::Fail,
        _ if is_last => Decision::Fail,
        FailureKind::Timeout | FailureKind::Transport | FailureKind::Unknown => Decision::Fallback,
    }
}
