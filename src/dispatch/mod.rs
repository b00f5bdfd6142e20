//! Dispatcher: the per-request candidate loop.
//!
//! For each candidate in order: look up the cache, make the live call on a
//! miss, write the result back, apply the response filter, and either return,
//! fall through to the next candidate, or fail.

mod builder;
mod classify;
mod core;
mod policy;
mod types;

pub use builder::DispatcherBuilder;
pub use classify::FailureKind;
pub use self::core::{DispatchOptions, Dispatcher};
pub use types::{
    cancel_pair, Accepted, AttemptFailure, AttemptRecord, CancelHandle, CancelToken,
    DispatchError, DispatchErrorKind, DispatchOutcome, FilterVerdict,
};
