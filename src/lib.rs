//! # ai-dispatch
//!
//! LLM request dispatch with response caching, multi-candidate fallback and
//! content-filter gating.
//!
//! ## Overview
//!
//! A [`LogicalRequest`] ("send this conversation to a model") is resolved
//! against an ordered list of candidate backend configurations. The
//! [`Dispatcher`] then tries candidates strictly in order:
//!
//! 1. look the request fingerprint up in the cache,
//! 2. on a miss, call the backend and write the response back,
//! 3. run the response filter; accept, or fall through to the next candidate.
//!
//! Content-policy rejections stop the loop at once. Timeouts and transport
//! errors fall through. The last candidate's response is returned even if the
//! filter rejects it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_dispatch::cache::{CacheStore, MemoryCache};
//! use ai_dispatch::{CandidateConfig, Dispatcher, KernelBackend, LogicalRequest, Message};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ai_dispatch::Result<()> {
//!     let dispatcher = Dispatcher::builder()
//!         .backend(Arc::new(KernelBackend::from_env()?))
//!         .cache(CacheStore::new(Arc::new(MemoryCache::new())))
//!         .build()?;
//!
//!     let candidates = vec![
//!         CandidateConfig::new("kernel", "gpt-4o-mini"),
//!         CandidateConfig::new("kernel", "llama3"),
//!     ];
//!     let request = LogicalRequest::new(vec![Message::user("Hello!")]);
//!     let accepted = dispatcher.dispatch_candidates(&request, &candidates).await?;
//!     println!("{}", accepted.content());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Messages, tools, responses, logical requests |
//! | [`candidate`] | Candidate configuration, resolution and file-backed lists |
//! | [`cache`] | Fingerprints, cache backends and the partitioned store |
//! | [`filter`] | Response filters |
//! | [`backend`] | Backend trait, routing and the kernel HTTP backend |
//! | [`dispatch`] | The dispatcher loop, error classification and outcomes |
//! | [`telemetry`] | Attempt record sinks |
//! | [`pricing`] | Cost estimation from usage |

pub mod backend;
pub mod cache;
pub mod candidate;
pub mod dispatch;
pub mod filter;
pub mod pricing;
pub mod telemetry;
pub mod types;

pub use backend::{Backend, BackendError, BackendErrorKind, BackendParams, BackendRouter, KernelBackend};
pub use candidate::{CandidateConfig, CandidateOverrides, CandidateResolver, CandidateSource};
pub use dispatch::{
    cancel_pair, Accepted, AttemptRecord, DispatchError, DispatchErrorKind, DispatchOptions,
    DispatchOutcome, Dispatcher, DispatcherBuilder, FailureKind,
};
pub use filter::ResponseFilter;
pub use telemetry::TelemetrySink;
pub use types::{LlmResponse, LogicalRequest, Message, MessageRole, ToolCall, ToolDefinition, Usage};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
