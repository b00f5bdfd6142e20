//! # Candidate Module
//!
//! Turns configuration into the ordered list of concrete backend targets the
//! dispatcher walks through.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CandidateConfig`] | One backend target plus request parameters (closed field set) |
//! | [`CandidateOverrides`] | Per-call overrides merged onto every base configuration |
//! | [`CandidateResolver`] | Validates and resolves a request into [`ResolvedCandidate`]s |
//! | [`CandidateSource`] | File-backed, hot-swappable base configuration list |

mod config;
mod resolver;
mod source;

pub use config::{
    CacheHint, CandidateConfig, CandidateOverrides, PriceSpec, SamplingParams, DEFAULT_CACHE_SEED,
};
pub use resolver::{CandidateResolver, ResolvedCandidate};
pub use source::{CandidateSource, CONFIG_LIST_ENV};
