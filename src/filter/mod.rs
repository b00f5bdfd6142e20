//! # Response Filter Module
//!
//! Caller-supplied acceptance predicates over backend responses.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseFilter`] | `accepts(response, context) -> bool` |
//! | [`AcceptAll`] | Accepts everything (the default) |
//! | [`KeywordFilter`] | Rejects content containing blocked keywords |
//! | [`PatternFilter`] | Rejects content matching blocked regexes |
//! | [`JsonSchemaFilter`] | Accepts only JSON content valid against a schema |
//! | [`AllOf`] | Conjunction of filters |
//!
//! Any `Fn(&LlmResponse, Option<&Value>) -> bool` is a filter too:
//!
//! ```rust
//! use ai_dispatch::filter::{evaluate, ResponseFilter};
//! use ai_dispatch::LlmResponse;
//!
//! let short_only = |r: &LlmResponse, _: Option<&serde_json::Value>| r.content_str().len() < 10;
//! assert!(evaluate(&short_only, &LlmResponse::text("ok"), None));
//! ```

mod builtin;

pub use builtin::{AcceptAll, AllOf, JsonSchemaFilter, KeywordFilter, PatternFilter};

use crate::types::LlmResponse;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Decides whether a candidate's response is acceptable.
///
/// Filters should be pure. A panicking filter is treated as a rejection.
pub trait ResponseFilter: Send + Sync {
    fn accepts(&self, response: &LlmResponse, context: Option<&Value>) -> bool;

    fn name(&self) -> &str {
        "filter"
    }
}

impl<F> ResponseFilter for F
where
    F: Fn(&LlmResponse, Option<&Value>) -> bool + Send + Sync,
{
    fn accepts(&self, response: &LlmResponse, context: Option<&Value>) -> bool {
        self(response, context)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Run a filter, turning a panic into `false`.
pub fn evaluate(filter: &dyn ResponseFilter, response: &LlmResponse, context: Option<&Value>) -> bool {
    match catch_unwind(AssertUnwindSafe(|| filter.accepts(response, context))) {
        Ok(accepted) => accepted,
        Err(_) => {
            warn!(filter = filter.name(), "response filter panicked; treating as rejection");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_filters() {
        let f = |r: &LlmResponse, ctx: Option<&Value>| {
            ctx.and_then(|c| c.get("min_len"))
                .and_then(|v| v.as_u64())
                .map_or(true, |n| r.content_str().len() as u64 >= n)
        };
        let ctx = serde_json::json!({"min_len": 5});
        assert!(!evaluate(&f, &LlmResponse::text("abc"), Some(&ctx)));
        assert!(evaluate(&f, &LlmResponse::text("abcdef"), Some(&ctx)));
        assert!(evaluate(&f, &LlmResponse::text("abc"), None));
    }

    #[test]
    fn panic_is_rejection() {
        let f = |_: &LlmResponse, _: Option<&Value>| -> bool { panic!("boom") };
        assert!(!evaluate(&f, &LlmResponse::text("x"), None));
    }
}
