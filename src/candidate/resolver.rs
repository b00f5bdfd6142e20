//! Candidate resolution: logical request + base configurations -> ordered candidates.

use super::config::{CandidateConfig, DEFAULT_CACHE_SEED};
use crate::backend::BackendParams;
use crate::error::{Error, ErrorContext};
use crate::pricing::ModelPricing;
use crate::types::LogicalRequest;
use crate::Result;

/// A fully resolved candidate, ready for the dispatch loop.
#[derive(Debug, Clone)]
pub struct ResolvedCandidate {
    /// Position in the configured list (0 = tried first).
    pub index: usize,
    /// Base configuration with per-call overrides applied.
    pub config: CandidateConfig,
    /// Exactly what the backend receives. Resolution-only fields are gone.
    pub params: BackendParams,
    /// Cache partition, `None` when caching is off for this candidate.
    pub cache_seed: Option<u64>,
    pub pricing: Option<ModelPricing>,
}

/// Merges per-call overrides onto base configurations and validates the result.
///
/// Side-effect free; order of the base list is preserved.
#[derive(Debug, Clone)]
pub struct CandidateResolver {
    default_cache_seed: u64,
}

impl CandidateResolver {
    pub fn new() -> Self {
        Self {
            default_cache_seed: DEFAULT_CACHE_SEED,
        }
    }

    /// Partition used by candidates without an explicit cache hint.
    pub fn with_default_cache_seed(mut self, seed: u64) -> Self {
        self.default_cache_seed = seed;
        self
    }

    pub fn resolve(
        &self,
        request: &LogicalRequest,
        base: &[CandidateConfig],
    ) -> Result<Vec<ResolvedCandidate>> {
        if request.messages.is_empty() {
            return Err(Error::validation_with_context(
                "message sequence must not be empty",
                ErrorContext::new()
                    .with_field_path("request.messages")
                    .with_source("candidate_resolver"),
            ));
        }
        if base.is_empty() {
            return Err(Error::configuration_with_context(
                "candidate list resolved to zero candidates",
                ErrorContext::new()
                    .with_field_path("candidates")
                    .with_source("candidate_resolver"),
            ));
        }

        let tools = request.tools.clone().filter(|t| !t.is_empty());

        base.iter()
            .enumerate()
            .map(|(index, cfg)| {
                let config = cfg.merged(&request.overrides);
                config.validate(index)?;

                let cache_seed = match config.cache {
                    Some(hint) => hint.seed(),
                    None => Some(self.default_cache_seed),
                };
                let pricing = config.price.map(|p| p.to_pricing(&config.model));

                let params = BackendParams {
                    target: config.name.clone(),
                    model: config.effective_model(),
                    api_type: config.api_type.clone(),
                    base_url: config.base_url.clone(),
                    messages: request.messages.clone(),
                    tools: tools.clone(),
                    response_format: request.response_format.clone(),
                    sampling: config.sampling(),
                    timeout: config.timeout(),
                };

                Ok(ResolvedCandidate {
                    index,
                    config,
                    params,
                    cache_seed,
                    pricing,
                })
            })
            .collect()
    }
}

impl Default for CandidateResolver {
    fn default() -> Self {
        Self::new()
    }
}
