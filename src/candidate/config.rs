//! Candidate configuration structures
//!
//! A candidate is one concrete backend target plus request parameters. The
//! field set is closed: unknown keys are rejected when a configuration is
//! parsed, instead of being silently forwarded to a backend.

use crate::error::{Error, ErrorContext};
use crate::pricing::ModelPricing;
use crate::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;
use tracing::warn;

/// Default partition for candidates that carry no cache hint.
pub const DEFAULT_CACHE_SEED: u64 = 41;

/// One backend configuration the dispatcher may try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateConfig {
    /// Backend target name (used for routing, e.g. "openai", "kernel").
    pub name: String,
    /// Model identifier.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceSpec>,
    /// Resolution-only: never reaches the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheHint>,
}

impl CandidateConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            api_type: None,
            base_url: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            timeout_ms: None,
            price: None,
            cache: None,
        }
    }

    /// Parse a single candidate from dynamic data, rejecting unknown fields.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new().with_source("candidate_config"),
            )
        })
    }

    pub fn with_temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_price(mut self, price: PriceSpec) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_cache(mut self, hint: CacheHint) -> Self {
        self.cache = Some(hint);
        self
    }

    pub fn with_api_type(mut self, api_type: impl Into<String>) -> Self {
        self.api_type = Some(api_type.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            stop: self.stop.clone(),
        }
    }

    /// Model identifier as sent to the backend. Azure deployments do not
    /// accept dots in model names.
    pub fn effective_model(&self) -> String {
        match self.api_type.as_deref() {
            Some(t) if t.starts_with("azure") => self.model.replace('.', ""),
            _ => self.model.clone(),
        }
    }

    /// Apply per-call overrides; any field set on the override wins.
    pub fn merged(&self, overrides: &CandidateOverrides) -> Self {
        let mut out = self.clone();
        if overrides.temperature.is_some() {
            out.temperature = overrides.temperature;
        }
        if overrides.top_p.is_some() {
            out.top_p = overrides.top_p;
        }
        if overrides.max_tokens.is_some() {
            out.max_tokens = overrides.max_tokens;
        }
        if overrides.frequency_penalty.is_some() {
            out.frequency_penalty = overrides.frequency_penalty;
        }
        if overrides.presence_penalty.is_some() {
            out.presence_penalty = overrides.presence_penalty;
        }
        if overrides.stop.is_some() {
            out.stop = overrides.stop.clone();
        }
        if overrides.timeout_ms.is_some() {
            out.timeout_ms = overrides.timeout_ms;
        }
        if overrides.cache.is_some() {
            out.cache = overrides.cache;
        }
        out
    }

    pub fn validate(&self, index: usize) -> Result<()> {
        let field = |f: &str| format!("candidates[{}].{}", index, f);
        let fail = |f: &str, msg: String| {
            Err(Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(field(f))
                    .with_source("candidate_resolver"),
            ))
        };

        if self.name.trim().is_empty() {
            return fail("name", "backend target name must be non-empty".into());
        }
        if self.model.trim().is_empty() {
            return fail("model", "model must be non-empty".into());
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return fail("temperature", format!("temperature {} outside [0, 2]", t));
            }
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return fail("top_p", format!("top_p {} outside (0, 1]", p));
            }
        }
        if self.timeout_ms == Some(0) {
            return fail("timeout_ms", "timeout must be greater than zero".into());
        }
        if let Some(price) = &self.price {
            if !price.is_valid() {
                return fail("price", "price must be a finite, non-negative number".into());
            }
        }
        Ok(())
    }
}

/// Per-call overrides merged onto each base candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateOverrides {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub cache: Option<CacheHint>,
}

/// Sampling parameters as seen by the backend (and the fingerprint).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// Cache policy hint. Written as `cache: false` (or `disabled`) to disable
/// caching, or `cache: <seed>` / `cache: {seed: <seed>}` to select a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHint {
    Disabled,
    Seed(u64),
}

impl CacheHint {
    /// Partition seed, or `None` when caching is off for this candidate.
    pub fn seed(&self) -> Option<u64> {
        match self {
            CacheHint::Disabled => None,
            CacheHint::Seed(s) => Some(*s),
        }
    }
}

impl Serialize for CacheHint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CacheHint::Disabled => serializer.serialize_bool(false),
            CacheHint::Seed(s) => serializer.serialize_u64(*s),
        }
    }
}

impl<'de> Deserialize<'de> for CacheHint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Input {
            Flag(bool),
            Seed(u64),
            Keyword(String),
            Table { seed: u64 },
        }

        match Input::deserialize(deserializer)? {
            Input::Flag(false) => Ok(CacheHint::Disabled),
            Input::Flag(true) => Ok(CacheHint::Seed(DEFAULT_CACHE_SEED)),
            Input::Seed(s) | Input::Table { seed: s } => Ok(CacheHint::Seed(s)),
            Input::Keyword(k) if k == "disabled" => Ok(CacheHint::Disabled),
            Input::Keyword(k) => Err(serde::de::Error::custom(format!(
                "invalid cache hint '{}', expected `disabled`, a bool or a seed",
                k
            ))),
        }
    }
}

/// Price metadata, per 1K tokens: either one rate or `[prompt, completion]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceSpec {
    Flat(f64),
    Split([f64; 2]),
}

impl PriceSpec {
    fn is_valid(&self) -> bool {
        let ok = |p: f64| p.is_finite() && p >= 0.0;
        match self {
            PriceSpec::Flat(p) => ok(*p),
            PriceSpec::Split([a, b]) => ok(*a) && ok(*b),
        }
    }

    pub fn to_pricing(&self, model: &str) -> ModelPricing {
        match self {
            PriceSpec::Flat(p) => {
                warn!(
                    model = model,
                    "price is a single number; using the same rate for prompt and completion tokens"
                );
                ModelPricing::flat(*p)
            }
            PriceSpec::Split([prompt, completion]) => ModelPricing::new(*prompt, *completion),
        }
    }
}
