//! Model pricing and cost estimation.
//!
//! Rates are expressed per 1K tokens, split into prompt and completion.

use crate::types::{LlmResponse, Usage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelPricing {
    pub fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Same rate for prompt and completion tokens.
    pub fn flat(per_1k: f64) -> Self {
        Self::new(per_1k, per_1k)
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        let pc = (usage.prompt_tokens as f64 / 1000.0) * self.prompt_per_1k;
        let cc = (usage.completion_tokens as f64 / 1000.0) * self.completion_per_1k;
        pc + cc
    }

    pub fn gpt_4o() -> Self {
        Self::new(0.005, 0.015)
    }
    pub fn gpt_4o_mini() -> Self {
        Self::new(0.00015, 0.0006)
    }
    pub fn claude_35_sonnet() -> Self {
        Self::new(0.003, 0.015)
    }
    pub fn claude_3_haiku() -> Self {
        Self::new(0.00025, 0.00125)
    }

    /// Built-in table used when a candidate carries no price metadata.
    pub fn for_model(model: &str) -> Option<Self> {
        let m = model.to_lowercase();
        if m.contains("gpt-4o-mini") {
            Some(Self::gpt_4o_mini())
        } else if m.contains("gpt-4o") {
            Some(Self::gpt_4o())
        } else if m.contains("claude-3-5-sonnet") {
            Some(Self::claude_35_sonnet())
        } else if m.contains("claude-3-haiku") {
            Some(Self::claude_3_haiku())
        } else {
            None
        }
    }
}

/// Cost of one response: backend-reported cost, else usage times the
/// explicit price, else usage times the built-in table, else zero.
///
/// Always finite: a non-finite reported cost is ignored, and a non-finite
/// computed cost becomes zero.
pub fn response_cost(response: &LlmResponse, price: Option<&ModelPricing>, model: &str) -> f64 {
    if let Some(cost) = response.cost.filter(|c| c.is_finite()) {
        return cost;
    }
    let Some(usage) = response.usage.as_ref() else {
        return 0.0;
    };
    let cost = match price.copied().or_else(|| ModelPricing::for_model(model)) {
        Some(p) => p.cost(usage),
        None => 0.0,
    };
    if cost.is_finite() {
        cost
    } else {
        0.0
    }
}
