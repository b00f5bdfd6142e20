//! Built-in response filters.

use super::ResponseFilter;
use crate::error::{Error, ErrorContext};
use crate::types::LlmResponse;
use crate::Result;
use jsonschema::JSONSchema;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Accepts every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ResponseFilter for AcceptAll {
    fn accepts(&self, _: &LlmResponse, _: Option<&Value>) -> bool {
        true
    }

    fn name(&self) -> &str {
        "accept_all"
    }
}

/// Rejects responses whose content contains any blocked keyword.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
    case_sensitive: bool,
}

impl KeywordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(mut self, keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        self.keywords.push(if self.case_sensitive {
            keyword
        } else {
            keyword.to_lowercase()
        });
        self
    }

    /// Must be set before adding keywords.
    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }
}

impl ResponseFilter for KeywordFilter {
    fn accepts(&self, response: &LlmResponse, _: Option<&Value>) -> bool {
        let content = response.content_str();
        if self.case_sensitive {
            !self.keywords.iter().any(|k| content.contains(k.as_str()))
        } else {
            let lower = content.to_lowercase();
            !self.keywords.iter().any(|k| lower.contains(k.as_str()))
        }
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Rejects responses whose content matches any blocked pattern.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    patterns: Vec<Regex>,
}

impl PatternFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid filter pattern: {}", e),
                ErrorContext::new()
                    .with_field_path("filter.pattern")
                    .with_details(pattern.to_string())
                    .with_source("pattern_filter"),
            )
        })?;
        self.patterns.push(re);
        Ok(self)
    }
}

impl ResponseFilter for PatternFilter {
    fn accepts(&self, response: &LlmResponse, _: Option<&Value>) -> bool {
        let content = response.content_str();
        !self.patterns.iter().any(|re| re.is_match(content))
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

/// Accepts only content that parses as JSON and validates against a schema.
#[derive(Clone)]
pub struct JsonSchemaFilter {
    schema: Arc<JSONSchema>,
}

impl std::fmt::Debug for JsonSchemaFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaFilter").finish_non_exhaustive()
    }
}

impl JsonSchemaFilter {
    pub fn new(schema: &Value) -> Result<Self> {
        let compiled = JSONSchema::compile(schema).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to compile schema: {}", e),
                ErrorContext::new().with_source("json_schema_filter"),
            )
        })?;
        Ok(Self {
            schema: Arc::new(compiled),
        })
    }

    /// Build from a response-format hint. Returns `None` for hints without a
    /// schema, e.g. `{"type": "json_object"}`.
    pub fn from_response_format(format: &Value) -> Result<Option<Self>> {
        let schema = format
            .pointer("/json_schema/schema")
            .filter(|_| format.get("type").and_then(|t| t.as_str()) == Some("json_schema"));
        schema.map(Self::new).transpose()
    }
}

impl ResponseFilter for JsonSchemaFilter {
    fn accepts(&self, response: &LlmResponse, _: Option<&Value>) -> bool {
        match serde_json::from_str::<Value>(response.content_str()) {
            Ok(doc) => self.schema.is_valid(&doc),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "json_schema"
    }
}

/// Accepts only when every inner filter accepts.
#[derive(Default, Clone)]
pub struct AllOf {
    filters: Vec<Arc<dyn ResponseFilter>>,
}

impl AllOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl ResponseFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl ResponseFilter for AllOf {
    fn accepts(&self, response: &LlmResponse, context: Option<&Value>) -> bool {
        self.filters.iter().all(|f| f.accepts(response, context))
    }

    fn name(&self) -> &str {
        "all_of"
    }
}
