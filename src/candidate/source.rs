//! Candidate source: the ordered base configuration list, loaded from YAML/JSON
//! and swappable at runtime.

use super::config::CandidateConfig;
use crate::error::{Error, ErrorContext};
use crate::Result;
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Environment variable naming the default candidate list file.
pub const CONFIG_LIST_ENV: &str = "AI_DISPATCH_CONFIG_LIST";

/// Ordered candidate list (order = priority).
///
/// Readers take a cheap snapshot; `reload`/`replace` swap the whole list
/// atomically, so a dispatch already in progress keeps the list it started with.
#[derive(Debug)]
pub struct CandidateSource {
    path: Option<PathBuf>,
    candidates: ArcSwap<Vec<CandidateConfig>>,
}

impl CandidateSource {
    pub fn new(candidates: Vec<CandidateConfig>) -> Self {
        Self {
            path: None,
            candidates: ArcSwap::from_pointee(candidates),
        }
    }

    /// Parse a candidate list from YAML (or JSON, which YAML accepts).
    ///
    /// Accepts either a bare sequence or a mapping with a single `candidates` key.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(Self::new(parse_candidates(content)?))
    }

    /// Load from a file; the path is remembered for `reload`.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let candidates = read_candidates(&path).await?;
        info!(
            path = %path.display(),
            count = candidates.len(),
            "loaded candidate list"
        );
        Ok(Self {
            path: Some(path),
            candidates: ArcSwap::from_pointee(candidates),
        })
    }

    /// Load from the file named by `AI_DISPATCH_CONFIG_LIST`.
    pub async fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_LIST_ENV).map_err(|_| {
            Error::configuration_with_context(
                format!("{} is not set", CONFIG_LIST_ENV),
                ErrorContext::new().with_source("candidate_source"),
            )
        })?;
        Self::from_path(path).await
    }

    /// Re-read the backing file. On error the current list is kept.
    pub async fn reload(&self) -> Result<usize> {
        let path = self.path.as_ref().ok_or_else(|| {
            Error::configuration_with_context(
                "candidate source has no backing file",
                ErrorContext::new().with_source("candidate_source"),
            )
        })?;
        let candidates = read_candidates(path).await?;
        let n = candidates.len();
        self.candidates.store(Arc::new(candidates));
        info!(path = %path.display(), count = n, "reloaded candidate list");
        Ok(n)
    }

    pub fn replace(&self, candidates: Vec<CandidateConfig>) {
        self.candidates.store(Arc::new(candidates));
    }

    pub fn snapshot(&self) -> Arc<Vec<CandidateConfig>> {
        self.candidates.load_full()
    }

    /// Candidates whose model is in `models`, keeping list order.
    pub fn filter_models(&self, models: &[&str]) -> Vec<CandidateConfig> {
        self.snapshot()
            .iter()
            .filter(|c| models.contains(&c.model.as_str()))
            .cloned()
            .collect()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.candidates.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn read_candidates(path: &Path) -> Result<Vec<CandidateConfig>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::configuration_with_context(
            format!("failed to read candidate list: {}", e),
            ErrorContext::new()
                .with_field_path(path.display().to_string())
                .with_source("candidate_source"),
        )
    })?;
    parse_candidates(&content).map_err(|e| match e {
        Error::Configuration { message, context } => Error::Configuration {
            message,
            context: context.with_details(format!("file: {}", path.display())),
        },
        other => other,
    })
}

fn parse_candidates(content: &str) -> Result<Vec<CandidateConfig>> {
    let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
    let list = match doc {
        serde_yaml::Value::Sequence(seq) => serde_yaml::Value::Sequence(seq),
        serde_yaml::Value::Mapping(mut map) => {
            let list = map
                .remove("candidates")
                .ok_or_else(|| config_error("expected a `candidates` list"))?;
            if let Some((key, _)) = map.iter().next() {
                return Err(config_error(format!(
                    "unknown top-level key {:?}",
                    key.as_str().unwrap_or("<non-string>")
                )));
            }
            list
        }
        _ => return Err(config_error("expected a list of candidates")),
    };
    serde_yaml::from_value(list).map_err(|e| config_error(e.to_string()))
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::configuration_with_context(msg, ErrorContext::new().with_source("candidate_source"))
}
