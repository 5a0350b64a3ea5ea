//! Tool filtering
//!
//! Narrows the tools offered to a model down to the ones relevant to the
//! current query. The result is always a subset of the input, ordered by
//! descending score with ties kept in input order.
//!
//! # Example
//!
//! ```
//! use duet_foundation::tools::{ToolFilter, ToolFilterConfig};
//! use duet_kernel::tool::{ToolDescriptor, ToolParameter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let tools = vec![
//!     ToolDescriptor::function(
//!         "toggle_lights",
//!         "Switch the lights on or off",
//!         [("on", ToolParameter::new("boolean", "Light state").required())],
//!     ),
//!     ToolDescriptor::function(
//!         "get_weather",
//!         "Fetch a forecast for a city",
//!         [("city", ToolParameter::new("string", "City name").required())],
//!     ),
//! ];
//!
//! let filter = ToolFilter::new(ToolFilterConfig::keyword(3));
//! let kept = filter.filter_tools("turn the lights on", &tools, None).await;
//! assert_eq!(kept[0].name(), "toggle_lights");
//! # }
//! ```

mod similarity;

pub use similarity::cosine_similarity;

use async_trait::async_trait;
use duet_kernel::error::InferenceError;
use duet_kernel::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;

/// Tool cap used by the orchestrator when filtering is on and nothing else is configured.
pub const DEFAULT_MAX_TOOLS: usize = 3;

/// Text embedding capability used by the semantic strategy.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, InferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFilterStrategy {
    #[default]
    Keyword,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolFilterConfig {
    pub strategy: ToolFilterStrategy,
    /// Upper bound on returned tools. `None` keeps every qualifying tool.
    pub max_tools: Option<usize>,
    pub similarity_threshold: f32,
    /// Return the (capped) input when no tool reaches the threshold.
    pub fallback_to_all: bool,
}

impl Default for ToolFilterConfig {
    fn default() -> Self {
        Self {
            strategy: ToolFilterStrategy::Keyword,
            max_tools: None,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            fallback_to_all: true,
        }
    }
}

impl ToolFilterConfig {
    pub fn keyword(max_tools: usize) -> Self {
        Self {
            max_tools: Some(max_tools),
            ..Self::default()
        }
    }

    pub fn semantic(max_tools: usize) -> Self {
        Self {
            strategy: ToolFilterStrategy::Semantic,
            max_tools: Some(max_tools),
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_fallback_to_all(mut self, fallback: bool) -> Self {
        self.fallback_to_all = fallback;
        self
    }
}

/// Lowercase, punctuation to spaces, keep words of two or more characters.
pub fn query_words(query: &str) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|word| word.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Fraction of `words` found in the tool's lowercased `"name description"`.
pub fn keyword_score(words: &[String], tool: &ToolDescriptor) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", tool.name(), tool.description()).to_lowercase();
    let matched = words.iter().filter(|w| haystack.contains(w.as_str())).count();
    matched as f32 / words.len() as f32
}

/// Text embedded for a tool: `"name: description\nParameters: p1, p2"`.
pub fn semantic_text(tool: &ToolDescriptor) -> String {
    let params: Vec<&str> = tool.parameter_names().collect();
    format!(
        "{}: {}\nParameters: {}",
        tool.name(),
        tool.description(),
        params.join(", ")
    )
}

#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    config: ToolFilterConfig,
}

impl ToolFilter {
    pub fn new(config: ToolFilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolFilterConfig {
        &self.config
    }

    /// Select the tools relevant to `query`. `embedder` is only used by the
    /// semantic strategy; without one, or on any embedding failure, the
    /// keyword strategy is applied instead.
    pub async fn filter_tools(
        &self,
        query: &str,
        tools: &[ToolDescriptor],
        embedder: Option<&dyn Embedder>,
    ) -> Vec<ToolDescriptor> {
        if tools.is_empty() {
            return Vec::new();
        }

        let scores = match (self.config.strategy, embedder) {
            (ToolFilterStrategy::Semantic, Some(embedder)) => {
                match Self::semantic_scores(query, tools, embedder).await {
                    Ok(scores) => Some(scores),
                    Err(e) => {
                        warn!(error = %e, "semantic tool filtering failed, using keywords");
                        Self::keyword_scores(query, tools)
                    }
                }
            }
            _ => Self::keyword_scores(query, tools),
        };

        let Some(scores) = scores else {
            debug!("query has no usable words, keeping tools in order");
            return self.capped(tools.iter());
        };

        self.rank(tools, scores)
    }

    fn keyword_scores(query: &str, tools: &[ToolDescriptor]) -> Option<Vec<f32>> {
        let words = query_words(query);
        if words.is_empty() {
            return None;
        }
        Some(tools.iter().map(|tool| keyword_score(&words, tool)).collect())
    }

    async fn semantic_scores(
        query: &str,
        tools: &[ToolDescriptor],
        embedder: &dyn Embedder,
    ) -> Result<Vec<f32>, InferenceError> {
        let query_vector = embedder.embed_text(query).await?;
        let mut scores = Vec::with_capacity(tools.len());
        for tool in tools {
            let tool_vector = embedder.embed_text(&semantic_text(tool)).await?;
            scores.push(cosine_similarity(&query_vector, &tool_vector));
        }
        Ok(scores)
    }

    fn rank(&self, tools: &[ToolDescriptor], scores: Vec<f32>) -> Vec<ToolDescriptor> {
        let threshold = self.config.similarity_threshold;
        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score >= threshold)
            .collect();

        if ranked.is_empty() {
            debug!(threshold, "no tool reached the threshold");
            return if self.config.fallback_to_all {
                self.capped(tools.iter())
            } else {
                Vec::new()
            };
        }

        // `sort_by` is stable, so equal scores keep input order.
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        self.capped(ranked.into_iter().map(|(index, _)| &tools[index]))
    }

    fn capped<'a>(&self, tools: impl Iterator<Item = &'a ToolDescriptor>) -> Vec<ToolDescriptor> {
        let limit = self.config.max_tools.unwrap_or(usize::MAX);
        tools.take(limit).cloned().collect()
    }
}
