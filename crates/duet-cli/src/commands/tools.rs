//! `duet filter-tools`

use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, Tabular, render};
use duet_foundation::config::DuetConfig;
use duet_foundation::tools::ToolFilter;
use duet_kernel::tool::ToolDescriptor;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ToolRow {
    name: String,
    description: String,
}

impl Tabular for ToolRow {
    fn headers() -> &'static [&'static str] {
        &["tool", "description"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.description.clone()]
    }
}

/// Execute the `duet filter-tools` command
///
/// Semantic filtering needs a loaded embedding model, which the CLI does not
/// have, so the keyword strategy is always applied here.
pub async fn run(
    config: &DuetConfig,
    query: &str,
    tools_file: &Path,
    max_tools: Option<usize>,
    threshold: Option<f32>,
    format: OutputFormat,
) -> CliResult<()> {
    let content = tokio::fs::read_to_string(tools_file).await.map_err(|e| {
        CliError::ToolError(format!("cannot read '{}': {e}", tools_file.display()))
    })?;
    let tools: Vec<ToolDescriptor> = serde_json::from_str(&content)?;

    let mut filter_config = config.tool_filter.clone();
    if max_tools.is_some() {
        filter_config.max_tools = max_tools;
    }
    if let Some(threshold) = threshold {
        filter_config = filter_config.with_threshold(threshold);
    }

    let selected = ToolFilter::new(filter_config)
        .filter_tools(query, &tools, None)
        .await;

    let rows: Vec<ToolRow> = selected
        .iter()
        .map(|tool| ToolRow {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
        })
        .collect();
    println!("{}", render(&rows, format)?);
    Ok(())
}
