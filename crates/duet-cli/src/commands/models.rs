//! `duet models`, `duet voice-models` and `duet download`

use crate::context::CliContext;
use crate::error::CliResult;
use crate::output::{OutputFormat, Tabular, render};
use colored::Colorize;
use duet_kernel::error::DownloadError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ModelRow {
    slug: String,
    name: String,
    size_mb: u32,
    quantization: u32,
    tool_calling: bool,
    downloaded: bool,
}

impl Tabular for ModelRow {
    fn headers() -> &'static [&'static str] {
        &["slug", "name", "size (MB)", "quant", "tools", "downloaded"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.slug.clone(),
            self.name.clone(),
            self.size_mb.to_string(),
            self.quantization.to_string(),
            yes_no(self.tool_calling),
            yes_no(self.downloaded),
        ]
    }
}

#[derive(Debug, Serialize)]
struct VoiceModelRow {
    slug: String,
    file_name: String,
    size_mb: u32,
    downloaded: bool,
}

impl Tabular for VoiceModelRow {
    fn headers() -> &'static [&'static str] {
        &["slug", "file", "size (MB)", "downloaded"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.slug.clone(),
            self.file_name.clone(),
            self.size_mb.to_string(),
            yes_no(self.downloaded),
        ]
    }
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}

/// Execute the `duet models` command
pub async fn run_list(ctx: &CliContext, refresh: bool, format: OutputFormat) -> CliResult<()> {
    let models = if refresh {
        ctx.registry.refresh_models().await
    } else {
        ctx.registry.list_models().await
    };

    if models.is_empty() && format == OutputFormat::Text {
        println!("{}", "No models available.".yellow());
        return Ok(());
    }

    let rows: Vec<ModelRow> = models
        .into_iter()
        .map(|m| ModelRow {
            slug: m.slug,
            name: m.name,
            size_mb: m.size_mb,
            quantization: m.quantization,
            tool_calling: m.supports_tool_calling,
            downloaded: m.is_downloaded,
        })
        .collect();
    println!("{}", render(&rows, format)?);
    Ok(())
}

/// Execute the `duet voice-models` command
pub async fn run_voice_list(ctx: &CliContext, format: OutputFormat) -> CliResult<()> {
    let models = ctx.registry.list_voice_models().await;

    if models.is_empty() && format == OutputFormat::Text {
        println!("{}", "No speech models available.".yellow());
        return Ok(());
    }

    let rows: Vec<VoiceModelRow> = models
        .into_iter()
        .map(|m| VoiceModelRow {
            slug: m.slug,
            file_name: m.file_name,
            size_mb: m.size_mb,
            downloaded: m.is_downloaded,
        })
        .collect();
    println!("{}", render(&rows, format)?);
    Ok(())
}

/// Execute the `duet download` command
pub async fn run_download(ctx: &CliContext, slug: &str, voice: bool) -> CliResult<()> {
    let already = ctx.registry.is_model_downloaded(slug).await;
    if already {
        println!("{} {} is already downloaded", "•".bright_black(), slug.cyan());
        return Ok(());
    }

    println!("{} Downloading {}", "→".green(), slug.cyan());
    let result: Result<(), DownloadError> = if voice {
        ctx.registry.download_voice_model(slug).await
    } else {
        ctx.registry.download_model(slug).await
    };
    result?;

    println!(
        "{} Stored in {}",
        "✓".green(),
        ctx.models_dir.join(slug).display()
    );
    Ok(())
}
