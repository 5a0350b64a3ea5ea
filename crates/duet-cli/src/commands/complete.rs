//! `duet complete`

use crate::cli::ModeArg;
use crate::context::CliContext;
use crate::error::{CliError, CliResult};
use crate::output::OutputFormat;
use colored::Colorize;
use duet_kernel::inference::{ChatMessage, CompletionParams, CompletionResult, InferenceMode};
use futures::StreamExt;
use std::io::Write;
use tracing::warn;

pub struct CompleteArgs {
    pub prompt: String,
    pub system: Option<String>,
    pub mode: ModeArg,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub token: Option<String>,
    pub stream: bool,
}

/// The binary links no native engine, so every completion is served
/// remotely. Local attempts are never made; they would only fetch model
/// files that nothing can load.
fn serving_mode(mode: ModeArg) -> CliResult<InferenceMode> {
    match mode {
        ModeArg::Local => Err(CliError::ConfigError(
            "local inference needs a native engine, which this build does not link; use --mode remote"
                .into(),
        )),
        ModeArg::LocalFirst | ModeArg::RemoteFirst => {
            warn!(requested = %InferenceMode::from(mode), "no native engine linked, completing remotely");
            Ok(InferenceMode::Remote)
        }
        ModeArg::Remote => Ok(InferenceMode::Remote),
    }
}

/// Execute the `duet complete` command
pub async fn run(ctx: &CliContext, args: CompleteArgs, format: OutputFormat) -> CliResult<()> {
    let mode = serving_mode(args.mode)?;
    let model = ctx.language_model()?;

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = args.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(args.prompt));

    let mut params = CompletionParams::default()
        .with_mode(mode)
        .with_max_tokens(args.max_tokens);
    if let Some(slug) = args.model {
        params = params.with_model(slug);
    }
    if let Some(temperature) = args.temperature {
        params = params.with_temperature(temperature);
    }
    if let Some(token) = args.token {
        params = params.with_remote_token(token);
    }

    let streamed = args.stream && format == OutputFormat::Text;
    let result = if streamed {
        let mut stream = model.complete_stream(messages, params);
        let mut stdout = std::io::stdout();
        while let Some(token) = stream.next().await {
            print!("{}", token.text);
            stdout.flush()?;
        }
        println!();
        stream.finish().await
    } else {
        model.complete(&messages, &params).await
    };

    report(&result, format, streamed)
}

fn report(result: &CompletionResult, format: OutputFormat, streamed: bool) -> CliResult<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return if result.success {
            Ok(())
        } else {
            Err(CliError::Other("completion failed".into()))
        };
    }

    if !result.success {
        let reason = result.failure_reason().unwrap_or("unknown error");
        return Err(CliError::Other(reason.to_string()));
    }

    if !streamed {
        println!("{}", result.response.as_deref().unwrap_or_default());
    }
    for call in &result.tool_calls {
        println!("{} tool call: {}", "→".cyan(), call.name);
    }

    let served_by = result
        .served_by
        .map(|mode| mode.to_string())
        .unwrap_or_else(|| "-".to_string());
    eprintln!(
        "{}",
        format!(
            "[{served_by}] {} tokens, {:.0} ms, {:.1} tok/s",
            result.total_tokens, result.total_time_ms, result.tokens_per_second
        )
        .bright_black()
    );
    Ok(())
}
