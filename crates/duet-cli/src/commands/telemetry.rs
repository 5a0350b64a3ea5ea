//! `duet telemetry` subcommands

use crate::context::CliContext;
use crate::error::CliResult;
use crate::output::OutputFormat;
use colored::Colorize;
use duet_foundation::telemetry::FlushOutcome;
use serde_json::json;

/// Execute the `duet telemetry status` command
pub async fn run_status(ctx: &CliContext, format: OutputFormat) -> CliResult<()> {
    let records = ctx.telemetry.buffer().records().await;
    let enabled = ctx.telemetry.is_enabled();

    if format == OutputFormat::Json {
        let pending: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "event_type": r.record.event_type,
                    "retry_count": r.retry_count,
                    "first_attempt": r.first_attempt,
                })
            })
            .collect();
        let status = json!({
            "enabled": enabled,
            "max_retries": ctx.telemetry.buffer().max_retries(),
            "pending": pending,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let state = if enabled {
        "enabled".green()
    } else {
        "disabled".yellow()
    };
    println!("Telemetry:        {state}");
    println!(
        "Buffered records: {} (max {} retries)",
        records.len(),
        ctx.telemetry.buffer().max_retries()
    );
    for buffered in &records {
        println!(
            "  {} {} (attempts: {})",
            "•".bright_black(),
            buffered.record.event_type,
            buffered.retry_count
        );
    }
    Ok(())
}

/// Execute the `duet telemetry flush` command
pub async fn run_flush(ctx: &CliContext) -> CliResult<()> {
    match ctx.telemetry.flush().await {
        FlushOutcome::Empty => println!("{} Nothing to send", "•".bright_black()),
        FlushOutcome::Sent(n) => println!("{} Sent {n} buffered record(s)", "✓".green()),
        FlushOutcome::Failed { kept, dropped } => println!(
            "{} Backend unreachable: {kept} record(s) kept, {dropped} dropped",
            "✗".red()
        ),
    }
    Ok(())
}

/// Execute the `duet telemetry clear` command
pub async fn run_clear(ctx: &CliContext) -> CliResult<()> {
    ctx.telemetry.buffer().clear().await;
    println!("{} Telemetry buffer cleared", "✓".green());
    Ok(())
}
