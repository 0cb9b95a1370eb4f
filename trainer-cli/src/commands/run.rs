use crate::console::ConsoleSink;
use crate::output;

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::Result;
use tracing::debug;

use training_pipeline::execution::{
    progress_channel, ExecutionEvent, ExecutionResult, ExecutorConfig, FailurePolicy,
    PipelineExecutor, PipelineState, StageStatus,
};
use training_pipeline::WebSocketConnector;

pub const DEFAULT_WORKER_URL: &str = "ws://localhost:3000/api/script/ws/execute";

/// Run the pipeline, one script per channel, against a worker or relay
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: super::StoreArgs,

    /// Execution endpoint
    #[arg(long, env = "WORKER_URL", default_value = DEFAULT_WORKER_URL)]
    pub url: String,

    /// Set a variable for this run (can be repeated, format: name=value)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Keep going when a stage marked optional fails
    #[arg(long)]
    pub skip_optional: bool,

    /// Retries per script after an unexpected connection close
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Pause between scripts, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub script_delay_ms: u64,

    /// Pause before a retry, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub retry_delay_ms: u64,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let (store, mut config) = super::load_config(args.store).await?;
    super::apply_overrides(&mut config, &args.variables)?;

    output::status("Loaded", &store.location());
    output::info(&format!(
        "{} stages ({} enabled), {} variables",
        config.stages.len(),
        config.enabled_stages().count(),
        config.variables.len()
    ));
    output::status("Connecting", &args.url);

    let executor_config = ExecutorConfig {
        inter_script_delay: Duration::from_millis(args.script_delay_ms),
        retry_delay: Duration::from_millis(args.retry_delay_ms),
        max_retries: args.max_retries,
        failure_policy: if args.skip_optional {
            FailurePolicy::SkipOptional
        } else {
            FailurePolicy::StrictAbort
        },
    };
    debug!(url = %args.url, ?executor_config, "starting run");

    let (tx, mut rx) = progress_channel();
    let executor = Arc::new(
        PipelineExecutor::new(
            Arc::new(WebSocketConnector::new(args.url)),
            Arc::new(ConsoleSink::new()),
        )
        .with_config(executor_config)
        .with_progress(tx),
    );

    // Spawn execution in background
    let runner = executor.clone();
    let mut exec_handle = tokio::spawn(async move { runner.run(&config).await });

    // Process events in the foreground; Ctrl-C cancels the run
    let mut cancelling = false;
    let result = loop {
        tokio::select! {
            Some(event) = rx.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                output::warning("Cancelling pipeline...");
                executor.cancel();
            }
            joined = &mut exec_handle => break joined??,
        }
    };
    while let Ok(event) = rx.try_recv() {
        print_event(&event);
    }

    print_summary(&result);
    if !result.success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted { total_stages } => {
            println!();
            output::header(&format!("Pipeline ({} stages)", total_stages));
        }

        ExecutionEvent::ValidationFailed { errors } => {
            output::error(&format!("{} validation error(s), nothing was run", errors.len()));
        }

        ExecutionEvent::StageStarted {
            name,
            total_scripts,
            ..
        } => {
            output::stage_header(name, *total_scripts);
        }

        ExecutionEvent::StageStatusChanged { stage_id, status } => match status {
            StageStatus::Completed => output::dim_success(&format!("  Stage '{}' OK", stage_id)),
            StageStatus::Error => output::dim_failure(&format!("  Stage '{}' FAIL", stage_id)),
            StageStatus::Cancelled => output::dim(&format!("  Stage '{}' cancelled", stage_id)),
            _ => {}
        },

        ExecutionEvent::ScriptStarted {
            script_path,
            args,
            attempt,
            ..
        } => {
            let retry = if *attempt > 1 {
                format!(" (attempt {})", attempt)
            } else {
                String::new()
            };
            println!("    Script {} {}{}", script_path, args.join(" "), retry);
        }

        ExecutionEvent::ScriptCompleted {
            script_path,
            duration,
            ..
        } => {
            output::dim_success(&format!(
                "    {} OK ({:.2}s)",
                script_path,
                duration.as_secs_f64()
            ));
        }

        ExecutionEvent::ScriptRetry {
            script_path,
            attempt,
            reason,
            ..
        } => {
            output::warning(&format!(
                "    {} lost its connection ({}), retry {}",
                script_path, reason, attempt
            ));
        }

        ExecutionEvent::ScriptFailed {
            script_path,
            message,
            ..
        } => {
            output::failure(&format!("{}: {}", script_path, message));
        }

        ExecutionEvent::PipelineCompleted { state, duration } => {
            println!();
            let elapsed = duration.as_secs_f64();
            match state {
                PipelineState::Completed => {
                    output::success(&format!("Pipeline completed successfully in {:.2}s", elapsed))
                }
                PipelineState::Cancelled => {
                    output::warning(&format!("Pipeline cancelled after {:.2}s", elapsed))
                }
                _ => output::failure(&format!("Pipeline failed after {:.2}s", elapsed)),
            }
        }
    }
}

fn print_summary(result: &ExecutionResult) {
    for report in &result.stages {
        let line = format!("  {:<24} {}", report.stage_id, report.status);
        match report.status {
            StageStatus::Completed => output::dim_success(&line),
            StageStatus::Error => output::dim_failure(&line),
            _ => output::dim(&line),
        }
    }
    if result.retries > 0 {
        output::info(&format!("{} connection retries", result.retries));
    }
    if let Some(failure) = &result.failure {
        output::error(&failure.to_string());
    }
}
