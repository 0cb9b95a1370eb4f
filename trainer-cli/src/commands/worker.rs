use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use training_pipeline::worker::{Worker, WorkerConfig};

/// Serve execution channels and run scripts on this machine
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Address to accept channels on
    #[arg(long, env = "WORKER_LISTEN", default_value = "0.0.0.0:3001")]
    pub listen: String,

    /// Interpreter that runs each script
    #[arg(long, env = "WORKER_INTERPRETER", default_value = "python3")]
    pub interpreter: String,

    /// Extra interpreter arguments placed before the script path
    #[arg(long = "interpreter-arg", value_name = "ARG", allow_hyphen_values = true, default_values = ["-u"])]
    pub interpreter_args: Vec<String>,

    /// Directory scripts run in
    #[arg(long, env = "WORKER_DIR", value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Pipeline config document served at /api/pipeline/load and /api/pipeline/save
    #[arg(long, short = 'c', env = "PIPELINE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub async fn execute(args: WorkerArgs) -> Result<()> {
    let mut config = WorkerConfig::default()
        .with_listen(args.listen)
        .with_interpreter(args.interpreter, args.interpreter_args);
    if let Some(dir) = args.working_dir {
        config = config.with_working_dir(dir);
    }
    if let Some(path) = args.config {
        config = config.with_pipeline_config(path);
    }

    let worker = Worker::new(config)?;
    output::status("Listening", &format!("{}{}", worker.config().listen, worker.config().route));
    output::info(&format!("Pipeline config: {}", worker.config().pipeline_config.display()));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    worker.run(shutdown).await?;
    output::info("Worker stopped");
    Ok(())
}
