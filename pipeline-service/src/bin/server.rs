use training_pipeline::worker::{Worker, WorkerConfig};

use std::env;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = WorkerConfig::default();
    if let Ok(listen) = env::var("WORKER_LISTEN") {
        config = config.with_listen(listen);
    }
    if let Ok(interpreter) = env::var("WORKER_INTERPRETER") {
        config = config.with_interpreter(interpreter, vec!["-u".to_string()]);
    }
    if let Ok(dir) = env::var("WORKER_DIR") {
        config = config.with_working_dir(dir);
    }
    if let Ok(path) = env::var("PIPELINE_CONFIG") {
        config = config.with_pipeline_config(path);
    }

    let worker = Worker::new(config)?;
    println!("Training worker listening on {}", worker.config().listen);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    worker.run(shutdown).await?;
    Ok(())
}
