pub mod config;
pub mod relay;
pub mod run;
pub mod validate;
pub mod worker;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use training_pipeline::{ConfigStore, FileConfigStore, HttpConfigStore, PipelineConfig};

/// Where the pipeline config is read from and saved to
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Pipeline config file (JSON or YAML)
    #[arg(long, short = 'c', env = "PIPELINE_CONFIG", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Load and save through a worker's config API instead of a file
    #[arg(
        long,
        env = "PIPELINE_CONFIG_URL",
        value_name = "URL",
        global = true,
        conflicts_with = "config"
    )]
    pub config_url: Option<String>,
}

/// Remote store when a URL is given, else the file at `config` or the per-user default
pub fn open_store(args: StoreArgs) -> Box<dyn ConfigStore> {
    match args.config_url {
        Some(url) => Box::new(HttpConfigStore::new(url)),
        None => Box::new(FileConfigStore::new(
            args.config.unwrap_or_else(FileConfigStore::default_path),
        )),
    }
}

pub async fn load_config(args: StoreArgs) -> Result<(Box<dyn ConfigStore>, PipelineConfig)> {
    let store = open_store(args);
    let config = store
        .load()
        .await
        .map_err(|e| eyre!("Failed to load {}: {}", store.location(), e))?;
    Ok((store, config))
}

/// Apply `NAME=VALUE` overrides to the variables' current values
pub fn apply_overrides(config: &mut PipelineConfig, assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        let Some((name, value)) = assignment.split_once('=') else {
            bail!("Invalid variable format '{}'. Expected name=value", assignment);
        };
        config
            .set_variable(name.trim(), value)
            .map_err(|e| eyre!("{}", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use training_pipeline::{Variable, VariableValue};

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_variable("epochs", Variable::number(10.0))
            .with_variable("model", Variable::text("yolov8n.pt"))
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = config();
        apply_overrides(&mut config, &["epochs=25".to_string(), "model=best.pt".to_string()]).unwrap();

        let values = config.variable_values();
        assert_eq!(values["epochs"], VariableValue::Number(25.0));
        assert_eq!(values["model"], VariableValue::Text("best.pt".to_string()));
    }

    #[test]
    fn test_open_store_prefers_url() {
        let store = open_store(StoreArgs {
            config: None,
            config_url: Some("http://localhost:3000/".to_string()),
        });
        assert_eq!(store.location(), "http://localhost:3000/api/pipeline/load");

        let store = open_store(StoreArgs {
            config: Some(PathBuf::from("/tmp/pipeline.yaml")),
            config_url: None,
        });
        assert_eq!(store.location(), "/tmp/pipeline.yaml");
    }

    #[test]
    fn test_override_errors() {
        let mut config = config();
        assert!(apply_overrides(&mut config, &["epochs".to_string()]).is_err());
        assert!(apply_overrides(&mut config, &["epochs=many".to_string()]).is_err());
        assert!(apply_overrides(&mut config, &["unknown=1".to_string()]).is_err());
    }
}
