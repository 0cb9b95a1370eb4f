use crate::output;

use clap::{Args, Subcommand};
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use training_pipeline::{ConfigDocument, ConfigStore, PipelineConfig};

/// Show or edit the stored pipeline config
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub store: super::StoreArgs,

    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the stored document
    Show,

    /// Show where the config is stored
    Path,

    /// Set variable values (format: name=value)
    Set {
        #[arg(required = true, value_name = "NAME=VALUE")]
        assignments: Vec<String>,
    },

    /// Enable a stage
    Enable { stage: String },

    /// Disable a stage
    Disable { stage: String },
}

pub async fn execute(args: ConfigArgs) -> Result<()> {
    let (store, mut config) = super::load_config(args.store).await?;

    match args.command {
        ConfigCommand::Show => {
            let doc = ConfigDocument { pipeline: config };
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }

        ConfigCommand::Path => {
            println!("{}", store.location());
        }

        ConfigCommand::Set { assignments } => {
            super::apply_overrides(&mut config, &assignments)?;
            save(store.as_ref(), &config).await?;
            for assignment in &assignments {
                output::check(assignment);
            }
        }

        ConfigCommand::Enable { stage } => {
            set_enabled(&mut config, &stage, true)?;
            save(store.as_ref(), &config).await?;
            output::check(&format!("Stage '{}' enabled", stage));
        }

        ConfigCommand::Disable { stage } => {
            set_enabled(&mut config, &stage, false)?;
            save(store.as_ref(), &config).await?;
            output::check(&format!("Stage '{}' disabled", stage));
        }
    }

    Ok(())
}

fn set_enabled(config: &mut PipelineConfig, stage_id: &str, enabled: bool) -> Result<()> {
    let Some(stage) = config.stages.iter_mut().find(|s| s.id == stage_id) else {
        bail!("Unknown stage '{}'", stage_id);
    };
    stage.enabled = enabled;
    Ok(())
}

async fn save(store: &dyn ConfigStore, config: &PipelineConfig) -> Result<()> {
    store
        .save(config)
        .await
        .map_err(|e| eyre!("Failed to save config: {}", e))
}
