use crate::output;


use clap::Args;
use color_eyre::Result;

use training_pipeline::config::substitution::placeholders;
use training_pipeline::validate;

/// Validate the pipeline config
#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub store: super::StoreArgs,

    /// Validate with a variable overridden (can be repeated, format: name=value)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,
}

pub async fn execute(args: ValidateArgs) -> Result<()> {
    let (store, mut config) = super::load_config(args.store).await?;
    output::status("Validating", &store.location());
    output::check("Document parsed");

    super::apply_overrides(&mut config, &args.variables)?;

    let scripts: usize = config.enabled_stages().map(|s| s.scripts.len()).sum();
    let referenced: usize = config
        .enabled_stages()
        .flat_map(|s| &s.scripts)
        .flat_map(|script| &script.args)
        .map(|arg| placeholders(arg).count())
        .sum();
    output::check(&format!(
        "Structure: {} stages ({} enabled), {} scripts, {} variables, {} placeholders",
        config.stages.len(),
        config.enabled_stages().count(),
        scripts,
        config.variables.len(),
        referenced
    ));

    let report = validate(&config);
    if !report.is_valid() {
        output::error(&format!("{} validation error(s):", report.errors().len()));
        for error in report.errors() {
            output::error(&format!("  - [{}] {}", error.target, error.message));
            if let Some(suggestion) = &error.suggestion {
                output::info(&format!("  Suggestion: {}", suggestion));
            }
        }
        std::process::exit(1);
    }

    output::check("Semantic validation passed");
    if let Some(model) = config.selected_model() {
        output::info(&format!("Selected model: {}", model));
    }
    println!();
    output::success("Pipeline is valid");
    Ok(())
}
