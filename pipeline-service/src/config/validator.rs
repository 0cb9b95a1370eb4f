// Pipeline Validator
// Checks a pipeline config before any script runs; reports every violation at once

use crate::config::models::{PipelineConfig, Stage, Variable, VariableType, VariableValue};
use crate::config::substitution::{is_identifier, placeholders};

use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// What a validation error is attached to, so a UI can highlight it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationTarget {
    Stage(String),
    Variable(String),
    Pipeline,
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationTarget::Stage(id) => write!(f, "stage '{}'", id),
            ValidationTarget::Variable(key) => write!(f, "variable '{}'", key),
            ValidationTarget::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Validation error for semantic checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub target: ValidationTarget,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(target: ValidationTarget, message: impl Into<String>) -> Self {
        Self {
            target,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Outcome of `validate`
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Rendered error messages
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

/// Validate a pipeline config.
///
/// Only enabled stages are checked for scripts and placeholder references;
/// variables are checked when an enabled stage references them.
pub fn validate(config: &PipelineConfig) -> ValidationReport {
    let mut errors = Vec::new();

    check_unique_stage_ids(&config.stages, &mut errors);

    // key -> first stage that references it
    let mut referenced: BTreeMap<&str, &str> = BTreeMap::new();

    for stage in config.enabled_stages() {
        let target = || ValidationTarget::Stage(stage.id.clone());

        if stage.scripts.is_empty() {
            errors.push(
                ValidationError::new(target(), "enabled stage has no scripts")
                    .with_suggestion("add a script or disable the stage"),
            );
        }

        for script in &stage.scripts {
            if script.path.trim().is_empty() {
                errors.push(ValidationError::new(target(), "script has an empty path"));
            }

            for arg in &script.args {
                for key in placeholders(arg) {
                    if config.variables.contains_key(key) {
                        referenced.entry(key).or_insert(stage.id.as_str());
                    } else {
                        errors.push(
                            ValidationError::new(
                                target(),
                                format!(
                                    "script '{}' references undefined variable '{}'",
                                    script.path, key
                                ),
                            )
                            .with_suggestion(format!("define variable '{}'", key)),
                        );
                    }
                }
            }
        }
    }

    for key in referenced.keys() {
        if let Some(variable) = config.variables.get(*key) {
            check_variable(key, variable, &mut errors);
        }
    }

    for key in config.variables.keys() {
        if !is_identifier(key) {
            errors.push(ValidationError::new(
                ValidationTarget::Variable(key.clone()),
                "key must start with a letter or underscore and contain only letters, digits and underscores",
            ));
        }
    }

    if !config.selected_model_variable_ref.is_empty()
        && !config
            .variables
            .contains_key(&config.selected_model_variable_ref)
    {
        errors.push(ValidationError::new(
            ValidationTarget::Variable(config.selected_model_variable_ref.clone()),
            "selected model reference points to an undefined variable",
        ));
    }

    if !(0.0..=1.0).contains(&config.confidence_threshold) {
        errors.push(ValidationError::new(
            ValidationTarget::Pipeline,
            format!(
                "confidence threshold {} is outside [0, 1]",
                config.confidence_threshold
            ),
        ));
    }

    ValidationReport { errors }
}

fn check_unique_stage_ids(stages: &[Stage], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.id.as_str()) {
            errors.push(ValidationError::new(
                ValidationTarget::Stage(stage.id.clone()),
                "duplicate stage id",
            ));
        }
    }
}

fn check_variable(key: &str, variable: &Variable, errors: &mut Vec<ValidationError>) {
    let target = || ValidationTarget::Variable(key.to_string());

    if variable.display_in_ui && variable.label.trim().is_empty() {
        errors.push(
            ValidationError::new(target(), "variable is shown in the UI but has no label")
                .with_suggestion("set 'label'"),
        );
    }

    match variable.kind {
        VariableType::Number => match variable.default {
            VariableValue::Number(value) => {
                if let (Some(min), Some(max)) = (variable.min, variable.max) {
                    if min > max {
                        errors.push(ValidationError::new(
                            target(),
                            format!("min {} is greater than max {}", min, max),
                        ));
                    }
                }
                if variable.min.is_some_and(|min| value < min)
                    || variable.max.is_some_and(|max| value > max)
                {
                    errors.push(ValidationError::new(
                        target(),
                        format!("default {} is outside the allowed range", value),
                    ));
                }
            }
            _ => errors.push(ValidationError::new(
                target(),
                format!("number variable has non-numeric default '{}'", variable.default),
            )),
        },
        VariableType::Selector => {
            if variable.options.is_empty() {
                errors.push(
                    ValidationError::new(target(), "selector variable has no options")
                        .with_suggestion("add at least one entry to 'options'"),
                );
            } else {
                let default = variable.default.to_string();
                if !variable.options.contains(&default) {
                    errors.push(ValidationError::new(
                        target(),
                        format!("default '{}' is not one of the options", default),
                    ));
                }
            }
        }
        VariableType::Text => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::ScriptInvocation;

    fn train_stage(args: &[&str]) -> Stage {
        Stage::new("train", "Train")
            .with_script(ScriptInvocation::new("train.py").with_args(args.iter().copied()))
    }

    #[test]
    fn test_valid_config() {
        let config = PipelineConfig::default()
            .with_stage(train_stage(&["--epochs", "{epochs}"]))
            .with_variable(
                "epochs",
                Variable::number(10.0).with_label("Epochs").with_range(1.0, 100.0).shown(),
            );

        let report = validate(&config);
        assert!(report.is_valid(), "{:?}", report.messages());
    }

    #[test]
    fn test_unknown_variable_names_key_and_stage() {
        let config = PipelineConfig::default().with_stage(train_stage(&["{unknown_var}"]));

        let report = validate(&config);
        assert!(!report.is_valid());
        assert_eq!(report.errors().len(), 1);

        let error = &report.errors()[0];
        assert_eq!(error.target, ValidationTarget::Stage("train".to_string()));
        let rendered = error.to_string();
        assert!(rendered.contains("unknown_var"));
        assert!(rendered.contains("train"));
    }

    #[test]
    fn test_disabled_stage_is_not_checked() {
        let config = PipelineConfig::default()
            .with_stage(train_stage(&["{unknown_var}"]).disabled())
            .with_stage(Stage::new("empty", "Empty").disabled());

        assert!(validate(&config).is_valid());
    }

    #[test]
    fn test_collects_all_errors() {
        let config = PipelineConfig::default()
            .with_stage(train_stage(&["{a}", "{model}", "{batch}"]))
            .with_stage(Stage::new("export", "Export"))
            .with_variable("model", Variable::selector("x", vec![]))
            .with_variable("batch", Variable::text("16").shown());

        let report = validate(&config);
        let messages = report.messages();

        // undefined {a}, export has no scripts, selector without options, shown without label
        assert_eq!(messages.len(), 4, "{:?}", messages);
        assert!(report
            .errors()
            .iter()
            .any(|e| e.target == ValidationTarget::Stage("export".into())));
        assert!(report
            .errors()
            .iter()
            .any(|e| e.target == ValidationTarget::Variable("model".into())));
        assert!(report
            .errors()
            .iter()
            .any(|e| e.target == ValidationTarget::Variable("batch".into())));
    }

    #[test]
    fn test_number_variable_checks() {
        let mut bad_default = Variable::number(1.0);
        bad_default.default = VariableValue::Text("ten".into());

        let config = PipelineConfig::default()
            .with_stage(train_stage(&["{epochs}", "{lr}"]))
            .with_variable("epochs", bad_default)
            .with_variable("lr", Variable::number(5.0).with_range(0.0, 1.0));

        let report = validate(&config);
        let messages = report.messages();
        assert_eq!(messages.len(), 2, "{:?}", messages);
        assert!(messages.iter().any(|m| m.contains("non-numeric")));
        assert!(messages.iter().any(|m| m.contains("outside the allowed range")));
    }

    #[test]
    fn test_selector_default_must_be_an_option() {
        let config = PipelineConfig::default()
            .with_stage(train_stage(&["{model}"]))
            .with_variable(
                "model",
                Variable::selector("yolov8x.pt", vec!["yolov8n.pt".into()]),
            );

        let report = validate(&config);
        assert_eq!(report.errors().len(), 1);
        assert!(report.messages()[0].contains("not one of the options"));
    }

    #[test]
    fn test_pipeline_level_checks() {
        let mut config = PipelineConfig::default()
            .with_stage(train_stage(&[]))
            .with_stage(train_stage(&[]))
            .with_variable("bad-key", Variable::text("x"));
        config.selected_model_variable_ref = "model".into();
        config.confidence_threshold = 1.5;

        let report = validate(&config);
        let messages = report.messages();
        assert_eq!(messages.len(), 4, "{:?}", messages);
        assert!(messages.iter().any(|m| m.contains("duplicate stage id")));
        assert!(messages.iter().any(|m| m.contains("bad-key")));
        assert!(messages.iter().any(|m| m.contains("selected model")));
        assert!(messages.iter().any(|m| m.contains("confidence threshold")));
    }
}
