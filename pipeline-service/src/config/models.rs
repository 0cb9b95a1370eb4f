// Pipeline Config Models
// Stages, script invocations and typed variables for a training pipeline

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Confidence threshold used when the stored document does not carry one
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.25;

/// Kind of a pipeline variable, which also decides how the UI renders it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Number,
    Text,
    Selector,
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableType::Number => write!(f, "number"),
            VariableType::Text => write!(f, "text"),
            VariableType::Selector => write!(f, "selector"),
        }
    }
}

/// Current value of a variable.
///
/// Numbers and strings stay distinct so validation can tell `5` from `"5"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl VariableValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            VariableValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VariableValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, VariableValue::Number(_))
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // f64's Display already drops a zero fraction: 5.0 -> "5"
            VariableValue::Number(n) => write!(f, "{}", n),
            VariableValue::Bool(b) => write!(f, "{}", b),
            VariableValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        VariableValue::Number(value)
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        VariableValue::Text(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        VariableValue::Text(value)
    }
}

/// A typed, named parameter substituted into script arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(rename = "type")]
    pub kind: VariableType,

    #[serde(default)]
    pub label: String,

    pub default: VariableValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    /// Whether the configuration UI exposes this variable as a control
    #[serde(default)]
    pub display_in_ui: bool,
}

impl Variable {
    fn with_kind(kind: VariableType, default: VariableValue) -> Self {
        Self {
            kind,
            label: String::new(),
            default,
            min: None,
            max: None,
            options: Vec::new(),
            display_in_ui: false,
        }
    }

    pub fn number(default: f64) -> Self {
        Self::with_kind(VariableType::Number, VariableValue::Number(default))
    }

    pub fn text(default: impl Into<String>) -> Self {
        Self::with_kind(VariableType::Text, VariableValue::Text(default.into()))
    }

    pub fn selector(default: impl Into<String>, options: Vec<String>) -> Self {
        let mut variable = Self::with_kind(VariableType::Selector, VariableValue::Text(default.into()));
        variable.options = options;
        variable
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Expose the variable as a UI control
    pub fn shown(mut self) -> Self {
        self.display_in_ui = true;
        self
    }
}

/// One script run inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInvocation {
    pub path: String,

    /// Arguments, possibly containing `{variable_key}` placeholders
    #[serde(default)]
    pub args: Vec<String>,
}

impl ScriptInvocation {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A named, ordered pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub scripts: Vec<ScriptInvocation>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Documented as "pipeline continues if this fails"; only honored under
    /// `FailurePolicy::SkipOptional`
    #[serde(default)]
    pub optional: bool,
}

impl Stage {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            scripts: Vec::new(),
            enabled: true,
            optional: false,
        }
    }

    pub fn with_script(mut self, script: ScriptInvocation) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Name for display, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Complete pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stages: Vec<Stage>,

    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,

    /// Key of the variable holding the currently selected model
    #[serde(default, rename = "selected_model_variable_reference")]
    pub selected_model_variable_ref: String,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            variables: BTreeMap::new(),
            selected_model_variable_ref: String::new(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, variable: Variable) -> Self {
        self.variables.insert(key.into(), variable);
        self
    }

    pub fn enabled_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.enabled)
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Snapshot of current variable values, used for substitution at run start
    pub fn variable_values(&self) -> HashMap<String, VariableValue> {
        self.variables
            .iter()
            .map(|(key, var)| (key.clone(), var.default.clone()))
            .collect()
    }

    /// Value of the variable referenced by `selected_model_variable_ref`
    pub fn selected_model(&self) -> Option<&VariableValue> {
        if self.selected_model_variable_ref.is_empty() {
            return None;
        }
        self.variables
            .get(&self.selected_model_variable_ref)
            .map(|v| &v.default)
    }

    /// Set a variable's current value from its textual form.
    ///
    /// Number variables parse the text as a float; other kinds store it as-is.
    pub fn set_variable(&mut self, key: &str, raw: &str) -> Result<(), String> {
        let variable = self
            .variables
            .get_mut(key)
            .ok_or_else(|| format!("unknown variable '{}'", key))?;

        variable.default = match variable.kind {
            VariableType::Number => raw
                .trim()
                .parse::<f64>()
                .map(VariableValue::Number)
                .map_err(|_| format!("variable '{}' expects a number, got '{}'", key, raw))?,
            VariableType::Text | VariableType::Selector => VariableValue::Text(raw.to_string()),
        };
        Ok(())
    }
}

/// On-disk wrapper: `{"pipeline": {...}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_document() {
        let json = r#"{
            "pipeline": {
                "stages": [
                    {
                        "id": "train",
                        "name": "Train",
                        "scripts": [{"path": "train.py", "args": ["--epochs", "{epochs}"]}],
                        "optional": false
                    }
                ],
                "variables": {
                    "epochs": {"type": "number", "label": "Epochs", "default": 50, "min": 1, "max": 500, "display_in_ui": true},
                    "model": {"type": "selector", "label": "Model", "default": "yolov8n.pt", "options": ["yolov8n.pt", "yolov8s.pt"]}
                },
                "selected_model_variable_reference": "model"
            }
        }"#;

        let doc: ConfigDocument = serde_json::from_str(json).unwrap();
        let config = doc.pipeline;

        assert_eq!(config.stages.len(), 1);
        assert!(config.stages[0].enabled);
        assert_eq!(config.stages[0].scripts[0].args, vec!["--epochs", "{epochs}"]);
        assert_eq!(config.variables["epochs"].kind, VariableType::Number);
        assert_eq!(config.variables["epochs"].default, VariableValue::Number(50.0));
        assert_eq!(config.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(
            config.selected_model(),
            Some(&VariableValue::Text("yolov8n.pt".to_string()))
        );
    }

    #[test]
    fn test_empty_document_loads_as_empty_pipeline() {
        let doc: ConfigDocument = serde_json::from_str(r#"{"pipeline": {"stages": [], "variables": {}}}"#).unwrap();
        assert!(doc.pipeline.stages.is_empty());
        assert!(doc.pipeline.variables.is_empty());
    }

    #[test]
    fn test_number_display_drops_zero_fraction() {
        assert_eq!(VariableValue::Number(5.0).to_string(), "5");
        assert_eq!(VariableValue::Number(0.25).to_string(), "0.25");
        assert_eq!(VariableValue::Text("abc".into()).to_string(), "abc");
    }

    #[test]
    fn test_set_variable() {
        let mut config = PipelineConfig::default()
            .with_variable("epochs", Variable::number(10.0))
            .with_variable("name", Variable::text("run"));

        config.set_variable("epochs", "25").unwrap();
        config.set_variable("name", "exp-2").unwrap();

        assert_eq!(config.variables["epochs"].default, VariableValue::Number(25.0));
        assert_eq!(config.variables["name"].default, VariableValue::Text("exp-2".into()));
        assert!(config.set_variable("epochs", "many").is_err());
        assert!(config.set_variable("missing", "1").is_err());
    }

    #[test]
    fn test_enabled_stages() {
        let config = PipelineConfig::default()
            .with_stage(Stage::new("a", "A"))
            .with_stage(Stage::new("b", "B").disabled())
            .with_stage(Stage::new("c", ""));

        let ids: Vec<_> = config.enabled_stages().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(config.stage("c").unwrap().display_name(), "c");
    }
}
