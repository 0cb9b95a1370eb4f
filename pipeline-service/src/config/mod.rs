// Pipeline Config Module
// Data model, variable substitution, validation and persistence

pub mod models;
pub mod remote;
pub mod store;
pub mod substitution;
pub mod validator;

// Re-export key types
pub use models::{
    ConfigDocument, PipelineConfig, ScriptInvocation, Stage, Variable, VariableType,
    VariableValue,
};
pub use remote::HttpConfigStore;
pub use store::{ConfigStore, FileConfigStore, StoreError, StoreResult};
pub use substitution::{substitute, substitute_arg};
pub use validator::{validate, ValidationError, ValidationReport, ValidationTarget};
