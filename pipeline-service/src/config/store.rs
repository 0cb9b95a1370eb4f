// Config Store
// Load/save interface for pipeline configs, with a file-backed implementation

use crate::config::models::{ConfigDocument, PipelineConfig};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name used for the pipeline config when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "training-pipeline.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON pipeline config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML pipeline config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config service answered {status}: {detail}")]
    Remote { status: u16, detail: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Load/save boundary for the pipeline config
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> StoreResult<PipelineConfig>;

    async fn save(&self, config: &PipelineConfig) -> StoreResult<()>;

    /// Where the document lives, for display
    fn location(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

/// Stores the config as a single JSON (or YAML) document on disk
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/trainer/training-pipeline.json`, or `./config/...` when
    /// the platform has no config directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("trainer"))
            .unwrap_or_else(|| PathBuf::from("config"))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> Format {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => Format::Json,
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Parse a document in this store's format
    pub fn parse(&self, content: &str) -> StoreResult<PipelineConfig> {
        let doc: ConfigDocument = match self.format() {
            Format::Json => serde_json::from_str(content)?,
            Format::Yaml => serde_yaml::from_str(content)?,
        };
        Ok(doc.pipeline)
    }

    fn render(&self, config: &PipelineConfig) -> StoreResult<String> {
        let doc = ConfigDocument {
            pipeline: config.clone(),
        };
        Ok(match self.format() {
            Format::Json => serde_json::to_string_pretty(&doc)?,
            Format::Yaml => serde_yaml::to_string(&doc)?,
        })
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    /// A missing file loads as an empty pipeline
    async fn load(&self) -> StoreResult<PipelineConfig> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => self.parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no pipeline config on disk, using empty pipeline");
                Ok(PipelineConfig::default())
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn save(&self, config: &PipelineConfig) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let content = self.render(config)?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::info!(path = %self.path.display(), stages = config.stages.len(), "pipeline config saved");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{ScriptInvocation, Stage, Variable};

    fn sample() -> PipelineConfig {
        PipelineConfig::default()
            .with_stage(
                Stage::new("train", "Train")
                    .with_script(ScriptInvocation::new("train.py").with_args(["--epochs", "{epochs}"])),
            )
            .with_variable("epochs", Variable::number(20.0).with_label("Epochs").shown())
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty_pipeline() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(temp.path().join("absent.json"));

        let config = store.load().await.unwrap();
        assert!(config.stages.is_empty());
        assert!(config.variables.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_json() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("training-pipeline.json");
        let store = FileConfigStore::new(&path);

        store.save(&sample()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"pipeline\""));
        assert!(raw.contains("\"display_in_ui\": true"));

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_yaml_extension() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("pipeline.yaml");
        std::fs::write(
            &path,
            "pipeline:\n  stages:\n    - id: gen\n      name: Generate\n      scripts:\n        - path: generate.py\n",
        )
        .unwrap();

        let config = FileConfigStore::new(&path).load().await.unwrap();
        assert_eq!(config.stages[0].id, "gen");
        assert!(config.stages[0].enabled);
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileConfigStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
