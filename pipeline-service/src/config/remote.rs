// Remote Config Store
// Loads and saves the pipeline config through a worker's config API

use crate::config::models::{ConfigDocument, PipelineConfig};
use crate::config::store::{ConfigStore, StoreError, StoreResult};
use crate::protocol::{LOAD_ROUTE, SAVE_ROUTE};

use async_trait::async_trait;

/// Config store backed by `GET /api/pipeline/load` and `POST /api/pipeline/save`
#[derive(Debug, Clone)]
pub struct HttpConfigStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConfigStore {
    /// `base_url` is the worker's HTTP address, e.g. `http://localhost:3001`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }
}

async fn check(response: reqwest::Response) -> StoreResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(StoreError::Remote {
        status: status.as_u16(),
        detail,
    })
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    async fn load(&self) -> StoreResult<PipelineConfig> {
        let response = self.client.get(self.endpoint(LOAD_ROUTE)).send().await?;
        let doc: ConfigDocument = check(response).await?.json().await?;
        Ok(doc.pipeline)
    }

    async fn save(&self, config: &PipelineConfig) -> StoreResult<()> {
        let doc = ConfigDocument {
            pipeline: config.clone(),
        };
        let response = self
            .client
            .post(self.endpoint(SAVE_ROUTE))
            .json(&doc)
            .send()
            .await?;
        check(response).await?;
        tracing::info!(url = %self.base_url, stages = config.stages.len(), "pipeline config saved remotely");
        Ok(())
    }

    fn location(&self) -> String {
        self.endpoint(LOAD_ROUTE)
    }
}
