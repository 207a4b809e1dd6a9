//! External knowledge-base indexing client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::KnowledgeBaseConfig;
use crate::error::{ExtractionError, ServiceError, ServiceResult};

/// State of an indexing job as reported by the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexingState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl IndexingState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IndexingState::Completed | IndexingState::Failed | IndexingState::Cancelled
        )
    }
}

#[async_trait]
pub trait KnowledgeBaseClient: Send + Sync {
    /// Register an ingested file; returns the data source id.
    async fn create_data_source(&self, item_path: &str) -> Result<String, ExtractionError>;

    /// Start indexing the given data sources; returns the indexing job id.
    async fn start_indexing(&self, data_source_ids: &[String]) -> Result<String, ExtractionError>;

    async fn indexing_status(&self, indexing_job_id: &str) -> Result<IndexingState, ExtractionError>;

    /// Poll until the indexing job reaches a terminal state or `timeout` elapses.
    async fn wait_for_indexing(
        &self,
        indexing_job_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<IndexingState, ExtractionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.indexing_status(indexing_job_id).await?;
            debug!(indexing_job_id, state = %state, "Indexing status polled");
            if state.is_terminal() {
                return Ok(state);
            }
            if Instant::now() + interval > deadline {
                return Err(ExtractionError::timeout(timeout));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[derive(Serialize)]
struct CreateDataSourceRequest<'a> {
    item_path: &'a str,
}

#[derive(Serialize)]
struct StartIndexingRequest<'a> {
    knowledge_base_uuid: &'a str,
    data_source_uuids: &'a [String],
}

#[derive(Deserialize)]
struct UuidResponse {
    uuid: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: IndexingState,
}

/// reqwest-backed [`KnowledgeBaseClient`]
pub struct HttpKnowledgeBase {
    client: Client,
    config: KnowledgeBaseConfig,
}

impl HttpKnowledgeBase {
    pub fn new(config: KnowledgeBaseConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build knowledge-base client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<T, ExtractionError> {
        let response = request
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| ExtractionError::Network {
                message: format!("Knowledge base request to {} failed: {}", url, e),
                recoverable: true,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Network {
                message: format!("Knowledge base returned {} for {}: {}", status, url, body),
                recoverable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        response.json().await.map_err(|e| ExtractionError::Validation {
            message: format!("Unexpected knowledge base response from {}: {}", url, e),
        })
    }
}

#[async_trait]
impl KnowledgeBaseClient for HttpKnowledgeBase {
    async fn create_data_source(&self, item_path: &str) -> Result<String, ExtractionError> {
        let url = self.url(&format!(
            "/knowledge_bases/{}/data_sources",
            self.config.knowledge_base_uuid
        ));
        let created: UuidResponse = self
            .send(
                self.client
                    .post(&url)
                    .json(&CreateDataSourceRequest { item_path }),
                &url,
            )
            .await?;
        debug!(item_path, data_source = %created.uuid, "Data source created");
        Ok(created.uuid)
    }

    async fn start_indexing(&self, data_source_ids: &[String]) -> Result<String, ExtractionError> {
        let url = self.url("/indexing_jobs");
        let started: UuidResponse = self
            .send(
                self.client.post(&url).json(&StartIndexingRequest {
                    knowledge_base_uuid: &self.config.knowledge_base_uuid,
                    data_source_uuids: data_source_ids,
                }),
                &url,
            )
            .await?;
        info!(
            indexing_job = %started.uuid,
            data_sources = data_source_ids.len(),
            "Knowledge-base indexing started"
        );
        Ok(started.uuid)
    }

    async fn indexing_status(&self, indexing_job_id: &str) -> Result<IndexingState, ExtractionError> {
        let url = self.url(&format!("/indexing_jobs/{}", indexing_job_id));
        let status: StatusResponse = self.send(self.client.get(&url), &url).await?;
        Ok(status.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };

    fn client_for(server: &MockServer) -> HttpKnowledgeBase {
        HttpKnowledgeBase::new(KnowledgeBaseConfig {
            base_url: server.base_url(),
            api_key: "secret".into(),
            knowledge_base_uuid: "kb-1".into(),
            poll_interval_secs: 1,
            poll_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_data_source() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/knowledge_bases/kb-1/data_sources")
                    .header("authorization", "Bearer secret")
                    .json_body(serde_json::json!({ "item_path": "papers/2023-Dec.pdf" }));
                then.status(200)
                    .json_body(serde_json::json!({ "uuid": "ds-42" }));
            })
            .await;

        let id = client_for(&server)
            .create_data_source("papers/2023-Dec.pdf")
            .await
            .unwrap();
        assert_eq!(id, "ds-42");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_start_indexing_and_poll_to_completion() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/indexing_jobs").json_body(serde_json::json!({
                    "knowledge_base_uuid": "kb-1",
                    "data_source_uuids": ["ds-1", "ds-2"]
                }));
                then.status(200).json_body(serde_json::json!({ "uuid": "ij-7" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/indexing_jobs/ij-7");
                then.status(200)
                    .json_body(serde_json::json!({ "status": "completed" }));
            })
            .await;

        let kb = client_for(&server);
        let job = kb
            .start_indexing(&["ds-1".to_string(), "ds-2".to_string()])
            .await
            .unwrap();
        assert_eq!(job, "ij-7");

        let state = kb
            .wait_for_indexing(&job, Duration::from_millis(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(state, IndexingState::Completed);
    }

    #[tokio::test]
    async fn test_polling_gives_up_after_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/indexing_jobs/ij-slow");
                then.status(200)
                    .json_body(serde_json::json!({ "status": "running" }));
            })
            .await;

        let err = client_for(&server)
            .wait_for_indexing("ij-slow", Duration::from_millis(20), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/knowledge_bases/kb-1/data_sources");
                then.status(403).body("forbidden");
            })
            .await;

        let err = client_for(&server)
            .create_data_source("x.pdf")
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_unknown_state_is_not_terminal() {
        let parsed: StatusResponse = serde_json::from_str(r#"{"status":"queued"}"#).unwrap();
        assert_eq!(parsed.status, IndexingState::Unknown);
        assert!(!parsed.status.is_terminal());
    }
}
