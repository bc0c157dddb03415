use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::credentials::{CSRF_HEADER, CredentialProvider};
use super::error::ApiError;
use super::types::{CreateTaskResponse, LookupRequest, PollReply, PollRequest, PollResponse, TaskId};

/// The two calls the polling client needs from a backend.
///
/// Implemented over HTTP by [`LookupApiClient`]; tests substitute scripted
/// backends.
pub trait TaskBackend: Send + Sync + 'static {
    /// Create a backend job for the request and return its id.
    fn create_task(
        &self,
        request: &LookupRequest,
    ) -> impl Future<Output = Result<TaskId, ApiError>> + Send;

    /// Ask once whether the job has finished.
    fn fetch_result(
        &self,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<PollReply, ApiError>> + Send;
}

pub struct LookupApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl LookupApiClient {
    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        base_url: String,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn submit_url(&self) -> &str {
        &self.base_url
    }

    fn result_url(&self) -> String {
        format!("{}/result/", self.base_url.trim_end_matches('/'))
    }

    fn post(&self, url: &str) -> RequestBuilder {
        let builder = self.client.post(url);
        match self.credentials.csrf_token() {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn submit(&self, request: &LookupRequest) -> Result<TaskId, ApiError> {
        let response = self.post(self.submit_url()).json(request).send().await?;
        let body: CreateTaskResponse = Self::read_json(response).await?;
        let task_id = body.into_task_id()?;
        debug!(task_id = %task_id, "backend accepted lookup");
        Ok(task_id)
    }

    pub async fn fetch(&self, task_id: &TaskId) -> Result<PollReply, ApiError> {
        let response = self
            .post(&self.result_url())
            .json(&PollRequest { task_id })
            .send()
            .await?;
        let body: PollResponse = Self::read_json(response).await?;
        body.into_reply()
    }
}

impl TaskBackend for LookupApiClient {
    async fn create_task(&self, request: &LookupRequest) -> Result<TaskId, ApiError> {
        self.submit(request).await
    }

    async fn fetch_result(&self, task_id: &TaskId) -> Result<PollReply, ApiError> {
        self.fetch(task_id).await
    }
}
