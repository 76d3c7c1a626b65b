use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::RegistryClient;
use crate::credentials::Credential;
use crate::error::RegistryError;
use crate::wire::{DocumentDetail, PollResponse, SubmissionDocument, SubmitRequest, SubmitResponse};

/// reqwest-backed registry client.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    client: Client,
    base_url: String,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RegistryError> {
        let response = request.send().await.map_err(transport_error)?;
        decode(response).await
    }
}

fn transport_error(err: reqwest::Error) -> RegistryError {
    if err.is_timeout() {
        RegistryError::Timeout
    } else {
        RegistryError::Network(err.to_string())
    }
}

/// `Retry-After` in delta-seconds form.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RegistryError> {
    let status = response.status();
    if !status.is_success() {
        let wait = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), "registry returned error status");
        return Err(RegistryError::from_status(status.as_u16(), body, wait));
    }

    let body = response.text().await.map_err(transport_error)?;
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Err(RegistryError::Protocol("empty response body".to_string()));
    }
    serde_json::from_str(&body).map_err(|e| RegistryError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn submit_documents(
        &self,
        credential: &Credential,
        documents: &[SubmissionDocument],
    ) -> Result<SubmitResponse, RegistryError> {
        let request = self
            .client
            .post(self.url("/documentsubmissions"))
            .bearer_auth(credential.bearer())
            .json(&SubmitRequest { documents });
        self.send(request).await
    }

    async fn get_document(
        &self,
        credential: &Credential,
        document_id: &str,
    ) -> Result<DocumentDetail, RegistryError> {
        let request = self
            .client
            .get(self.url(&format!("/documents/{document_id}/details")))
            .bearer_auth(credential.bearer());
        self.send(request).await
    }

    async fn poll_updates(
        &self,
        credential: &Credential,
        since: Option<DateTime<Utc>>,
    ) -> Result<PollResponse, RegistryError> {
        let mut request = self
            .client
            .get(self.url("/documents/recent"))
            .bearer_auth(credential.bearer());
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Secs, true))]);
        }
        self.send(request).await
    }
}
