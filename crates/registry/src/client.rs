use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::credentials::Credential;
use crate::error::RegistryError;
use crate::wire::{DocumentDetail, PollResponse, SubmissionDocument, SubmitResponse};

/// Operations consumed from the registry.
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    /// Submit a batch; each document is accepted or rejected independently.
    async fn submit_documents(
        &self,
        credential: &Credential,
        documents: &[SubmissionDocument],
    ) -> Result<SubmitResponse, RegistryError>;

    async fn get_document(
        &self,
        credential: &Credential,
        document_id: &str,
    ) -> Result<DocumentDetail, RegistryError>;

    /// Documents updated since `since` (all recent documents when `None`).
    async fn poll_updates(
        &self,
        credential: &Credential,
        since: Option<DateTime<Utc>>,
    ) -> Result<PollResponse, RegistryError>;
}

#[async_trait::async_trait]
impl<T: RegistryClient + ?Sized> RegistryClient for Arc<T> {
    async fn submit_documents(
        &self,
        credential: &Credential,
        documents: &[SubmissionDocument],
    ) -> Result<SubmitResponse, RegistryError> {
        (**self).submit_documents(credential, documents).await
    }

    async fn get_document(
        &self,
        credential: &Credential,
        document_id: &str,
    ) -> Result<DocumentDetail, RegistryError> {
        (**self).get_document(credential, document_id).await
    }

    async fn poll_updates(
        &self,
        credential: &Credential,
        since: Option<DateTime<Utc>>,
    ) -> Result<PollResponse, RegistryError> {
        (**self).poll_updates(credential, since).await
    }
}
