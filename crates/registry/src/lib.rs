//! Registry boundary.
//!
//! Everything the core knows about the external tax registry: the async
//! [`RegistryClient`] contract and its wire types, the reqwest-backed HTTP
//! client, error classification for retry decisions, bearer credential
//! supply with a TTL cache, and the inbound webhook contract.

pub mod client;
pub mod credentials;
pub mod error;
pub mod http;
pub mod webhook;
pub mod wire;

pub use client::RegistryClient;
pub use credentials::{
    CachedCredentialProvider, Credential, CredentialProvider, StaticCredentialSource,
};
pub use error::{CredentialError, RegistryError};
pub use http::HttpRegistryClient;
pub use webhook::{SIGNATURE_HEADER, SignatureError, WebhookEvent, WebhookEventType};
pub use wire::{
    AcceptedDocument, DocumentDetail, DocumentUpdate, PollResponse, RejectedDocument,
    SubmissionDocument, SubmitResponse, WireDirection,
};
