//! Error types for the nodetrust client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to get attestation credit: {0}")]
    Credit(String),

    #[error("router request failed: {0}")]
    Router(String),

    #[error("expected max nodes to fit in int32, got {0}")]
    InvalidNodeCount(usize),

    #[error("node verification failed: {0}")]
    Verification(String),

    #[error("secondary attestation check failed: {0}")]
    Binding(String),

    #[error("unsafe trust extraction failed: {0}")]
    Extraction(String),

    #[error("no active encryption keys available")]
    NoActiveKey,

    #[error("no key config found for key ID {0}")]
    MissingKeyConfig(u8),

    #[error("encrypted transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
