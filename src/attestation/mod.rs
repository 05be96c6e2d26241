//! Attestation evidence handling and trust establishment
//!
//! Three cooperating pieces:
//!
//! ## Formal verification (injected)
//! The real evidence verifier is a pluggable capability behind the
//! [`NodeVerifier`] trait. Production deployments plug in a verifier backed
//! by transparency logs and identity policy; this crate ships a
//! [`RemoteVerifier`] adapter that delegates to a verification service over
//! HTTP, and tests inject fakes.
//!
//! ## Secondary cross-check
//! [`binding`] compares the nonce embedded in a node's enclave report with a
//! digest derived from its platform quote, proving both artifacts describe
//! the same attested session. Advisory only — it gates nothing.
//!
//! ## Unsafe fallback
//! [`extract`] pulls key material straight out of unverified evidence so
//! development setups keep working when the verification stack is
//! unavailable. Deliberately unauthenticated.

pub mod binding;
pub mod extract;
pub mod types;

pub use types::{
    find_piece, pad64, ComputeManifest, EvidencePiece, EvidenceType, TrustedComputeData,
    VerifiedNode,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pluggable evidence verifier.
///
/// Implementations establish trust in a node from its attestation evidence
/// and return the node's key material and cipher suite on success.
#[async_trait]
pub trait NodeVerifier: Send + Sync {
    async fn verify_compute_node(&self, evidence: &[EvidencePiece]) -> Result<TrustedComputeData>;
}

/// Production adapter delegating verification to a remote service.
pub struct RemoteVerifier {
    http_client: reqwest::Client,
    endpoint: String,
}

impl RemoteVerifier {
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    evidence: &'a [EvidencePiece],
}

#[derive(Deserialize)]
struct VerifyResponse {
    kem_id: u16,
    kdf_id: u16,
    aead_id: u16,
    #[serde(with = "types::base64_serde")]
    public_key: Vec<u8>,
}

#[async_trait]
impl NodeVerifier for RemoteVerifier {
    async fn verify_compute_node(&self, evidence: &[EvidencePiece]) -> Result<TrustedComputeData> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&VerifyRequest { evidence })
            .send()
            .await
            .map_err(|e| Error::Verification(format!("verifier request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Verification(format!(
                "verifier returned {}: {}",
                status, body
            )));
        }

        let verdict: VerifyResponse = response
            .json()
            .await
            .map_err(|e| Error::Verification(format!("failed to decode verifier response: {}", e)))?;

        if verdict.public_key.is_empty() {
            return Err(Error::Verification(
                "verifier returned empty public key".into(),
            ));
        }

        Ok(TrustedComputeData {
            kem_id: verdict.kem_id,
            kdf_id: verdict.kdf_id,
            aead_id: verdict.aead_id,
            public_key: verdict.public_key,
        })
    }
}
