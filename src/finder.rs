//! Lenient discovery of verified compute nodes
//!
//! Queries the router for compute manifests and establishes trust in each
//! node, in order of preference:
//!
//! 1. The injected [`NodeVerifier`] (the real attestation stack).
//! 2. On verifier failure, the nonce binding cross-check plus unsafe key
//!    extraction, accompanied by a loud operator warning.
//! 3. If extraction also fails, the node is dropped silently.
//!
//! One bad manifest never fails the whole discovery call. This leniency is
//! deliberate: development routers front nodes whose evidence the real
//! verifier cannot yet check, and dropping them all would make local stacks
//! unusable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::attestation::binding::bind_and_verify;
use crate::attestation::extract::unsafe_trusted_data;
use crate::attestation::{ComputeManifest, NodeVerifier, TrustedComputeData, VerifiedNode};
use crate::credit::{encode_credit_header, CreditIssuer, CREDIT_HEADER};
use crate::error::{Error, Result};

const MANIFESTS_PATH: &str = "/compute-manifests";

/// Width of the operator warning banner.
const WARNING_WIDTH: usize = 60;

/// Finds compute nodes and establishes trust in them.
#[async_trait]
pub trait VerifiedNodeFinder: Send + Sync {
    /// Discover up to `max_nodes` nodes matching `tags` and verify each.
    async fn find_verified_nodes(
        &self,
        max_nodes: usize,
        tags: &[String],
    ) -> Result<Vec<VerifiedNode>>;

    /// Previously verified nodes held by the finder, if it caches any.
    async fn list_cached_verified_nodes(&self) -> Result<Vec<VerifiedNode>>;
}

#[derive(Serialize)]
struct ManifestQuery<'a> {
    limit: i32,
    tags: &'a [String],
}

// Items decode individually so one malformed manifest skips instead of
// failing the whole list.
#[derive(Deserialize)]
struct ManifestList {
    items: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RouterErrorBody {
    error: String,
}

/// Router-backed finder that tolerates partial verification failures.
pub struct LenientNodeFinder {
    http_client: reqwest::Client,
    credits: Arc<dyn CreditIssuer>,
    verifier: Arc<dyn NodeVerifier>,
    router_base_url: String,
}

/// How trust in a node was established, or why it could not be.
#[derive(Debug)]
enum TrustDecision {
    Verified(TrustedComputeData),
    UnsafeExtracted(TrustedComputeData),
    Dropped,
}

impl LenientNodeFinder {
    pub fn new(
        http_client: reqwest::Client,
        credits: Arc<dyn CreditIssuer>,
        verifier: Arc<dyn NodeVerifier>,
        router_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            credits,
            verifier,
            router_base_url: router_base_url.into(),
        }
    }

    async fn fetch_manifests(&self, limit: i32, tags: &[String]) -> Result<Vec<ComputeManifest>> {
        let credit = self
            .credits
            .get_attestation_token()
            .await
            .map_err(|e| match e {
                Error::Credit(_) => e,
                other => Error::Credit(other.to_string()),
            })?;
        let credit_header = encode_credit_header(&credit)?;

        let url = format!("{}{}", self.router_base_url, MANIFESTS_PATH);
        let response = self
            .http_client
            .post(&url)
            .header(CREDIT_HEADER, credit_header)
            .json(&ManifestQuery { limit, tags })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<RouterErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(Error::Router(detail));
        }

        let list: ManifestList = response.json().await?;
        let mut manifests = Vec::with_capacity(list.items.len());
        for item in list.items {
            match serde_json::from_value::<ComputeManifest>(item) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undecodable compute manifest");
                }
            }
        }
        Ok(manifests)
    }

    /// Establish trust in one node, degrading from real verification to
    /// unsafe extraction.
    async fn establish_trust(&self, manifest: &ComputeManifest) -> TrustDecision {
        match self.verifier.verify_compute_node(&manifest.evidence).await {
            Ok(trusted) => return TrustDecision::Verified(trusted),
            Err(verify_err) => {
                if let Err(binding_err) = bind_and_verify(&manifest.evidence) {
                    print_attestation_warning(&manifest.id, &verify_err, &binding_err);
                }
                match unsafe_trusted_data(&manifest.evidence) {
                    Ok(trusted) => TrustDecision::UnsafeExtracted(trusted),
                    Err(extract_err) => {
                        tracing::debug!(
                            node_id = %manifest.id,
                            error = %extract_err,
                            "dropping node: unsafe extraction failed"
                        );
                        TrustDecision::Dropped
                    }
                }
            }
        }
    }
}

#[async_trait]
impl VerifiedNodeFinder for LenientNodeFinder {
    async fn find_verified_nodes(
        &self,
        max_nodes: usize,
        tags: &[String],
    ) -> Result<Vec<VerifiedNode>> {
        let limit = i32::try_from(max_nodes).map_err(|_| Error::InvalidNodeCount(max_nodes))?;
        let manifests = self.fetch_manifests(limit, tags).await?;

        let mut nodes = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            let trusted_data = match self.establish_trust(&manifest).await {
                TrustDecision::Verified(data) | TrustDecision::UnsafeExtracted(data) => data,
                TrustDecision::Dropped => continue,
            };
            nodes.push(VerifiedNode {
                manifest,
                trusted_data,
                verified_at: Utc::now(),
            });
        }
        Ok(nodes)
    }

    async fn list_cached_verified_nodes(&self) -> Result<Vec<VerifiedNode>> {
        // This finder verifies on every call and keeps nothing.
        Ok(Vec::new())
    }
}

/// Print the unmissable stderr banner announcing an unverified node.
///
/// Both the real verifier and the nonce binding cross-check failed; the node
/// will be trusted on extracted key material alone. The banner exists so no
/// operator mistakes a development fallback for real attestation.
fn print_attestation_warning(node_id: &str, verify_err: &Error, binding_err: &Error) {
    let border = "*".repeat(WARNING_WIDTH);
    eprintln!("{}", border);
    eprintln!("{}", banner_line("WARNING: NODE ATTESTATION NOT VERIFIED"));
    eprintln!("{}", banner_line(&format!("node_id={}", node_id)));
    eprintln!("{}", banner_line(&format!("verify failed: {}", verify_err)));
    eprintln!("{}", banner_line(&format!("binding failed: {}", binding_err)));
    eprintln!("{}", banner_line("falling back to UNSAFE key extraction"));
    eprintln!("{}", border);

    tracing::warn!(
        node_id = %node_id,
        verify_error = %verify_err,
        binding_error = %binding_err,
        "node attestation not verified, falling back to unsafe key extraction"
    );
}

/// Frame one banner line in asterisks, truncating on a char boundary.
fn banner_line(text: &str) -> String {
    let inner_width = WARNING_WIDTH - 4;
    let truncated: String = text.chars().take(inner_width).collect();
    format!("* {:<width$} *", truncated, width = inner_width)
}
