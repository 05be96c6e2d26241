//! # nodetrust
//!
//! Client-side trust establishment for confidential compute nodes.
//!
//! ## Pipeline
//!
//! ### Step 1: Discovery
//! - Mints an anonymous attestation credit
//! - Queries the router for compute manifests matching the requested tags
//! - Skips manifests that fail to decode instead of failing the call
//!
//! ### Step 2: Trust establishment (per node)
//! - Runs the injected attestation verifier against the node's evidence
//! - On verifier failure, cross-checks the enclave report nonce against a
//!   digest of the platform quote signature
//! - Falls back to extracting the node's P-256 key straight from the
//!   unverified platform descriptor, behind an unmissable operator warning
//!
//! ### Step 3: Encrypted transport
//! - Selects the gateway's currently active rotation key
//! - Seals request bodies to that key with HPKE and sends them through a
//!   relay as opaque capsules
//! - Opens responses under a key derived from the HPKE exporter secret
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nodetrust::config;
//! use nodetrust::credit::DevCreditIssuer;
//! use nodetrust::attestation::RemoteVerifier;
//! use nodetrust::finder::{LenientNodeFinder, VerifiedNodeFinder};
//! use nodetrust::transport::build_transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http = reqwest::Client::new();
//!
//!     // Discover and verify nodes through the router.
//!     let finder = LenientNodeFinder::new(
//!         http.clone(),
//!         Arc::new(DevCreditIssuer),
//!         Arc::new(RemoteVerifier::new(http.clone(), "https://verifier/verify")),
//!         config::resolve_router_url(),
//!     );
//!     let nodes = finder.find_verified_nodes(4, &["gpu".into()]).await?;
//!
//!     // Build the encrypted transport to the gateway's active key.
//!     let seeds = config::resolve_ohttp_seeds()?;
//!     let (key_configs, rotation_periods) = config::build_key_material(&seeds)?;
//!     let transport = build_transport(
//!         http,
//!         config::resolve_relay_url()?,
//!         &key_configs,
//!         &rotation_periods,
//!     )?;
//!
//!     let response = transport
//!         .request("POST", "http://gateway/infer", &[], b"{}")
//!         .await?;
//!     println!("{} nodes, gateway said {}", nodes.len(), response.status);
//!     Ok(())
//! }
//! ```

pub mod attestation;
pub mod config;
pub mod credit;
pub mod error;
pub mod finder;
pub mod keyrotation;
pub mod transport;

pub use attestation::{ComputeManifest, EvidencePiece, EvidenceType, TrustedComputeData, VerifiedNode};
pub use error::{Error, Result};
pub use finder::{LenientNodeFinder, VerifiedNodeFinder};
pub use keyrotation::{KeyConfig, KeyRotationPeriod};
pub use transport::{build_transport, EncryptedClient, EncryptedResponse};
