//! Attestation credits
//!
//! Router requests are authenticated with a blinded, anonymous credit. The
//! blind-payment protocol that mints real credits lives outside this crate;
//! here the credit is an opaque token plus the header encoding the router
//! expects, and a development issuer good enough for local routers.

use std::sync::OnceLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::attestation::types::base64_serde;
use crate::error::Result;

/// Header carrying the base64-encoded serialized credit.
pub const CREDIT_HEADER: &str = "x-attestation-credit";

/// Denomination of a manifest-discovery credit.
pub const ATTESTATION_CREDIT_VALUE: u32 = 1;

/// A blinded credit proving payment/authorization without identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedCredit {
    pub value: u32,

    #[serde(with = "base64_serde")]
    pub token: Vec<u8>,
}

/// Serialize a credit into its router header value.
pub fn encode_credit_header(credit: &BlindedCredit) -> Result<String> {
    let bytes = serde_json::to_vec(credit)?;
    Ok(STANDARD.encode(bytes))
}

/// Issues attestation credits for router requests.
#[async_trait]
pub trait CreditIssuer: Send + Sync {
    async fn get_attestation_token(&self) -> Result<BlindedCredit>;
}

// Process-wide development issuer key, built once and never mutated.
const DEV_ISSUER_KEY_SEED: &[u8] = b"nodetrust development credit issuer key v1";

static DEV_ISSUER_KEY: OnceLock<[u8; 32]> = OnceLock::new();

fn dev_issuer_key() -> &'static [u8; 32] {
    DEV_ISSUER_KEY.get_or_init(|| Sha256::digest(DEV_ISSUER_KEY_SEED).into())
}

/// Development credit issuer backed by the process-wide test key.
///
/// Mints deterministic tokens local routers accept. Not a real blind
/// signature; do not use outside development.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevCreditIssuer;

impl DevCreditIssuer {
    pub fn mint(&self, value: u32) -> BlindedCredit {
        let mut hasher = Sha256::new();
        hasher.update(dev_issuer_key());
        hasher.update(value.to_be_bytes());
        BlindedCredit {
            value,
            token: hasher.finalize().to_vec(),
        }
    }
}

#[async_trait]
impl CreditIssuer for DevCreditIssuer {
    async fn get_attestation_token(&self) -> Result<BlindedCredit> {
        Ok(self.mint(ATTESTATION_CREDIT_VALUE))
    }
}
