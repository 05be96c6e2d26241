//! Environment-driven configuration
//!
//! URLs and key material come from the environment: the router URL with a
//! local default, the relay URL with none, and the gateway key rotation
//! schedule as a JSON seed document. Each setting accepts two variable
//! names, a short form and a `NODETRUST_`-prefixed form, with the prefixed
//! form taking precedence.

use chrono::{DateTime, Utc};
use hpke::kem::DhP256HkdfSha256;
use hpke::{Kem as KemTrait, Serializable};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::keyrotation::{
    KeyConfig, KeyRotationPeriod, SymmetricAlgorithm, AEAD_AES128_GCM, KDF_HKDF_SHA256,
    KEM_P256_HKDF_SHA256,
};

/// Router used when no environment override is present.
pub const DEFAULT_ROUTER_URL: &str = "http://localhost:3600";

const ROUTER_URL_ENV: &str = "ROUTER_URL";
const ROUTER_URL_ENV_PREFIXED: &str = "NODETRUST_ROUTER_URL";
const RELAY_URL_ENV: &str = "RELAY_URL";
const RELAY_URL_ENV_PREFIXED: &str = "NODETRUST_RELAY_URL";
const OHTTP_SEEDS_ENV: &str = "OHTTP_SEEDS_JSON";
const OHTTP_SEEDS_ENV_PREFIXED: &str = "NODETRUST_OHTTP_SEEDS_JSON";

fn env_lookup(prefixed: &str, plain: &str) -> Option<String> {
    std::env::var(prefixed)
        .or_else(|_| std::env::var(plain))
        .ok()
        .filter(|value| !value.is_empty())
}

/// Resolve the router base URL, falling back to [`DEFAULT_ROUTER_URL`].
pub fn resolve_router_url() -> String {
    env_lookup(ROUTER_URL_ENV_PREFIXED, ROUTER_URL_ENV)
        .map(|url| normalize_url(&url))
        .unwrap_or_else(|| DEFAULT_ROUTER_URL.to_string())
}

/// Resolve the relay URL. There is no sensible default relay, so an unset
/// variable is a configuration error naming both accepted variables.
pub fn resolve_relay_url() -> Result<String> {
    env_lookup(RELAY_URL_ENV_PREFIXED, RELAY_URL_ENV)
        .map(|url| normalize_url(&url))
        .ok_or_else(|| {
            Error::Config(format!(
                "relay URL not configured: set {} or {}",
                RELAY_URL_ENV_PREFIXED, RELAY_URL_ENV
            ))
        })
}

/// Read and parse the OHTTP seed document from the environment.
pub fn resolve_ohttp_seeds() -> Result<Vec<SeedSpec>> {
    let raw = env_lookup(OHTTP_SEEDS_ENV_PREFIXED, OHTTP_SEEDS_ENV).ok_or_else(|| {
        Error::Config(format!(
            "ohttp seeds not configured: set {} or {}",
            OHTTP_SEEDS_ENV_PREFIXED, OHTTP_SEEDS_ENV
        ))
    })?;
    parse_seeds_json(&raw)
}

fn normalize_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// One gateway key seed as found in the seeds JSON document.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedSpec {
    pub key_id: String,
    pub seed_hex: String,
    pub active_from: String,
    pub active_until: String,
}

#[derive(Deserialize)]
struct SeedEnvelope {
    #[serde(alias = "OHTTP_KEYS", alias = "ohttp_seeds")]
    seeds: Option<Vec<SeedSpec>>,
}

/// Parse the seeds document: either a bare JSON array of seeds, or an object
/// wrapping the array under `OHTTP_KEYS` / `ohttp_seeds`.
pub fn parse_seeds_json(raw: &str) -> Result<Vec<SeedSpec>> {
    if let Ok(seeds) = serde_json::from_str::<Vec<SeedSpec>>(raw) {
        return Ok(seeds);
    }
    let envelope: SeedEnvelope = serde_json::from_str(raw)
        .map_err(|e| Error::Config(format!("invalid ohttp seeds JSON: {}", e)))?;
    envelope
        .seeds
        .filter(|seeds| !seeds.is_empty())
        .ok_or_else(|| Error::Config("no ohttp seeds found".into()))
}

/// Parse a key ID written in decimal or hex.
///
/// A `0x` prefix or any hex-only letter forces base 16; plain digits parse
/// as decimal.
pub fn parse_key_id(raw: &str) -> Result<u8> {
    let trimmed = raw.trim();
    let (digits, radix) = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        (hex, 16)
    } else if trimmed
        .chars()
        .any(|c| matches!(c, 'a'..='f' | 'A'..='F'))
    {
        (trimmed, 16)
    } else {
        (trimmed, 10)
    };
    u8::from_str_radix(digits, radix)
        .map_err(|e| Error::Config(format!("invalid key ID {:?}: {}", raw, e)))
}

/// Expand seed specs into the key configs and rotation schedule the
/// transport builder consumes. Every key derives its P-256 keypair from the
/// seed, so the gateway holding the same seeds ends up with matching
/// private keys.
pub fn build_key_material(
    seeds: &[SeedSpec],
) -> Result<(Vec<KeyConfig>, Vec<KeyRotationPeriod>)> {
    if seeds.is_empty() {
        return Err(Error::Config("no ohttp seeds found".into()));
    }

    let mut key_configs = Vec::with_capacity(seeds.len());
    let mut rotation_periods = Vec::with_capacity(seeds.len());

    for (idx, seed) in seeds.iter().enumerate() {
        let key_id = parse_key_id(&seed.key_id)
            .map_err(|e| Error::Config(format!("ohttp_seeds[{}].key_id: {}", idx, e)))?;

        let ikm = hex::decode(seed.seed_hex.trim())
            .map_err(|e| Error::Config(format!("ohttp_seeds[{}].seed_hex: {}", idx, e)))?;

        let active_from = parse_timestamp(&seed.active_from)
            .map_err(|e| Error::Config(format!("ohttp_seeds[{}].active_from: {}", idx, e)))?;
        let active_until = parse_timestamp(&seed.active_until)
            .map_err(|e| Error::Config(format!("ohttp_seeds[{}].active_until: {}", idx, e)))?;

        let (_, public_key) = DhP256HkdfSha256::derive_keypair(&ikm);

        key_configs.push(KeyConfig {
            key_id,
            kem_id: KEM_P256_HKDF_SHA256,
            public_key: public_key.to_bytes().to_vec(),
            symmetric_algorithms: vec![SymmetricAlgorithm {
                kdf_id: KDF_HKDF_SHA256,
                aead_id: AEAD_AES128_GCM,
            }],
        });
        rotation_periods.push(KeyRotationPeriod {
            key_id,
            active_from,
            active_until,
        });
    }

    Ok((key_configs, rotation_periods))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Config(format!("invalid RFC 3339 timestamp {:?}: {}", raw, e)))
}
