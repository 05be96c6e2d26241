//! Time-windowed encryption key rotation
//!
//! The gateway publishes several key configs plus a rotation schedule of
//! validity windows. Windows may overlap during a rollover; the selector
//! always picks the most recently activated key so fresh keys take effect
//! immediately without waiting for older windows to expire.

use chrono::{DateTime, Utc};
use hpke::aead::{Aead, AesGcm128};
use hpke::kdf::{HkdfSha256, Kdf};
use hpke::kem::DhP256HkdfSha256;
use hpke::Kem;

use crate::error::{Error, Result};

/// HPKE KEM identifier for DHKEM(P-256, HKDF-SHA256).
pub const KEM_P256_HKDF_SHA256: u16 = <DhP256HkdfSha256 as Kem>::KEM_ID;

/// HPKE KDF identifier for HKDF-SHA256.
pub const KDF_HKDF_SHA256: u16 = <HkdfSha256 as Kdf>::KDF_ID;

/// HPKE AEAD identifier for AES-128-GCM.
pub const AEAD_AES128_GCM: u16 = <AesGcm128 as Aead>::AEAD_ID;

/// A symmetric algorithm pairing advertised by a key config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricAlgorithm {
    pub kdf_id: u16,
    pub aead_id: u16,
}

/// One gateway encryption key, identified by its one-byte key ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    pub key_id: u8,
    pub kem_id: u16,
    pub public_key: Vec<u8>,
    pub symmetric_algorithms: Vec<SymmetricAlgorithm>,
}

/// A validity window during which the key with `key_id` accepts new sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRotationPeriod {
    pub key_id: u8,
    pub active_from: DateTime<Utc>,
    pub active_until: DateTime<Utc>,
}

impl KeyRotationPeriod {
    /// A period is active iff `active_from <= now < active_until`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active_from <= now && now < self.active_until
    }
}

/// Pick the currently active key config from a rotation schedule.
///
/// Among the periods active at `now`, the one with the latest `active_from`
/// wins; ties on `active_from` go to the lowest `key_id` so selection is
/// reproducible. A selected period whose `key_id` has no matching config is
/// a hard configuration error, never ignored.
pub fn select_active_key<'a>(
    rotation_periods: &[KeyRotationPeriod],
    key_configs: &'a [KeyConfig],
    now: DateTime<Utc>,
) -> Result<&'a KeyConfig> {
    let selected = rotation_periods
        .iter()
        .filter(|period| period.is_active_at(now))
        .max_by(|a, b| {
            a.active_from
                .cmp(&b.active_from)
                // Lower key ID ranks higher on equal activation times.
                .then(b.key_id.cmp(&a.key_id))
        })
        .ok_or(Error::NoActiveKey)?;

    key_configs
        .iter()
        .find(|config| config.key_id == selected.key_id)
        .ok_or(Error::MissingKeyConfig(selected.key_id))
}
