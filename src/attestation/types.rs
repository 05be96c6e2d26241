//! Core types for node attestation evidence and verified trust output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Width of the nonce embedded in secondary enclave reports.
pub const NONCE_LEN: usize = 64;

/// Typed attestation artifacts a node may include in its manifest.
///
/// A manifest carries at most one piece per type that this client cares
/// about; additional or unknown pieces are ignored beyond the first match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceType {
    /// Primary trusted-platform quote (e.g. a TPM quote).
    #[serde(rename = "platform-quote")]
    PlatformQuote,

    /// Structured public-area descriptor of the node's key-exchange key.
    #[serde(rename = "platform-public-key")]
    PlatformPublicKey,

    /// Secondary vendor-signed enclave report (Nitro-style COSE document).
    #[serde(rename = "enclave-report")]
    EnclaveReport,

    #[serde(other)]
    Unknown,
}

/// One signed attestation artifact inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePiece {
    #[serde(rename = "type")]
    pub piece_type: EvidenceType,

    #[serde(with = "base64_serde")]
    pub data: Vec<u8>,

    #[serde(with = "base64_serde", default)]
    pub signature: Vec<u8>,
}

/// A compute node's self-description as returned by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeManifest {
    pub id: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub evidence: Vec<EvidencePiece>,
}

/// Key material and cipher suite established for a node, either through the
/// real verifier or through the unsafe development fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedComputeData {
    /// HPKE KEM identifier.
    pub kem_id: u16,

    /// HPKE KDF identifier.
    pub kdf_id: u16,

    /// HPKE AEAD identifier.
    pub aead_id: u16,

    /// Raw key-exchange public key (SEC1 uncompressed for EC keys).
    pub public_key: Vec<u8>,
}

/// A node whose trust has been established during one discovery call.
#[derive(Debug, Clone)]
pub struct VerifiedNode {
    pub manifest: ComputeManifest,
    pub trusted_data: TrustedComputeData,

    /// When trust was established; downstream consumers use this for
    /// staleness decisions.
    pub verified_at: DateTime<Utc>,
}

/// Return the first evidence piece of the given type, if any.
pub fn find_piece(piece_type: EvidenceType, evidence: &[EvidencePiece]) -> Option<&EvidencePiece> {
    evidence.iter().find(|piece| piece.piece_type == piece_type)
}

/// Pad a byte string to the fixed 64-byte nonce width.
///
/// The input occupies the front of the result; the remainder is zero. Input
/// longer than the nonce width is an error, never truncated.
pub fn pad64(input: &[u8]) -> Result<[u8; NONCE_LEN]> {
    if input.len() > NONCE_LEN {
        return Err(Error::Binding(format!(
            "cannot pad {} bytes into a {}-byte nonce",
            input.len(),
            NONCE_LEN
        )));
    }
    let mut padded = [0u8; NONCE_LEN];
    padded[..input.len()].copy_from_slice(input);
    Ok(padded)
}

/// Serde helper for base64-encoding byte fields on the wire.
pub(crate) mod base64_serde {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad64_places_input_at_front() {
        let padded = pad64(&[0xAA, 0xBB]).unwrap();
        assert_eq!(padded[0], 0xAA);
        assert_eq!(padded[1], 0xBB);
        assert!(padded[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pad64_exact_width() {
        let input = [0x7F; NONCE_LEN];
        let padded = pad64(&input).unwrap();
        assert_eq!(padded, input);
    }

    #[test]
    fn test_pad64_rejects_oversized_input() {
        let input = [0u8; NONCE_LEN + 1];
        assert!(pad64(&input).is_err());
    }

    #[test]
    fn test_find_piece_returns_first_match() {
        let evidence = vec![
            EvidencePiece {
                piece_type: EvidenceType::PlatformQuote,
                data: vec![1],
                signature: vec![],
            },
            EvidencePiece {
                piece_type: EvidenceType::PlatformQuote,
                data: vec![2],
                signature: vec![],
            },
        ];
        let piece = find_piece(EvidenceType::PlatformQuote, &evidence).unwrap();
        assert_eq!(piece.data, vec![1]);
        assert!(find_piece(EvidenceType::EnclaveReport, &evidence).is_none());
    }

    #[test]
    fn test_manifest_decode_ignores_unknown_piece_types() {
        let json = r#"{
            "id": "node-1",
            "tags": ["model=llama"],
            "evidence": [
                {"type": "platform-quote", "data": "AQI=", "signature": "Aw=="},
                {"type": "some-future-format", "data": "BA=="}
            ]
        }"#;
        let manifest: ComputeManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.id, "node-1");
        assert_eq!(manifest.evidence.len(), 2);
        assert_eq!(manifest.evidence[0].piece_type, EvidenceType::PlatformQuote);
        assert_eq!(manifest.evidence[0].data, vec![1, 2]);
        assert_eq!(manifest.evidence[1].piece_type, EvidenceType::Unknown);
    }
}
