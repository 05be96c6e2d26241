//! Secondary-attestation cross-check (nonce binding)
//!
//! Binds a node's secondary enclave report to its primary platform quote.
//! The enclave report proves possession of a nonce; that nonce must equal a
//! digest derived from the platform quote's signature, which shows both
//! artifacts originate from the same attested session.
//!
//! The check is advisory only: it inspects the COSE envelope shape and the
//! embedded nonce, and does not validate the report's own signature chain
//! (that is the real verifier's job).

use ciborium::Value;
use sha2::{Digest, Sha256};

use super::types::{find_piece, pad64, EvidencePiece, EvidenceType};
use crate::error::{Error, Result};

/// Cross-check the enclave report against the platform quote.
///
/// Succeeds iff the report's embedded nonce equals the zero-padded SHA-256
/// digest of the quote's signature bytes. Every failure carries a distinct
/// reason so operators can tell a missing artifact from a stale one.
pub fn bind_and_verify(evidence: &[EvidencePiece]) -> Result<()> {
    let report = find_piece(EvidenceType::EnclaveReport, evidence)
        .ok_or_else(|| Error::Binding("enclave report evidence missing".into()))?;

    let quote = find_piece(EvidenceType::PlatformQuote, evidence)
        .ok_or_else(|| Error::Binding("no platform quote provided".into()))?;

    let quote_digest = Sha256::digest(&quote.signature);
    let expected_nonce = pad64(&quote_digest)?;

    let report_nonce = parse_report_nonce(&report.data)?;
    if report_nonce != expected_nonce {
        return Err(Error::Binding("enclave report nonce mismatch".into()));
    }

    Ok(())
}

/// Extract the nonce from a COSE_Sign1-shaped enclave report.
///
/// The document must be a four-element CBOR array (protected headers,
/// unprotected headers, payload, signature); the payload is itself a CBOR
/// map containing a non-empty `nonce` byte string.
fn parse_report_nonce(doc: &[u8]) -> Result<Vec<u8>> {
    if doc.is_empty() {
        return Err(Error::Binding("enclave report document empty".into()));
    }

    let envelope: Value = ciborium::from_reader(doc)
        .map_err(|e| Error::Binding(format!("failed to decode COSE_Sign1: {}", e)))?;

    let elements = envelope
        .as_array()
        .ok_or_else(|| Error::Binding("COSE_Sign1 is not an array".into()))?;
    if elements.len() != 4 {
        return Err(Error::Binding(format!(
            "unexpected COSE_Sign1 length {}",
            elements.len()
        )));
    }

    let payload = elements[2]
        .as_bytes()
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| Error::Binding("cose payload missing".into()))?;

    let payload_map: Value = ciborium::from_reader(payload.as_slice())
        .map_err(|e| Error::Binding(format!("failed to decode attestation payload: {}", e)))?;
    let entries = payload_map
        .as_map()
        .ok_or_else(|| Error::Binding("attestation payload is not a map".into()))?;

    let nonce = entries
        .iter()
        .find(|(key, _)| key.as_text() == Some("nonce"))
        .and_then(|(_, value)| value.as_bytes())
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| Error::Binding("enclave report nonce missing".into()))?;

    Ok(nonce.clone())
}
