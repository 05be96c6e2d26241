//! Unsafe trust extraction from unverified platform evidence
//!
//! When the real verifier cannot run (missing sigstore roots, no identity
//! policy, no transparency log access), this path pulls the node's
//! key-exchange public key straight out of the platform public-area
//! descriptor and pairs it with a fixed cipher suite. Nothing here checks a
//! signature chain: the extracted key is trusted as-is, which is only
//! acceptable for local development. Callers surface the distinction with a
//! loud operator warning (see the finder module).

use p256::elliptic_curve::sec1::FromEncodedPoint;
use p256::{EncodedPoint, FieldBytes, PublicKey};

use super::types::{find_piece, EvidencePiece, EvidenceType, TrustedComputeData};
use crate::error::{Error, Result};
use crate::keyrotation::{AEAD_AES128_GCM, KDF_HKDF_SHA256, KEM_P256_HKDF_SHA256};

// TPM 2.0 algorithm and curve identifiers (big-endian on the wire).
const TPM_ALG_ECC: u16 = 0x0023;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ECC_NIST_P256: u16 = 0x0003;

/// P-256 affine coordinate width.
const COORDINATE_LEN: usize = 32;

/// Derive usable key material directly from unverified evidence.
///
/// Locates the platform public-key descriptor, parses its ECC public area,
/// validates the embedded P-256 point, and returns it with the fixed
/// DHKEM(P-256, HKDF-SHA256) / HKDF-SHA256 / AES-128-GCM suite. Any parse or
/// validation failure is an error; the result is never partially populated.
pub fn unsafe_trusted_data(evidence: &[EvidencePiece]) -> Result<TrustedComputeData> {
    let descriptor = find_piece(EvidenceType::PlatformPublicKey, evidence)
        .ok_or_else(|| Error::Extraction("failed to find platform public key evidence".into()))?;

    let (x, y) = parse_ecc_public_area(&descriptor.data)?;

    let point = EncodedPoint::from_affine_coordinates(
        FieldBytes::from_slice(&x),
        FieldBytes::from_slice(&y),
        false,
    );
    let valid: Option<PublicKey> = PublicKey::from_encoded_point(&point).into();
    if valid.is_none() {
        return Err(Error::Extraction(
            "descriptor coordinates are not a valid P-256 point".into(),
        ));
    }

    Ok(TrustedComputeData {
        kem_id: KEM_P256_HKDF_SHA256,
        kdf_id: KDF_HKDF_SHA256,
        aead_id: AEAD_AES128_GCM,
        public_key: point.as_bytes().to_vec(),
    })
}

/// Parse a TPM 2.0 ECC public area (`TPMT_PUBLIC`) down to its coordinates.
///
/// Layout walked here: type, name algorithm, object attributes, auth policy,
/// then the ECC parameters (symmetric, scheme, curve, KDF — optional fields
/// present only when the algorithm is not `TPM_ALG_NULL`) and finally the
/// unique x/y point, each as a sized buffer.
fn parse_ecc_public_area(data: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut reader = Reader::new(data);

    let key_type = reader.read_u16()?;
    if key_type != TPM_ALG_ECC {
        return Err(Error::Extraction(format!(
            "unsupported public area type {:#06x}, expected ECC",
            key_type
        )));
    }

    let _name_alg = reader.read_u16()?;
    let _object_attributes = reader.read_u32()?;
    let _auth_policy = reader.read_sized()?;

    let symmetric = reader.read_u16()?;
    if symmetric != TPM_ALG_NULL {
        // Key bits + mode accompany a concrete symmetric algorithm.
        reader.skip(4)?;
    }

    let scheme = reader.read_u16()?;
    if scheme != TPM_ALG_NULL {
        // Scheme hash algorithm.
        reader.skip(2)?;
    }

    let curve = reader.read_u16()?;
    if curve != TPM_ECC_NIST_P256 {
        return Err(Error::Extraction(format!(
            "unsupported ECC curve {:#06x}, expected NIST P-256",
            curve
        )));
    }

    let kdf = reader.read_u16()?;
    if kdf != TPM_ALG_NULL {
        reader.skip(2)?;
    }

    let x = reader.read_sized()?;
    let y = reader.read_sized()?;
    if x.len() != COORDINATE_LEN || y.len() != COORDINATE_LEN {
        return Err(Error::Extraction(format!(
            "unexpected coordinate sizes x={} y={}, expected {}",
            x.len(),
            y.len(),
            COORDINATE_LEN
        )));
    }

    Ok((x, y))
}

/// Big-endian cursor over the descriptor bytes.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::Extraction("platform key descriptor truncated".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a `u16` length prefix followed by that many bytes.
    fn read_sized(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::types::EvidencePiece;

    // NIST P-256 generator point.
    const GENERATOR_X: &str = "6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296";
    const GENERATOR_Y: &str = "4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5";

    fn encode_descriptor(key_type: u16, curve: u16, x: &[u8], y: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&key_type.to_be_bytes());
        out.extend_from_slice(&0x000Bu16.to_be_bytes()); // name alg: SHA-256
        out.extend_from_slice(&0x00020072u32.to_be_bytes()); // object attributes
        out.extend_from_slice(&0u16.to_be_bytes()); // empty auth policy
        out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // symmetric
        out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // scheme
        out.extend_from_slice(&curve.to_be_bytes());
        out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // kdf
        out.extend_from_slice(&(x.len() as u16).to_be_bytes());
        out.extend_from_slice(x);
        out.extend_from_slice(&(y.len() as u16).to_be_bytes());
        out.extend_from_slice(y);
        out
    }

    fn descriptor_evidence(data: Vec<u8>) -> Vec<EvidencePiece> {
        vec![EvidencePiece {
            piece_type: EvidenceType::PlatformPublicKey,
            data,
            signature: vec![],
        }]
    }

    #[test]
    fn test_extract_valid_descriptor() {
        let x = hex::decode(GENERATOR_X).unwrap();
        let y = hex::decode(GENERATOR_Y).unwrap();
        let evidence =
            descriptor_evidence(encode_descriptor(TPM_ALG_ECC, TPM_ECC_NIST_P256, &x, &y));

        let trusted = unsafe_trusted_data(&evidence).unwrap();
        assert_eq!(trusted.kem_id, KEM_P256_HKDF_SHA256);
        assert_eq!(trusted.kdf_id, KDF_HKDF_SHA256);
        assert_eq!(trusted.aead_id, AEAD_AES128_GCM);

        // SEC1 uncompressed: 0x04 || x || y
        assert_eq!(trusted.public_key.len(), 65);
        assert_eq!(trusted.public_key[0], 0x04);
        assert_eq!(&trusted.public_key[1..33], x.as_slice());
        assert_eq!(&trusted.public_key[33..], y.as_slice());
    }

    #[test]
    fn test_extract_missing_descriptor() {
        let evidence = vec![EvidencePiece {
            piece_type: EvidenceType::PlatformQuote,
            data: vec![1, 2, 3],
            signature: vec![],
        }];

        let err = unsafe_trusted_data(&evidence).unwrap_err();
        assert!(err.to_string().contains("platform public key evidence"));
    }

    #[test]
    fn test_extract_rejects_non_ecc_type() {
        let x = hex::decode(GENERATOR_X).unwrap();
        let y = hex::decode(GENERATOR_Y).unwrap();
        // 0x0001 is TPM_ALG_RSA
        let evidence = descriptor_evidence(encode_descriptor(0x0001, TPM_ECC_NIST_P256, &x, &y));

        let err = unsafe_trusted_data(&evidence).unwrap_err();
        assert!(err.to_string().contains("unsupported public area type"));
    }

    #[test]
    fn test_extract_rejects_other_curves() {
        let x = hex::decode(GENERATOR_X).unwrap();
        let y = hex::decode(GENERATOR_Y).unwrap();
        // 0x0004 is NIST P-384
        let evidence = descriptor_evidence(encode_descriptor(TPM_ALG_ECC, 0x0004, &x, &y));

        let err = unsafe_trusted_data(&evidence).unwrap_err();
        assert!(err.to_string().contains("unsupported ECC curve"));
    }

    #[test]
    fn test_extract_rejects_truncated_descriptor() {
        let x = hex::decode(GENERATOR_X).unwrap();
        let y = hex::decode(GENERATOR_Y).unwrap();
        let mut data = encode_descriptor(TPM_ALG_ECC, TPM_ECC_NIST_P256, &x, &y);
        data.truncate(data.len() - 8);

        let err = unsafe_trusted_data(&descriptor_evidence(data)).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_extract_rejects_point_off_curve() {
        let x = [1u8; COORDINATE_LEN];
        let y = [1u8; COORDINATE_LEN];
        let evidence =
            descriptor_evidence(encode_descriptor(TPM_ALG_ECC, TPM_ECC_NIST_P256, &x, &y));

        let err = unsafe_trusted_data(&evidence).unwrap_err();
        assert!(err.to_string().contains("not a valid P-256 point"));
    }
}
