//! Oblivious encrypted transport
//!
//! Wraps a plain HTTP client so that request and response bodies are
//! end-to-end encrypted to the gateway's currently active rotation key while
//! routing through an intermediary relay. The relay sees only an opaque
//! capsule: a header naming the key and suite, the HPKE encapsulated key,
//! and fixed-length sealed chunks. Responses come back under a key derived
//! from the HPKE exporter secret and a fresh response nonce.
//!
//! Only the fixed DHKEM(P-256, HKDF-SHA256) / HKDF-SHA256 / AES-128-GCM
//! suite is supported; selecting a key config advertising anything else is a
//! construction error.

use aes_gcm::aead::Aead as _;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use chrono::Utc;
use hkdf::Hkdf;
use hpke::aead::AesGcm128;
use hpke::kem::DhP256HkdfSha256;
use hpke::{Deserializable, Kem as KemTrait, OpModeS, Serializable};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::keyrotation::{
    select_active_key, KeyConfig, KeyRotationPeriod, AEAD_AES128_GCM, KDF_HKDF_SHA256,
    KEM_P256_HKDF_SHA256,
};

type Kem = DhP256HkdfSha256;
type HpkeKdf = hpke::kdf::HkdfSha256;
type SenderCtx = hpke::aead::AeadCtxS<AesGcm128, HpkeKdf, Kem>;

/// Maximum plaintext chunk length dictated by the relay's encapsulation limit.
pub const ENCAPSULATED_CHUNK_LEN: usize = 16_384;

// AES-128-GCM parameters.
const AEAD_KEY_LEN: usize = 16;
const AEAD_NONCE_LEN: usize = 12;

/// Response nonce width: max(Nn, Nk) for the fixed suite.
const RESPONSE_NONCE_LEN: usize = 16;

/// Capsule header: key ID byte plus KEM/KDF/AEAD identifiers.
const CAPSULE_HEADER_LEN: usize = 7;

const REQUEST_INFO_LABEL: &[u8] = b"nodetrust encapsulated request";
const RESPONSE_EXPORT_LABEL: &[u8] = b"nodetrust encapsulated response";
const FINAL_CHUNK_AAD: &[u8] = b"final";

/// Splits request plaintext into fixed-length chunks for sealing.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedRequestEncoder {
    max_chunk_len: usize,
}

impl ChunkedRequestEncoder {
    pub fn new(max_chunk_len: usize) -> Result<Self> {
        if max_chunk_len == 0 {
            return Err(Error::Transport("chunk length must be non-zero".into()));
        }
        Ok(Self { max_chunk_len })
    }
}

/// Decapsulated relay response.
#[derive(Debug, Clone)]
pub struct EncryptedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl EncryptedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP-client-shaped object whose bodies are encrypted to the gateway key.
///
/// Request/response semantics mirror a plain HTTP client; the difference is
/// that every exchange travels through the relay as an encrypted capsule.
#[derive(Debug)]
pub struct EncryptedClient {
    http_client: reqwest::Client,
    relay_url: String,
    key_config: KeyConfig,
    encoder: ChunkedRequestEncoder,
}

impl EncryptedClient {
    /// Key ID the transport is bound to.
    pub fn key_id(&self) -> u8 {
        self.key_config.key_id
    }

    /// Send one encrypted request through the relay.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<EncryptedResponse> {
        let inner = encode_inner_request(method, url, headers, body)?;
        let mut rng = rand::thread_rng();
        let (capsule, ctx, enc) =
            encapsulate_request(&self.key_config, &self.encoder, &inner, &mut rng)?;

        let response = self
            .http_client
            .post(&self.relay_url)
            .header(reqwest::header::CONTENT_TYPE, "message/ohttp-req")
            .body(capsule)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("relay request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "relay returned {}: {}",
                status, body
            )));
        }

        let payload = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read relay response: {}", e)))?;

        let plaintext = decapsulate_response(&ctx, &enc, &payload)?;
        let (status, body) = decode_inner_response(&plaintext)?;
        Ok(EncryptedResponse { status, body })
    }
}

/// Build an encrypted transport bound to the currently active rotation key.
///
/// Selects the key via the rotation schedule, validates its suite, and wires
/// the fixed-chunk request encoder. Construction failures are returned,
/// never retried.
pub fn build_transport(
    base_client: reqwest::Client,
    relay_url: impl Into<String>,
    key_configs: &[KeyConfig],
    rotation_periods: &[KeyRotationPeriod],
) -> Result<EncryptedClient> {
    let key_config = select_active_key(rotation_periods, key_configs, Utc::now())?.clone();

    if key_config.kem_id != KEM_P256_HKDF_SHA256 {
        return Err(Error::Transport(format!(
            "unsupported KEM {:#06x} on key ID {}",
            key_config.kem_id, key_config.key_id
        )));
    }
    let suite_supported = key_config
        .symmetric_algorithms
        .iter()
        .any(|alg| alg.kdf_id == KDF_HKDF_SHA256 && alg.aead_id == AEAD_AES128_GCM);
    if !suite_supported {
        return Err(Error::Transport(format!(
            "key ID {} advertises no supported symmetric algorithm",
            key_config.key_id
        )));
    }

    let encoder = ChunkedRequestEncoder::new(ENCAPSULATED_CHUNK_LEN)?;
    Ok(EncryptedClient {
        http_client: base_client,
        relay_url: relay_url.into(),
        key_config,
        encoder,
    })
}

fn capsule_header(key: &KeyConfig) -> [u8; CAPSULE_HEADER_LEN] {
    let mut header = [0u8; CAPSULE_HEADER_LEN];
    header[0] = key.key_id;
    header[1..3].copy_from_slice(&key.kem_id.to_be_bytes());
    header[3..5].copy_from_slice(&KDF_HKDF_SHA256.to_be_bytes());
    header[5..7].copy_from_slice(&AEAD_AES128_GCM.to_be_bytes());
    header
}

/// Seal `plaintext` to the gateway key as a relay capsule.
///
/// Capsule layout: header, HPKE encapsulated key, then length-prefixed
/// sealed chunks. The final chunk is bound with a distinguishing AAD so a
/// truncated capsule cannot pass for a complete one.
fn encapsulate_request<R: rand::RngCore + rand::CryptoRng>(
    key: &KeyConfig,
    encoder: &ChunkedRequestEncoder,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<(Vec<u8>, SenderCtx, Vec<u8>)> {
    let public_key = <Kem as KemTrait>::PublicKey::from_bytes(&key.public_key)
        .map_err(|e| Error::Transport(format!("invalid gateway public key: {}", e)))?;

    let header = capsule_header(key);
    let mut info = Vec::with_capacity(REQUEST_INFO_LABEL.len() + 1 + header.len());
    info.extend_from_slice(REQUEST_INFO_LABEL);
    info.push(0);
    info.extend_from_slice(&header);

    let (encapped_key, mut ctx) =
        hpke::setup_sender::<AesGcm128, HpkeKdf, Kem, _>(&OpModeS::Base, &public_key, &info, rng)
            .map_err(|e| Error::Transport(format!("HPKE setup failed: {}", e)))?;
    let enc = encapped_key.to_bytes().to_vec();

    let mut capsule = Vec::with_capacity(header.len() + enc.len() + plaintext.len() + 64);
    capsule.extend_from_slice(&header);
    capsule.extend_from_slice(&enc);

    let chunks: Vec<&[u8]> = if plaintext.is_empty() {
        // An empty body still seals one final chunk so the receiver can
        // authenticate completeness.
        vec![plaintext]
    } else {
        plaintext.chunks(encoder.max_chunk_len).collect()
    };
    let last = chunks.len() - 1;
    for (idx, chunk) in chunks.iter().enumerate() {
        let aad = if idx == last { FINAL_CHUNK_AAD } else { &[] };
        let sealed = ctx
            .seal(chunk, aad)
            .map_err(|e| Error::Transport(format!("failed to seal request chunk: {}", e)))?;
        capsule.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
        capsule.extend_from_slice(&sealed);
    }

    Ok((capsule, ctx, enc))
}

/// Open a relay response sealed under the exporter-derived response key.
///
/// Response layout: response nonce, then one AEAD ciphertext. Key and nonce
/// come from HKDF over the HPKE exporter secret, salted with the request's
/// encapsulated key plus the response nonce.
fn decapsulate_response(ctx: &SenderCtx, enc: &[u8], response: &[u8]) -> Result<Vec<u8>> {
    if response.len() < RESPONSE_NONCE_LEN {
        return Err(Error::Transport("relay response too short".into()));
    }
    let (response_nonce, ciphertext) = response.split_at(RESPONSE_NONCE_LEN);

    let mut secret = [0u8; RESPONSE_NONCE_LEN];
    ctx.export(RESPONSE_EXPORT_LABEL, &mut secret)
        .map_err(|e| Error::Transport(format!("exporter secret derivation failed: {}", e)))?;

    let mut salt = Vec::with_capacity(enc.len() + RESPONSE_NONCE_LEN);
    salt.extend_from_slice(enc);
    salt.extend_from_slice(response_nonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), &secret);
    let mut key = [0u8; AEAD_KEY_LEN];
    hk.expand(b"key", &mut key)
        .map_err(|e| Error::Transport(format!("response key derivation failed: {}", e)))?;
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    hk.expand(b"nonce", &mut nonce)
        .map_err(|e| Error::Transport(format!("response nonce derivation failed: {}", e)))?;

    let cipher = Aes128Gcm::new_from_slice(&key)
        .map_err(|e| Error::Transport(format!("response cipher setup failed: {}", e)))?;
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| Error::Transport("failed to open relay response".into()))
}

// Inner message encoding: a minimal length-prefixed binary form the gateway
// decodes after decapsulation. Method, URL, headers, then the body.

fn encode_inner_request(
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<Vec<u8>> {
    let method_len = u8::try_from(method.len())
        .map_err(|_| Error::Transport("method name too long".into()))?;
    let url_len =
        u16::try_from(url.len()).map_err(|_| Error::Transport("request URL too long".into()))?;
    let header_count = u16::try_from(headers.len())
        .map_err(|_| Error::Transport("too many request headers".into()))?;
    let body_len =
        u32::try_from(body.len()).map_err(|_| Error::Transport("request body too large".into()))?;

    let mut out = Vec::with_capacity(8 + method.len() + url.len() + body.len());
    out.push(method_len);
    out.extend_from_slice(method.as_bytes());
    out.extend_from_slice(&url_len.to_be_bytes());
    out.extend_from_slice(url.as_bytes());
    out.extend_from_slice(&header_count.to_be_bytes());
    for (name, value) in headers {
        let name_len = u16::try_from(name.len())
            .map_err(|_| Error::Transport("header name too long".into()))?;
        let value_len = u16::try_from(value.len())
            .map_err(|_| Error::Transport("header value too long".into()))?;
        out.extend_from_slice(&name_len.to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&value_len.to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out.extend_from_slice(&body_len.to_be_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

fn decode_inner_response(data: &[u8]) -> Result<(u16, Vec<u8>)> {
    if data.len() < 6 {
        return Err(Error::Transport("inner response truncated".into()));
    }
    let status = u16::from_be_bytes([data[0], data[1]]);
    let body_len = u32::from_be_bytes([data[2], data[3], data[4], data[5]]) as usize;
    let body = &data[6..];
    if body.len() != body_len {
        return Err(Error::Transport(format!(
            "inner response length mismatch: declared {}, got {}",
            body_len,
            body.len()
        )));
    }
    Ok((status, body.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyrotation::SymmetricAlgorithm;
    use chrono::Duration;
    use hpke::OpModeR;

    fn test_key_material(key_id: u8) -> (<Kem as KemTrait>::PrivateKey, KeyConfig) {
        let (private_key, public_key) = Kem::derive_keypair(&[7u8; 32]);
        let config = KeyConfig {
            key_id,
            kem_id: KEM_P256_HKDF_SHA256,
            public_key: public_key.to_bytes().to_vec(),
            symmetric_algorithms: vec![SymmetricAlgorithm {
                kdf_id: KDF_HKDF_SHA256,
                aead_id: AEAD_AES128_GCM,
            }],
        };
        (private_key, config)
    }

    fn active_period(key_id: u8) -> KeyRotationPeriod {
        KeyRotationPeriod {
            key_id,
            active_from: Utc::now() - Duration::minutes(1),
            active_until: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_build_transport_no_active_keys() {
        let (_, config) = test_key_material(0);
        let future = KeyRotationPeriod {
            key_id: 0,
            active_from: Utc::now() + Duration::hours(1),
            active_until: Utc::now() + Duration::hours(2),
        };

        let err =
            build_transport(reqwest::Client::new(), "http://relay", &[config], &[future])
                .unwrap_err();
        assert!(matches!(err, Error::NoActiveKey));
    }

    #[test]
    fn test_build_transport_missing_key_config() {
        let (_, config) = test_key_material(0);

        let err = build_transport(
            reqwest::Client::new(),
            "http://relay",
            &[config],
            &[active_period(1)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingKeyConfig(1)));
    }

    #[test]
    fn test_build_transport_success() {
        let (_, config) = test_key_material(0);

        let client = build_transport(
            reqwest::Client::new(),
            "http://relay",
            &[config],
            &[active_period(0)],
        )
        .unwrap();
        assert_eq!(client.key_id(), 0);
    }

    #[test]
    fn test_build_transport_rejects_unsupported_suite() {
        let (_, mut config) = test_key_material(0);
        config.symmetric_algorithms = vec![SymmetricAlgorithm {
            kdf_id: 0x0003, // HKDF-SHA512
            aead_id: AEAD_AES128_GCM,
        }];

        let err = build_transport(
            reqwest::Client::new(),
            "http://relay",
            &[config],
            &[active_period(0)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("no supported symmetric algorithm"));
    }

    #[test]
    fn test_encoder_rejects_zero_chunk_length() {
        assert!(ChunkedRequestEncoder::new(0).is_err());
    }

    #[test]
    fn test_inner_request_encoding_layout() {
        let headers = vec![("content-type".to_string(), "application/json".to_string())];
        let encoded = encode_inner_request("POST", "http://example/api", &headers, b"hello").unwrap();

        assert_eq!(encoded[0] as usize, "POST".len());
        assert_eq!(&encoded[1..5], b"POST");
        // Body is the trailing bytes after its u32 length prefix.
        assert_eq!(&encoded[encoded.len() - 5..], b"hello");
    }

    #[test]
    fn test_inner_response_length_mismatch() {
        let mut data = vec![0x00, 0xC8]; // status 200
        data.extend_from_slice(&10u32.to_be_bytes());
        data.extend_from_slice(b"short");

        assert!(decode_inner_response(&data).is_err());
    }

    /// Full capsule round trip against a simulated gateway: open the request
    /// chunks with the receiver context, seal a response under the
    /// exporter-derived key, and decapsulate it with the sender context.
    #[test]
    fn test_capsule_round_trip_with_simulated_gateway() {
        let (private_key, config) = test_key_material(3);
        let encoder = ChunkedRequestEncoder::new(4).unwrap();
        let plaintext = b"0123456789"; // three chunks at length 4
        let mut rng = rand::thread_rng();

        let (capsule, sender_ctx, enc) =
            encapsulate_request(&config, &encoder, plaintext, &mut rng).unwrap();

        // Gateway side: parse the capsule.
        let header = &capsule[..CAPSULE_HEADER_LEN];
        assert_eq!(header[0], 3);
        let enc_len = enc.len();
        let encapped = &capsule[CAPSULE_HEADER_LEN..CAPSULE_HEADER_LEN + enc_len];
        assert_eq!(encapped, enc.as_slice());

        let mut info = Vec::new();
        info.extend_from_slice(REQUEST_INFO_LABEL);
        info.push(0);
        info.extend_from_slice(header);
        let encapped_key = <Kem as KemTrait>::EncappedKey::from_bytes(encapped).unwrap();
        let mut receiver_ctx = hpke::setup_receiver::<AesGcm128, HpkeKdf, Kem>(
            &OpModeR::Base,
            &private_key,
            &encapped_key,
            &info,
        )
        .unwrap();

        let mut recovered = Vec::new();
        let mut cursor = CAPSULE_HEADER_LEN + enc_len;
        let mut opened = Vec::new();
        while cursor < capsule.len() {
            let len = u32::from_be_bytes(capsule[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            opened.push(capsule[cursor..cursor + len].to_vec());
            cursor += len;
        }
        let last = opened.len() - 1;
        for (idx, sealed) in opened.iter().enumerate() {
            let aad: &[u8] = if idx == last { FINAL_CHUNK_AAD } else { &[] };
            recovered.extend_from_slice(&receiver_ctx.open(sealed, aad).unwrap());
        }
        assert_eq!(recovered, plaintext);

        // Gateway response: same derivation as decapsulate_response.
        let response_plaintext = b"pong";
        let response_nonce = [0x42u8; RESPONSE_NONCE_LEN];
        let mut secret = [0u8; RESPONSE_NONCE_LEN];
        receiver_ctx
            .export(RESPONSE_EXPORT_LABEL, &mut secret)
            .unwrap();
        let mut salt = enc.clone();
        salt.extend_from_slice(&response_nonce);
        let hk = Hkdf::<Sha256>::new(Some(&salt), &secret);
        let mut key = [0u8; AEAD_KEY_LEN];
        hk.expand(b"key", &mut key).unwrap();
        let mut nonce = [0u8; AEAD_NONCE_LEN];
        hk.expand(b"nonce", &mut nonce).unwrap();
        let cipher = Aes128Gcm::new_from_slice(&key).unwrap();
        let sealed_response = cipher
            .encrypt(Nonce::from_slice(&nonce), response_plaintext.as_slice())
            .unwrap();

        let mut wire = response_nonce.to_vec();
        wire.extend_from_slice(&sealed_response);

        let decapsulated = decapsulate_response(&sender_ctx, &enc, &wire).unwrap();
        assert_eq!(decapsulated, response_plaintext);
    }
}
