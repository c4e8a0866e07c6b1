//! COSE_Sign1 envelopes as carried by health certificates and trust list
//! signatures.

use std::collections::BTreeMap;

use minicbor::Encoder;
use p256::ecdsa::signature::Signer;

use crate::cbor::{self, CborKey, CborValue};
use crate::crypto::CoseAlgorithm;
use crate::error::Error;

pub const COSE_SIGN1_TAG: u64 = 18;
pub const CWT_TAG: u64 = 61;
pub const SIG_STRUCTURE_CONTEXT_SIGNATURE1: &str = "Signature1";

pub const HEADER_ALG: i64 = 1;
pub const HEADER_KID: i64 = 4;

type HeaderMap = BTreeMap<CborKey, CborValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct CoseSign1 {
    protected: Vec<u8>,
    protected_headers: HeaderMap,
    unprotected_headers: HeaderMap,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

fn envelope(msg: impl Into<String>) -> Error {
    Error::Envelope(msg.into())
}

impl CoseSign1 {
    /// Parse a COSE_Sign1 structure, optionally wrapped in the CWT and
    /// COSE_Sign1 tags. Detached payloads are rejected.
    pub fn parse(input: &[u8]) -> Result<Self, Error> {
        if input.is_empty() {
            return Err(envelope("empty input"));
        }

        let mut item = cbor::decode(input)?;
        if let CborValue::Tagged(CWT_TAG, inner) = item {
            item = *inner;
        }
        if let CborValue::Tagged(COSE_SIGN1_TAG, inner) = item {
            item = *inner;
        }

        let fields = match item {
            CborValue::Array(fields) => fields,
            CborValue::Tagged(tag, _) => {
                return Err(envelope(format!(
                    "unexpected CBOR tag {} (expected COSE_Sign1 tag 18)",
                    tag
                )))
            }
            _ => return Err(envelope("top-level item is not an array")),
        };
        let [protected, unprotected, payload, signature]: [CborValue; 4] = fields
            .try_into()
            .map_err(|_| envelope("array length was not 4"))?;

        let protected = match protected {
            CborValue::Bytes(b) => b,
            _ => return Err(envelope("protected headers are not a byte string")),
        };
        let protected_headers = if protected.is_empty() {
            HeaderMap::new()
        } else {
            match cbor::decode(&protected)? {
                CborValue::Map(m) => m,
                _ => return Err(envelope("protected headers are not a map")),
            }
        };

        let unprotected_headers = match unprotected {
            CborValue::Map(m) => m,
            _ => return Err(envelope("unprotected headers are not a map")),
        };

        let payload = match payload {
            CborValue::Bytes(b) => b,
            CborValue::Null => return Err(envelope("detached payloads are not supported")),
            _ => return Err(envelope("payload is not a byte string")),
        };

        let signature = match signature {
            CborValue::Bytes(b) => b,
            _ => return Err(envelope("signature is not a byte string")),
        };

        Ok(Self {
            protected,
            protected_headers,
            unprotected_headers,
            payload,
            signature,
        })
    }

    /// Protected headers take precedence over unprotected ones.
    fn header(&self, label: i64) -> Option<&CborValue> {
        let key = CborKey::Int(label);
        self.protected_headers
            .get(&key)
            .or_else(|| self.unprotected_headers.get(&key))
    }

    /// Key identifier (header label 4), if present and a byte string.
    pub fn key_id(&self) -> Option<&[u8]> {
        self.header(HEADER_KID).and_then(|v| v.as_bytes())
    }

    /// Declared signature algorithm (header label 1).
    pub fn algorithm(&self) -> Result<CoseAlgorithm, Error> {
        let label = self
            .header(HEADER_ALG)
            .ok_or_else(|| envelope("missing alg header"))?
            .as_i64()
            .ok_or_else(|| envelope("alg header is not an integer"))?;
        CoseAlgorithm::from_label(label)
            .ok_or_else(|| envelope(format!("unsupported algorithm {}", label)))
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The bytes covered by the signature:
    /// `["Signature1", protected, h'', payload]`.
    pub fn sig_structure(&self) -> Vec<u8> {
        sig_structure(&self.protected, &self.payload)
    }

    /// Re-encode as a tagged COSE_Sign1.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let value = CborValue::Tagged(
            COSE_SIGN1_TAG,
            Box::new(CborValue::Array(vec![
                CborValue::Bytes(self.protected.clone()),
                CborValue::Map(self.unprotected_headers.clone()),
                CborValue::Bytes(self.payload.clone()),
                CborValue::Bytes(self.signature.clone()),
            ])),
        );
        cbor::encode(&value)
    }
}

fn sig_structure(protected: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + protected.len() + payload.len());
    let mut enc = Encoder::new(&mut out);
    // Writing into a Vec is infallible.
    let _ = enc
        .array(4)
        .and_then(|e| e.str(SIG_STRUCTURE_CONTEXT_SIGNATURE1))
        .and_then(|e| e.bytes(protected))
        .and_then(|e| e.bytes(&[]))
        .and_then(|e| e.bytes(payload));
    out
}

/// Produce a tagged ES256 COSE_Sign1 over `payload`. The key identifier,
/// when given, goes into the protected header.
pub fn sign_es256(
    key: &p256::ecdsa::SigningKey,
    kid: Option<&[u8]>,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut headers = vec![(
        CborKey::Int(HEADER_ALG),
        CborValue::Int(CoseAlgorithm::ES256.label().into()),
    )];
    if let Some(kid) = kid {
        headers.push((CborKey::Int(HEADER_KID), CborValue::Bytes(kid.to_vec())));
    }
    let protected = cbor::encode(&cbor::map(headers))?;

    let signature: p256::ecdsa::Signature = key.sign(&sig_structure(&protected, payload));

    let message = CoseSign1 {
        protected_headers: HeaderMap::new(),
        protected,
        unprotected_headers: HeaderMap::new(),
        payload: payload.to_vec(),
        signature: signature.to_bytes().to_vec(),
    };
    message.to_bytes()
}
