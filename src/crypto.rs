//! Signing keys, COSE algorithms and digests.

use p256::ecdsa::signature::Verifier as _;
use p256::pkcs8::DecodePublicKey as _;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::pss;
use rsa::signature::Verifier as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Length of a certificate-derived key identifier.
pub const KEY_ID_LEN: usize = 8;

/// Signature algorithms accepted for health certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoseAlgorithm {
    /// ECDSA w/ SHA-256 over P-256.
    ES256,
    /// RSASSA-PSS w/ SHA-256.
    PS256,
}

impl CoseAlgorithm {
    /// The COSE `alg` header value.
    pub fn label(self) -> i64 {
        match self {
            CoseAlgorithm::ES256 => -7,
            CoseAlgorithm::PS256 => -37,
        }
    }

    pub fn from_label(label: i64) -> Option<Self> {
        match label {
            -7 => Some(CoseAlgorithm::ES256),
            -37 => Some(CoseAlgorithm::PS256),
            _ => None,
        }
    }
}

impl std::fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoseAlgorithm::ES256 => write!(f, "ES256"),
            CoseAlgorithm::PS256 => write!(f, "PS256"),
        }
    }
}

/// A credential or artifact verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    P256(p256::PublicKey),
    Rsa(rsa::RsaPublicKey),
}

impl PublicKey {
    /// Load a key from DER-encoded SubjectPublicKeyInfo.
    ///
    /// # Errors
    ///
    /// Returns `Error::Key` if the key is neither P-256 nor RSA.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, Error> {
        if let Ok(key) = p256::PublicKey::from_public_key_der(der) {
            return Ok(PublicKey::P256(key));
        }
        rsa::RsaPublicKey::from_public_key_der(der)
            .map(PublicKey::Rsa)
            .map_err(|e| Error::Key(format!("unsupported public key: {}", e)))
    }

    /// Load the subject key of a DER-encoded X.509 certificate.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self, Error> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| Error::Key(format!("invalid certificate: {}", e)))?;
        Self::from_spki_der(cert.tbs_certificate.subject_pki.raw)
    }

    /// Load a key from PEM. Accepts `CERTIFICATE` and `PUBLIC KEY` blocks.
    pub fn from_pem(pem: &str) -> Result<Self, Error> {
        let (_, block) = x509_parser::pem::parse_x509_pem(pem.trim().as_bytes())
            .map_err(|e| Error::Key(format!("invalid PEM: {}", e)))?;
        match block.label.as_str() {
            "CERTIFICATE" => Self::from_certificate_der(&block.contents),
            "PUBLIC KEY" => Self::from_spki_der(&block.contents),
            other => Err(Error::Key(format!("unsupported PEM label {}", other))),
        }
    }

    /// The algorithm this key signs with.
    pub fn algorithm(&self) -> CoseAlgorithm {
        match self {
            PublicKey::P256(_) => CoseAlgorithm::ES256,
            PublicKey::Rsa(_) => CoseAlgorithm::PS256,
        }
    }

    /// Verify `signature` over `message` under the declared algorithm.
    ///
    /// ES256 signatures are expected as raw `r || s`; DER is accepted as a
    /// fallback. A declared algorithm that does not match the key type is a
    /// verification failure.
    pub fn verify(
        &self,
        alg: CoseAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        if alg != self.algorithm() {
            return Err(Error::SignatureInvalid(format!(
                "{} signature presented for a {} key",
                alg,
                self.algorithm()
            )));
        }

        match self {
            PublicKey::P256(key) => {
                let vk = p256::ecdsa::VerifyingKey::from(*key);
                let sig = p256::ecdsa::Signature::from_slice(signature)
                    .or_else(|_| p256::ecdsa::Signature::from_der(signature))
                    .map_err(|e| Error::SignatureInvalid(format!("bad ES256 signature: {}", e)))?;
                vk.verify(message, &sig)
                    .map_err(|_| Error::SignatureInvalid("signature verification failed".into()))
            }
            PublicKey::Rsa(key) => {
                let vk = pss::VerifyingKey::<Sha256>::new(key.clone());
                let sig = pss::Signature::try_from(signature)
                    .map_err(|e| Error::SignatureInvalid(format!("bad PS256 signature: {}", e)))?;
                vk.verify(message, &sig)
                    .map_err(|_| Error::SignatureInvalid("signature verification failed".into()))
            }
        }
    }
}

/// SHA-256 of the given data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Key identifier of a signing certificate: the first 8 bytes of the
/// SHA-256 of its DER encoding.
pub fn key_id_for_certificate(der: &[u8]) -> Vec<u8> {
    sha256(der)[..KEY_ID_LEN].to_vec()
}

/// Compare two digests without short-circuiting on the first differing byte.
pub fn digests_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
