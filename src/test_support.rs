//! Key material, signed artifacts and a scripted fetcher for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use p256::ecdsa::signature::Signer;
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType};

use crate::anchor::TrustAnchor;
use crate::cbor::{self, CborKey, CborValue};
use crate::codec;
use crate::cose;
use crate::crypto::{self, PublicKey};
use crate::error::Error;
use crate::fetch::ArtifactFetcher;
use crate::source::Issuer;
use crate::trust_store::{KeyId, SigningKey};
use crate::types::cert_list::CertificateEntry;

/// A P-256 key with a self-signed certificate.
pub struct TestKey {
    signing_key: p256::ecdsa::SigningKey,
    certificate_der: Vec<u8>,
}

impl TestKey {
    pub fn generate() -> Self {
        let mut params = CertificateParams::new(vec!["dsc.test".to_string()]);
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "Test DSC");
        name.push(DnType::CountryName, "XX");
        params.distinguished_name = name;

        let certificate = Certificate::from_params(params).unwrap();
        // Every serialize_der() call re-signs; keep one encoding.
        let certificate_der = certificate.serialize_der().unwrap();
        let secret =
            p256::SecretKey::from_pkcs8_der(&certificate.serialize_private_key_der()).unwrap();

        Self {
            signing_key: p256::ecdsa::SigningKey::from(secret),
            certificate_der,
        }
    }

    pub fn signing_key(&self) -> &p256::ecdsa::SigningKey {
        &self.signing_key
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::P256(p256::PublicKey::from(self.signing_key.verifying_key()))
    }

    pub fn kid(&self) -> KeyId {
        KeyId::for_certificate(&self.certificate_der)
    }

    pub fn signing_entry(&self) -> SigningKey {
        SigningKey::from_certificate_der(&self.certificate_der).unwrap()
    }

    pub fn anchor(&self, issuer: Issuer) -> TrustAnchor {
        TrustAnchor::new(issuer, self.public_key())
    }

    /// Raw `r || s` ES256 signature.
    pub fn sign_raw(&self, data: &[u8]) -> Vec<u8> {
        let signature: p256::ecdsa::Signature = self.signing_key.sign(data);
        signature.to_bytes().to_vec()
    }

    pub fn spki_der(&self) -> Vec<u8> {
        p256::PublicKey::from(self.signing_key.verifying_key())
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    pub fn certificate_entry(&self) -> CertificateEntry {
        CertificateEntry {
            raw_data: STANDARD.encode(&self.certificate_der),
            kid: Some(self.kid().to_string()),
            country: Some("XX".to_string()),
        }
    }

    /// Sign `claims` as a credential string with this key's kid.
    pub fn issue(&self, claims: &CborValue) -> String {
        let payload = cbor::encode(claims).unwrap();
        let message =
            cose::sign_es256(&self.signing_key, Some(self.kid().as_bytes()), &payload).unwrap();
        codec::encode_credential(&message).unwrap()
    }
}

/// Detached COSE signature over the SHA-256 of `artifact`.
pub fn sign_digest(root: &TestKey, artifact: &[u8]) -> Vec<u8> {
    let payload = cbor::encode(&cbor::map([(
        2i64,
        CborValue::Bytes(crypto::sha256(artifact).to_vec()),
    )]))
    .unwrap();
    cose::sign_es256(root.signing_key(), None, &payload).unwrap()
}

/// CBOR trust list in the Austrian `{"c": [{"i", "c"}]}` layout.
pub fn austrian_trust_list(dscs: &[&TestKey]) -> Vec<u8> {
    let entries = dscs
        .iter()
        .map(|dsc| {
            cbor::map([
                (CborKey::from("i"), CborValue::Bytes(dsc.kid().as_bytes().to_vec())),
                (CborKey::from("c"), CborValue::Bytes(dsc.certificate_der().to_vec())),
            ])
        })
        .collect();
    cbor::encode(&cbor::map([("c", CborValue::Array(entries))])).unwrap()
}

/// Claims of a vaccination certificate issued by `AT`.
pub fn vaccination_claims(issued_at: i64, expires_at: i64) -> CborValue {
    let vaccination = cbor::map([
        ("tg", CborValue::Text("840539006".to_string())),
        ("vp", CborValue::Text("1119349007".to_string())),
        ("mp", CborValue::Text("EU/1/20/1528".to_string())),
        ("ma", CborValue::Text("ORG-100030215".to_string())),
        ("dn", CborValue::Int(2)),
        ("sd", CborValue::Int(2)),
        ("dt", CborValue::Text("2021-03-18".to_string())),
        ("co", CborValue::Text("AT".to_string())),
        ("is", CborValue::Text("Ministry of Health, Austria".to_string())),
        ("ci", CborValue::Text("URN:UVCI:01:AT:TEST0000000000000000000000#1".to_string())),
    ]);
    let hcert = cbor::map([
        ("ver", CborValue::Text("1.3.0".to_string())),
        (
            "nam",
            cbor::map([
                ("fn", CborValue::Text("Muster".to_string())),
                ("fnt", CborValue::Text("MUSTER".to_string())),
                ("gn", CborValue::Text("Max".to_string())),
                ("gnt", CborValue::Text("MAX".to_string())),
            ]),
        ),
        ("dob", CborValue::Text("1990-01-01".to_string())),
        ("v", CborValue::Array(vec![vaccination])),
    ]);
    cbor::map([
        (1i64, CborValue::Text("AT".to_string())),
        (4i64, CborValue::Int(expires_at.into())),
        (6i64, CborValue::Int(issued_at.into())),
        (-260i64, cbor::map([(1i64, hcert)])),
    ])
}

/// Fetcher serving canned responses, with per-URL call counts and an
/// optional delay before every response.
#[derive(Default)]
pub struct MapFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl MapFetcher {
    pub fn insert(&self, url: &str, body: Vec<u8>) {
        self.responses.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn remove(&self, url: &str) {
        self.responses.lock().unwrap().remove(url);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ArtifactFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::TrustFetch(format!("{} returned 404", url)))
    }
}
