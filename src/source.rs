//! Per-issuer trust sources.
//!
//! Every issuer publishes its signing certificates differently. A
//! [`TrustSource`] captures only what varies (endpoints, wire format,
//! authentication) so the manager's fetch/verify/cache flow is shared.

use std::str::FromStr;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::anchor::TrustAnchor;
use crate::cbor::{self, CborValue};
use crate::config::ValidatorConfig;
use crate::error::Error;
use crate::store::Artifact;
use crate::trust_store::{KeyId, SigningKey};
use crate::types::cert_list::{CertificateEntry, CertificateList, DutchKeyList, SignedKeyList};

pub const AT_PRODUCTION_BASE_URL: &str = "https://dgc-trust.qr.gv.at";
pub const AT_TEST_BASE_URL: &str = "https://dgc-trusttest.qr.gv.at";
pub const DE_TRUST_LIST_URL: &str = "https://de.dscg.ubirch.com/trustList/DSC/";
pub const NL_TRUST_LIST_URL: &str = "https://verifier-api.coronacheck.nl/v4/verifier/public_keys";

/// Published test signing certificate for the Austrian sample credentials.
pub const AT_TEST_DSC: &str = "-----BEGIN CERTIFICATE-----
MIIBvTCCAWOgAwIBAgIKAXk8i88OleLsuTAKBggqhkjOPQQDAjA2MRYwFAYDVQQD
DA1BVCBER0MgQ1NDQSAxMQswCQYDVQQGEwJBVDEPMA0GA1UECgwGQk1TR1BLMB4X
DTIxMDUwNTEyNDEwNloXDTIzMDUwNTEyNDEwNlowPTERMA8GA1UEAwwIQVQgRFND
IDExCzAJBgNVBAYTAkFUMQ8wDQYDVQQKDAZCTVNHUEsxCjAIBgNVBAUTATEwWTAT
BgcqhkjOPQIBBggqhkjOPQMBBwNCAASt1Vz1rRuW1HqObUE9MDe7RzIk1gq4XW5G
TyHuHTj5cFEn2Rge37+hINfCZZcozpwQKdyaporPUP1TE7UWl0F3o1IwUDAOBgNV
HQ8BAf8EBAMCB4AwHQYDVR0OBBYEFO49y1ISb6cvXshLcp8UUp9VoGLQMB8GA1Ud
IwQYMBaAFP7JKEOflGEvef2iMdtopsetwGGeMAoGCCqGSM49BAMCA0gAMEUCIQDG
2opotWG8tJXN84ZZqT6wUBz9KF8D+z9NukYvnUEQ3QIgdBLFSTSiDt0UJaDF6St2
bkUQuVHW6fQbONd731/M4nc=
-----END CERTIFICATE-----";

/// Issuer whose trust list a validator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Issuer {
    #[serde(rename = "AT")]
    At,
    #[serde(rename = "AT_TEST")]
    AtTest,
    #[serde(rename = "DE")]
    De,
    #[serde(rename = "NL")]
    Nl,
    /// Compiled-in keys, no network.
    #[serde(rename = "XX")]
    Fixed,
}

impl Issuer {
    pub fn code(self) -> &'static str {
        match self {
            Issuer::At => "AT",
            Issuer::AtTest => "AT_TEST",
            Issuer::De => "DE",
            Issuer::Nl => "NL",
            Issuer::Fixed => "XX",
        }
    }
}

impl std::fmt::Display for Issuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Issuer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AT" => Ok(Issuer::At),
            "AT_TEST" => Ok(Issuer::AtTest),
            "DE" => Ok(Issuer::De),
            "NL" => Ok(Issuer::Nl),
            "XX" => Ok(Issuer::Fixed),
            other => Err(Error::Config(format!("unknown issuer {:?}", other))),
        }
    }
}

/// How a downloaded list is authenticated before adoption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStrategy {
    /// The artifact carries a signature by a trust anchor.
    SignedArtifact,
    /// Every listed certificate is trusted as published.
    FlatList,
}

/// Where an artifact and its detached signature are downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEndpoints {
    pub data_url: String,
    pub signature_url: Option<String>,
}

impl ArtifactEndpoints {
    pub fn new(data_url: impl Into<String>, signature_url: Option<String>) -> Self {
        Self {
            data_url: data_url.into(),
            signature_url,
        }
    }
}

// ---------------------------------------------------------------------------
// TrustSource trait
// ---------------------------------------------------------------------------

/// Issuer-specific parts of loading a trust list.
pub trait TrustSource: Send + Sync {
    fn issuer(&self) -> Issuer;

    fn strategy(&self) -> TrustStrategy;

    /// Artifact cache file name.
    fn cache_name(&self) -> &str;

    /// `None` when the source never touches the network.
    fn trust_list_endpoints(&self) -> Option<ArtifactEndpoints>;

    fn rules_endpoints(&self) -> Option<ArtifactEndpoints> {
        None
    }

    fn rules_cache_name(&self) -> Option<&str> {
        None
    }

    /// Keys compiled into the source. When present they are used as is and
    /// nothing is cached or downloaded.
    fn embedded_keys(&self) -> Result<Option<Vec<SigningKey>>, Error> {
        Ok(None)
    }

    /// Turn downloaded bytes into the artifact form that is verified and
    /// cached.
    fn unpack_download(&self, data: Vec<u8>, signature: Option<Vec<u8>>) -> Result<Artifact, Error> {
        Ok(Artifact::new(data, signature))
    }

    /// Authenticate an artifact. Must not succeed for a tampered artifact.
    fn verify_artifact(&self, artifact: &Artifact) -> Result<(), Error>;

    fn verify_rules(&self, _artifact: &Artifact) -> Result<(), Error> {
        Err(Error::Config(format!(
            "issuer {} publishes no business rules",
            self.issuer()
        )))
    }

    /// Parse the signing keys of an authenticated artifact.
    fn parse_keys(&self, data: &[u8]) -> Result<Vec<SigningKey>, Error>;
}

/// Build the trust source selected by configuration.
pub fn source_for(config: &ValidatorConfig) -> Result<Arc<dyn TrustSource>, Error> {
    let source: Arc<dyn TrustSource> = match config.issuer {
        Issuer::At => Arc::new(AustrianTrustList::production()?.with_url_override(config)),
        Issuer::AtTest => Arc::new(AustrianTrustList::test()?.with_url_override(config)),
        Issuer::De => {
            let pem = config.anchor_pem.as_deref().ok_or_else(|| {
                Error::Config("issuer DE requires anchor_pem to be configured".to_string())
            })?;
            let mut source = GermanTrustList::new(TrustAnchor::from_pem(Issuer::De, pem)?);
            if let Some(url) = &config.trust_list_url {
                source = source.with_url(url);
            }
            Arc::new(source)
        }
        Issuer::Nl => {
            let mut source = DutchTrustList::new();
            if let Some(url) = &config.trust_list_url {
                source = source.with_url(url);
            }
            Arc::new(source)
        }
        Issuer::Fixed => Arc::new(FixedTrustList::at_test_dsc()?),
    };
    Ok(source)
}

/// Parse base64 DER certificate entries, skipping unusable ones.
fn keys_from_entries(issuer: Issuer, entries: &[CertificateEntry]) -> Vec<SigningKey> {
    entries
        .iter()
        .filter_map(|entry| {
            let parsed = STANDARD
                .decode(entry.raw_data.trim())
                .map_err(Error::from)
                .and_then(|der| SigningKey::from_certificate_der(&der));
            match parsed {
                Ok(key) => Some(key),
                Err(e) => {
                    log::warn!("Skipping {} certificate entry: {}", issuer, e);
                    None
                }
            }
        })
        .collect()
}

fn non_empty(issuer: Issuer, keys: Vec<SigningKey>) -> Result<Vec<SigningKey>, Error> {
    if keys.is_empty() {
        return Err(Error::TrustList(format!(
            "{} trust list contains no usable signing keys",
            issuer
        )));
    }
    Ok(keys)
}

fn require_signature(issuer: Issuer, artifact: &Artifact) -> Result<&[u8], Error> {
    artifact
        .signature
        .as_deref()
        .ok_or_else(|| Error::TrustVerify(format!("{} artifact has no signature", issuer)))
}

// ---------------------------------------------------------------------------
// AustrianTrustList
// ---------------------------------------------------------------------------

/// CBOR trust list with a COSE detached-digest signature, plus business
/// rules signed the same way.
#[derive(Debug, Clone)]
pub struct AustrianTrustList {
    issuer: Issuer,
    anchor: TrustAnchor,
    base_url: String,
    trust_list_url: Option<String>,
    cache_name: String,
    rules_cache_name: String,
}

impl AustrianTrustList {
    pub fn new(issuer: Issuer, anchor: TrustAnchor, base_url: impl Into<String>) -> Self {
        let prefix = issuer.code().to_ascii_lowercase();
        Self {
            issuer,
            anchor,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            trust_list_url: None,
            cache_name: format!("{}_trustlist", prefix),
            rules_cache_name: format!("{}_rules", prefix),
        }
    }

    pub fn production() -> Result<Self, Error> {
        Ok(Self::new(
            Issuer::At,
            TrustAnchor::at_production()?,
            AT_PRODUCTION_BASE_URL,
        ))
    }

    pub fn test() -> Result<Self, Error> {
        Ok(Self::new(Issuer::AtTest, TrustAnchor::at_test()?, AT_TEST_BASE_URL))
    }

    fn with_url_override(mut self, config: &ValidatorConfig) -> Self {
        self.trust_list_url = config.trust_list_url.clone();
        self
    }
}

impl TrustSource for AustrianTrustList {
    fn issuer(&self) -> Issuer {
        self.issuer
    }

    fn strategy(&self) -> TrustStrategy {
        TrustStrategy::SignedArtifact
    }

    fn cache_name(&self) -> &str {
        &self.cache_name
    }

    fn trust_list_endpoints(&self) -> Option<ArtifactEndpoints> {
        let data_url = self
            .trust_list_url
            .clone()
            .unwrap_or_else(|| format!("{}/trustlist", self.base_url));
        Some(ArtifactEndpoints::new(
            data_url,
            Some(format!("{}/trustlistsig", self.base_url)),
        ))
    }

    fn rules_endpoints(&self) -> Option<ArtifactEndpoints> {
        Some(ArtifactEndpoints::new(
            format!("{}/rules", self.base_url),
            Some(format!("{}/rulessig", self.base_url)),
        ))
    }

    fn rules_cache_name(&self) -> Option<&str> {
        Some(&self.rules_cache_name)
    }

    fn verify_artifact(&self, artifact: &Artifact) -> Result<(), Error> {
        let signature = require_signature(self.issuer, artifact)?;
        self.anchor.verify_signed_digest(&artifact.data, signature)
    }

    fn verify_rules(&self, artifact: &Artifact) -> Result<(), Error> {
        let signature = require_signature(self.issuer, artifact)?;
        self.anchor.verify_signed_digest(&artifact.data, signature)
    }

    fn parse_keys(&self, data: &[u8]) -> Result<Vec<SigningKey>, Error> {
        let list = cbor::decode(data)
            .map_err(|e| Error::TrustList(format!("{} trust list: {}", self.issuer, e)))?;
        let entries = list
            .get_text("c")
            .and_then(CborValue::as_array)
            .ok_or_else(|| Error::TrustList(format!("{} trust list has no entries", self.issuer)))?;

        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(der) = entry.get_text("c").and_then(CborValue::as_bytes) else {
                log::warn!("Skipping {} trust list entry without a certificate", self.issuer);
                continue;
            };
            let key = match SigningKey::from_certificate_der(der) {
                Ok(key) => key,
                Err(e) => {
                    log::warn!("Skipping {} certificate: {}", self.issuer, e);
                    continue;
                }
            };
            if let Some(declared) = entry.get_text("i").and_then(CborValue::as_bytes) {
                if declared != key.kid().as_bytes() {
                    log::warn!(
                        "{} entry declares kid {} but its certificate hashes to {}",
                        self.issuer,
                        KeyId::new(declared),
                        key.kid()
                    );
                }
            }
            keys.push(key);
        }
        non_empty(self.issuer, keys)
    }
}

// ---------------------------------------------------------------------------
// GermanTrustList
// ---------------------------------------------------------------------------

/// JSON certificate list whose first line is a base64 ES256 signature over
/// the rest of the body.
#[derive(Debug, Clone)]
pub struct GermanTrustList {
    anchor: TrustAnchor,
    url: String,
}

impl GermanTrustList {
    pub fn new(anchor: TrustAnchor) -> Self {
        Self {
            anchor,
            url: DE_TRUST_LIST_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl TrustSource for GermanTrustList {
    fn issuer(&self) -> Issuer {
        Issuer::De
    }

    fn strategy(&self) -> TrustStrategy {
        TrustStrategy::SignedArtifact
    }

    fn cache_name(&self) -> &str {
        "de.json"
    }

    fn trust_list_endpoints(&self) -> Option<ArtifactEndpoints> {
        Some(ArtifactEndpoints::new(self.url.clone(), None))
    }

    fn unpack_download(&self, data: Vec<u8>, _signature: Option<Vec<u8>>) -> Result<Artifact, Error> {
        let split = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::TrustList("DE trust list has no signature line".to_string()))?;
        let signature_line = std::str::from_utf8(&data[..split])
            .map_err(|_| Error::TrustList("DE signature line is not text".to_string()))?;
        let signature = STANDARD.decode(signature_line.trim())?;
        Ok(Artifact::signed(data[split + 1..].to_vec(), signature))
    }

    fn verify_artifact(&self, artifact: &Artifact) -> Result<(), Error> {
        let signature = require_signature(Issuer::De, artifact)?;
        self.anchor.verify_detached(&artifact.data, signature)
    }

    fn parse_keys(&self, data: &[u8]) -> Result<Vec<SigningKey>, Error> {
        let list: CertificateList = serde_json::from_slice(data)
            .map_err(|e| Error::TrustList(format!("DE trust list: {}", e)))?;
        non_empty(Issuer::De, keys_from_entries(Issuer::De, &list.certificates))
    }
}

// ---------------------------------------------------------------------------
// DutchTrustList
// ---------------------------------------------------------------------------

/// Flat key list adopted as published.
///
/// The list's PKCS#7 signature chains to a national root that is not
/// carried here, so the list is not authenticated.
#[derive(Debug, Clone)]
pub struct DutchTrustList {
    url: String,
}

impl DutchTrustList {
    pub fn new() -> Self {
        Self {
            url: NL_TRUST_LIST_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl Default for DutchTrustList {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustSource for DutchTrustList {
    fn issuer(&self) -> Issuer {
        Issuer::Nl
    }

    fn strategy(&self) -> TrustStrategy {
        TrustStrategy::FlatList
    }

    fn cache_name(&self) -> &str {
        "nl.json"
    }

    fn trust_list_endpoints(&self) -> Option<ArtifactEndpoints> {
        Some(ArtifactEndpoints::new(self.url.clone(), None))
    }

    fn unpack_download(&self, data: Vec<u8>, _signature: Option<Vec<u8>>) -> Result<Artifact, Error> {
        let envelope: SignedKeyList = serde_json::from_slice(&data)
            .map_err(|e| Error::TrustList(format!("NL key list envelope: {}", e)))?;
        let payload = STANDARD.decode(envelope.payload.trim())?;
        let signature = if envelope.signature.is_empty() {
            None
        } else {
            Some(STANDARD.decode(envelope.signature.trim())?)
        };
        Ok(Artifact::new(payload, signature))
    }

    fn verify_artifact(&self, _artifact: &Artifact) -> Result<(), Error> {
        log::warn!("Adopting NL key list without authentication (direct trust)");
        Ok(())
    }

    fn parse_keys(&self, data: &[u8]) -> Result<Vec<SigningKey>, Error> {
        let list: DutchKeyList = serde_json::from_slice(data)
            .map_err(|e| Error::TrustList(format!("NL key list: {}", e)))?;

        let mut keys = keys_from_entries(Issuer::Nl, &list.certificates);
        for (kid, published) in &list.eu_keys {
            let kid = match KeyId::from_base64(kid) {
                Ok(kid) => kid,
                Err(e) => {
                    log::warn!("Skipping NL key with bad kid {:?}: {}", kid, e);
                    continue;
                }
            };
            for entry in published {
                let parsed = STANDARD
                    .decode(entry.subject_pk.trim())
                    .map_err(Error::from)
                    .and_then(|der| SigningKey::from_spki_der(kid.clone(), &der));
                match parsed {
                    Ok(key) => keys.push(key),
                    Err(e) => log::warn!("Skipping NL key {}: {}", kid, e),
                }
            }
        }
        non_empty(Issuer::Nl, keys)
    }
}

// ---------------------------------------------------------------------------
// FixedTrustList
// ---------------------------------------------------------------------------

/// Compiled-in signing keys. Never downloads or caches anything.
#[derive(Debug, Clone)]
pub struct FixedTrustList {
    keys: Vec<SigningKey>,
}

impl FixedTrustList {
    pub fn new(keys: Vec<SigningKey>) -> Self {
        Self { keys }
    }

    /// Keys from DER-encoded signing certificates.
    pub fn from_certificates_der<I, B>(certificates: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let keys = certificates
            .into_iter()
            .map(|der| SigningKey::from_certificate_der(der.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(keys))
    }

    /// Keys from PEM-encoded signing certificates.
    pub fn from_pem(certificates: &[&str]) -> Result<Self, Error> {
        let mut ders = Vec::with_capacity(certificates.len());
        for pem in certificates {
            let (_, block) = x509_parser::pem::parse_x509_pem(pem.trim().as_bytes())
                .map_err(|e| Error::Key(format!("invalid PEM: {}", e)))?;
            ders.push(block.contents);
        }
        Self::from_certificates_der(ders)
    }

    /// The published Austrian test signing certificate.
    pub fn at_test_dsc() -> Result<Self, Error> {
        Self::from_pem(&[AT_TEST_DSC])
    }
}

impl TrustSource for FixedTrustList {
    fn issuer(&self) -> Issuer {
        Issuer::Fixed
    }

    fn strategy(&self) -> TrustStrategy {
        TrustStrategy::FlatList
    }

    fn cache_name(&self) -> &str {
        "fixed"
    }

    fn trust_list_endpoints(&self) -> Option<ArtifactEndpoints> {
        None
    }

    fn embedded_keys(&self) -> Result<Option<Vec<SigningKey>>, Error> {
        non_empty(Issuer::Fixed, self.keys.clone()).map(Some)
    }

    fn verify_artifact(&self, _artifact: &Artifact) -> Result<(), Error> {
        Err(Error::TrustVerify(
            "fixed trust list accepts no external artifacts".to_string(),
        ))
    }

    fn parse_keys(&self, _data: &[u8]) -> Result<Vec<SigningKey>, Error> {
        Err(Error::TrustList(
            "fixed trust list accepts no external artifacts".to_string(),
        ))
    }
}
