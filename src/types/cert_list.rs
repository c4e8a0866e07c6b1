use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// JSON certificate list as published by the German and Dutch gateways.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateList {
    #[serde(default)]
    pub certificates: Vec<CertificateEntry>,
}

/// One signing certificate. Only `rawData` is required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateEntry {
    /// Base64 DER of the signing certificate.
    #[serde(rename = "rawData")]
    pub raw_data: String,
    /// Base64 key identifier as declared by the publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Signed envelope served by the Dutch verifier API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedKeyList {
    /// Base64 of the key list JSON.
    pub payload: String,
    /// Base64 detached signature over the payload.
    #[serde(default)]
    pub signature: String,
}

/// Decoded Dutch key list payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DutchKeyList {
    #[serde(default)]
    pub certificates: Vec<CertificateEntry>,
    /// Base64 kid to the public keys published under it.
    #[serde(default)]
    pub eu_keys: BTreeMap<String, Vec<EuPublicKey>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EuPublicKey {
    /// Base64 DER SubjectPublicKeyInfo.
    #[serde(rename = "subjectPk")]
    pub subject_pk: String,
    #[serde(rename = "keyUsage", default, skip_serializing_if = "Vec::is_empty")]
    pub key_usage: Vec<String>,
}
