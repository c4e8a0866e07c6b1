//! Root keys that authenticate downloaded trust material.
//!
//! Anchors are compiled in (or supplied through configuration for issuers
//! that publish none). They never verify credentials directly and are never
//! written to the artifact cache.

use crate::cbor::{self, CborValue};
use crate::cose::CoseSign1;
use crate::crypto::{self, CoseAlgorithm, PublicKey};
use crate::error::Error;
use crate::source::Issuer;

/// Payload map key holding the artifact digest in a detached signature.
const DIGEST_CLAIM: i64 = 2;

/// Trust list signer for the Austrian production trust list.
pub const AT_PRODUCTION_ROOT: &str = "-----BEGIN CERTIFICATE-----
MIIB1DCCAXmgAwIBAgIKAYDcOWBmNxlPgDAKBggqhkjOPQQDAjBEMQswCQYDVQQG
EwJBVDEPMA0GA1UECgwGQk1TR1BLMQwwCgYDVQQFEwMwMDIxFjAUBgNVBAMMDUFU
IERHQyBDU0NBIDIwHhcNMjIwNTE5MTIwOTQ5WhcNMjMwNjE5MTIwOTQ5WjBFMQsw
CQYDVQQGEwJBVDEPMA0GA1UECgwGQk1TR1BLMQ8wDQYDVQQFEwYwMDIwMDIxFDAS
BgNVBAMMC0FUIERHQyBUTCAyMFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEl2tm
d16CBHXwcBN0r1Uy+CmNW/b2V0BNP85y5N3JZeo/8l9ey/jIe5mol9fFcGTk9bCk
8zphVo0SreHa5aWrQKNSMFAwDgYDVR0PAQH/BAQDAgeAMB0GA1UdDgQWBBRTwp6d
cDGcPUB6IwdDja/a3ncM0TAfBgNVHSMEGDAWgBQvWRbxO3tS9HatiMTvp8sD9Rwy
wTAKBggqhkjOPQQDAgNJADBGAiEAleZ8CcLG4FK4kty+sN0APZmT6LfEE2kzznyV
yEepU0gCIQCGaqJpOwPXBmgoOsehnJkA0+TZX8V2p1Bg/nqnuYqXFg==
-----END CERTIFICATE-----";

/// Trust list signer for the Austrian test trust list.
pub const AT_TEST_ROOT: &str = "-----BEGIN CERTIFICATE-----
MIIB6zCCAZGgAwIBAgIKAXmEuohlRbR2qzAKBggqhkjOPQQDAjBQMQswCQYDVQQG
EwJBVDEPMA0GA1UECgwGQk1TR1BLMQowCAYDVQQLDAFRMQwwCgYDVQQFEwMwMDEx
FjAUBgNVBAMMDUFUIERHQyBDU0NBIDEwHhcNMjEwNTE5MTMwNDQ3WhcNMjIwNjE5
MTMwNDQ3WjBRMQswCQYDVQQGEwJBVDEPMA0GA1UECgwGQk1TR1BLMQowCAYDVQQL
DAFRMQ8wDQYDVQQFEwYwMDEwMDExFDASBgNVBAMMC0FUIERHQyBUTCAxMFkwEwYH
KoZIzj0CAQYIKoZIzj0DAQcDQgAE29KpT1eIKsy5Jx3J0xpPLW+fEBF7ma9943/j
4Z+o1TytLVok9cWjsdasWCS/zcRyAh7HBL+oyMWdFBOWENCQ76NSMFAwDgYDVR0P
AQH/BAQDAgeAMB0GA1UdDgQWBBQYmsL5sXTdMCyW4UtP5BMxq+UAVzAfBgNVHSME
GDAWgBR2sKi2xkUpGC1Cr5ehwL0hniIsJzAKBggqhkjOPQQDAgNIADBFAiBse17k
F5F43q9mRGettRDLprASrxsDO9XxUUp3ObjcWQIhALfUWnserGEPiD7Pa25tg9lj
wkrqDrMdZHZ39qb+Jf/E
-----END CERTIFICATE-----";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    issuer: Issuer,
    key: PublicKey,
}

fn rejected(msg: impl std::fmt::Display) -> Error {
    Error::TrustVerify(msg.to_string())
}

impl TrustAnchor {
    pub fn new(issuer: Issuer, key: PublicKey) -> Self {
        Self { issuer, key }
    }

    /// Load an anchor from a PEM certificate or public key.
    pub fn from_pem(issuer: Issuer, pem: &str) -> Result<Self, Error> {
        Ok(Self::new(issuer, PublicKey::from_pem(pem)?))
    }

    pub fn at_production() -> Result<Self, Error> {
        Self::from_pem(Issuer::At, AT_PRODUCTION_ROOT)
    }

    pub fn at_test() -> Result<Self, Error> {
        Self::from_pem(Issuer::AtTest, AT_TEST_ROOT)
    }

    pub fn issuer(&self) -> Issuer {
        self.issuer
    }

    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    /// Authenticate an artifact against a detached COSE signature whose
    /// payload carries the artifact's SHA-256 under key 2.
    ///
    /// # Errors
    ///
    /// Every failure, whether a malformed envelope, a bad signature or a
    /// digest mismatch, is reported as `Error::TrustVerify`.
    pub fn verify_signed_digest(&self, artifact: &[u8], signature: &[u8]) -> Result<(), Error> {
        // Step 1: digest the artifact as received
        let expected = crypto::sha256(artifact);

        // Step 2: the detached signature must be a COSE_Sign1 by this anchor
        let envelope = CoseSign1::parse(signature).map_err(rejected)?;
        let alg = envelope.algorithm().map_err(rejected)?;
        self.key
            .verify(alg, &envelope.sig_structure(), envelope.signature())
            .map_err(|e| rejected(format!("{} anchor signature: {}", self.issuer, e)))?;

        // Step 3: pull the signed digest out of the verified payload
        let payload = cbor::decode(envelope.payload()).map_err(rejected)?;
        let signed = payload
            .get_int(DIGEST_CLAIM)
            .and_then(CborValue::as_bytes)
            .ok_or_else(|| rejected("signature payload carries no digest"))?;

        // Step 4: compare
        if !crypto::digests_match(&expected, signed) {
            return Err(rejected(format!(
                "{} artifact digest does not match its signature",
                self.issuer
            )));
        }
        Ok(())
    }

    /// Authenticate data against a raw ES256 (`r || s`) signature.
    pub fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        self.key
            .verify(CoseAlgorithm::ES256, data, signature)
            .map_err(|e| rejected(format!("{} anchor signature: {}", self.issuer, e)))
    }
}
