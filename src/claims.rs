//! CWT claims carried by a verified credential.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::cbor::{self, CborValue};
use crate::error::Error;
use crate::types::hcert::HealthCertificate;

pub const CLAIM_ISSUER: i64 = 1;
pub const CLAIM_EXPIRES_AT: i64 = 4;
pub const CLAIM_ISSUED_AT: i64 = 6;
pub const CLAIM_HEALTH_CERTIFICATE: i64 = -260;
/// Key of the EU DCC inside the health certificate claim.
pub const HCERT_EU_DCC_V1: i64 = 1;

/// The claims map of a credential. No schema is enforced beyond the
/// payload being a CBOR map.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    value: CborValue,
}

impl Claims {
    pub fn from_cbor(payload: &[u8]) -> Result<Self, Error> {
        let value = cbor::decode(payload).map_err(|e| Error::Claims(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: CborValue) -> Result<Self, Error> {
        let value = value.untagged().clone();
        if value.as_map().is_none() {
            return Err(Error::Claims("payload is not a map".to_string()));
        }
        Ok(Self { value })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        cbor::encode(&self.value)
    }

    pub fn as_value(&self) -> &CborValue {
        &self.value
    }

    pub fn get(&self, key: i64) -> Option<&CborValue> {
        self.value.get_int(key)
    }

    /// Issuing country code.
    pub fn issuer(&self) -> Option<&str> {
        self.get(CLAIM_ISSUER).and_then(CborValue::as_str)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.get(CLAIM_ISSUED_AT).and_then(timestamp)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.get(CLAIM_EXPIRES_AT).and_then(timestamp)
    }

    /// A credential without an expiry claim never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }

    /// The nested EU DCC block, untyped.
    pub fn health_claim(&self) -> Option<&CborValue> {
        self.get(CLAIM_HEALTH_CERTIFICATE)?.get_int(HCERT_EU_DCC_V1)
    }

    /// Typed view of [`health_claim`](Self::health_claim). `Ok(None)` when
    /// the claim is absent.
    pub fn health_certificate(&self) -> Result<Option<HealthCertificate>, Error> {
        match self.health_claim() {
            Some(claim) => serde_json::from_value(claim.to_json())
                .map(Some)
                .map_err(|e| Error::Claims(format!("health certificate: {}", e))),
            None => Ok(None),
        }
    }

    /// JSON rendering: integer keys become decimal strings.
    pub fn to_json(&self) -> serde_json::Value {
        self.value.to_json()
    }
}

impl Serialize for Claims {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// NumericDate: seconds since the epoch, integer or float.
fn timestamp(value: &CborValue) -> Option<DateTime<Utc>> {
    let secs = match value {
        CborValue::Int(_) => value.as_i64()?,
        CborValue::Float(f) if f.is_finite() => f.trunc() as i64,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}
