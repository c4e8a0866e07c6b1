//! Business rules published alongside a trust list.
//!
//! Rules are kept as an opaque blob. They are only ever constructed from
//! bytes that passed the issuer's anchor verification.

use crate::cbor::{self, CborValue};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessRules {
    raw: Vec<u8>,
}

impl BusinessRules {
    pub(crate) fn from_verified(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Decode the rule set as CBOR.
    pub fn decode(&self) -> Result<CborValue, Error> {
        cbor::decode(&self.raw)
    }
}
