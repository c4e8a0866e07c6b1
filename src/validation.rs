use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claims::Claims;
use crate::codec;
use crate::config::ValidatorConfig;
use crate::cose::CoseSign1;
use crate::error::{Error, FailureReason};
use crate::trust_store::{KeyId, SharedTrustStore, TrustStore};

/// Structured validation result.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Base64 key identifier named by the credential, when one was read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Payload decoded without signature verification, kept for diagnostics
    /// when the signer is unknown. Never authoritative and never serialized.
    #[serde(skip)]
    pub unverified_claims: Option<Claims>,
}

impl ValidationResult {
    pub fn success(claims: Claims, key_id: &KeyId) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            reason: None,
            message: None,
            key_id: Some(key_id.to_string()),
            unverified_claims: None,
        }
    }

    pub fn failure(reason: FailureReason, message: &str) -> Self {
        log::debug!("Credential rejected ({}): {}", reason, message);
        Self {
            valid: false,
            claims: None,
            reason: Some(reason),
            message: Some(message.to_string()),
            key_id: None,
            unverified_claims: None,
        }
    }

    fn from_error(err: &Error) -> Self {
        Self::failure(err.failure_reason(), &err.to_string())
    }

    fn with_key_id(mut self, key_id: Option<&[u8]>) -> Self {
        self.key_id = key_id.map(|kid| KeyId::new(kid).to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Reject credentials whose expiry claim has passed.
    pub check_expiry: bool,
    /// Clock used for the expiry check; the system clock when unset.
    pub now: Option<DateTime<Utc>>,
}

impl From<&ValidatorConfig> for ValidationOptions {
    fn from(config: &ValidatorConfig) -> Self {
        Self {
            check_expiry: config.check_expiry,
            now: None,
        }
    }
}

/// Validate a credential against one trust store snapshot.
pub fn validate(credential: &str, store: &TrustStore) -> ValidationResult {
    validate_with_options(credential, store, &ValidationOptions::default())
}

/// Validate a credential against one trust store snapshot.
///
/// Implements a 6-step flow:
/// 1. Decode the wire format
/// 2. Parse the COSE envelope and read kid and algorithm
/// 3. Resolve the kid in the trust store
/// 4. Verify the signature
/// 5. Parse the claims
/// 6. Optionally check expiry
pub fn validate_with_options(
    credential: &str,
    store: &TrustStore,
    options: &ValidationOptions,
) -> ValidationResult {
    // Step 1: Decode
    let message = match codec::decode_credential(credential) {
        Ok(message) => message,
        Err(e) => return ValidationResult::from_error(&Error::Decode(e)),
    };

    // Step 2: Envelope
    let envelope = match CoseSign1::parse(&message) {
        Ok(envelope) => envelope,
        Err(e) => return ValidationResult::from_error(&e),
    };
    let kid = envelope.key_id();
    let alg = match envelope.algorithm() {
        Ok(alg) => alg,
        Err(e) => return ValidationResult::from_error(&e).with_key_id(kid),
    };

    // Step 3: Resolve signer
    let Some(kid) = kid else {
        return ValidationResult::from_error(&Error::UnknownSigner(
            "(credential names no key)".to_string(),
        ));
    };
    let Some(signer) = store.get(kid) else {
        let mut result =
            ValidationResult::from_error(&Error::UnknownSigner(KeyId::new(kid).to_string()))
                .with_key_id(Some(kid));
        result.unverified_claims = Claims::from_cbor(envelope.payload()).ok();
        return result;
    };

    // Step 4: Verify
    if let Err(e) = signer
        .public_key()
        .verify(alg, &envelope.sig_structure(), envelope.signature())
    {
        return ValidationResult::from_error(&e).with_key_id(Some(kid));
    }

    // Step 5: Claims
    let claims = match Claims::from_cbor(envelope.payload()) {
        Ok(claims) => claims,
        Err(e) => return ValidationResult::from_error(&e).with_key_id(Some(kid)),
    };

    // Step 6: Expiry
    if options.check_expiry {
        let now = options.now.unwrap_or_else(Utc::now);
        if claims.is_expired_at(now) {
            let expired = claims
                .expires_at()
                .map(|exp| exp.to_rfc3339())
                .unwrap_or_default();
            return ValidationResult::failure(
                FailureReason::Expired,
                &format!("Credential expired at {}", expired),
            )
            .with_key_id(Some(kid));
        }
    }

    ValidationResult::success(claims, signer.kid())
}

/// Request body accepted at the service boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationRequest {
    pub dcc: String,
}

/// Boundary response: validity plus the claims JSON, or `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResponse {
    pub valid: bool,
    pub claims: Option<serde_json::Value>,
}

impl From<ValidationResult> for ValidationResponse {
    fn from(result: ValidationResult) -> Self {
        Self {
            valid: result.valid,
            claims: result.claims.as_ref().map(Claims::to_json),
        }
    }
}

/// Validates credentials against the latest published trust store.
#[derive(Debug, Clone)]
pub struct Validator {
    shared: SharedTrustStore,
    options: ValidationOptions,
}

impl Validator {
    pub fn new(shared: SharedTrustStore) -> Self {
        Self {
            shared,
            options: ValidationOptions::default(),
        }
    }

    /// Validator with the checks the configuration enables.
    pub fn from_config(config: &ValidatorConfig, shared: SharedTrustStore) -> Self {
        Self::new(shared).with_options(config.into())
    }

    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    /// Takes one snapshot per call; a concurrent refresh never changes the
    /// keys seen mid-validation.
    pub fn validate(&self, credential: &str) -> ValidationResult {
        let snapshot = self.shared.current();
        validate_with_options(credential, &snapshot, &self.options)
    }

    pub fn respond(&self, request: &ValidationRequest) -> ValidationResponse {
        self.validate(&request.dcc).into()
    }
}
