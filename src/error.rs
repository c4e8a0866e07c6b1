use thiserror::Error;

use crate::codec::DecodeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Envelope error: {0}")]
    Envelope(String),

    #[error("Unknown signer: no trusted key with id {0}")]
    UnknownSigner(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Claims error: {0}")]
    Claims(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Trust fetch error: {0}")]
    TrustFetch(String),

    #[error("Trust verification error: {0}")]
    TrustVerify(String),

    #[error("Trust list error: {0}")]
    TrustList(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The validation failure reason a per-credential error collapses into.
    ///
    /// Trust-loading errors never reach a validation result; they map to
    /// `Malformed` only so the mapping is total.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Error::UnknownSigner(_) => FailureReason::UnknownSigner,
            Error::SignatureInvalid(_) => FailureReason::SignatureInvalid,
            _ => FailureReason::Malformed,
        }
    }
}

/// Failure reasons for structured validation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FailureReason {
    #[serde(rename = "MALFORMED")]
    Malformed,
    #[serde(rename = "UNKNOWN_SIGNER")]
    UnknownSigner,
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::Malformed => "MALFORMED",
            FailureReason::UnknownSigner => "UNKNOWN_SIGNER",
            FailureReason::SignatureInvalid => "SIGNATURE_INVALID",
            FailureReason::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            Error::Decode(DecodeError::Base45).failure_reason(),
            FailureReason::Malformed
        );
        assert_eq!(
            Error::Envelope("bad".to_string()).failure_reason(),
            FailureReason::Malformed
        );
        assert_eq!(
            Error::UnknownSigner("AAAA".to_string()).failure_reason(),
            FailureReason::UnknownSigner
        );
        assert_eq!(
            Error::SignatureInvalid("bad".to_string()).failure_reason(),
            FailureReason::SignatureInvalid
        );
    }

    #[test]
    fn test_failure_reason_serde() {
        assert_eq!(
            serde_json::to_string(&FailureReason::UnknownSigner).unwrap(),
            "\"UNKNOWN_SIGNER\""
        );
        let reason: FailureReason = serde_json::from_str("\"SIGNATURE_INVALID\"").unwrap();
        assert_eq!(reason, FailureReason::SignatureInvalid);
        assert_eq!(FailureReason::Expired.to_string(), "EXPIRED");
    }
}
