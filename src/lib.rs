//! # occv - Open Covid Certificate Validator
//!
//! Verification of EU Digital COVID Certificates (DCC) against per-issuer
//! trust lists.
//!
//! A credential travels as `HC1:` + base45(zlib(COSE_Sign1)). Validation
//! decodes it, resolves the signing key by its key identifier in a trust
//! store, verifies the signature and returns the CWT claims. Trust stores
//! are loaded from issuer trust lists that are themselves authenticated by
//! a trust anchor before any key is adopted.
//!
//! ## Features
//!
//! - **Codec**: `HC1:` prefix, base45 and zlib ([`codec`])
//! - **COSE_Sign1**: envelope parsing and `Sig_structure` ([`cose`]), ES256 and PS256 ([`crypto`])
//! - **Trust sources**: Austrian, German, Dutch and compiled-in lists ([`source`])
//! - **Trust store manager**: cache, download, anchor verification and
//!   background refresh with atomic snapshot swaps ([`manager`])
//! - **Validation**: structured results with failure reasons ([`validation`])
//!
//! ## Quick Start
//!
//! ```rust
//! use occv::source::{FixedTrustList, TrustSource};
//! use occv::trust_store::TrustStore;
//! use occv::validation::validate;
//!
//! let keys = FixedTrustList::at_test_dsc()?
//!     .embedded_keys()?
//!     .unwrap_or_default();
//! let store = TrustStore::from_keys(keys);
//!
//! let result = validate("HC1:NOT-A-CREDENTIAL", &store);
//! assert!(!result.valid);
//! # Ok::<(), occv::Error>(())
//! ```
//!
//! ## Managed trust store
//!
//! ```rust
//! use std::sync::Arc;
//! use occv::config::ValidatorConfig;
//! use occv::fetch::OfflineFetcher;
//! use occv::manager::TrustStoreManager;
//! use occv::validation::Validator;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), occv::Error> {
//! let config = ValidatorConfig::from_json(r#"{"issuer": "XX"}"#)?;
//! let manager = Arc::new(TrustStoreManager::from_config(&config, Arc::new(OfflineFetcher))?);
//! manager.bootstrap().await?;
//!
//! let shutdown = CancellationToken::new();
//! let refresher = manager.spawn_refresh_task(config.refresh_interval(), shutdown.clone());
//!
//! let validator = Validator::from_config(&config, manager.shared());
//! assert!(!validator.validate("HC1:").valid);
//!
//! shutdown.cancel();
//! refresher.await.ok();
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! - Downloaded trust lists are adopted only after the anchor signature and
//!   digest check pass; a failed refresh keeps the previous store
//! - Readers never block on refresh and always see one complete snapshot
//! - Untrusted input never panics; every per-credential failure becomes a
//!   `ValidationResult` with `valid == false`
//!
//! ## Error Handling
//!
//! Fallible operations return `Result<T, Error>`. Per-credential errors are
//! folded into a [`FailureReason`] on the validation result.

pub mod anchor;
pub mod cbor;
pub mod claims;
pub mod codec;
pub mod config;
pub mod cose;
pub mod crypto;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod rules;
pub mod source;
pub mod store;
pub mod trust_store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use error::{Error, FailureReason};
pub use validation::{validate, ValidationResult, Validator};
