use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::source::Issuer;

/// Runtime settings for a validator instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Issuer whose trust list is served.
    pub issuer: Issuer,
    /// Directory for cached trust artifacts.
    pub cache_dir: PathBuf,
    pub refresh_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Root key for issuers without a compiled-in anchor (PEM certificate or
    /// public key).
    pub anchor_pem: Option<String>,
    /// Replaces the issuer's default trust list URL.
    pub trust_list_url: Option<String>,
    /// Reject credentials past their expiry claim.
    pub check_expiry: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            issuer: Issuer::Fixed,
            cache_dir: PathBuf::from("./data"),
            refresh_interval_secs: 24 * 60 * 60,
            fetch_timeout_secs: 30,
            anchor_pem: None,
            trust_list_url: None,
            check_expiry: false,
        }
    }
}

impl ValidatorConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::Config(
                "fetch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.issuer == Issuer::De && self.anchor_pem.is_none() {
            return Err(Error::Config(
                "issuer DE requires anchor_pem".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
