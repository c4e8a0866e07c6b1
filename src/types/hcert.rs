use serde::{Deserialize, Serialize};

/// Typed view of an EU DCC health claim (`-260` / `1`).
///
/// Only the fields shared by every schema version are modelled; unknown
/// fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCertificate {
    #[serde(rename = "ver")]
    pub version: String,
    #[serde(rename = "nam")]
    pub name: PersonName,
    /// Date of birth, possibly partial (`1998`, `1998-02`).
    #[serde(rename = "dob")]
    pub date_of_birth: String,
    #[serde(rename = "v", default, skip_serializing_if = "Vec::is_empty")]
    pub vaccinations: Vec<Vaccination>,
    #[serde(rename = "t", default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<TestResult>,
    #[serde(rename = "r", default, skip_serializing_if = "Vec::is_empty")]
    pub recoveries: Vec<Recovery>,
}

/// Which health event a certificate attests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateKind {
    Vaccination,
    Test,
    Recovery,
}

impl HealthCertificate {
    /// `None` unless exactly one event group is present.
    pub fn kind(&self) -> Option<CertificateKind> {
        match (
            self.vaccinations.is_empty(),
            self.tests.is_empty(),
            self.recoveries.is_empty(),
        ) {
            (false, true, true) => Some(CertificateKind::Vaccination),
            (true, false, true) => Some(CertificateKind::Test),
            (true, true, false) => Some(CertificateKind::Recovery),
            _ => None,
        }
    }

    /// Certificate identifiers (UVCIs) of all entries.
    pub fn certificate_ids(&self) -> Vec<&str> {
        self.vaccinations
            .iter()
            .map(|v| v.certificate_id.as_str())
            .chain(self.tests.iter().map(|t| t.certificate_id.as_str()))
            .chain(self.recoveries.iter().map(|r| r.certificate_id.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonName {
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// ICAO 9303 transliteration.
    #[serde(rename = "fnt")]
    pub family_name_std: String,
    #[serde(rename = "gn", default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(rename = "gnt", default, skip_serializing_if = "Option::is_none")]
    pub given_name_std: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vaccination {
    #[serde(rename = "tg")]
    pub disease_target: String,
    #[serde(rename = "vp")]
    pub vaccine: String,
    #[serde(rename = "mp")]
    pub medicinal_product: String,
    #[serde(rename = "ma")]
    pub manufacturer: String,
    #[serde(rename = "dn")]
    pub dose_number: u32,
    #[serde(rename = "sd")]
    pub total_doses: u32,
    #[serde(rename = "dt")]
    pub date: String,
    #[serde(rename = "co")]
    pub country: String,
    #[serde(rename = "is")]
    pub issuer: String,
    #[serde(rename = "ci")]
    pub certificate_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    #[serde(rename = "tg")]
    pub disease_target: String,
    #[serde(rename = "tt")]
    pub test_type: String,
    #[serde(rename = "nm", default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    #[serde(rename = "ma", default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Sample collection time (RFC 3339).
    #[serde(rename = "sc")]
    pub sample_collected_at: String,
    #[serde(rename = "tr")]
    pub result: String,
    #[serde(rename = "tc", default, skip_serializing_if = "Option::is_none")]
    pub test_centre: Option<String>,
    #[serde(rename = "co")]
    pub country: String,
    #[serde(rename = "is")]
    pub issuer: String,
    #[serde(rename = "ci")]
    pub certificate_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recovery {
    #[serde(rename = "tg")]
    pub disease_target: String,
    /// Date of the first positive test.
    #[serde(rename = "fr")]
    pub first_positive: String,
    #[serde(rename = "co")]
    pub country: String,
    #[serde(rename = "is")]
    pub issuer: String,
    #[serde(rename = "df")]
    pub valid_from: String,
    #[serde(rename = "du")]
    pub valid_until: String,
    #[serde(rename = "ci")]
    pub certificate_id: String,
}
