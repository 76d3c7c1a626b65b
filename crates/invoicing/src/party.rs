//! Issuer and counterparty identity.

use serde::{Deserialize, Serialize};

use einvoice_core::ValueObject;

/// Postal address as printed on the structured document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    #[serde(default)]
    pub lines: Vec<String>,
    pub city: String,
    #[serde(default)]
    pub postal_zone: Option<String>,
    #[serde(default)]
    pub country_subentity: Option<String>,
    /// ISO 3166-1 country code.
    pub country_code: String,
}

impl ValueObject for PostalAddress {}

impl PostalAddress {
    /// At least one street line, a city and a country.
    pub fn is_complete(&self) -> bool {
        self.lines.iter().any(|l| !l.trim().is_empty())
            && !self.city.trim().is_empty()
            && !self.country_code.trim().is_empty()
    }
}

/// A trading party (supplier or customer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    /// Tax identification number.
    #[serde(default)]
    pub tax_id: Option<String>,
    /// Company / business registration number.
    #[serde(default)]
    pub registration_id: Option<String>,
    #[serde(default)]
    pub address: Option<PostalAddress>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ValueObject for Party {}

/// Issuer identity used by the codec for the supplier block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerProfile {
    pub party: Party,
    #[serde(default)]
    pub industry_code: Option<String>,
    #[serde(default)]
    pub industry_description: Option<String>,
}

impl ValueObject for IssuerProfile {}
