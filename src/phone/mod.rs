//! Phone number normalization into canonical international-dialing form.

use crate::errors::CourierError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_COUNTRY_CODE: &str = "55";

/// Digits in a domestic number: two-digit area code plus a nine-digit mobile number.
const DOMESTIC_DIGITS: usize = 11;

/// A phone number reduced to digits, always carrying the country code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalNumber(String);

impl CanonicalNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNormalizer {
    country_code: String,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }
}

impl PhoneNormalizer {
    /// Build a normalizer for `country_code`. Non-digits are ignored, so `"+55"` works.
    pub fn new(country_code: &str) -> Result<Self, CourierError> {
        let digits: String = country_code.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() || digits.len() > 3 {
            return Err(CourierError::Config(format!(
                "country code must have 1 to 3 digits, got {:?}",
                country_code
            )));
        }
        Ok(Self {
            country_code: digits,
        })
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn normalize(&self, raw: &str) -> Result<CanonicalNumber, CourierError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        let international = self.country_code.len() + DOMESTIC_DIGITS;

        if digits.len() == DOMESTIC_DIGITS && !digits.starts_with('0') {
            return Ok(CanonicalNumber(format!("{}{}", self.country_code, digits)));
        }
        if digits.len() == international && digits.starts_with(&self.country_code) {
            return Ok(CanonicalNumber(digits));
        }

        Err(CourierError::InvalidNumber {
            raw: raw.to_string(),
        })
    }
}

/// Normalize with the default country code.
pub fn normalize(raw: &str) -> Result<CanonicalNumber, CourierError> {
    PhoneNormalizer::default().normalize(raw)
}
