//! Phone number normalization
//!
//! Messaging channels deliver sender numbers in several shapes (`+91 98765 43210`,
//! `0098765...`, bare national numbers). Every lookup and every stored
//! `phone_number` goes through [`PhoneNormalizer::normalize`] first so the same
//! visitor always compares equal.

use serde::{Deserialize, Serialize};

/// Country code prefixed to national numbers when none is present
pub const DEFAULT_COUNTRY_CODE: &str = "91";

/// Digits in a national number (without country code)
pub const DEFAULT_NATIONAL_NUMBER_LENGTH: usize = 10;

/// Deterministic phone number normalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNormalizer {
    pub country_code: String,
    pub national_number_length: usize,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            national_number_length: DEFAULT_NATIONAL_NUMBER_LENGTH,
        }
    }
}

impl PhoneNormalizer {
    pub fn new(country_code: impl Into<String>, national_number_length: usize) -> Self {
        Self {
            country_code: country_code.into(),
            national_number_length,
        }
    }

    /// Normalize a raw channel-format phone number.
    ///
    /// 1. Keep digits only
    /// 2. Strip the leading run of zeros (trunk / international dialling prefix)
    /// 3. Prefix the country code unless the number is already longer than a
    ///    national number and starts with it
    ///
    /// Returns an empty string when no digits remain.
    pub fn normalize(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let digits = digits.trim_start_matches('0');

        if digits.is_empty() {
            return String::new();
        }

        let has_country_code = digits.len() > self.national_number_length
            && digits.starts_with(&self.country_code);

        if has_country_code {
            digits.to_string()
        } else {
            format!("{}{}", self.country_code, digits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_national_number_gets_country_code() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("9876543210"), "919876543210");
    }

    #[test]
    fn test_national_number_starting_with_country_digits() {
        // A 10-digit national number that happens to begin with "91"
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("9198765432"), "919198765432");
    }

    #[test]
    fn test_already_international_is_unchanged() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("919198765432"), "919198765432");
        assert_eq!(n.normalize("+91 91987 65432"), "919198765432");
    }

    #[test]
    fn test_leading_zeros_stripped() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("09198765432"), "919198765432");
        assert_eq!(n.normalize("00919198765432"), "919198765432");
    }

    #[test]
    fn test_empty_and_non_digit_input() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize(""), "");
        assert_eq!(n.normalize("000"), "");
        assert_eq!(n.normalize("abc"), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let n = PhoneNormalizer::new("44", 10);
        let once = n.normalize("07700 900123");
        assert_eq!(once, "447700900123");
        assert_eq!(n.normalize(&once), once);
    }
}
