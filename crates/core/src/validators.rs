//! Shape and checksum checks for well-known field values.

use crate::keywords::lexicon_for_field;
use serde::{Deserialize, Serialize};

const REGON9_WEIGHTS: [u32; 8] = [8, 9, 2, 3, 4, 5, 6, 7];
const REGON14_WEIGHTS: [u32; 13] = [2, 4, 8, 5, 0, 9, 7, 3, 6, 1, 2, 4, 8];
const NIP_WEIGHTS: [u32; 9] = [6, 5, 7, 2, 3, 4, 5, 6, 7];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValidator {
    Regon,
    Nip,
    PostalCode,
    Email,
    Phone,
}

impl FieldValidator {
    /// Validator implied by a field name, if any.
    pub fn for_field(field_name: &str) -> Option<Self> {
        match lexicon_for_field(field_name)?.field {
            "regon" => Some(FieldValidator::Regon),
            "nip" => Some(FieldValidator::Nip),
            "postal_code" => Some(FieldValidator::PostalCode),
            "email" => Some(FieldValidator::Email),
            "phone" => Some(FieldValidator::Phone),
            _ => None,
        }
    }

    pub fn validate(&self, value: &str) -> bool {
        match self {
            FieldValidator::Regon => is_valid_regon(value),
            FieldValidator::Nip => is_valid_nip(value),
            FieldValidator::PostalCode => is_valid_postal_code(value),
            FieldValidator::Email => is_valid_email(value),
            FieldValidator::Phone => is_valid_phone(value),
        }
    }
}

fn digits_of(value: &str) -> Option<Vec<u32>> {
    value.chars().map(|ch| ch.to_digit(10)).collect()
}

fn checksum_matches(digits: &[u32], weights: &[u32]) -> bool {
    let Some((&control, body)) = digits.split_last() else {
        return false;
    };
    let sum: u32 = body.iter().zip(weights).map(|(digit, weight)| digit * weight).sum();
    (sum % 11) % 10 == control
}

/// 9- or 14-digit business registry number with a valid control digit.
pub fn is_valid_regon(value: &str) -> bool {
    let Some(digits) = digits_of(value.trim()) else {
        return false;
    };
    match digits.len() {
        9 => checksum_matches(&digits, &REGON9_WEIGHTS),
        14 => checksum_matches(&digits[..9], &REGON9_WEIGHTS) && checksum_matches(&digits, &REGON14_WEIGHTS),
        _ => false,
    }
}

/// 10-digit tax id; dashes, spaces and a `PL` prefix are ignored.
pub fn is_valid_nip(value: &str) -> bool {
    let trimmed = value.trim();
    let without_prefix = trimmed
        .strip_prefix("PL")
        .or_else(|| trimmed.strip_prefix("pl"))
        .unwrap_or(trimmed);
    let compact: String = without_prefix
        .chars()
        .filter(|ch| !matches!(ch, '-' | ' '))
        .collect();
    let Some(digits) = digits_of(&compact) else {
        return false;
    };
    if digits.len() != 10 {
        return false;
    }
    let sum: u32 = digits[..9]
        .iter()
        .zip(NIP_WEIGHTS)
        .map(|(digit, weight)| digit * weight)
        .sum();
    // A remainder of 10 never yields a valid NIP.
    sum % 11 == digits[9]
}

pub fn is_valid_postal_code(value: &str) -> bool {
    let bytes = value.trim().as_bytes();
    bytes.len() == 6
        && bytes[2] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(position, byte)| position == 2 || byte.is_ascii_digit())
}

pub fn is_valid_email(value: &str) -> bool {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !value.contains(char::is_whitespace)
        && domain
            .rsplit_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && tld.len() >= 2 && !domain.contains('@'))
}

/// 9 to 15 digits once spaces, dashes, dots, parentheses and a leading `+` are removed.
pub fn is_valid_phone(value: &str) -> bool {
    let value = value.trim();
    let value = value.strip_prefix('+').unwrap_or(value);
    let compact: String = value
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    (9..=15).contains(&compact.len()) && compact.chars().all(|ch| ch.is_ascii_digit())
}
