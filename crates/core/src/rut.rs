use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RutError {
    #[error("RUT is too short: '{0}'")]
    TooShort(String),
    #[error("RUT body is not numeric: '{0}'")]
    InvalidBody(String),
    #[error("Invalid check character '{found}', expected '{expected}'")]
    CheckMismatch { expected: char, found: char },
}

/// A Chilean taxpayer ID (Rol Único Tributario) whose check character has
/// been verified with the Módulo-11 algorithm.
///
/// Serialized in its canonical `12.345.678-5` form. The body is numeric, so
/// leading zeros are dropped: `01.234.567-4` and `1.234.567-4` are the same
/// RUT and both display as the latter. Use [`format_rut`] to regroup text
/// while keeping its digits as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rut {
    body: u64,
    check: char,
}

impl Rut {
    /// Parse and validate a RUT. Dots, spaces and the hyphen are ignored;
    /// the last remaining character is the check character.
    pub fn parse(input: &str) -> Result<Self, RutError> {
        let clean = strip(input);
        let (body_str, found) =
            split_check(&clean).ok_or_else(|| RutError::TooShort(input.to_string()))?;
        if !body_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RutError::InvalidBody(input.to_string()));
        }
        let body: u64 = body_str
            .parse()
            .map_err(|_| RutError::InvalidBody(input.to_string()))?;
        let found = found.to_ascii_uppercase();
        let expected = check_char(body);
        if found != expected {
            return Err(RutError::CheckMismatch { expected, found });
        }
        Ok(Rut { body, check: expected })
    }

    pub fn body(&self) -> u64 {
        self.body
    }

    pub fn check(&self) -> char {
        self.check
    }
}

/// Módulo-11 check character for a RUT body.
///
/// Digits are weighted right-to-left with 2,3,4,5,6,7 repeating; the result
/// is `11 - sum % 11`, where 11 maps to `0` and 10 maps to `K`.
pub fn check_char(body: u64) -> char {
    let mut n = body;
    let mut sum = 0u64;
    let mut weight = 2u64;
    while n > 0 {
        sum += (n % 10) * weight;
        n /= 10;
        weight = if weight == 7 { 2 } else { weight + 1 };
    }
    match 11 - (sum % 11) {
        11 => '0',
        10 => 'K',
        d => char::from_digit(d as u32, 10).unwrap_or('0'),
    }
}

/// Whether `input` is a RUT with a correct check character.
pub fn validate_rut(input: &str) -> bool {
    Rut::parse(input).is_ok()
}

/// Reformat a RUT as `XX.XXX.XXX-D` without validating it.
/// Inputs too short to split into body and check character are returned unchanged.
pub fn format_rut(input: &str) -> String {
    let clean = strip(input);
    match split_check(&clean) {
        Some((body, check)) => format!("{}-{}", group_thousands(body), check.to_ascii_uppercase()),
        None => input.to_string(),
    }
}

/// Split a stripped RUT into its body and trailing check character.
fn split_check(clean: &str) -> Option<(&str, char)> {
    let (idx, check) = clean.char_indices().last()?;
    if idx == 0 {
        return None;
    }
    Some((&clean[..idx], check))
}

fn strip(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '.' | '-') && !c.is_whitespace())
        .collect()
}

fn group_thousands(digits: &str) -> String {
    let len = digits.chars().count();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

impl fmt::Display for Rut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", group_thousands(&self.body.to_string()), self.check)
    }
}

impl FromStr for Rut {
    type Err = RutError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rut::parse(s)
    }
}

impl TryFrom<String> for Rut {
    type Error = RutError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rut::parse(&value)
    }
}

impl From<Rut> for String {
    fn from(rut: Rut) -> Self {
        rut.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ruts() {
        for rut in [
            "12.345.678-5",
            "12345678-5",
            "10.600.000-K",
            "10.600.000-k",
            "10.900.000-0",
            "1.234.567-4",
            "12 345 678-5",
        ] {
            assert!(validate_rut(rut), "{rut} should be valid");
        }
    }

    #[test]
    fn invalid_ruts() {
        for rut in ["", "   ", "5", "12.345.678-0", "12.345.678-X", "12.A45.678-5"] {
            assert!(!validate_rut(rut), "{rut} should be invalid");
        }
    }

    #[test]
    fn any_corrupted_check_character_fails() {
        let body = "12345678";
        let correct = check_char(12345678);
        for c in "0123456789K".chars().filter(|c| *c != correct) {
            assert!(!validate_rut(&format!("{body}-{c}")), "check {c} accepted");
        }
    }

    #[test]
    fn check_char_special_cases() {
        assert_eq!(check_char(10600000), 'K');
        assert_eq!(check_char(10900000), '0');
        assert_eq!(check_char(12345678), '5');
    }

    #[test]
    fn mismatch_reports_expected() {
        let err = Rut::parse("12.345.678-0").unwrap_err();
        assert_eq!(err, RutError::CheckMismatch { expected: '5', found: '0' });
    }

    #[test]
    fn format_inserts_dots_and_uppercases() {
        assert_eq!(format_rut("12345678-5"), "12.345.678-5");
        assert_eq!(format_rut("12.345.678-5"), "12.345.678-5");
        assert_eq!(format_rut("1234567-4"), "1.234.567-4");
        assert_eq!(format_rut("10600000-k"), "10.600.000-K");
        assert_eq!(format_rut("x"), "x");
    }

    #[test]
    fn leading_zeros_normalize_in_rut_but_not_in_format() {
        let padded = Rut::parse("01.234.567-4").unwrap();
        assert_eq!(padded, Rut::parse("1.234.567-4").unwrap());
        assert_eq!(padded.to_string(), "1.234.567-4");
        assert_eq!(format_rut("012345674"), "01.234.567-4");
    }

    #[test]
    fn display_is_canonical() {
        let rut = Rut::parse("106000 00k").unwrap();
        assert_eq!(rut.to_string(), "10.600.000-K");
    }

    #[test]
    fn serde_uses_canonical_string_and_revalidates() {
        let rut: Rut = "12345678-5".parse().unwrap();
        let json = serde_json::to_string(&rut).unwrap();
        assert_eq!(json, "\"12.345.678-5\"");
        assert_eq!(serde_json::from_str::<Rut>(&json).unwrap(), rut);
        assert!(serde_json::from_str::<Rut>("\"12.345.678-0\"").is_err());
    }
}
