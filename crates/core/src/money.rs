use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative amount of Chilean pesos.
///
/// CLP has no minor unit in circulation, but amounts are kept as `Decimal`
/// so that values read back from other systems are never rounded silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn from_pesos(pesos: u64) -> Self {
        Money(Decimal::from(pesos))
    }

    /// Negative inputs are clamped to zero.
    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.max(Decimal::ZERO))
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn to_pesos(self) -> Option<u64> {
        self.0.trunc().to_u64()
    }
}

/// Chilean notation: `$` prefix, `.` as thousands separator, `,` before decimals.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let normalized = self.0.normalize();
        let text = normalized.to_string();
        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, fr)) => (i, Some(fr)),
            None => (text.as_str(), None),
        };

        let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, ch) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }

        match frac_part {
            Some(fr) => write!(f, "${grouped},{fr}"),
            None => write!(f, "${grouped}"),
        }
    }
}
