//! Fixed-point fuel quantity with 2 decimal places precision.
//!
//! Uses `rust_decimal` internally with scale enforcement so balances read
//! off the wire are stored and compared exactly.

use crate::error::QuantityError;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A non-negative volume of fuel in liters, held at exactly 2 decimal places.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use fuel_telemetry::Liters;
///
/// let volume = Liters::from_str("95.5").unwrap();
/// assert_eq!(volume.to_string(), "95.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Liters(Decimal);

impl Liters {
    /// The number of decimal places to maintain.
    pub const SCALE: u32 = 2;

    /// Zero liters.
    pub const ZERO: Self = Liters(Decimal::ZERO);

    /// Creates a quantity from a `Decimal`, normalizing to 2 decimal places.
    ///
    /// Rejects negative values and values carrying more precision than the
    /// scale can represent without rounding.
    pub fn new(value: Decimal) -> std::result::Result<Self, QuantityError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(QuantityError::Negative(value.to_string()));
        }
        let mut normalized = value.normalize();
        if normalized.scale() > Self::SCALE {
            return Err(QuantityError::TooPrecise(value.to_string()));
        }
        normalized.rescale(Self::SCALE);
        Ok(Liters(normalized))
    }
}

impl FromStr for Liters {
    type Err = QuantityError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let token = significant_digits(trimmed)?;
        let decimal =
            Decimal::from_str(token).map_err(|_| QuantityError::Malformed(trimmed.to_string()))?;
        Liters::new(decimal)
    }
}

/// Drops trailing fractional zeros and rejects tokens with more than
/// [`Liters::SCALE`] fractional digits left.
///
/// Checked on the text itself: `Decimal` rounds anything past 28 fractional
/// digits while parsing.
fn significant_digits(token: &str) -> std::result::Result<&str, QuantityError> {
    let Some((whole, fraction)) = token.split_once('.') else {
        return Ok(token);
    };
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(token);
    }

    let significant = fraction.trim_end_matches('0');
    if significant.len() > Liters::SCALE as usize {
        return Err(QuantityError::TooPrecise(token.to_string()));
    }
    if significant.is_empty() {
        return Ok(whole);
    }
    Ok(&token[..whole.len() + 1 + significant.len()])
}

impl fmt::Display for Liters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Liters {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
