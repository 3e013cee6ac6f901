use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Money in minor units (1/100 of the currency unit).
///
/// Parsed from decimal strings with at most two fractional digits and always
/// rendered with exactly two, e.g. `"150"` and `"150.0"` both become `150.00`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

/// Why a price string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// Nothing to parse.
    #[error("price is required")]
    Empty,
    /// Not of the form `digits[.d[d]]`.
    #[error("price must be a valid number with at most 2 decimal places")]
    Format,
    /// Does not fit in minor units.
    #[error("price is too large")]
    Overflow,
}

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(0);

    /// Builds an amount from minor units.
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Minor units (paise, cents).
    pub const fn minor(self) -> u64 {
        self.0
    }

    /// True for `0.00`.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Sum that refuses to wrap.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Parses `^\d+(\.\d{1,2})?$`.
    pub fn parse(s: &str) -> Result<Self, AmountError> {
        if s.is_empty() {
            return Err(AmountError::Empty);
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, Some(f)),
            None => (s, None),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Format);
        }
        let frac_minor = match frac {
            None => 0,
            Some(f) if (1..=2).contains(&f.len()) && f.bytes().all(|b| b.is_ascii_digit()) => {
                let n: u64 = f.parse().map_err(|_| AmountError::Format)?;
                if f.len() == 1 {
                    n * 10
                } else {
                    n
                }
            }
            Some(_) => return Err(AmountError::Format),
        };
        let whole: u64 = whole.parse().map_err(|_| AmountError::Overflow)?;
        whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac_minor))
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string with at most 2 fractional digits")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                Amount::parse(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                v.checked_mul(100)
                    .map(Amount)
                    .ok_or_else(|| E::custom(AmountError::Overflow))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional() {
        assert_eq!(Amount::parse("150").unwrap().minor(), 15_000);
        assert_eq!(Amount::parse("150.5").unwrap().minor(), 15_050);
        assert_eq!(Amount::parse("150.05").unwrap().minor(), 15_005);
        assert_eq!(Amount::parse("0.99").unwrap().minor(), 99);
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(Amount::parse(""), Err(AmountError::Empty));
        for bad in ["abc", "-1", "1.", ".5", "1.234", "1,00", " 1", "1e3"] {
            assert_eq!(Amount::parse(bad), Err(AmountError::Format), "{bad}");
        }
        assert_eq!(Amount::parse("99999999999999999999"), Err(AmountError::Overflow));
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Amount::from_minor(15_000).to_string(), "150.00");
        assert_eq!(Amount::from_minor(7).to_string(), "0.07");
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let a: Amount = serde_json::from_str(r#""12.3""#).unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), r#""12.30""#);
        let b: Amount = serde_json::from_str("40").unwrap();
        assert_eq!(b, Amount::from_minor(4_000));
    }
}
