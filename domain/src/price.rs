//! Fixed-point price with two fractional digits.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValueError;

/// A price held as an exact number of hundredths.
///
/// Offer lines are matched on price, so prices never pass through floating
/// point: `"1.5"`, `"1.50"` and `Price::from_hundredths(150)` are the same
/// value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Price(i64);

impl Price {
    pub const ZERO: Price = Price(0);

    pub const fn from_hundredths(hundredths: i64) -> Self {
        Self(hundredths)
    }

    pub const fn hundredths(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl FromStr for Price {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| ValueError::InvalidPrice(format!("{s:?}: {why}"));
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("empty"));
        }
        if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("not a decimal number"));
        }
        if frac.len() > 2 {
            return Err(invalid("more than two fractional digits"));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("out of range"))?
        };
        // "1.5" means 50 hundredths, not 5
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid("out of range"))? * 10,
            _ => frac.parse().map_err(|_| invalid("out of range"))?,
        };
        let magnitude = whole
            .checked_mul(100)
            .and_then(|h| h.checked_add(frac))
            .ok_or_else(|| invalid("out of range"))?;
        Ok(Self(if negative { -magnitude } else { magnitude }))
    }
}

impl TryFrom<String> for Price {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Price> for String {
    fn from(price: Price) -> Self {
        price.to_string()
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!("1.50".parse::<Price>().unwrap(), Price::from_hundredths(150));
        assert_eq!("1.5".parse::<Price>().unwrap(), Price::from_hundredths(150));
        assert_eq!("12".parse::<Price>().unwrap(), Price::from_hundredths(1200));
        assert_eq!(".05".parse::<Price>().unwrap(), Price::from_hundredths(5));
        assert_eq!("-3.25".parse::<Price>().unwrap(), Price::from_hundredths(-325));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", ".", "1.234", "abc", "1,50", "--1", "1.-5"] {
            assert!(bad.parse::<Price>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn displays_two_fractional_digits() {
        assert_eq!(Price::from_hundredths(150).to_string(), "1.50");
        assert_eq!(Price::from_hundredths(5).to_string(), "0.05");
        assert_eq!(Price::from_hundredths(-325).to_string(), "-3.25");
        assert_eq!(Price::ZERO.to_string(), "0.00");
    }

    #[test]
    fn orders_numerically() {
        let mut prices: Vec<Price> = ["30", "10.00", "20.5"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        prices.sort();
        let shown: Vec<String> = prices.iter().map(Price::to_string).collect();
        assert_eq!(shown, vec!["10.00", "20.50", "30.00"]);
    }

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&Price::from_hundredths(150)).unwrap();
        assert_eq!(json, "\"1.50\"");
        let back: Price = serde_json::from_str("\"2.1\"").unwrap();
        assert_eq!(back, Price::from_hundredths(210));
        assert!(serde_json::from_str::<Price>("\"2.123\"").is_err());
    }
}
