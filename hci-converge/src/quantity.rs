//! Kubernetes resource quantities ("4Gi", "4096Mi", "500m", "1e3").
//!
//! Quantities are normalised to an integer count of nano-units so that
//! different spellings of the same amount compare equal.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

const NANO: i128 = 1_000_000_000;

/// A parsed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity {
    nanos: i128,
}

/// Error returned for malformed quantity strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseQuantityError(String);

impl fmt::Display for ParseQuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid quantity '{}'", self.0)
    }
}

impl std::error::Error for ParseQuantityError {}

impl Quantity {
    /// Value in whole base units, rounded toward zero.
    pub fn whole_units(&self) -> i128 {
        self.nanos / NANO
    }

    pub fn is_positive(&self) -> bool {
        self.nanos > 0
    }

    /// Interpret a JSON value as a quantity. Numbers are accepted as-is
    /// (the API serialises small CPU counts as plain integers).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self {
                        nanos: i as i128 * NANO,
                    })
                } else {
                    n.as_f64().map(|f| Self {
                        nanos: (f * NANO as f64) as i128,
                    })
                }
            }
            _ => None,
        }
    }
}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseQuantityError(s.to_string());
        let input = s.trim();
        if input.is_empty() {
            return Err(err());
        }

        let (negative, rest) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };

        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_end);
        if number.is_empty() || number == "." || number.matches('.').count() > 1 {
            return Err(err());
        }

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if frac_part.len() > 18 {
            return Err(err());
        }
        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = digits.parse().map_err(|_| err())?;
        let frac_scale = 10i128.pow(frac_part.len() as u32);

        // (numerator, denominator) of the suffix multiplier.
        let (mul_num, mul_den): (i128, i128) = match suffix {
            "" => (1, 1),
            "n" => (1, 1_000_000_000),
            "u" => (1, 1_000_000),
            "m" => (1, 1_000),
            "k" => (1_000, 1),
            "M" => (1_000_000, 1),
            "G" => (1_000_000_000, 1),
            "T" => (1_000_000_000_000, 1),
            "P" => (1_000_000_000_000_000, 1),
            "E" => (1_000_000_000_000_000_000, 1),
            "Ki" => (1 << 10, 1),
            "Mi" => (1 << 20, 1),
            "Gi" => (1 << 30, 1),
            "Ti" => (1 << 40, 1),
            "Pi" => (1 << 50, 1),
            "Ei" => (1 << 60, 1),
            exp if exp.starts_with(['e', 'E']) => {
                let power: i32 = exp[1..].parse().map_err(|_| err())?;
                if power.abs() > 18 {
                    return Err(err());
                }
                if power >= 0 {
                    (10i128.pow(power as u32), 1)
                } else {
                    (1, 10i128.pow(power.unsigned_abs()))
                }
            }
            _ => return Err(err()),
        };

        let nanos = mantissa
            .checked_mul(mul_num)
            .and_then(|v| v.checked_mul(NANO))
            .ok_or_else(err)?
            / (frac_scale * mul_den);

        Ok(Self {
            nanos: if negative { -nanos } else { nanos },
        })
    }
}

/// Compare two JSON values as quantities. Falls back to plain equality when
/// either side does not parse.
pub fn json_quantities_equal(desired: &Value, observed: &Value) -> bool {
    match (Quantity::from_json(desired), Quantity::from_json(observed)) {
        (Some(a), Some(b)) => a == b,
        _ => desired == observed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn binary_suffixes_normalise() {
        assert_eq!(q("4Gi"), q("4096Mi"));
        assert_eq!(q("1Ki"), q("1024"));
        assert_eq!(q("0.5Gi"), q("512Mi"));
        assert_eq!(q("10Gi").whole_units(), 10 * 1024 * 1024 * 1024);
    }

    #[test]
    fn decimal_and_milli_suffixes() {
        assert_eq!(q("2"), q("2000m"));
        assert_eq!(q("1k"), q("1000"));
        assert_eq!(q("1G"), q("1000M"));
        assert_eq!(q("1.5"), q("1500m"));
        assert_ne!(q("1G"), q("1Gi"));
    }

    #[test]
    fn exponent_form() {
        assert_eq!(q("1e3"), q("1k"));
        assert_eq!(q("5E-3"), q("5m"));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "Gi", "4Gb", "1.2.3", "abc", "4 Gi", "."] {
            assert!(bad.parse::<Quantity>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn json_numbers_compare_with_strings() {
        assert!(json_quantities_equal(&json!(2), &json!("2")));
        assert!(json_quantities_equal(&json!("4Gi"), &json!("4096Mi")));
        assert!(!json_quantities_equal(&json!("4Gi"), &json!("8Gi")));
        assert!(!json_quantities_equal(&json!("oops"), &json!("4Gi")));
    }
}
