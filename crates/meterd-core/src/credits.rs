//! Fixed-point credit amounts.
//!
//! Credits are the billing unit for metered usage. Amounts are stored as an
//! `i64` count of hundredths of a credit to avoid floating point drift in
//! quota arithmetic. The canonical textual form always carries two decimal
//! places ("1.50", "98.50").

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A credit amount with two decimal places of precision.
///
/// Serializes as its canonical decimal string so that queue payloads and
/// stored records are unambiguous across languages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Credits(i64);

impl Credits {
    /// Zero credits.
    pub const ZERO: Self = Self(0);

    /// Create a credit amount from a raw count of hundredths.
    #[must_use]
    pub const fn from_hundredths(hundredths: i64) -> Self {
        Self(hundredths)
    }

    /// Create a credit amount from a whole number of credits.
    #[must_use]
    pub const fn from_whole(credits: i64) -> Self {
        Self(credits * 100)
    }

    /// Return the raw count of hundredths.
    #[must_use]
    pub const fn hundredths(self) -> i64 {
        self.0
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition, `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Saturating subtraction clamped at zero.
    ///
    /// Quota arithmetic never reports negative remaining credits.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        let v = self.0.saturating_sub(other.0);
        if v < 0 {
            Self(0)
        } else {
            Self(v)
        }
    }

    /// Scale by a multiplier expressed in hundredths (100 = 1.00x).
    ///
    /// Used for per-plan pricing multipliers. Truncates toward zero.
    #[must_use]
    pub const fn scale_hundredths(self, multiplier_hundredths: i64) -> Self {
        Self(self.0 * multiplier_hundredths / 100)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Credits {
    type Err = CreditsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(CreditsError::Invalid(s.to_string()));
        }
        if frac.len() > 2 {
            return Err(CreditsError::TooPrecise(s.to_string()));
        }

        let whole_part: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| CreditsError::Invalid(s.to_string()))?
        };

        let frac_part: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<2}");
            padded
                .parse()
                .map_err(|_| CreditsError::Invalid(s.to_string()))?
        };

        let hundredths = whole_part
            .checked_mul(100)
            .and_then(|v| v.checked_add(frac_part))
            .ok_or_else(|| CreditsError::Invalid(s.to_string()))?;

        Ok(Self(sign * hundredths))
    }
}

impl TryFrom<String> for Credits {
    type Error = CreditsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Credits> for String {
    fn from(credits: Credits) -> Self {
        credits.to_string()
    }
}

/// Errors that can occur when parsing credit amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditsError {
    /// The input is not a valid decimal amount.
    #[error("invalid credit amount: {0}")]
    Invalid(String),

    /// The input carries more than two decimal places.
    #[error("credit amount has more than two decimal places: {0}")]
    TooPrecise(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_two_decimals() {
        assert_eq!(Credits::from_hundredths(150).to_string(), "1.50");
        assert_eq!(Credits::from_hundredths(9850).to_string(), "98.50");
        assert_eq!(Credits::from_whole(100).to_string(), "100.00");
        assert_eq!(Credits::ZERO.to_string(), "0.00");
        assert_eq!(Credits::from_hundredths(-150).to_string(), "-1.50");
        assert_eq!(Credits::from_hundredths(5).to_string(), "0.05");
    }

    #[test]
    fn parse_accepts_common_forms() {
        assert_eq!("1.50".parse::<Credits>().unwrap(), Credits::from_hundredths(150));
        assert_eq!("1.5".parse::<Credits>().unwrap(), Credits::from_hundredths(150));
        assert_eq!("2".parse::<Credits>().unwrap(), Credits::from_whole(2));
        assert_eq!("0.05".parse::<Credits>().unwrap(), Credits::from_hundredths(5));
        assert_eq!("-3.25".parse::<Credits>().unwrap(), Credits::from_hundredths(-325));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Credits>().is_err());
        assert!(".".parse::<Credits>().is_err());
        assert!("abc".parse::<Credits>().is_err());
        assert!("1.505".parse::<Credits>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let amount = Credits::from_hundredths(9850);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"98.50\"");
        let parsed: Credits = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, amount);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let a = Credits::from_whole(1);
        let b = Credits::from_whole(2);
        assert_eq!(a.saturating_sub(b), Credits::ZERO);
        assert_eq!(b.saturating_sub(a), Credits::from_whole(1));
    }

    #[test]
    fn scale_by_plan_multiplier() {
        // 1.00 credit at a 1.50x plan multiplier = 1.50 credits
        assert_eq!(
            Credits::from_whole(1).scale_hundredths(150),
            Credits::from_hundredths(150)
        );
        // 0.50 at 1.00x is unchanged
        assert_eq!(
            Credits::from_hundredths(50).scale_hundredths(100),
            Credits::from_hundredths(50)
        );
    }
}
