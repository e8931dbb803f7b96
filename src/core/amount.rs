//! Amounts and currency identifiers. Magnitudes are arbitrary-precision signed integers and are never truncated; most operations require them to be strictly positive.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

use num::{BigInt, Signed, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::operation::ValidationError;

/// Arbitrary-precision signed integer. Encoded as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Big(BigInt);

impl Big {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    pub fn new(value: i64) -> Self {
        Self(BigInt::from(value))
    }

    pub fn from_bigint(value: BigInt) -> Self {
        Self(value)
    }

    pub fn as_bigint(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Strictly greater than zero.
    pub fn over_zero(&self) -> bool {
        self.0.is_positive()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// `self * numerator / denominator`, rounded toward negative infinity.
    pub fn mul_div_floor(&self, numerator: u64, denominator: u64) -> Self {
        use num::Integer;
        let product = &self.0 * BigInt::from(numerator);
        Self(product.div_floor(&BigInt::from(denominator)))
    }
}

impl From<u64> for Big {
    fn from(value: u64) -> Self {
        Self(BigInt::from(value))
    }
}

impl From<i64> for Big {
    fn from(value: i64) -> Self {
        Self(BigInt::from(value))
    }
}

impl Add for Big {
    type Output = Big;
    fn add(self, rhs: Big) -> Big {
        Big(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Big> for &'a Big {
    type Output = Big;
    fn add(self, rhs: &'a Big) -> Big {
        Big(&self.0 + &rhs.0)
    }
}

impl Sub for Big {
    type Output = Big;
    fn sub(self, rhs: Big) -> Big {
        Big(self.0 - rhs.0)
    }
}

impl<'a> Sub<&'a Big> for &'a Big {
    type Output = Big;
    fn sub(self, rhs: &'a Big) -> Big {
        Big(&self.0 - &rhs.0)
    }
}

impl Neg for Big {
    type Output = Big;
    fn neg(self) -> Big {
        Big(-self.0)
    }
}

impl std::iter::Sum for Big {
    fn sum<I: Iterator<Item = Big>>(iter: I) -> Big {
        iter.fold(Big::zero(), |acc, b| acc + b)
    }
}

impl fmt::Display for Big {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Big {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<BigInt>()
            .map(Big)
            .map_err(|e| ValidationError::InvalidAmount(format!("{:?}: {}", s, e)))
    }
}

impl Serialize for Big {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Big {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Minimum length of a currency id.
pub const MIN_CURRENCY_ID_LEN: usize = 3;
/// Maximum length of a currency id.
pub const MAX_CURRENCY_ID_LEN: usize = 10;

/// Currency identifier: 3–10 characters, upper-case letters and digits at both
/// ends, `_ . ! $ * @` allowed in between.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrencyId(String);

impl CurrencyId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        Self::check(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn check(id: &str) -> Result<(), ValidationError> {
        let len = id.chars().count();
        if !(MIN_CURRENCY_ID_LEN..=MAX_CURRENCY_ID_LEN).contains(&len) {
            return Err(ValidationError::InvalidCurrencyId(format!(
                "{:?}: length must be {}..={}",
                id, MIN_CURRENCY_ID_LEN, MAX_CURRENCY_ID_LEN
            )));
        }
        let edge = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit();
        let inner = |c: char| edge(c) || "_.!$*@".contains(c);
        let chars: Vec<char> = id.chars().collect();
        let ok = edge(chars[0])
            && edge(chars[len - 1])
            && chars[1..len - 1].iter().all(|c| inner(*c));
        if !ok {
            return Err(ValidationError::InvalidCurrencyId(format!(
                "{:?}: invalid characters",
                id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for CurrencyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CurrencyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CurrencyId::new(s).map_err(serde::de::Error::custom)
    }
}

/// Typed amount: magnitude plus currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    amount: Big,
    currency: CurrencyId,
}

impl Amount {
    pub fn new(amount: Big, currency: CurrencyId) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: CurrencyId) -> Self {
        Self::new(Big::zero(), currency)
    }

    pub fn big(&self) -> &Big {
        &self.amount
    }

    pub fn currency(&self) -> &CurrencyId {
        &self.currency
    }

    /// Same currency, new magnitude.
    pub fn with_big(&self, amount: Big) -> Self {
        Self::new(amount, self.currency.clone())
    }

    /// Operation amounts must be strictly positive.
    pub fn is_valid_positive(&self) -> Result<(), ValidationError> {
        if !self.amount.over_zero() {
            return Err(ValidationError::InvalidAmount(format!(
                "amount must be over zero, got {}",
                self
            )));
        }
        Ok(())
    }

    /// Orders by currency, then magnitude. Only meaningful for a single currency.
    pub fn compare(&self, other: &Amount) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        Some(self.amount.cmp(&other.amount))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> CurrencyId {
        CurrencyId::new(s).unwrap()
    }

    #[test]
    fn test_big_arithmetic_no_truncation() {
        let huge: Big = "340282366920938463463374607431768211456".parse().unwrap(); // 2^128
        let sum = &huge + &Big::new(1);
        assert_eq!(sum.to_string(), "340282366920938463463374607431768211457");
        assert_eq!(&sum - &huge, Big::new(1));
    }

    #[test]
    fn test_big_predicates() {
        assert!(Big::zero().is_zero());
        assert!(!Big::zero().over_zero());
        assert!(Big::new(-3).is_negative());
        assert!(Big::new(3).over_zero());
    }

    #[test]
    fn test_mul_div_floor() {
        assert_eq!(Big::new(100).mul_div_floor(1, 3), Big::new(33));
        assert_eq!(Big::new(7).mul_div_floor(1, 2), Big::new(3));
    }

    #[test]
    fn test_big_serde_as_string() {
        let json = serde_json::to_string(&Big::new(42)).unwrap();
        assert_eq!(json, "\"42\"");
        let back: Big = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Big::new(42));
        assert!(serde_json::from_str::<Big>("\"4x2\"").is_err());
    }

    #[test]
    fn test_currency_id_rules() {
        assert!(CurrencyId::new("MCC").is_ok());
        assert!(CurrencyId::new("A_B.C").is_ok());
        assert!(CurrencyId::new("MC").is_err());
        assert!(CurrencyId::new("ABCDEFGHIJK").is_err());
        assert!(CurrencyId::new("mcc").is_err());
        assert!(CurrencyId::new("_MC").is_err());
        assert!(CurrencyId::new("MC_").is_err());
    }

    #[test]
    fn test_amount_positive_and_compare() {
        let a = Amount::new(Big::new(10), cid("MCC"));
        assert!(a.is_valid_positive().is_ok());
        assert!(a.with_big(Big::zero()).is_valid_positive().is_err());
        assert_eq!(a.compare(&a.with_big(Big::new(5))), Some(Ordering::Greater));
        assert_eq!(a.compare(&Amount::new(Big::new(10), cid("XYZ"))), None);
    }
}
