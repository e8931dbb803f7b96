//! Currency fee policies and currency designs.
//!
//! **Model:** every currency carries a `Feeer`. `Nil` never charges, `Fixed`
//! charges a flat amount, `Ratio` charges `floor(amount × ratio)` clamped to
//! `[min, max]`. All arithmetic is integer; the ratio is fixed-point with
//! `FEE_RATIO_SCALE` units per 1.0. A feeer only computes an amount, crediting
//! the receiver is the processor's job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::address::Address;
use crate::core::amount::{Amount, Big, CurrencyId};
use crate::core::operation::ValidationError;
use crate::error::CurrencyError;

/// Fixed-point units per 1.0 of a fee ratio.
pub const FEE_RATIO_SCALE: u64 = 1_000_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Fee of negative amount: {0}")]
    NegativeAmount(Big),
}

impl From<FeeError> for CurrencyError {
    fn from(err: FeeError) -> Self {
        CurrencyError::Validation(err.to_string())
    }
}

/// Ratio in `[0, 1]`, stored as parts per `FEE_RATIO_SCALE`.
///
/// On the wire it is an exact decimal string (`"0.01"`) with at most
/// `FEE_RATIO_DECIMALS` fractional digits, so encoding never rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeeRatio(u64);

/// Fractional digits of `FEE_RATIO_SCALE`.
pub const FEE_RATIO_DECIMALS: usize = 9;

impl FeeRatio {
    pub const ZERO: FeeRatio = FeeRatio(0);
    pub const ONE: FeeRatio = FeeRatio(FEE_RATIO_SCALE);

    pub fn from_parts(parts: u64) -> Result<Self, ValidationError> {
        if parts > FEE_RATIO_SCALE {
            return Err(ValidationError::InvalidFeeer(format!(
                "ratio must be in [0, 1], got {} parts",
                parts
            )));
        }
        Ok(Self(parts))
    }

    /// Nearest ratio to `ratio`. Lossy; use the decimal form for exact values.
    pub fn from_f64(ratio: f64) -> Result<Self, ValidationError> {
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err(ValidationError::InvalidFeeer(format!(
                "ratio must be in [0, 1], got {}",
                ratio
            )));
        }
        Self::from_parts((ratio * FEE_RATIO_SCALE as f64).round() as u64)
    }

    pub fn parts(&self) -> u64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / FEE_RATIO_SCALE as f64
    }
}

impl fmt::Display for FeeRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / FEE_RATIO_SCALE;
        let frac = self.0 % FEE_RATIO_SCALE;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let digits = format!("{:0width$}", frac, width = FEE_RATIO_DECIMALS);
        write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl FromStr for FeeRatio {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFeeer(format!("invalid ratio {:?}", s));
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty()
            || frac.len() > FEE_RATIO_DECIMALS
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
            || (s.contains('.') && frac.is_empty())
        {
            return Err(invalid());
        }
        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = FEE_RATIO_DECIMALS);
            padded.parse().map_err(|_| invalid())?
        };
        let parts = whole
            .checked_mul(FEE_RATIO_SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(invalid)?;
        Self::from_parts(parts)
    }
}

impl Serialize for FeeRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FeeRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ratio = String::deserialize(deserializer)?;
        ratio.parse().map_err(serde::de::Error::custom)
    }
}

/// Fee policy of a currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_hint")]
pub enum Feeer {
    #[serde(rename = "nil-feeer-v0.0.1")]
    Nil,
    #[serde(rename = "fixed-feeer-v0.0.1")]
    Fixed { receiver: Address, amount: Big },
    #[serde(rename = "ratio-feeer-v0.0.1")]
    Ratio {
        receiver: Address,
        ratio: FeeRatio,
        min: Big,
        /// `None` means unlimited.
        #[serde(default)]
        max: Option<Big>,
    },
}

impl Feeer {
    pub fn fixed(receiver: Address, amount: Big) -> Result<Self, ValidationError> {
        let feeer = Feeer::Fixed { receiver, amount };
        feeer.is_valid()?;
        Ok(feeer)
    }

    pub fn ratio(
        receiver: Address,
        ratio: FeeRatio,
        min: Big,
        max: Option<Big>,
    ) -> Result<Self, ValidationError> {
        let feeer = Feeer::Ratio {
            receiver,
            ratio,
            min,
            max,
        };
        feeer.is_valid()?;
        Ok(feeer)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Feeer::Nil => "nil",
            Feeer::Fixed { .. } => "fixed",
            Feeer::Ratio { .. } => "ratio",
        }
    }

    /// Account credited with collected fees. `Nil` has none.
    pub fn receiver(&self) -> Option<&Address> {
        match self {
            Feeer::Nil => None,
            Feeer::Fixed { receiver, .. } | Feeer::Ratio { receiver, .. } => Some(receiver),
        }
    }

    pub fn min(&self) -> Big {
        match self {
            Feeer::Nil => Big::zero(),
            Feeer::Fixed { amount, .. } => amount.clone(),
            Feeer::Ratio { min, .. } => min.clone(),
        }
    }

    /// Fee charged on `amount`.
    pub fn fee(&self, amount: &Big) -> Result<Big, FeeError> {
        if amount.is_negative() {
            return Err(FeeError::NegativeAmount(amount.clone()));
        }
        match self {
            Feeer::Nil => Ok(Big::zero()),
            Feeer::Fixed { amount: fixed, .. } => {
                if fixed.over_zero() {
                    Ok(fixed.clone())
                } else {
                    Ok(Big::zero())
                }
            }
            Feeer::Ratio {
                ratio, min, max, ..
            } => {
                if *ratio == FeeRatio::ZERO {
                    return Ok(Big::zero());
                }
                if amount.is_zero() {
                    return Ok(min.clone());
                }
                let mut fee = if *ratio == FeeRatio::ONE {
                    amount.clone()
                } else {
                    amount.mul_div_floor(ratio.parts(), FEE_RATIO_SCALE)
                };
                if fee < *min {
                    fee = min.clone();
                }
                if let Some(max) = max {
                    if fee > *max {
                        fee = max.clone();
                    }
                }
                Ok(fee)
            }
        }
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        match self {
            Feeer::Nil => Ok(()),
            Feeer::Fixed { amount, .. } => {
                if amount.is_negative() {
                    return Err(ValidationError::InvalidFeeer(format!(
                        "fixed fee must not be negative, got {}",
                        amount
                    )));
                }
                Ok(())
            }
            Feeer::Ratio { min, max, .. } => {
                if min.is_negative() {
                    return Err(ValidationError::InvalidFeeer(format!(
                        "min fee must not be negative, got {}",
                        min
                    )));
                }
                if let Some(max) = max {
                    if max < min {
                        return Err(ValidationError::InvalidFeeer(format!(
                            "max fee {} under min fee {}",
                            max, min
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Per-currency policy: minimum balance of a newly created account, and the
/// fee policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPolicy {
    new_account_min_balance: Big,
    feeer: Feeer,
}

impl CurrencyPolicy {
    pub fn new(new_account_min_balance: Big, feeer: Feeer) -> Result<Self, ValidationError> {
        let policy = Self {
            new_account_min_balance,
            feeer,
        };
        policy.is_valid()?;
        Ok(policy)
    }

    pub fn new_account_min_balance(&self) -> &Big {
        &self.new_account_min_balance
    }

    pub fn feeer(&self) -> &Feeer {
        &self.feeer
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        if self.new_account_min_balance.is_negative() {
            return Err(ValidationError::InvalidCurrencyDesign(format!(
                "new account min balance must not be negative, got {}",
                self.new_account_min_balance
            )));
        }
        self.feeer.is_valid()
    }
}

/// Registered currency: genesis amount and account, policy, and the running
/// issued total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDesign {
    amount: Amount,
    genesis_account: Address,
    policy: CurrencyPolicy,
    aggregate: Big,
}

impl CurrencyDesign {
    /// New design; the aggregate starts at the genesis amount.
    pub fn new(
        amount: Amount,
        genesis_account: Address,
        policy: CurrencyPolicy,
    ) -> Result<Self, ValidationError> {
        let design = Self {
            aggregate: amount.big().clone(),
            amount,
            genesis_account,
            policy,
        };
        design.is_valid()?;
        Ok(design)
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn currency(&self) -> &CurrencyId {
        self.amount.currency()
    }

    pub fn genesis_account(&self) -> &Address {
        &self.genesis_account
    }

    pub fn policy(&self) -> &CurrencyPolicy {
        &self.policy
    }

    pub fn aggregate(&self) -> &Big {
        &self.aggregate
    }

    pub fn with_policy(&self, policy: CurrencyPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    /// Design with `issued` added to the aggregate.
    pub fn add_aggregate(&self, issued: &Big) -> Self {
        Self {
            aggregate: &self.aggregate + issued,
            ..self.clone()
        }
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.amount.is_valid_positive()?;
        if self.aggregate.is_negative() {
            return Err(ValidationError::InvalidCurrencyDesign(format!(
                "aggregate must not be negative, got {}",
                self.aggregate
            )));
        }
        if self.genesis_account.is_zero() {
            return Err(ValidationError::InvalidCurrencyDesign(
                "genesis account must not be a zero account".to_string(),
            ));
        }
        self.policy.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> Address {
        Address::new("feereceivermca").unwrap()
    }

    fn ratio(r: f64, min: i64, max: Option<i64>) -> Feeer {
        Feeer::ratio(
            receiver(),
            FeeRatio::from_f64(r).unwrap(),
            Big::new(min),
            max.map(Big::new),
        )
        .unwrap()
    }

    #[test]
    fn test_nil_feeer() {
        assert_eq!(Feeer::Nil.fee(&Big::new(1000)).unwrap(), Big::zero());
        assert!(Feeer::Nil.receiver().is_none());
    }

    #[test]
    fn test_fixed_feeer() {
        let f = Feeer::fixed(receiver(), Big::new(5)).unwrap();
        assert_eq!(f.fee(&Big::new(60)).unwrap(), Big::new(5));
        assert_eq!(f.fee(&Big::zero()).unwrap(), Big::new(5));
        assert_eq!(f.receiver(), Some(&receiver()));

        let free = Feeer::fixed(receiver(), Big::zero()).unwrap();
        assert_eq!(free.fee(&Big::new(60)).unwrap(), Big::zero());

        assert!(Feeer::fixed(receiver(), Big::new(-1)).is_err());
    }

    #[test]
    fn test_ratio_feeer_rules() {
        let f = ratio(0.1, 3, Some(50));
        assert_eq!(f.fee(&Big::zero()).unwrap(), Big::new(3));
        assert_eq!(f.fee(&Big::new(10)).unwrap(), Big::new(3));
        assert_eq!(f.fee(&Big::new(105)).unwrap(), Big::new(10));
        assert_eq!(f.fee(&Big::new(10_000)).unwrap(), Big::new(50));

        assert_eq!(ratio(0.0, 3, None).fee(&Big::new(100)).unwrap(), Big::zero());
        assert_eq!(ratio(1.0, 0, None).fee(&Big::new(777)).unwrap(), Big::new(777));
    }

    #[test]
    fn test_ratio_feeer_large_amount_no_overflow() {
        let huge: Big = "1000000000000000000000000000000".parse().unwrap();
        let fee = ratio(0.5, 0, None).fee(&huge).unwrap();
        assert_eq!(fee.to_string(), "500000000000000000000000000000");
    }

    #[test]
    fn test_negative_amount_is_error() {
        assert!(matches!(
            ratio(0.5, 0, None).fee(&Big::new(-1)),
            Err(FeeError::NegativeAmount(_))
        ));
    }

    #[test]
    fn test_ratio_construction_validation() {
        assert!(FeeRatio::from_f64(1.5).is_err());
        assert!(FeeRatio::from_f64(-0.1).is_err());
        assert!(FeeRatio::from_f64(f64::NAN).is_err());
        assert!(Feeer::ratio(receiver(), FeeRatio::ONE, Big::new(10), Some(Big::new(5))).is_err());
    }

    #[test]
    fn test_ratio_decimal_form_is_exact() {
        let cases = [
            ("0", 0),
            ("1", FEE_RATIO_SCALE),
            ("1.000", FEE_RATIO_SCALE),
            ("0.01", 10_000_000),
            ("0.1", 100_000_000),
            ("0.000000001", 1),
            ("0.123456789", 123_456_789),
        ];
        for (s, parts) in cases {
            let r: FeeRatio = s.parse().unwrap();
            assert_eq!(r.parts(), parts, "{}", s);
        }
        assert_eq!(FeeRatio::from_parts(123_456_789).unwrap().to_string(), "0.123456789");
        assert_eq!(FeeRatio::from_parts(10_000_000).unwrap().to_string(), "0.01");
        assert_eq!(FeeRatio::ONE.to_string(), "1");
        assert_eq!(FeeRatio::ZERO.to_string(), "0");

        for bad in ["", ".5", "0.", "1.5", "2", "-0.1", "0.0000000001", "0,1", "1e-2", " 0.1"] {
            assert!(bad.parse::<FeeRatio>().is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_ratio_wire_keeps_every_part() {
        let r = FeeRatio::from_parts(123_456_789).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#""0.123456789""#);
        assert_eq!(serde_json::from_str::<FeeRatio>(&json).unwrap(), r);

        let cbor = serde_cbor::to_vec(&r).unwrap();
        assert_eq!(serde_cbor::from_slice::<FeeRatio>(&cbor).unwrap(), r);

        assert!(serde_json::from_str::<FeeRatio>("0.01").is_err());
        assert!(serde_json::from_str::<FeeRatio>(r#""1.01""#).is_err());
    }

    #[test]
    fn test_feeer_hint_serde() {
        let f = ratio(0.01, 1, None);
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"_hint\":\"ratio-feeer-v0.0.1\""));
        assert!(json.contains("\"ratio\":\"0.01\""));
        assert_eq!(serde_json::from_str::<Feeer>(&json).unwrap(), f);

        let nil = serde_json::to_string(&Feeer::Nil).unwrap();
        assert_eq!(nil, r#"{"_hint":"nil-feeer-v0.0.1"}"#);
        assert!(serde_json::from_str::<Feeer>(r#"{"_hint":"gas-feeer-v0.0.1"}"#).is_err());
    }

    #[test]
    fn test_design_aggregate() {
        let cid = CurrencyId::new("MCC").unwrap();
        let policy = CurrencyPolicy::new(Big::new(1), Feeer::Nil).unwrap();
        let design = CurrencyDesign::new(
            Amount::new(Big::new(1000), cid.clone()),
            Address::new("genesismca").unwrap(),
            policy,
        )
        .unwrap();
        assert_eq!(design.aggregate(), &Big::new(1000));
        assert_eq!(design.add_aggregate(&Big::new(5)).aggregate(), &Big::new(1005));
        assert_eq!(design.currency(), &cid);
    }
}
