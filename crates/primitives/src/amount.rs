//! Satoshi amounts and fee rates.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of decimal places in one bitcoin.
pub const BTC_DECIMALS: u32 = 8;

/// Satoshis in one bitcoin.
pub const SATS_PER_BTC: i64 = 100_000_000;

/// Errors raised when parsing or converting amounts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmountError {
    /// The text is not a decimal number.
    #[error("invalid amount: {0}")]
    Invalid(String),

    /// More than eight decimal places were given.
    #[error("too many decimal places in amount: {0}")]
    TooPrecise(String),

    /// The amount does not fit in a satoshi counter.
    #[error("amount out of range: {0}")]
    OutOfRange(String),

    /// A negative amount was used where only non-negative ones make sense.
    #[error("negative amount: {0}")]
    Negative(i64),
}

/// A signed number of satoshis.
///
/// Signed so that balance deltas and fee differences can be expressed directly.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Satoshis(i64);

impl Satoshis {
    /// Zero satoshis.
    pub const ZERO: Satoshis = Satoshis(0);

    /// Outputs below this value are considered dust and are not relayed.
    pub const DUST: Satoshis = Satoshis(546);

    /// Wraps a raw satoshi value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw satoshi value.
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Whether this amount is below the dust threshold.
    pub const fn is_dust(self) -> bool {
        self.0 < Self::DUST.0
    }

    /// Converts into a bitcoin amount for display.
    pub const fn to_btc(self) -> BtcAmount {
        BtcAmount(self)
    }

    /// Parses a decimal BTC string such as `0.00001`.
    pub fn from_btc_str(s: &str) -> Result<Self, AmountError> {
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if frac.len() > BTC_DECIMALS as usize {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let out_of_range = || AmountError::OutOfRange(s.to_string());
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| out_of_range())?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<8}");
            padded.parse().map_err(|_| out_of_range())?
        };

        let sats = whole
            .checked_mul(SATS_PER_BTC)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(out_of_range)?;

        Ok(Self(if negative { -sats } else { sats }))
    }

    /// Converts into a [`bitcoin::Amount`], failing for negative values.
    pub fn to_amount(self) -> Result<Amount, AmountError> {
        u64::try_from(self.0)
            .map(Amount::from_sat)
            .map_err(|_| AmountError::Negative(self.0))
    }

    /// Adds, or `None` on overflow.
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Subtracts, or `None` on overflow.
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(difference) => Some(Self(difference)),
            None => None,
        }
    }

    /// Sums `amounts`, or `None` if the total overflows.
    ///
    /// Use this over [`Sum`] for values that come from outside the wallet.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }
}

impl From<Amount> for Satoshis {
    fn from(amount: Amount) -> Self {
        // Amounts above i64::MAX exceed the total supply by orders of magnitude.
        Self(i64::try_from(amount.to_sat()).unwrap_or(i64::MAX))
    }
}

impl Add for Satoshis {
    type Output = Satoshis;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Satoshis {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Satoshis {
    type Output = Satoshis;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Satoshis {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Satoshis {
    type Output = Satoshis;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Sum for Satoshis {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Satoshis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// A satoshi amount rendered in bitcoin, e.g. `0.00001 BTC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtcAmount(Satoshis);

impl BtcAmount {
    /// The underlying satoshis.
    pub const fn satoshis(self) -> Satoshis {
        self.0
    }

    /// The decimal value without unit, trailing zeros trimmed.
    pub fn value_string(self) -> String {
        let sats = self.0.value();
        let sign = if sats < 0 { "-" } else { "" };
        let abs = sats.unsigned_abs();
        let per_btc = SATS_PER_BTC.unsigned_abs();
        let whole = abs / per_btc;
        let frac = abs % per_btc;

        if frac == 0 {
            return format!("{sign}{whole}");
        }

        let frac = format!("{frac:08}");
        format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl fmt::Display for BtcAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BTC", self.value_string())
    }
}

impl FromStr for Satoshis {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().trim_end_matches("sat").trim();
        raw.parse::<i64>()
            .map(Self)
            .map_err(|_| AmountError::Invalid(s.to_string()))
    }
}

/// A fee rate in satoshis per virtual byte.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FeeRate {
    sats_per_vbyte: f64,
}

impl FeeRate {
    /// Creates a fee rate from satoshis per virtual byte.
    pub const fn from_sats_per_vbyte(sats_per_vbyte: f64) -> Self {
        Self { sats_per_vbyte }
    }

    /// Creates a fee rate from satoshis per weight unit.
    pub fn from_sats_per_weight_unit(sats_per_wu: f64) -> Self {
        Self {
            sats_per_vbyte: sats_per_wu * 4.0,
        }
    }

    /// Satoshis per virtual byte.
    pub const fn sats_per_vbyte(self) -> f64 {
        self.sats_per_vbyte
    }

    /// Satoshis per weight unit.
    pub fn sats_per_weight_unit(self) -> f64 {
        self.sats_per_vbyte / 4.0
    }

    /// Fee for a transaction of the given virtual size, rounded up.
    pub fn fee_for_vsize(self, vsize: u64) -> Satoshis {
        Satoshis((self.sats_per_vbyte * vsize as f64).ceil() as i64)
    }
}
