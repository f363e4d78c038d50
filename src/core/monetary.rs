/// Monetary system of the node
///
/// Every value is carried as an 8-decimal fixed-point `Amount`. Internally it is a count
/// of base units (1 coin = 100,000,000 units) so sums and conservation checks are exact;
/// on the wire it is always a decimal string with eight fractional digits.
///
/// ## Emission
/// - **Block subsidy**: 50 coins at the start, halving every 210,000 heights
/// - After 64 halvings the subsidy is zero
use crate::error::{BlockchainError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Number of base units in one coin
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Number of fractional digits carried by every amount
pub const DECIMALS: usize = 8;

/// Initial block subsidy in coins
pub const INITIAL_BLOCK_REWARD: u64 = 50;

/// Heights between two subsidy halvings
pub const HALVING_INTERVAL: u64 = 210_000;

/// Fixed-point amount with 8 decimal places
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: u64) -> Amount {
        Amount(units)
    }

    pub fn from_coins(coins: u64) -> Amount {
        Amount(coins.saturating_mul(UNITS_PER_COIN))
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / UNITS_PER_COIN,
            self.0 % UNITS_PER_COIN
        )
    }
}

impl FromStr for Amount {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BlockchainError::Validation(format!("Invalid amount: '{s}'"));
        let s = s.trim();
        let (whole, fraction) = match s.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (s, ""),
        };

        if whole.is_empty() || fraction.len() > DECIMALS {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let mut fraction_units: u64 = 0;
        if !fraction.is_empty() {
            let padded = format!("{fraction:0<width$}", width = DECIMALS);
            fraction_units = padded.parse().map_err(|_| invalid())?;
        }

        whole
            .checked_mul(UNITS_PER_COIN)
            .and_then(|units| units.checked_add(fraction_units))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal amount string with at most 8 fractional digits")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Amount, E> {
                v.parse().map_err(|e: BlockchainError| E::custom(e))
            }
        }

        deserializer.deserialize_str(AmountVisitor)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}

/// Deterministic emission schedule: the subsidy minted by the block at `height`
pub fn block_subsidy(height: u64) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return Amount::ZERO;
    }
    Amount(Amount::from_coins(INITIAL_BLOCK_REWARD).units() >> halvings)
}
