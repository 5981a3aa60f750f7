//! Currency amounts used for payoffs, bids and item values

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A money amount in experiment currency units
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(f64);

impl Currency {
    pub const ZERO: Currency = Currency(0.0);

    pub const fn new(amount: f64) -> Self {
        Self(amount)
    }

    pub fn amount(self) -> f64 {
        self.0
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0.0
    }

    /// Round half away from zero to `places` decimals
    pub fn round_to(self, places: i32) -> Self {
        let factor = 10f64.powi(places);
        Self((self.0 * factor).round() / factor)
    }

    /// Clamp into `[min, max]`
    pub fn clamp(self, min: Currency, max: Currency) -> Self {
        if self.0 < min.0 {
            min
        } else if self.0 > max.0 {
            max
        } else {
            self
        }
    }

    /// Total order, so bids can be sorted without `partial_cmp` unwraps
    pub fn total_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<u32> for Currency {
    fn from(units: u32) -> Self {
        Self(f64::from(units))
    }
}

impl Add for Currency {
    type Output = Currency;

    fn add(self, rhs: Currency) -> Currency {
        Currency(self.0 + rhs.0)
    }
}

impl AddAssign for Currency {
    fn add_assign(&mut self, rhs: Currency) {
        self.0 += rhs.0;
    }
}

impl Sub for Currency {
    type Output = Currency;

    fn sub(self, rhs: Currency) -> Currency {
        Currency(self.0 - rhs.0)
    }
}

impl Mul<f64> for Currency {
    type Output = Currency;

    fn mul(self, rhs: f64) -> Currency {
        Currency(self.0 * rhs)
    }
}

impl Sum for Currency {
    fn sum<I: Iterator<Item = Currency>>(iter: I) -> Self {
        iter.fold(Currency::ZERO, Add::add)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
