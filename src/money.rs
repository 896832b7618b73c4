// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-point currency amounts.
//!
//! All ledger arithmetic happens on an integer count of minor units (kobo).
//! The service boundary accepts and returns major units (naira) as decimals;
//! conversion is `minor = round(major * 100)`. Floating point never enters a
//! balance comparison.

use serde::{Deserialize, Serialize};

/// Number of minor units in one major unit.
const MINOR_PER_MAJOR: i64 = 100;

/// A signed currency amount in minor units.
///
/// Positive values are credits, negative values are debits. Serializes as a
/// bare integer so stored records stay exact.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Wrap an exact minor-unit count.
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Convert a major-unit decimal to minor units, rounding half away from
    /// zero.
    pub fn from_major(major: f64) -> Self {
        Money((major * MINOR_PER_MAJOR as f64).round() as i64)
    }

    /// The raw minor-unit count.
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// The major-unit value. For display and gateway payloads only; never
    /// used in invariant checks.
    pub fn to_major(self) -> f64 {
        self.0 as f64 / MINOR_PER_MAJOR as f64
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl std::fmt::Display for Money {
    /// Renders major units with two decimals, e.g. `5000.00` or `-2.50`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
