use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Numeric quantity a quota can be expressed in.
///
/// Counts (gateways, workflows, megabytes) are `u64`; CPU cores and credits
/// are fractional and use `f64`.
pub trait Amount: Copy + PartialOrd + Default + fmt::Debug {
    fn as_f64(self) -> f64;
    fn saturating_sub(self, other: Self) -> Self;
    fn add(self, other: Self) -> Self;
    fn from_i64(value: i64) -> Option<Self>;
    fn from_f64(value: f64) -> Option<Self>;
}

impl Amount for u64 {
    fn as_f64(self) -> f64 {
        self as f64
    }

    fn saturating_sub(self, other: Self) -> Self {
        u64::saturating_sub(self, other)
    }

    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }

    fn from_i64(value: i64) -> Option<Self> {
        u64::try_from(value).ok()
    }

    fn from_f64(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
            Some(value as u64)
        } else {
            None
        }
    }
}

impl Amount for f64 {
    fn as_f64(self) -> f64 {
        self
    }

    fn saturating_sub(self, other: Self) -> Self {
        (self - other).max(0.0)
    }

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn from_i64(value: i64) -> Option<Self> {
        Some(value as f64)
    }

    fn from_f64(value: f64) -> Option<Self> {
        value.is_finite().then_some(value)
    }
}

/// Ceiling for one resource at one scope.
///
/// Plan tables write "no ceiling" as `-1` and allocation rows write it as
/// `NULL`; both become [`Limit::Unlimited`] at the loading boundary so no
/// arithmetic is ever performed on the sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit<T = u64> {
    Finite(T),
    Unlimited,
}

impl<T: Amount> Limit<T> {
    /// `None` means the row carries no explicit cap.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Limit::Finite(v),
            None => Limit::Unlimited,
        }
    }

    /// Translates a plan-table value where any negative number means unlimited.
    pub fn from_sentinel(value: i64) -> Self {
        if value < 0 {
            return Limit::Unlimited;
        }
        T::from_i64(value).map_or(Limit::Unlimited, Limit::Finite)
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    pub fn finite(&self) -> Option<T> {
        match self {
            Limit::Finite(v) => Some(*v),
            Limit::Unlimited => None,
        }
    }

    /// Whether `total` fits under this ceiling.
    pub fn admits(&self, total: T) -> bool {
        match self {
            Limit::Finite(limit) => total <= *limit,
            Limit::Unlimited => true,
        }
    }

    /// Capacity left after `consumed`, floored at zero. `None` when unlimited.
    pub fn remaining(&self, consumed: T) -> Option<T> {
        self.finite().map(|limit| limit.saturating_sub(consumed))
    }
}

impl<T> Default for Limit<T> {
    fn default() -> Self {
        Limit::Unlimited
    }
}

impl<T: fmt::Display> fmt::Display for Limit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Finite(v) => write!(f, "{v}"),
            Limit::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl<T: Serialize> Serialize for Limit<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Finite(v) => serializer.serialize_some(v),
            Limit::Unlimited => serializer.serialize_none(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Int(i64),
    Float(f64),
}

impl<'de, T: Amount> Deserialize<'de> for Limit<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<RawLimit>::deserialize(deserializer)?;
        match raw {
            None => Ok(Limit::Unlimited),
            Some(RawLimit::Int(v)) => Ok(Limit::from_sentinel(v)),
            Some(RawLimit::Float(v)) if v < 0.0 => Ok(Limit::Unlimited),
            Some(RawLimit::Float(v)) => T::from_f64(v).map(Limit::Finite).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid limit value {v}"))
            }),
        }
    }
}

/// `clamp(round(100 × used / limit), 0, 100)` with round-half-up; zero when
/// the limit is unlimited or zero.
pub fn percentage<T: Amount>(used: T, limit: Limit<T>) -> u8 {
    match limit {
        Limit::Finite(limit) => ratio_percentage(used.as_f64(), limit.as_f64()),
        Limit::Unlimited => 0,
    }
}

pub fn ratio_percentage(used: f64, limit: f64) -> u8 {
    if !(limit > 0.0) || !used.is_finite() {
        return 0;
    }
    let scaled = used * 100.0 / limit;
    (scaled + 0.5).floor().clamp(0.0, 100.0) as u8
}
