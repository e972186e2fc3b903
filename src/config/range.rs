use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Closed-open integer range `[from, to)` used for traffic-shaping jitter.
///
/// `to == 0` marks the range as unset; the normalized accessors on the
/// transport config substitute their defaults in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub from: i32,
    pub to: i32,
}

impl RangeConfig {
    pub const fn new(from: i32, to: i32) -> Self {
        Self { from, to }
    }

    /// Range that always samples to `value`.
    pub const fn fixed(value: i32) -> Self {
        Self {
            from: value,
            to: value,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.to == 0
    }

    /// Returns `self` unless it is unset, in which case `default` is used.
    pub fn or(self, default: RangeConfig) -> RangeConfig {
        if self.is_unset() {
            default
        } else {
            self
        }
    }

    /// Draw a value from the range using the OS random source.
    ///
    /// The values feed padding lengths and delays that must not be
    /// predictable on the wire. Callers guarantee `from <= to`.
    pub fn sample(&self) -> i32 {
        if self.from == self.to {
            return self.from;
        }
        OsRng.gen_range(self.from..self.to)
    }
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self::fixed(0)
    }
}
