//! Identifiers for benchmarks and workpackages.
//!
//! Benchmarks and workpackages are identified by monotonically
//! increasing integers, zero-padded for directory naming (spec
//! Section 3, "Benchmark").

use std::fmt;

/// A monotonically increasing integer id, rendered zero-padded for
/// use in directory names (`bench_padid`, `wp_padid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Id(pub u64);

impl Id {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Zero-padded representation, e.g. `000007`, used for directory names.
    pub fn padded(&self, width: usize) -> String {
        format!("{:0width$}", self.0, width = width)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_widens_with_zeros() {
        assert_eq!(Id::new(7).padded(6), "000007");
        assert_eq!(Id::new(123456).padded(6), "123456");
    }

    #[test]
    fn display_is_bare_number() {
        assert_eq!(Id::new(42).to_string(), "42");
    }
}
