//! Replication log cursor.

use crate::error::{ProtocolError, ProtocolResult};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A position in the replication log.
///
/// Ticks travel as decimal strings and can exceed `u64`, so they are kept
/// as text. Leading zeros are stripped on parse, which lets ordering compare
/// digit count first and digits second.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tick(String);

impl Tick {
    /// Parses a tick from its decimal representation.
    pub fn parse(value: &str) -> ProtocolResult<Self> {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidTick(value.to_string()));
        }
        let stripped = value.trim_start_matches('0');
        if stripped.is_empty() {
            Ok(Self("0".into()))
        } else {
            Ok(Self(stripped.to_string()))
        }
    }

    /// The zero tick. Upstream uses it to mean "nothing included".
    pub fn zero() -> Self {
        Self("0".into())
    }

    /// Returns true for the zero tick.
    pub fn is_zero(&self) -> bool {
        self.0 == "0"
    }

    /// Returns the decimal representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for Tick {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Tick {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tick {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for Tick {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_strips_leading_zeros() {
        assert_eq!(Tick::parse("000105").unwrap().as_str(), "105");
        assert_eq!(Tick::parse("000").unwrap(), Tick::zero());
        assert!(Tick::parse("0").unwrap().is_zero());
    }

    #[test]
    fn parse_rejects_non_digits() {
        assert!(Tick::parse("").is_err());
        assert!(Tick::parse("12a").is_err());
        assert!(Tick::parse("-5").is_err());
    }

    #[test]
    fn ordering_beyond_u64() {
        let big = Tick::parse("184467440737095516150").unwrap();
        let small = Tick::from(u64::MAX);
        assert!(big > small);
        assert!(Tick::parse("99").unwrap() < Tick::parse("100").unwrap());
    }

    proptest! {
        #[test]
        fn ordering_matches_numeric(a in any::<u64>(), b in any::<u64>()) {
            let ta = Tick::from(a);
            let tb = Tick::from(b);
            prop_assert_eq!(ta.cmp(&tb), a.cmp(&b));
        }

        #[test]
        fn display_round_trips(a in any::<u64>()) {
            let tick = Tick::from(a);
            prop_assert_eq!(Tick::parse(&tick.to_string()).unwrap(), tick);
        }
    }
}
