// src/core/lsn.rs

//! A 64-bit write-ahead-log position.
//!
//! Positions are compared numerically. The textual `XXXXXXXX/XXXXXXXX` form
//! is only a display convention; ordering a pair of positions by their string
//! representation is wrong (`0/FF` sorts after `0/100`) and is never done here.

use crate::core::errors::RepGuardError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A position in the engine's write-ahead log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The invalid position, reported by the engine before any WAL has been
    /// received or replayed.
    pub const INVALID: Lsn = Lsn(0);

    pub fn is_valid(self) -> bool {
        self != Lsn::INVALID
    }

    /// Byte distance from `other` up to `self`; zero when `other` is ahead.
    pub fn saturating_diff(self, other: Lsn) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl FromStr for Lsn {
    type Err = RepGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| RepGuardError::Protocol(format!("malformed LSN '{s}'")))?;
        let hi = u64::from_str_radix(hi, 16)
            .map_err(|_| RepGuardError::Protocol(format!("malformed LSN '{s}'")))?;
        let lo = u64::from_str_radix(lo, 16)
            .map_err(|_| RepGuardError::Protocol(format!("malformed LSN '{s}'")))?;
        if hi > u32::MAX as u64 || lo > u32::MAX as u64 {
            return Err(RepGuardError::Protocol(format!("LSN '{s}' out of range")));
        }
        Ok(Lsn((hi << 32) | lo))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}
