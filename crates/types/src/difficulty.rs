//! Compact difficulty encoding.
//!
//! Difficulty is stored in the bitcoin-style compact form: the high byte is
//! an exponent (target byte length), the low three bytes a mantissa. A block
//! header satisfies the difficulty when its hash, read as a big-endian
//! 256-bit integer, is at or below the expanded target.

use sbor::prelude::BasicSbor;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Hash;

/// Compact difficulty bits.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, BasicSbor, Serialize, Deserialize,
)]
pub struct Difficulty(pub u32);

impl Difficulty {
    /// Zero difficulty: no target, every hash satisfies it.
    pub const ZERO: Difficulty = Difficulty(0);

    /// Bootstrap difficulty used when the parent carries none.
    pub const BOOTSTRAP: Difficulty = Difficulty(0x1fff_ffff);

    /// The mining ceiling, roughly 2^253 - 1 in compact form.
    pub const POW_LIMIT: Difficulty = Difficulty(0x201f_ffff);

    /// Check whether this is the zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Expand the compact bits into a 32-byte big-endian target.
    pub fn target(&self) -> [u8; 32] {
        let mut target = [0u8; 32];
        if self.0 == 0 {
            return [0xff; 32];
        }
        let exponent = (self.0 >> 24) as usize;
        let mantissa = self.0 & 0x00ff_ffff;
        let bytes = mantissa.to_be_bytes();
        // Place the three mantissa bytes so that the target occupies
        // `exponent` bytes total.
        for (i, byte) in bytes[1..].iter().enumerate() {
            let pos = 32usize.wrapping_sub(exponent).wrapping_add(i);
            if pos < 32 {
                target[pos] = *byte;
            }
        }
        target
    }

    /// Check whether a hash satisfies this difficulty.
    pub fn is_met_by(&self, hash: &Hash) -> bool {
        hash.as_bytes() <= &self.target()
    }
}

impl fmt::Debug for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
