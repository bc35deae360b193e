//! Utilities for working with raw byte units.

use core::fmt;

/// `1 KiB`
pub const KIB: usize = 1 << 10;
/// `1 MiB`
pub const MIB: usize = 1 << 20;
/// `1 GiB`
pub const GIB: usize = 1 << 30;

/// Wrapper around a raw byte count that pretty-prints it
/// using the [`Display`](core::fmt::Display) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteUnit(pub usize);

/// Wrap the given number of bytes so it is displayed with a unit.
pub fn bytes(count: usize) -> ByteUnit {
    ByteUnit(count)
}

impl fmt::Display for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.0 as f32;

        match self.0 {
            0..KIB => write!(f, "{} B", self.0),
            KIB..MIB => write!(f, "{:.2} KiB", count / KIB as f32),
            MIB..GIB => write!(f, "{:.2} MiB", count / MIB as f32),
            _ => write!(f, "{:.2} GiB", count / GIB as f32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_picks_unit() {
        assert_eq!(bytes(512).to_string(), "512 B");
        assert_eq!(bytes(4 * KIB).to_string(), "4.00 KiB");
        assert_eq!(bytes(3 * MIB / 2).to_string(), "1.50 MiB");
        assert_eq!(bytes(2 * GIB).to_string(), "2.00 GiB");
    }
}
