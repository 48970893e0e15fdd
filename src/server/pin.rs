// src/server/pin.rs

use rand::Rng;
use rand::rngs::OsRng;

/// Contiguous range of fixed-width numeric PINs.
///
/// The default space is `100000..=999999`: six digits, never a leading zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSpace {
    first: u32,
    size: u32,
    width: usize,
}

impl Default for PinSpace {
    fn default() -> Self {
        Self {
            first: 100_000,
            size: 900_000,
            width: 6,
        }
    }
}

impl PinSpace {
    /// A space of `size` consecutive values starting at `first`. Every value
    /// must render with the same number of digits as `first`.
    #[cfg(test)]
    pub(crate) fn new(first: u32, size: u32) -> Self {
        assert!(size > 0, "pin space must not be empty");
        let width = digit_count(first);
        let last = first.checked_add(size - 1).expect("pin space overflows u32");
        assert_eq!(digit_count(last), width, "pin space must be fixed-width");

        Self { first, size, width }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Uniform draw from the OS random source.
    pub fn generate(&self) -> String {
        let n = OsRng.gen_range(self.first..=self.first + (self.size - 1));
        format!("{n:0width$}", width = self.width)
    }

    /// True when `pin` is exactly `width` ASCII digits.
    pub fn is_well_formed(&self, pin: &str) -> bool {
        pin.len() == self.width && pin.bytes().all(|b| b.is_ascii_digit())
    }
}

#[cfg(test)]
fn digit_count(mut n: u32) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}
