//! Test helpers shared by the workspace crates.

use std::sync::atomic::{AtomicUsize, Ordering};

use arbitrary::{Arbitrary, Unstructured};
use rand::{rngs::OsRng, RngCore};

pub mod bitcoin;

/// Plenty for proposals with arbitrary titles and descriptions.
const ARB_GEN_LEN: usize = 1 << 20;

/// Produces arbitrary instances of types from a buffer of OS randomness.
pub struct ArbitraryGenerator {
    buf: Vec<u8>,
    off: AtomicUsize,
}

impl Default for ArbitraryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbitraryGenerator {
    pub fn new() -> Self {
        Self::new_with_size(ARB_GEN_LEN)
    }

    pub fn new_with_size(n: usize) -> Self {
        let mut buf = vec![0; n];
        OsRng.fill_bytes(&mut buf);
        ArbitraryGenerator {
            buf,
            off: AtomicUsize::new(0),
        }
    }

    /// Generates the next instance.  The generator can be shared, every call
    /// consumes a fresh part of the buffer.
    pub fn generate<'a, T: Arbitrary<'a> + Clone>(&'a self) -> T {
        let off = self.off.load(Ordering::Relaxed);
        let mut u = Unstructured::new(&self.buf[off..]);
        let before = u.len();
        let inst = T::arbitrary(&mut u).expect("test: arbitrary buffer exhausted");
        self.off.store(off + (before - u.len()), Ordering::Relaxed);
        inst
    }
}
