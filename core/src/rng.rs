//! Deterministic random number generation for synthetic data.
//!
//! RULE: Synthetic data never touches a platform RNG. Every draw comes from a
//! StreamRng derived from the generator seed and a stable stream slot, so
//! adding a stream never shifts the values another stream produces.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct StreamRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StreamRng {
    pub fn new(seed: u64, slot: StreamSlot) -> Self {
        let derived = seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            name: slot.name(),
            inner: Pcg64Mcg::seed_from_u64(derived),
        }
    }

    /// Float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        (self.inner.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Integer in [0, n). `n == 0` yields 0.
    pub fn below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.inner.next_u64() % n
    }

    /// Float in [lo, hi).
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// True with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.below(items.len() as u64) as usize)
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StreamSlot {
    People = 0,
    Plans = 1,
    Enrollments = 2,
    Payroll = 3,
    Faults = 4,
}

impl StreamSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::People => "people",
            Self::Plans => "plans",
            Self::Enrollments => "enrollments",
            Self::Payroll => "payroll",
            Self::Faults => "faults",
        }
    }
}
