// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::bit_iter::BitIter;
use ::std::sync::atomic::{
    AtomicU64,
    Ordering,
};

//==============================================================================
// Constants
//==============================================================================

/// Log2 of [BITSET_BIT_LENGTH].
pub const BITSET_BIT_LENGTH_SHIFT: usize = 6;

/// Number of bits in a [Bitset64].
pub const BITSET_BIT_LENGTH: usize = 1 << BITSET_BIT_LENGTH_SHIFT;

//==============================================================================
// Structures
//==============================================================================

/// 64-Bit Set
///
/// A fixed-capacity set of small integers packed into a single machine word.
/// Membership updates use relaxed atomics: the set itself is the only datum
/// being communicated, so no ordering with surrounding state is implied.
pub struct Bitset64(AtomicU64);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for 64-Bit Sets
impl Bitset64 {
    /// Creates an empty [Bitset64].
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Creates a [Bitset64] with all bits set.
    pub const fn full() -> Self {
        Self(AtomicU64::new(u64::MAX))
    }

    /// Inserts `bit` into the target [Bitset64].
    pub fn set(&self, bit: usize) {
        debug_assert!(bit < BITSET_BIT_LENGTH);
        self.0.fetch_or(1 << bit, Ordering::Relaxed);
    }

    /// Removes `bit` from the target [Bitset64].
    pub fn clear(&self, bit: usize) {
        debug_assert!(bit < BITSET_BIT_LENGTH);
        self.0.fetch_and(!(1 << bit), Ordering::Relaxed);
    }

    /// Tests whether `bit` is in the target [Bitset64].
    pub fn test(&self, bit: usize) -> bool {
        debug_assert!(bit < BITSET_BIT_LENGTH);
        self.0.load(Ordering::Relaxed) & (1 << bit) != 0
    }

    /// Removes all bits from the target [Bitset64].
    pub fn clear_all(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    /// Returns the number of bits in the target [Bitset64].
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed).count_ones() as usize
    }

    /// Returns an iterator over the bits in the target [Bitset64], as of the
    /// moment of the call.
    pub fn iter(&self) -> BitIter<u64> {
        BitIter::from(self.0.load(Ordering::Relaxed))
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Default Trait Implementation for 64-Bit Sets
impl Default for Bitset64 {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
