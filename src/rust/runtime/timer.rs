// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! High-resolution cycle counter used to timestamp service statistics. The
//! scheduler only needs "read a monotonic cycle count", so off x86_64 we fall
//! back to a nanosecond clock and call the result cycles.

//==============================================================================
// Imports
//==============================================================================

#[cfg(not(target_arch = "x86_64"))]
use ::std::{
    sync::OnceLock,
    time::Instant,
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Reads the current cycle count.
#[cfg(target_arch = "x86_64")]
pub fn rdtsc() -> u64 {
    let (cycles, _): (u64, u32) = unsafe { ::x86::time::rdtscp() };
    cycles
}

/// Reads the current cycle count.
#[cfg(not(target_arch = "x86_64"))]
pub fn rdtsc() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch: &Instant = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

//==============================================================================
// Unit Tests
//==============================================================================
