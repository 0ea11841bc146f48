// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::bitset64::Bitset64,
    scheduler::service::{
        RunState,
        MAX_SERVICES,
    },
};
use ::std::sync::atomic::{
    AtomicBool,
    AtomicU64,
    AtomicU8,
    Ordering,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Per-core statistics attributes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoreAttr {
    /// Number of passes of the poll loop.
    Loops,
    /// Cycles consumed by callback invocations on this core.
    Cycles,
}

/// Statistics a core keeps for one service.
#[derive(Default)]
pub(crate) struct ServiceStats {
    pub(crate) calls: AtomicU64,
    pub(crate) idle_calls: AtomicU64,
    pub(crate) error_calls: AtomicU64,
    pub(crate) cycles: AtomicU64,
}

/// Internal state of one core slot, whether or not the core is currently a
/// service core. Statistics are written only by the owning core's worker
/// thread (single writer) but may be read from any thread.
pub(crate) struct CoreState {
    /// Set while the core is a service core.
    pub(crate) is_service_core: AtomicBool,
    /// Cooperative start/stop signal for the poll loop.
    pub(crate) runstate: AtomicU8,
    /// Set only while the poll-loop body is executing on the worker thread.
    /// Distinct from `runstate`: used to detect full quiescence after a stop.
    pub(crate) thread_active: AtomicBool,
    /// Services mapped to run on this core.
    pub(crate) mapped_services: Bitset64,
    /// Services that executed in the current pass, for observability.
    pub(crate) service_active: Bitset64,
    /// Number of poll-loop passes.
    pub(crate) loops: AtomicU64,
    /// Cycles consumed by callbacks on this core.
    pub(crate) cycles: AtomicU64,
    /// Per-service statistics, one slot per service id.
    pub(crate) stats: [ServiceStats; MAX_SERVICES],
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ServiceStats {
    /// Zeroes all counters. Not synchronized against a concurrent increment;
    /// a reset racing an in-flight increment may lose that one increment.
    pub(crate) fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.idle_calls.store(0, Ordering::Relaxed);
        self.error_calls.store(0, Ordering::Relaxed);
        self.cycles.store(0, Ordering::Relaxed);
    }
}

impl CoreState {
    pub(crate) fn new() -> Self {
        Self {
            is_service_core: AtomicBool::new(false),
            runstate: AtomicU8::new(RunState::Stopped as u8),
            thread_active: AtomicBool::new(false),
            mapped_services: Bitset64::new(),
            service_active: Bitset64::new(),
            loops: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            stats: std::array::from_fn(|_| ServiceStats::default()),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Adds `operand` to a single-writer statistics counter. The owning core's
/// worker thread is the only writer, so a non-atomic read-modify-write
/// expressed as a relaxed load followed by a relaxed store suffices, and the
/// more expensive atomic add is avoided.
pub(crate) fn counter_add(counter: &AtomicU64, operand: u64) {
    let value: u64 = counter.load(Ordering::Relaxed);
    counter.store(value.wrapping_add(operand), Ordering::Relaxed);
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
