// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    fmt,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU32,
            AtomicU8,
            Ordering,
        },
        RwLock,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Maximum number of concurrently registered services.
pub const MAX_SERVICES: usize = 64;

/// Capability flag: the callback is safe to invoke concurrently from multiple
/// threads without external locking.
pub const CAP_MT_SAFE: u32 = 1 << 0;

/// Internal flag: the slot holds a registered service.
pub(crate) const SERVICE_F_REGISTERED: u8 = 1 << 0;

/// Internal flag: statistics are collected for this service.
pub(crate) const SERVICE_F_STATS_ENABLED: u8 = 1 << 1;

/// Internal flag: the service reports as running only while mapped to at
/// least one core.
pub(crate) const SERVICE_F_START_CHECK: u8 = 1 << 2;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifier of a registered service (an index into the service table).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ServiceId(usize);

/// Run states for services and cores.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunState {
    Stopped = 0,
    Running = 1,
}

/// Outcome of one callback invocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ServiceOutcome {
    /// The callback performed work.
    Success,
    /// The callback found nothing to do.
    Idle,
    /// The callback failed.
    Error,
}

/// Per-service statistics attributes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ServiceAttr {
    /// Number of callback invocations.
    Calls,
    /// Number of invocations that found nothing to do.
    IdleCalls,
    /// Number of invocations that failed.
    ErrorCalls,
    /// Cycles consumed by callback invocations.
    Cycles,
}

/// A service callback body.
pub type ServiceCallback = Box<dyn Fn() -> ServiceOutcome + Send + Sync + 'static>;

/// Public description of a service, handed to the scheduler at registration.
pub struct ServiceSpec {
    /// Name of the service, unique among registered services.
    name: String,
    /// Work function, polled on whatever core(s) the service gets mapped to.
    callback: ServiceCallback,
    /// Capability flags (see [CAP_MT_SAFE]).
    capabilities: u32,
}

/// Non-blocking lock serializing callback invocations of a service that is
/// not multi-thread safe. Contenders never wait: a failed acquisition means
/// the calling core skips the service this pass.
pub(crate) struct ExecuteLock(AtomicBool);

/// Internal representation of a service table slot.
pub(crate) struct ServiceSlot {
    /// Spec of the registered service, if any. The run primitive invokes the
    /// callback under the read guard; unregister takes the write guard and
    /// thereby waits out any in-flight invocation.
    pub(crate) spec: RwLock<Option<ServiceSpec>>,
    /// Internal SERVICE_F_* flags.
    pub(crate) flags: AtomicU8,
    /// Component half of the enable gate, set by the service implementation.
    pub(crate) comp_runstate: AtomicU8,
    /// Application half of the enable gate, set by the orchestrating code.
    pub(crate) app_runstate: AtomicU8,
    /// How many cores currently have this service in their mapped set. Not
    /// how many cores are running it right now.
    pub(crate) num_mapped_cores: AtomicU32,
    /// Serializes non-MT-safe callback invocations.
    pub(crate) execute_lock: ExecuteLock,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ServiceSpec {
    /// Describes a service named `name` whose work function is `callback`.
    pub fn new(name: &str, callback: ServiceCallback, capabilities: u32) -> Self {
        Self {
            name: name.to_string(),
            callback,
            capabilities,
        }
    }

    /// Returns the name of the target service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the capability flags of the target service.
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// Returns whether the target service may be invoked concurrently from
    /// multiple threads.
    pub fn mt_safe(&self) -> bool {
        self.capabilities & CAP_MT_SAFE != 0
    }

    /// Invokes the work function once.
    pub(crate) fn call(&self) -> ServiceOutcome {
        (self.callback)()
    }
}

impl ExecuteLock {
    pub(crate) const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Attempts to acquire the lock without blocking.
    pub(crate) fn trylock(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock.
    pub(crate) fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ServiceSlot {
    pub(crate) fn new() -> Self {
        Self {
            spec: RwLock::new(None),
            flags: AtomicU8::new(0),
            comp_runstate: AtomicU8::new(RunState::Stopped as u8),
            app_runstate: AtomicU8::new(RunState::Stopped as u8),
            num_mapped_cores: AtomicU32::new(0),
            execute_lock: ExecuteLock::new(),
        }
    }

    /// Returns whether the slot holds a registered service.
    pub(crate) fn registered(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & SERVICE_F_REGISTERED != 0
    }

    /// Returns whether statistics are collected for this service.
    pub(crate) fn stats_enabled(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & SERVICE_F_STATS_ENABLED != 0
    }

    /// Returns whether the mapped-core check applies when reporting the
    /// service's run state.
    pub(crate) fn start_check(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & SERVICE_F_START_CHECK != 0
    }

    /// Sets or clears one of the SERVICE_F_* flags.
    pub(crate) fn update_flag(&self, flag: u8, enabled: bool) {
        if enabled {
            self.flags.fetch_or(flag, Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!flag, Ordering::Relaxed);
        }
    }

    /// Returns the slot to its zeroed, unregistered state. The caller is
    /// responsible for having cleared the service's bit from every core's
    /// mapped set first.
    pub(crate) fn reset(&self) {
        self.flags.store(0, Ordering::Relaxed);
        self.comp_runstate.store(RunState::Stopped as u8, Ordering::Release);
        self.app_runstate.store(RunState::Stopped as u8, Ordering::Release);
        self.num_mapped_cores.store(0, Ordering::Relaxed);
        let mut spec = self.spec.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *spec = None;
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for ServiceId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<ServiceId> for usize {
    fn from(value: ServiceId) -> Self {
        value.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
