// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of the service-cores scheduler.
//!
//! The scheduler owns two fixed-size tables: one service slot per possible
//! service id and one core-state record per possible core. Control-plane
//! operations (register, map, core lifecycle) validate synchronously and
//! mutate the tables; started cores run [Scheduler::service_runner] on their
//! worker thread and poll their mapped services until told to stop.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::bitset64::Bitset64,
    config::Config,
    runtime::{
        fail::Fail,
        logging,
        timer,
        worker::{
            CoreLauncher,
            WorkerPool,
        },
    },
    scheduler::{
        core_state::{
            counter_add,
            CoreAttr,
            CoreState,
        },
        service::{
            RunState,
            ServiceAttr,
            ServiceId,
            ServiceOutcome,
            ServiceSlot,
            ServiceSpec,
            MAX_SERVICES,
            SERVICE_F_REGISTERED,
            SERVICE_F_START_CHECK,
            SERVICE_F_STATS_ENABLED,
        },
    },
};
use ::std::{
    fmt,
    io::Write,
    ops::Deref,
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Synthetic "every service selected" set used by direct single-shot
/// invocation, where membership checks must always pass.
static ALL_SERVICES: Bitset64 = Bitset64::full();

thread_local! {
    /// Scratch core record charged by direct single-shot invocations issued
    /// from this thread. Keeps the single-writer rule for statistics intact
    /// when an application thread that is not a service core runs a service.
    static APP_CORE_STATE: CoreState = CoreState::new();
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifier of a core slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CoreId(usize);

/// Service-Cores Scheduler
///
/// A single instance owns the service table and the core-state table for the
/// whole process. Mapping and lifecycle operations are meant to be driven
/// from one control thread; the data-plane paths (poll loop, run primitive,
/// statistics reads) are safe against them and against each other.
pub struct Scheduler {
    /// Service table, indexed by service id.
    services: Vec<ServiceSlot>,
    /// Core-state table, indexed by core id.
    cores: Vec<CoreState>,
    /// Role table: which core slots may become service cores.
    eligible: Vec<bool>,
    /// Number of currently registered services.
    service_count: AtomicU32,
    /// Collaborator that runs a function on a given core's worker thread.
    launcher: Box<dyn CoreLauncher>,
}

/// Cloneable handle to the [Scheduler], shared with every started core's
/// worker thread.
#[derive(Clone)]
pub struct SharedScheduler(Arc<Scheduler>);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SharedScheduler {
    /// Creates a scheduler with `core_slots` possible cores, all eligible to
    /// become service cores, backed by one worker thread per slot. Fails if
    /// the worker threads cannot be spawned.
    pub fn new(core_slots: usize) -> Result<Self, Fail> {
        Ok(Self::with_launcher(Box::new(WorkerPool::new(core_slots)?), vec![true; core_slots]))
    }

    /// Creates a scheduler from a configuration file, honoring its role table.
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        let core_slots: usize = config.core_count()?;
        let eligible: Vec<bool> = match config.service_cores()? {
            Some(cores) => {
                let mut eligible: Vec<bool> = vec![false; core_slots];
                for core in cores {
                    match eligible.get_mut(core) {
                        Some(slot) => *slot = true,
                        None => return Err(Fail::new(libc::EINVAL, "service core out of range")),
                    }
                }
                eligible
            },
            None => vec![true; core_slots],
        };
        Ok(Self::with_launcher(Box::new(WorkerPool::new(core_slots)?), eligible))
    }

    /// Creates a scheduler on top of an explicit launcher collaborator.
    pub fn with_launcher(launcher: Box<dyn CoreLauncher>, mut eligible: Vec<bool>) -> Self {
        logging::initialize();
        let core_slots: usize = launcher.core_count();
        eligible.resize(core_slots, false);
        let services: Vec<ServiceSlot> = (0..MAX_SERVICES).map(|_| ServiceSlot::new()).collect();
        let cores: Vec<CoreState> = (0..core_slots).map(|_| CoreState::new()).collect();
        Self(Arc::new(Scheduler {
            services,
            cores,
            eligible,
            service_count: AtomicU32::new(0),
            launcher,
        }))
    }

    /// Starts a service core: flips its run state to running and launches the
    /// poll loop on the core's worker thread. The run state is published
    /// before the launch so the loop's first check already observes running.
    pub fn start_core(&self, core: CoreId) -> Result<(), Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if !cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::EINVAL, "core is not a service core"));
        }
        if cs.runstate.load(Ordering::Acquire) == RunState::Running as u8 {
            return Err(Fail::new(libc::EALREADY, "core is already running"));
        }

        // A previously stopped poll loop may still be winding down on the
        // worker; let it finish so the relaunch below cannot collide with it.
        self.launcher.wait(usize::from(core));

        // Set the run state before launching, otherwise the poll loop would
        // observe stopped on its first check and return immediately.
        cs.runstate.store(RunState::Running as u8, Ordering::Release);

        debug!("start_core(): core={}", core);

        let scheduler: SharedScheduler = self.clone();
        let index: usize = usize::from(core);
        self.launcher.launch(index, Box::new(move || scheduler.service_runner(index)))
    }

    /// Starts every service core and distributes the registered services over
    /// them round-robin, enabling each service's application gate. Makes the
    /// scheduler transparent to applications that are unaware of it.
    pub fn start_with_defaults(&self) -> Result<(), Fail> {
        let cores: Vec<CoreId> = self.service_cores();
        if cores.is_empty() {
            return Err(Fail::new(libc::ENOTSUP, "no service cores added"));
        }

        for core in &cores {
            let _ = self.start_core(*core);
        }

        let mut next: usize = 0;
        for (index, slot) in self.services.iter().enumerate() {
            if !slot.registered() {
                continue;
            }
            let id: ServiceId = ServiceId::from(index);
            if self.map(id, cores[next], true).is_err() {
                return Err(Fail::new(libc::ENODEV, "failed to map service to a default core"));
            }
            next = (next + 1) % cores.len();
            if self.set_runstate(id, RunState::Running).is_err() {
                return Err(Fail::new(libc::ENOEXEC, "failed to enable service"));
            }
        }

        Ok(())
    }
}

impl Scheduler {
    /// Registers a service. Claims the first free slot in the service table;
    /// both halves of the enable gate default to stopped and the mapped-core
    /// start check is enabled.
    pub fn register(&self, spec: ServiceSpec) -> Result<ServiceId, Fail> {
        if spec.name().is_empty() {
            return Err(Fail::new(libc::EINVAL, "service name is empty"));
        }

        let mut free_slot: Option<usize> = None;
        for (index, slot) in self.services.iter().enumerate() {
            if slot.registered() {
                let guard = slot.spec.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(registered) = guard.as_ref() {
                    if registered.name() == spec.name() {
                        return Err(Fail::new(libc::EEXIST, "service name is already registered"));
                    }
                }
            } else if free_slot.is_none() {
                free_slot = Some(index);
            }
        }

        let index: usize = match free_slot {
            Some(index) => index,
            None => return Err(Fail::new(libc::ENOSPC, "service table is full")),
        };

        let slot: &ServiceSlot = &self.services[index];
        trace!("register(): name={} id={}", spec.name(), index);
        {
            let mut guard = slot.spec.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Some(spec);
        }
        slot.comp_runstate.store(RunState::Stopped as u8, Ordering::Release);
        slot.app_runstate.store(RunState::Stopped as u8, Ordering::Release);
        slot.update_flag(SERVICE_F_REGISTERED | SERVICE_F_START_CHECK, true);
        self.service_count.fetch_add(1, Ordering::Relaxed);

        Ok(ServiceId::from(index))
    }

    /// Unregisters a service: clears its bit from every core's mapped set,
    /// then zeroes the slot and frees the id for reuse. Blocks until any
    /// in-flight invocation of this service's callback has returned.
    pub fn unregister(&self, id: ServiceId) -> Result<(), Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        let index: usize = usize::from(id);

        trace!("unregister(): id={}", id);
        self.service_count.fetch_sub(1, Ordering::Relaxed);
        slot.update_flag(SERVICE_F_REGISTERED, false);

        // Clear the run-bit in all cores, leaving other services untouched.
        for cs in self.cores.iter() {
            cs.mapped_services.clear(index);
        }

        slot.reset();

        Ok(())
    }

    /// Sets the component-ready half of the enable gate. The store uses
    /// release ordering: state the caller published before this call is
    /// visible to a core that observes the flag with an acquire load.
    pub fn set_component_runstate(&self, id: ServiceId, runstate: RunState) -> Result<(), Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        slot.comp_runstate.store(runstate as u8, Ordering::Release);
        Ok(())
    }

    /// Sets the application-enabled half of the enable gate. Release store,
    /// same as [Self::set_component_runstate].
    pub fn set_runstate(&self, id: ServiceId, runstate: RunState) -> Result<(), Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        slot.app_runstate.store(runstate as u8, Ordering::Release);
        trace!("set_runstate(): id={} runstate={:?}", id, runstate);
        Ok(())
    }

    /// Reports whether the service is configured to run: both halves of the
    /// enable gate read running, and, unless the start check is disabled, the
    /// service is mapped to at least one core.
    pub fn runstate(&self, id: ServiceId) -> Result<bool, Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        Ok(Self::slot_runstate(slot))
    }

    /// Enables or disables statistics collection for a service.
    pub fn set_stats_enable(&self, id: ServiceId, enabled: bool) -> Result<(), Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        slot.update_flag(SERVICE_F_STATS_ENABLED, enabled);
        Ok(())
    }

    /// Enables or disables the mapped-core check applied by [Self::runstate].
    pub fn set_runstate_mapped_check(&self, id: ServiceId, enabled: bool) -> Result<(), Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        slot.update_flag(SERVICE_F_START_CHECK, enabled);
        Ok(())
    }

    /// Returns the number of registered services.
    pub fn count(&self) -> u32 {
        self.service_count.load(Ordering::Relaxed)
    }

    /// Looks a service up by name.
    pub fn get_by_name(&self, name: &str) -> Result<ServiceId, Fail> {
        for (index, slot) in self.services.iter().enumerate() {
            if !slot.registered() {
                continue;
            }
            let guard = slot.spec.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(spec) = guard.as_ref() {
                if spec.name() == name {
                    return Ok(ServiceId::from(index));
                }
            }
        }
        Err(Fail::new(libc::ENODEV, "no service registered under this name"))
    }

    /// Returns the name of a service.
    pub fn name(&self, id: ServiceId) -> Result<String, Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        let guard = slot.spec.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(spec) => Ok(spec.name().to_string()),
            None => Err(Fail::new(libc::EINVAL, "service is not registered")),
        }
    }

    /// Probes whether a service advertises `capability`.
    pub fn probe_capability(&self, id: ServiceId, capability: u32) -> Result<bool, Fail> {
        let slot: &ServiceSlot = self.slot(id)?;
        let guard = slot.spec.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(spec) => Ok(spec.capabilities() & capability != 0),
            None => Err(Fail::new(libc::EINVAL, "service is not registered")),
        }
    }

    /// Maps or unmaps a (service, core) pair. Idempotent: re-enabling an
    /// already-enabled pair leaves the mapped-core counter untouched.
    pub fn map(&self, id: ServiceId, core: CoreId, enabled: bool) -> Result<(), Fail> {
        trace!("map(): id={} core={} enabled={}", id, core, enabled);
        self.update_mapping(id, core, Some(enabled)).map(|_| ())
    }

    /// Reads whether a (service, core) pair is mapped.
    pub fn is_mapped(&self, id: ServiceId, core: CoreId) -> Result<bool, Fail> {
        self.update_mapping(id, core, None)
    }

    /// Turns a core into a service core. The core's mapped set is cleared and
    /// its run state set to stopped; the call waits for any previous worker
    /// activity on the core to fully quiesce before returning.
    pub fn add_core(&self, core: CoreId) -> Result<(), Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if !self.eligible[usize::from(core)] {
            return Err(Fail::new(libc::EINVAL, "core is not eligible to be a service core"));
        }
        if cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::EEXIST, "core is already a service core"));
        }

        debug!("add_core(): core={}", core);
        cs.is_service_core.store(true, Ordering::Relaxed);

        // Ensure that after adding a core the mask and state are defaults.
        cs.mapped_services.clear_all();
        cs.runstate.store(RunState::Stopped as u8, Ordering::Release);

        self.launcher.wait(usize::from(core));
        Ok(())
    }

    /// Removes a core from service duty. The core must be stopped.
    pub fn remove_core(&self, core: CoreId) -> Result<(), Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if !cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::EINVAL, "core is not a service core"));
        }
        if cs.runstate.load(Ordering::Acquire) != RunState::Stopped as u8 {
            return Err(Fail::new(libc::EBUSY, "core is running"));
        }

        debug!("remove_core(): core={}", core);
        cs.is_service_core.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Stops a service core cooperatively: the poll loop observes the flag at
    /// the top of its next pass and exits; this call does not wait for that.
    ///
    /// Refuses with `EBUSY` if any service mapped to this core is currently
    /// runnable and has no other mapped core, since stopping would make that
    /// service unschedulable anywhere.
    pub fn stop_core(&self, core: CoreId) -> Result<(), Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if cs.runstate.load(Ordering::Acquire) == RunState::Stopped as u8 {
            return Err(Fail::new(libc::EALREADY, "core is already stopped"));
        }

        for (index, slot) in self.services.iter().enumerate() {
            if !slot.registered() || !cs.mapped_services.test(index) {
                continue;
            }
            let only_core: bool = slot.num_mapped_cores.load(Ordering::Relaxed) == 1;
            if Self::slot_runstate(slot) && only_core {
                return Err(Fail::new(libc::EBUSY, "core is the only one mapped to a running service"));
            }
        }

        debug!("stop_core(): core={}", core);
        cs.runstate.store(RunState::Stopped as u8, Ordering::Release);
        Ok(())
    }

    /// Returns the total number of core slots, whether or not they are
    /// service cores.
    pub fn core_slots(&self) -> usize {
        self.cores.len()
    }

    /// Returns the number of service cores.
    pub fn service_core_count(&self) -> usize {
        self.cores
            .iter()
            .filter(|cs| cs.is_service_core.load(Ordering::Relaxed))
            .count()
    }

    /// Enumerates the service cores.
    pub fn service_cores(&self) -> Vec<CoreId> {
        self.cores
            .iter()
            .enumerate()
            .filter(|(_, cs)| cs.is_service_core.load(Ordering::Relaxed))
            .map(|(index, _)| CoreId::from(index))
            .collect()
    }

    /// Returns the number of services mapped to a core.
    pub fn core_count_services(&self, core: CoreId) -> Result<usize, Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if !cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::ENOTSUP, "core is not a service core"));
        }
        Ok(cs.mapped_services.count())
    }

    /// Unmaps everything, demotes every service core, and zeroes every
    /// service's mapped-core counter. Cores must be stopped by the caller.
    pub fn reset_all_cores(&self) {
        for cs in self.cores.iter() {
            if cs.is_service_core.load(Ordering::Relaxed) {
                cs.mapped_services.clear_all();
                cs.is_service_core.store(false, Ordering::Relaxed);
                cs.runstate.store(RunState::Stopped as u8, Ordering::Release);
            }
        }
        for slot in self.services.iter() {
            slot.num_mapped_cores.store(0, Ordering::Relaxed);
        }
    }

    /// Reports whether a service may still be executing on some core. True if
    /// any service core's active set contains the service.
    pub fn may_be_active(&self, id: ServiceId) -> Result<bool, Fail> {
        let index: usize = usize::from(self.slot_id(id)?);
        for cs in self.cores.iter() {
            if cs.is_service_core.load(Ordering::Relaxed) && cs.service_active.test(index) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reports whether a core's worker thread is still inside scheduling
    /// code. Pairs with the sequentially-consistent stores in the poll loop,
    /// so a false result means the thread has fully left it.
    pub fn core_may_be_active(&self, core: CoreId) -> Result<bool, Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if !cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::EINVAL, "core is not a service core"));
        }
        Ok(cs.thread_active.load(Ordering::Acquire))
    }

    /// Runs one service once, on the calling thread. The service's
    /// mapped-core counter is held incremented for the duration so that
    /// runnability bookkeeping stays correct. This is the only way a thread
    /// that is not a started service core participates in the scheduler.
    pub fn run_on_app_thread(&self, id: ServiceId, serialize: bool) -> Result<ServiceOutcome, Fail> {
        let slot: &ServiceSlot = self.slot(id)?;

        slot.num_mapped_cores.fetch_add(1, Ordering::Relaxed);
        let result: Result<ServiceOutcome, Fail> =
            APP_CORE_STATE.with(|cs| self.service_run(usize::from(id), cs, &ALL_SERVICES, serialize));
        slot.num_mapped_cores.fetch_sub(1, Ordering::Relaxed);

        result
    }

    /// Reads one of a service's statistics, summed over all service cores.
    /// Relaxed loads: the result is a best-effort snapshot.
    pub fn attr_get(&self, id: ServiceId, attr: ServiceAttr) -> Result<u64, Fail> {
        let index: usize = usize::from(self.slot_id(id)?);
        let mut sum: u64 = 0;
        for cs in self.cores.iter() {
            if !cs.is_service_core.load(Ordering::Relaxed) {
                continue;
            }
            let stats = &cs.stats[index];
            sum += match attr {
                ServiceAttr::Calls => stats.calls.load(Ordering::Relaxed),
                ServiceAttr::IdleCalls => stats.idle_calls.load(Ordering::Relaxed),
                ServiceAttr::ErrorCalls => stats.error_calls.load(Ordering::Relaxed),
                ServiceAttr::Cycles => stats.cycles.load(Ordering::Relaxed),
            };
        }
        Ok(sum)
    }

    /// Reads one of a core's statistics.
    pub fn core_attr_get(&self, core: CoreId, attr: CoreAttr) -> Result<u64, Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if !cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::ENOTSUP, "core is not a service core"));
        }
        Ok(match attr {
            CoreAttr::Loops => cs.loops.load(Ordering::Relaxed),
            CoreAttr::Cycles => cs.cycles.load(Ordering::Relaxed),
        })
    }

    /// Zeroes a service's statistics on every core. Not synchronized against
    /// concurrent increments.
    pub fn attr_reset_all(&self, id: ServiceId) -> Result<(), Fail> {
        let index: usize = usize::from(self.slot_id(id)?);
        for cs in self.cores.iter() {
            cs.stats[index].reset();
        }
        Ok(())
    }

    /// Zeroes a core's loop and cycle counters.
    pub fn core_attr_reset_all(&self, core: CoreId) -> Result<(), Fail> {
        let cs: &CoreState = self.core_state(core)?;
        if !cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::ENOTSUP, "core is not a service core"));
        }
        cs.loops.store(0, Ordering::Relaxed);
        cs.cycles.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a human-readable statistics summary for one service, or for
    /// every registered service and every service core when `id` is `None`.
    pub fn dump(&self, f: &mut dyn Write, id: Option<ServiceId>) -> Result<(), Fail> {
        if let Some(id) = id {
            let _ = self.slot(id)?;
            writeln!(f, "Service {} Summary", self.name(id)?)?;
            self.dump_one(f, id)?;
            return Ok(());
        }

        writeln!(f, "Services Summary")?;
        for (index, slot) in self.services.iter().enumerate() {
            if !slot.registered() {
                continue;
            }
            self.dump_one(f, ServiceId::from(index))?;
        }

        writeln!(f, "Service Cores Summary")?;
        for (core, cs) in self.cores.iter().enumerate() {
            if !cs.is_service_core.load(Ordering::Relaxed) {
                continue;
            }
            write!(f, "{:02}\t", core)?;
            for (index, slot) in self.services.iter().enumerate() {
                if !slot.registered() {
                    continue;
                }
                write!(f, "{}\t", cs.stats[index].calls.load(Ordering::Relaxed))?;
            }
            writeln!(f)?;
        }

        Ok(())
    }

    /// Poll loop, run once per started core on that core's worker thread.
    fn service_runner(&self, core: usize) {
        let cs: &CoreState = &self.cores[core];

        cs.thread_active.store(true, Ordering::SeqCst);

        // The core run state acts as the guard variable: the acquire load
        // synchronizes with the release store in start_core/stop_core.
        while cs.runstate.load(Ordering::Acquire) == RunState::Running as u8 {
            for index in cs.mapped_services.iter() {
                // Return value ignored: a skip or a runnable-check failure is
                // not an error at this level.
                let _ = self.service_run(index, cs, &cs.mapped_services, true);
            }
            counter_add(&cs.loops, 1);
        }

        // Switch off this core for all services, so that future calls to
        // may_be_active() know this core is switched off.
        cs.service_active.clear_all();

        // SeqCst keeps this store from being reordered with anything above:
        // once it is visible, the worker thread really is done in scheduling
        // code.
        cs.thread_active.store(false, Ordering::SeqCst);
    }

    /// Run primitive, shared by the poll loop and direct invocation. Checks
    /// runnability against the enable gate and `mask`, marks the service
    /// active on `cs`, serializes non-MT-safe callbacks when requested, and
    /// invokes the callback.
    fn service_run(
        &self,
        index: usize,
        cs: &CoreState,
        mask: &Bitset64,
        serialize: bool,
    ) -> Result<ServiceOutcome, Fail> {
        let slot: &ServiceSlot = &self.services[index];

        // The enable gate acts as the guard variables: acquire loads
        // synchronize with the release stores in the runstate setters.
        if slot.comp_runstate.load(Ordering::Acquire) != RunState::Running as u8
            || slot.app_runstate.load(Ordering::Acquire) != RunState::Running as u8
            || !mask.test(index)
        {
            cs.service_active.clear(index);
            return Err(Fail::new(libc::ENOEXEC, "service is not runnable"));
        }

        cs.service_active.set(index);

        let guard = slot.spec.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let spec: &ServiceSpec = match guard.as_ref() {
            Some(spec) => spec,
            None => {
                cs.service_active.clear(index);
                return Err(Fail::new(libc::ENOEXEC, "service is not runnable"));
            },
        };

        if !spec.mt_safe() && serialize {
            if !slot.execute_lock.trylock() {
                return Err(Fail::new(libc::EBUSY, "execute lock contended"));
            }
            let outcome: ServiceOutcome = self.do_callback(slot, spec, cs, index);
            slot.execute_lock.unlock();
            Ok(outcome)
        } else {
            Ok(self.do_callback(slot, spec, cs, index))
        }
    }

    /// Invokes the callback and, if statistics are enabled, classifies the
    /// outcome and accumulates cycles. Idle passes are counted but their
    /// duration is not charged.
    fn do_callback(&self, slot: &ServiceSlot, spec: &ServiceSpec, cs: &CoreState, index: usize) -> ServiceOutcome {
        if !slot.stats_enabled() {
            return spec.call();
        }

        let start: u64 = timer::rdtsc();
        let outcome: ServiceOutcome = spec.call();

        let stats = &cs.stats[index];
        counter_add(&stats.calls, 1);
        match outcome {
            ServiceOutcome::Idle => counter_add(&stats.idle_calls, 1),
            ServiceOutcome::Error => counter_add(&stats.error_calls, 1),
            ServiceOutcome::Success => (),
        }

        if outcome != ServiceOutcome::Idle {
            let cycles: u64 = timer::rdtsc().wrapping_sub(start);
            counter_add(&cs.cycles, cycles);
            counter_add(&stats.cycles, cycles);
        }

        outcome
    }

    /// Shared body of [Self::map] and [Self::is_mapped]: validates the pair,
    /// applies the requested mapping change, and reports the resulting state.
    fn update_mapping(&self, id: ServiceId, core: CoreId, set: Option<bool>) -> Result<bool, Fail> {
        let index: usize = usize::from(self.slot_id(id)?);
        let cs: &CoreState = self.core_state(core)?;
        if !cs.is_service_core.load(Ordering::Relaxed) {
            return Err(Fail::new(libc::EINVAL, "core is not a service core"));
        }
        let slot: &ServiceSlot = &self.services[index];

        if let Some(enabled) = set {
            let mapped: bool = cs.mapped_services.test(index);
            if enabled && !mapped {
                cs.mapped_services.set(index);
                slot.num_mapped_cores.fetch_add(1, Ordering::Relaxed);
            }
            if !enabled && mapped {
                cs.mapped_services.clear(index);
                slot.num_mapped_cores.fetch_sub(1, Ordering::Relaxed);
            }
        }

        Ok(cs.mapped_services.test(index))
    }

    /// Validates a service id and returns its slot.
    fn slot(&self, id: ServiceId) -> Result<&ServiceSlot, Fail> {
        let index: usize = usize::from(id);
        match self.services.get(index) {
            Some(slot) if slot.registered() => Ok(slot),
            _ => Err(Fail::new(libc::EINVAL, "service is not registered")),
        }
    }

    /// Validates a service id.
    fn slot_id(&self, id: ServiceId) -> Result<ServiceId, Fail> {
        self.slot(id).map(|_| id)
    }

    /// Validates a core id and returns its state record.
    fn core_state(&self, core: CoreId) -> Result<&CoreState, Fail> {
        match self.cores.get(usize::from(core)) {
            Some(cs) => Ok(cs),
            None => Err(Fail::new(libc::EINVAL, "core out of range")),
        }
    }

    /// Computes the two-phase gate plus start-check runnability of a slot.
    fn slot_runstate(slot: &ServiceSlot) -> bool {
        if slot.comp_runstate.load(Ordering::Acquire) == RunState::Running as u8
            && slot.app_runstate.load(Ordering::Acquire) == RunState::Running as u8
        {
            let check_disabled: bool = !slot.start_check();
            let core_mapped: bool = slot.num_mapped_cores.load(Ordering::Relaxed) > 0;
            check_disabled || core_mapped
        } else {
            false
        }
    }

    /// Writes the statistics summary line of one service.
    fn dump_one(&self, f: &mut dyn Write, id: ServiceId) -> Result<(), Fail> {
        let calls: u64 = self.attr_get(id, ServiceAttr::Calls)?;
        let cycles: u64 = self.attr_get(id, ServiceAttr::Cycles)?;
        let slot: &ServiceSlot = self.slot(id)?;

        // Avoid divide by zero.
        let denominator: u64 = if calls == 0 { 1 } else { calls };

        writeln!(
            f,
            "  {}: stats {}\tcalls {}\tcycles {}\tavg: {}",
            self.name(id)?,
            slot.stats_enabled() as u8,
            calls,
            cycles,
            cycles / denominator
        )?;
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<usize> for CoreId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<CoreId> for usize {
    fn from(value: CoreId) -> Self {
        value.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
