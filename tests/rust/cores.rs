// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::catwheel::{
    ensure_eq,
    CoreAttr,
    CoreId,
    RunState,
    ServiceAttr,
    ServiceId,
    ServiceOutcome,
    ServiceSpec,
    SharedScheduler,
    CAP_MT_SAFE,
};
use ::std::{
    sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
        Arc,
    },
    thread,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Constants
//==============================================================================

/// Number of core slots used by these tests.
const CORE_SLOTS: usize = 4;

/// How long started cores are left polling before assertions.
const POLL_WINDOW: Duration = Duration::from_millis(100);

/// Upper bound on waits for asynchronous state changes.
const QUIESCE_TIMEOUT: Duration = Duration::from_secs(5);

//==============================================================================
// Helpers
//==============================================================================

/// Builds a multi-thread-safe service spec whose callback always reports idle.
fn idle_spec(name: &str) -> ServiceSpec {
    ServiceSpec::new(name, Box::new(|| ServiceOutcome::Idle), CAP_MT_SAFE)
}

/// Blocks until a stopped core's worker thread has fully left scheduling code.
fn wait_quiesce(scheduler: &SharedScheduler, core: CoreId) -> Result<()> {
    let deadline: Instant = Instant::now() + QUIESCE_TIMEOUT;
    while scheduler.core_may_be_active(core)? {
        if Instant::now() > deadline {
            anyhow::bail!("core {} did not quiesce", core);
        }
        thread::yield_now();
    }
    Ok(())
}

//==============================================================================
// Unit Tests
//==============================================================================

/// Tests idempotency violations of the core add/remove operations.
#[test]
fn add_and_remove_core_are_not_idempotent() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;
    let core: CoreId = CoreId::from(1);

    scheduler.add_core(core)?;
    match scheduler.add_core(core) {
        Err(fail) => ensure_eq!(fail.errno, libc::EEXIST),
        Ok(()) => anyhow::bail!("second add_core should have failed"),
    }
    ensure_eq!(scheduler.service_core_count(), 1);

    scheduler.remove_core(core)?;
    match scheduler.remove_core(core) {
        Err(fail) => ensure_eq!(fail.errno, libc::EINVAL),
        Ok(()) => anyhow::bail!("second remove_core should have failed"),
    }
    ensure_eq!(scheduler.service_core_count(), 0);

    match scheduler.add_core(CoreId::from(CORE_SLOTS)) {
        Err(fail) => ensure_eq!(fail.errno, libc::EINVAL),
        Ok(()) => anyhow::bail!("out-of-range add_core should have failed"),
    }

    Ok(())
}

/// Tests start/stop idempotency violations and removal of a running core.
#[test]
fn start_and_stop_core_are_not_idempotent() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;
    let core: CoreId = CoreId::from(0);

    match scheduler.start_core(core) {
        Err(fail) => ensure_eq!(fail.errno, libc::EINVAL),
        Ok(()) => anyhow::bail!("core 0 is not a service core yet"),
    }

    scheduler.add_core(core)?;
    match scheduler.stop_core(core) {
        Err(fail) => ensure_eq!(fail.errno, libc::EALREADY),
        Ok(()) => anyhow::bail!("stopping a stopped core should have failed"),
    }

    scheduler.start_core(core)?;
    match scheduler.start_core(core) {
        Err(fail) => ensure_eq!(fail.errno, libc::EALREADY),
        Ok(()) => anyhow::bail!("second start_core should have failed"),
    }

    // A running core cannot be removed from service duty.
    match scheduler.remove_core(core) {
        Err(fail) => ensure_eq!(fail.errno, libc::EBUSY),
        Ok(()) => anyhow::bail!("removing a running core should have failed"),
    }

    scheduler.stop_core(core)?;
    wait_quiesce(&scheduler, core)?;
    scheduler.remove_core(core)?;

    Ok(())
}

/// Tests that stopping the only core mapped to a runnable service fails with
/// EBUSY, and succeeds once the service is disabled or mapped elsewhere.
#[test]
fn no_orphaned_stop() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;
    let id: ServiceId = scheduler.register(idle_spec("precious"))?;
    let core_a: CoreId = CoreId::from(0);
    let core_b: CoreId = CoreId::from(1);
    scheduler.add_core(core_a)?;
    scheduler.add_core(core_b)?;

    scheduler.map(id, core_a, true)?;
    scheduler.set_component_runstate(id, RunState::Running)?;
    scheduler.set_runstate(id, RunState::Running)?;
    scheduler.start_core(core_a)?;

    // Sole home of a runnable service: refuse.
    match scheduler.stop_core(core_a) {
        Err(fail) => ensure_eq!(fail.errno, libc::EBUSY),
        Ok(()) => anyhow::bail!("stop should have been refused"),
    }

    // A second mapped core makes the stop safe.
    scheduler.map(id, core_b, true)?;
    scheduler.stop_core(core_a)?;
    wait_quiesce(&scheduler, core_a)?;

    // Back to sole home (now core_b); disabling the service unblocks the stop.
    scheduler.map(id, core_a, false)?;
    scheduler.start_core(core_b)?;
    match scheduler.stop_core(core_b) {
        Err(fail) => ensure_eq!(fail.errno, libc::EBUSY),
        Ok(()) => anyhow::bail!("stop should have been refused"),
    }
    scheduler.set_runstate(id, RunState::Stopped)?;
    scheduler.stop_core(core_b)?;
    wait_quiesce(&scheduler, core_b)?;

    Ok(())
}

/// Tests the end-to-end scenario: a mapped, enabled, statistics-enabled idle
/// service accumulates idle calls and no errors while its core polls.
#[test]
fn end_to_end_idle_service() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;
    let id: ServiceId = scheduler.register(idle_spec("idler"))?;
    let core: CoreId = CoreId::from(3);

    scheduler.set_stats_enable(id, true)?;
    scheduler.add_core(core)?;
    scheduler.map(id, core, true)?;
    scheduler.set_component_runstate(id, RunState::Running)?;
    scheduler.set_runstate(id, RunState::Running)?;
    scheduler.start_core(core)?;

    thread::sleep(POLL_WINDOW);

    assert!(scheduler.attr_get(id, ServiceAttr::Calls)? > 0);
    assert!(scheduler.attr_get(id, ServiceAttr::IdleCalls)? > 0);
    ensure_eq!(scheduler.attr_get(id, ServiceAttr::ErrorCalls)?, 0);
    assert!(scheduler.core_attr_get(core, CoreAttr::Loops)? > 0);

    // Disable the service first, exercising the stop-succeeds branch.
    scheduler.set_runstate(id, RunState::Stopped)?;
    scheduler.stop_core(core)?;
    wait_quiesce(&scheduler, core)?;
    ensure_eq!(scheduler.may_be_active(id)?, false);

    // Counters survive the stop and can be reset.
    assert!(scheduler.attr_get(id, ServiceAttr::Calls)? > 0);
    scheduler.attr_reset_all(id)?;
    ensure_eq!(scheduler.attr_get(id, ServiceAttr::Calls)?, 0);
    scheduler.core_attr_reset_all(core)?;
    ensure_eq!(scheduler.core_attr_get(core, CoreAttr::Loops)?, 0);

    Ok(())
}

/// Tests that a non-MT-safe service mapped to two started cores never has its
/// callback body executing on both cores at once.
#[test]
fn mt_unsafe_callbacks_never_overlap() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;

    let in_body: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    let overlapped: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    let calls: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));

    let cb_in_body: Arc<AtomicBool> = in_body.clone();
    let cb_overlapped: Arc<AtomicBool> = overlapped.clone();
    let cb_calls: Arc<AtomicU64> = calls.clone();
    let spec: ServiceSpec = ServiceSpec::new(
        "exclusive",
        Box::new(move || {
            if cb_in_body.swap(true, Ordering::SeqCst) {
                cb_overlapped.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(50));
            cb_in_body.store(false, Ordering::SeqCst);
            cb_calls.fetch_add(1, Ordering::SeqCst);
            ServiceOutcome::Success
        }),
        0,
    );

    let id: ServiceId = scheduler.register(spec)?;
    let core_a: CoreId = CoreId::from(0);
    let core_b: CoreId = CoreId::from(1);
    scheduler.add_core(core_a)?;
    scheduler.add_core(core_b)?;
    scheduler.map(id, core_a, true)?;
    scheduler.map(id, core_b, true)?;
    scheduler.set_component_runstate(id, RunState::Running)?;
    scheduler.set_runstate(id, RunState::Running)?;
    scheduler.start_core(core_a)?;
    scheduler.start_core(core_b)?;

    thread::sleep(POLL_WINDOW);

    scheduler.set_runstate(id, RunState::Stopped)?;
    scheduler.stop_core(core_a)?;
    scheduler.stop_core(core_b)?;
    wait_quiesce(&scheduler, core_a)?;
    wait_quiesce(&scheduler, core_b)?;

    assert!(calls.load(Ordering::SeqCst) > 0);
    ensure_eq!(overlapped.load(Ordering::SeqCst), false);

    Ok(())
}

/// Tests that unregister waits out an in-flight invocation of the service's
/// callback before returning.
#[test]
fn unregister_waits_for_inflight_callback() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;

    let in_body: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    let cb_in_body: Arc<AtomicBool> = in_body.clone();
    let spec: ServiceSpec = ServiceSpec::new(
        "slowpoke",
        Box::new(move || {
            cb_in_body.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            cb_in_body.store(false, Ordering::SeqCst);
            ServiceOutcome::Success
        }),
        CAP_MT_SAFE,
    );

    let id: ServiceId = scheduler.register(spec)?;
    let core: CoreId = CoreId::from(2);
    scheduler.add_core(core)?;
    scheduler.map(id, core, true)?;
    scheduler.set_component_runstate(id, RunState::Running)?;
    scheduler.set_runstate(id, RunState::Running)?;
    scheduler.start_core(core)?;

    // Wait until the callback is demonstrably executing.
    let deadline: Instant = Instant::now() + QUIESCE_TIMEOUT;
    while !in_body.load(Ordering::SeqCst) {
        if Instant::now() > deadline {
            anyhow::bail!("callback never started");
        }
        thread::yield_now();
    }

    scheduler.unregister(id)?;
    ensure_eq!(in_body.load(Ordering::SeqCst), false);

    // The service is gone, so the core's stop is unobstructed.
    scheduler.stop_core(core)?;
    wait_quiesce(&scheduler, core)?;

    Ok(())
}

/// Tests default startup: every service core starts and registered services
/// are distributed over them with their application gate enabled.
#[test]
fn start_with_defaults_distributes_services() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;

    match scheduler.start_with_defaults() {
        Err(fail) => ensure_eq!(fail.errno, libc::ENOTSUP),
        Ok(()) => anyhow::bail!("no service cores were added yet"),
    }

    let id: ServiceId = scheduler.register(idle_spec("defaulted"))?;
    scheduler.set_stats_enable(id, true)?;
    scheduler.set_component_runstate(id, RunState::Running)?;
    let core: CoreId = CoreId::from(0);
    scheduler.add_core(core)?;

    scheduler.start_with_defaults()?;
    ensure_eq!(scheduler.is_mapped(id, core)?, true);

    thread::sleep(POLL_WINDOW);
    assert!(scheduler.attr_get(id, ServiceAttr::IdleCalls)? > 0);

    scheduler.set_runstate(id, RunState::Stopped)?;
    scheduler.stop_core(core)?;
    wait_quiesce(&scheduler, core)?;

    Ok(())
}

/// Tests that reset_all_cores unmaps everything, demotes every service core,
/// and zeroes the mapped-core counters, leaving the slots re-addable.
#[test]
fn reset_all_cores_clears_mappings_and_roles() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;
    let id_a: ServiceId = scheduler.register(idle_spec("left"))?;
    let id_b: ServiceId = scheduler.register(idle_spec("right"))?;
    let core_a: CoreId = CoreId::from(0);
    let core_b: CoreId = CoreId::from(1);
    scheduler.add_core(core_a)?;
    scheduler.add_core(core_b)?;
    scheduler.map(id_a, core_a, true)?;
    scheduler.map(id_a, core_b, true)?;
    scheduler.map(id_b, core_b, true)?;
    scheduler.set_component_runstate(id_a, RunState::Running)?;
    scheduler.set_runstate(id_a, RunState::Running)?;
    ensure_eq!(scheduler.runstate(id_a)?, true);

    scheduler.reset_all_cores();

    ensure_eq!(scheduler.service_core_count(), 0);

    // The mapped-core counters were zeroed, so the start check fails again.
    ensure_eq!(scheduler.runstate(id_a)?, false);

    // The slots come back as ordinary, freshly added service cores.
    scheduler.add_core(core_a)?;
    scheduler.add_core(core_b)?;
    ensure_eq!(scheduler.core_count_services(core_a)?, 0);
    ensure_eq!(scheduler.core_count_services(core_b)?, 0);
    ensure_eq!(scheduler.is_mapped(id_a, core_a)?, false);
    ensure_eq!(scheduler.is_mapped(id_b, core_b)?, false);

    Ok(())
}

/// Tests that a stopped core can be started again and polls again.
#[test]
fn core_restarts_after_stop() -> Result<()> {
    let scheduler: SharedScheduler = SharedScheduler::new(CORE_SLOTS)?;
    let id: ServiceId = scheduler.register(idle_spec("phoenix"))?;
    let core: CoreId = CoreId::from(1);

    scheduler.set_stats_enable(id, true)?;
    scheduler.add_core(core)?;
    scheduler.map(id, core, true)?;
    scheduler.set_component_runstate(id, RunState::Running)?;
    scheduler.set_runstate(id, RunState::Running)?;

    for _ in 0..2 {
        scheduler.start_core(core)?;
        thread::sleep(POLL_WINDOW);
        scheduler.set_runstate(id, RunState::Stopped)?;
        scheduler.stop_core(core)?;
        wait_quiesce(&scheduler, core)?;
        scheduler.set_runstate(id, RunState::Running)?;
    }

    assert!(scheduler.attr_get(id, ServiceAttr::IdleCalls)? > 0);

    scheduler.set_runstate(id, RunState::Stopped)?;
    Ok(())
}
