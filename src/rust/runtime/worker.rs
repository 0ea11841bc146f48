// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Worker-thread collaborator used by the scheduler to run a function on a
//! given core's dedicated thread. The scheduler only depends on "launch and
//! observe completion": [CoreLauncher::launch] hands a function to the target
//! core's worker and fails with `EBUSY` while that worker is occupied, and
//! [CoreLauncher::wait] blocks until the worker has finished whatever it was
//! last handed. Workers are persistent, so a core can be started and stopped
//! repeatedly without respawning threads.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::crossbeam_channel::{
    self,
    Receiver,
    Sender,
};
use ::std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    thread::{
        self,
        JoinHandle,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A function body to run on a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over "run function F on core X's thread".
pub trait CoreLauncher: Send + Sync {
    /// Number of core slots this launcher can target.
    fn core_count(&self) -> usize;

    /// Hands `job` to the worker thread of core `core`. Fails with `EBUSY` if
    /// that worker is still running a previous job.
    fn launch(&self, core: usize, job: Job) -> Result<(), Fail>;

    /// Blocks until the worker thread of core `core` has finished its current
    /// job, if any.
    fn wait(&self, core: usize);
}

/// One persistent worker thread.
struct Worker {
    /// Submission side of the worker's job channel.
    job_tx: Sender<Job>,
    /// Set while the worker is executing a job.
    busy: Arc<AtomicBool>,
    /// Handle used to join the worker on teardown.
    handle: Option<JoinHandle<()>>,
}

/// A pool with one persistent worker thread per core slot.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl WorkerPool {
    /// Spawns one worker thread per core slot. Fails if the operating system
    /// refuses to spawn one of the threads.
    pub fn new(core_count: usize) -> Result<Self, Fail> {
        let mut workers: Vec<Worker> = Vec::with_capacity(core_count);
        for core in 0..core_count {
            let (job_tx, job_rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
            let busy: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
            let worker_busy: Arc<AtomicBool> = busy.clone();
            let handle: JoinHandle<()> = thread::Builder::new()
                .name(format!("catwheel-core-{}", core))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        job();
                        worker_busy.store(false, Ordering::SeqCst);
                    }
                })?;
            workers.push(Worker {
                job_tx,
                busy,
                handle: Some(handle),
            });
        }
        Ok(Self { workers })
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl CoreLauncher for WorkerPool {
    fn core_count(&self) -> usize {
        self.workers.len()
    }

    fn launch(&self, core: usize, job: Job) -> Result<(), Fail> {
        let worker: &Worker = match self.workers.get(core) {
            Some(worker) => worker,
            None => return Err(Fail::new(libc::EINVAL, "core out of range")),
        };

        // Claim the worker before handing it the job, so a second launch
        // against the same core observes it as occupied.
        if worker
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Fail::new(libc::EBUSY, "worker thread is occupied"));
        }

        if worker.job_tx.send(job).is_err() {
            worker.busy.store(false, Ordering::SeqCst);
            return Err(Fail::new(libc::EINVAL, "worker thread has shut down"));
        }

        Ok(())
    }

    fn wait(&self, core: usize) {
        if let Some(worker) = self.workers.get(core) {
            while worker.busy.load(Ordering::SeqCst) {
                thread::yield_now();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for mut worker in self.workers.drain(..) {
            // Closing the channel ends the worker's receive loop.
            drop(worker.job_tx);
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
