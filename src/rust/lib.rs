// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Catwheel is a service-cores scheduler for kernel-bypass packet processing.
//!
//! Components register recurring units of work ("services") and a pool of
//! worker threads, pinned one-to-one to service cores, polls them round-robin.
//! A service runs only when both halves of its enable gate (component-ready
//! and application-enabled) are set, and non-thread-safe services are
//! serialized through a non-blocking execute lock.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod collections;
pub mod config;
pub mod runtime;
pub mod scheduler;

pub use crate::{
    config::Config,
    runtime::fail::Fail,
    scheduler::{
        CoreAttr,
        CoreId,
        RunState,
        Scheduler,
        ServiceAttr,
        ServiceId,
        ServiceOutcome,
        ServiceSpec,
        SharedScheduler,
        CAP_MT_SAFE,
        MAX_SERVICES,
    },
};

/// Asserts that two expressions are equal, bailing out of the enclosing
/// function with an [anyhow::Error] when they are not.
#[macro_export]
macro_rules! ensure_eq {
    ($lhs:expr, $rhs:expr $(,)?) => {{
        let lhs = &$lhs;
        let rhs = &$rhs;
        if *lhs != *rhs {
            ::anyhow::bail!(
                "ensure_eq!({}, {}) failed: {:?} != {:?}",
                stringify!($lhs),
                stringify!($rhs),
                lhs,
                rhs
            );
        }
    }};
}

/// Asserts that two expressions are not equal, bailing out of the enclosing
/// function with an [anyhow::Error] when they are.
#[macro_export]
macro_rules! ensure_neq {
    ($lhs:expr, $rhs:expr $(,)?) => {{
        let lhs = &$lhs;
        let rhs = &$rhs;
        if *lhs == *rhs {
            ::anyhow::bail!(
                "ensure_neq!({}, {}) failed: both are {:?}",
                stringify!($lhs),
                stringify!($rhs),
                lhs
            );
        }
    }};
}
