// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod core_state;
mod scheduler;
mod service;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    core_state::CoreAttr,
    scheduler::{
        CoreId,
        Scheduler,
        SharedScheduler,
    },
    service::{
        RunState,
        ServiceAttr,
        ServiceId,
        ServiceOutcome,
        ServiceSpec,
        CAP_MT_SAFE,
        MAX_SERVICES,
    },
};
