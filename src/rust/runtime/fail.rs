// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::libc::c_int;
use ::std::{
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// Failure
///
/// Every scheduler operation sits on a latency-sensitive path, so failures are
/// returned as plain values carrying an errno-style code:
///
/// - `EINVAL`: out-of-range id, unregistered service/core, empty name.
/// - `EEXIST`: the target already exists (duplicate name, core already added).
/// - `EALREADY`: the target is already in the requested run state.
/// - `ENOSPC`: the service table is full.
/// - `EBUSY`: a core is the sole home of a runnable service, a non-blocking
///   execute-lock acquisition failed, or a worker thread was occupied.
/// - `ENOEXEC`: the run primitive determined the service should not execute
///   this pass (routine outcome, swallowed by the poll loop).
/// - `ENODEV`: no registered service carries the requested name.
/// - `ENOTSUP`: a per-core query was issued against a non-service core.
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: c_int, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(_: io::Error) -> Self {
        Self {
            errno: libc::EIO,
            cause: "I/O error".to_string(),
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
