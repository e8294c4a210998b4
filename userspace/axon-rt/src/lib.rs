// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User runtime for axon processes
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + tests/ suites against the hosted kernel
//!
//! PUBLIC API:
//!   - start()/exit(): process entry bookkeeping and teardown
//!   - sys: one typed wrapper per syscall
//!   - fork: copy-on-write fork
//!   - thread: user-level threads with fixed stack slots
//!   - ipc, net: blocking IPC and the network driver loops
//!
//! DEPENDENCIES:
//!   - axon-abi: syscall numbers, layout, UserEnv
//!   - spin::Mutex: entry point registry
//!
//! Every function takes the machine as `&mut dyn UserEnv`, so the same code runs natively or
//! against the hosted kernel.
//!
//! ADR: docs/adr/0016-kernel-libs-architecture.md

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod entry;
pub mod error;
pub mod fork;
pub mod globals;
pub mod ipc;
pub mod mem;
pub mod net;
pub mod pgfault;
pub mod sys;
pub mod thread;

use axon_abi::{ProcessId, ThreadId, UserEnv};

pub use entry::Code;
pub use error::RtError;

/// Process start-up: maps the runtime globals and records the caller as main thread.
pub fn start(env: &mut dyn UserEnv) -> Result<ThreadId, RtError> {
    globals::ensure_mapped(env)?;
    let main = sys::gettid(env)?;
    globals::reset(env, main, 0)?;
    Ok(main)
}

/// Destroys the whole calling process.
pub fn exit(env: &mut dyn UserEnv) -> Result<(), RtError> {
    match sys::process_destroy(env, ProcessId::CURRENT) {
        Ok(()) | Err(axon_abi::Error::BadHandle) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
