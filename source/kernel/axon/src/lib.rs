// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: axon kernel core (process/thread tables, scheduler, syscalls, IPC)
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + tests/ integration suites (hosted)
//! PUBLIC API: Kernel, KernelState, Dispatch, UserPort, boot::create_process, KernelConfig
//! DEPENDS_ON: axon-abi, spin, static_assertions
//! INVARIANTS: All entity-table state is mutated under the kernel lock; the lock is released
//!             exactly once per entry, at dispatch or halt
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

#![cfg_attr(not(test), no_std)]
#![forbid(clippy::unwrap_used)]
#![deny(unsafe_code)]

extern crate alloc;

#[macro_use]
pub mod diag;
pub use diag::log;

pub mod boot;
pub mod config;
pub mod hal;
pub mod ipc;
pub mod kernel;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod trap;
pub mod types;
pub mod umode;

pub use axon_abi as abi;
pub use config::KernelConfig;
pub use kernel::{Kernel, KernelState};
pub use sched::Dispatch;
pub use types::CpuId;
pub use umode::UserPort;
