// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI definitions between the axon kernel and user runtime
//! OWNERS: @runtime
//! PUBLIC API: Sysno, Error, ProcessId, ThreadId, Status, ProcessType, PteFlags, TrapFrame,
//!             UTrapframe, UserEnv, layout constants
//! DEPENDS_ON: no_std, bitflags
//! INVARIANTS: Syscall numbers are contiguous and stable; error codes are negative; ids are
//!             non-negative with the table index in the low bits
//! ADR: docs/adr/0016-kernel-libs-architecture.md

pub mod error;
pub mod id;
pub mod layout;
pub mod syscall;
pub mod trapframe;
pub mod user;

pub use error::Error;
pub use id::{ProcessId, ThreadId};
pub use layout::PteFlags;
pub use syscall::Sysno;
pub use trapframe::{PushRegs, TrapFrame, UTrapframe};
pub use user::{PageFault, ProcessView, ThreadView, UserEnv};

/// Lifecycle state shared by processes and threads.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Slot is on its table's free list.
    Free = 0,
    /// Destruction requested while executing on another core.
    Dying = 1,
    /// Eligible for dispatch.
    Runnable = 2,
    /// Executing on some core.
    Running = 3,
    /// Parked until explicitly unblocked.
    NotRunnable = 4,
}

impl Status {
    /// Decodes a status word; unknown values yield `None`.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Free),
            1 => Some(Self::Dying),
            2 => Some(Self::Runnable),
            3 => Some(Self::Running),
            4 => Some(Self::NotRunnable),
            _ => None,
        }
    }

    /// Returns the raw status word.
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// Special process roles.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessType {
    /// Ordinary user process.
    User = 0,
    /// File system server; runs with I/O privilege.
    FsServer = 1,
    /// Network server.
    NetServer = 2,
}
