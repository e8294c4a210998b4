// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime error type.

use core::fmt;

use axon_abi::Error;

/// Errors surfaced by the runtime instead of aborting the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RtError {
    /// A syscall returned an error code.
    Sys(Error),
    /// The calling process was destroyed while touching its own memory.
    Killed,
    /// Every thread stack slot is taken.
    NoThreadSlot,
    /// A code address that no entry point was registered for.
    UnknownEntry(u32),
}

impl From<Error> for RtError {
    fn from(err: Error) -> Self {
        Self::Sys(err)
    }
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sys(err) => write!(f, "syscall failed: {err}"),
            Self::Killed => f.write_str("process destroyed during a memory access"),
            Self::NoThreadSlot => f.write_str("no free thread stack slot"),
            Self::UnknownEntry(code) => write!(f, "no entry point at {code:#x}"),
        }
    }
}
