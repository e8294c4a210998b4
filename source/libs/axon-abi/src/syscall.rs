// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall numbers and register convention.
//!
//! The number travels in `eax`; arguments one to five in `edx`, `ecx`, `ebx`, `edi`, `esi`.
//! The signed result comes back in `eax`.

use crate::trapframe::TrapFrame;

/// Stable syscall numbers. The set is contiguous from zero.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sysno {
    /// Write a user buffer to the console.
    Cputs = 0,
    /// Read one console byte without blocking (0 if none).
    Cgetc = 1,
    /// Id of the calling process.
    GetProcessId = 2,
    /// Destroy a process (self or child).
    ProcessDestroy = 3,
    /// Allocate a zeroed page and map it.
    PageAlloc = 4,
    /// Map a page of one process into another.
    PageMap = 5,
    /// Unmap a page.
    PageUnmap = 6,
    /// Duplicate the caller's execution context into a new child process.
    Exofork = 7,
    /// Set a process RUNNABLE or NOT_RUNNABLE.
    ProcessSetStatus = 8,
    /// Register the page-fault upcall entry point.
    ProcessSetPgfaultUpcall = 9,
    /// Give up the processor.
    Yield = 10,
    /// Attempt an IPC send.
    IpcTrySend = 11,
    /// Block until an IPC arrives.
    IpcRecv = 12,
    /// Milliseconds since boot.
    TimeMsec = 13,
    /// Hand a frame to the network device.
    PacketTrySend = 14,
    /// Take a frame from the network device.
    PacketReceive = 15,
    /// Id of the calling thread.
    GetThreadId = 16,
    /// Create a NOT_RUNNABLE thread in the caller's process.
    ThreadCreate = 17,
    /// Destroy a thread of the caller's process.
    ThreadDestroy = 18,
    /// Set a thread RUNNABLE or NOT_RUNNABLE.
    ThreadSetStatus = 19,
    /// Replace a thread's saved execution context.
    ThreadSetTrapframe = 20,
    /// Set a thread's exception stack top.
    ThreadSetUxstack = 21,
}

/// Number of defined syscalls.
pub const NSYSCALLS: usize = 22;

impl Sysno {
    /// Decodes a syscall number.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Cputs,
            1 => Self::Cgetc,
            2 => Self::GetProcessId,
            3 => Self::ProcessDestroy,
            4 => Self::PageAlloc,
            5 => Self::PageMap,
            6 => Self::PageUnmap,
            7 => Self::Exofork,
            8 => Self::ProcessSetStatus,
            9 => Self::ProcessSetPgfaultUpcall,
            10 => Self::Yield,
            11 => Self::IpcTrySend,
            12 => Self::IpcRecv,
            13 => Self::TimeMsec,
            14 => Self::PacketTrySend,
            15 => Self::PacketReceive,
            16 => Self::GetThreadId,
            17 => Self::ThreadCreate,
            18 => Self::ThreadDestroy,
            19 => Self::ThreadSetStatus,
            20 => Self::ThreadSetTrapframe,
            21 => Self::ThreadSetUxstack,
            _ => return None,
        })
    }

    /// Returns the raw number.
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// Loads a syscall request into the argument registers of `tf`.
pub fn encode_request(tf: &mut TrapFrame, no: u32, args: [u32; 5]) {
    tf.regs.eax = no;
    tf.regs.edx = args[0];
    tf.regs.ecx = args[1];
    tf.regs.ebx = args[2];
    tf.regs.edi = args[3];
    tf.regs.esi = args[4];
}

/// Reads the syscall number and arguments out of `tf`.
pub fn decode_request(tf: &TrapFrame) -> (u32, [u32; 5]) {
    let r = &tf.regs;
    (r.eax, [r.edx, r.ecx, r.ebx, r.edi, r.esi])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_contiguous() {
        for raw in 0..NSYSCALLS as u32 {
            let no = Sysno::from_raw(raw);
            assert_eq!(no.map(Sysno::raw), Some(raw));
        }
        assert_eq!(Sysno::from_raw(NSYSCALLS as u32), None);
    }
}
