// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! What user code can observe of the machine it runs on.
//!
//! Native builds implement [`UserEnv`] with trap instructions and direct loads; hosted
//! builds implement it on top of the kernel model so the user runtime runs unchanged.

use crate::{layout::PteFlags, ProcessId, Status, Sysno, ThreadId, TrapFrame};

/// Outcome of a user memory access that faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageFault {
    /// The kernel redirected the thread to its page-fault upcall; registers now point at the
    /// exception frame and the access should be retried after the upcall returns.
    Upcall,
    /// The faulting process was destroyed.
    Killed,
}

/// Read-only view of one thread table slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadView {
    /// Id stored in the slot (may belong to a later occupant).
    pub id: ThreadId,
    /// Slot status.
    pub status: Status,
    /// Owning process of the occupant.
    pub process: ProcessId,
}

/// Read-only view of one process table slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessView {
    /// Id stored in the slot.
    pub id: ProcessId,
    /// Parent process id (`0` for boot-created processes).
    pub parent: ProcessId,
    /// Slot status.
    pub status: Status,
    /// Process is parked in a receive.
    pub ipc_receiving: bool,
    /// Value delivered by the last completed send.
    pub ipc_value: u32,
    /// Sender of the last completed send.
    pub ipc_from: ProcessId,
    /// Permission of the page granted by the last send (empty when none).
    pub ipc_perm: PteFlags,
}

/// The machine as seen from user mode by the thread currently executing.
pub trait UserEnv {
    /// Traps into the kernel and returns the signed result.
    fn syscall(&mut self, no: Sysno, args: [u32; 5]) -> i32;

    /// Loads `buf.len()` bytes at `va`.
    fn read(&mut self, va: u32, buf: &mut [u8]) -> Result<(), PageFault>;

    /// Stores `data` at `va`.
    fn write(&mut self, va: u32, data: &[u8]) -> Result<(), PageFault>;

    /// Atomically exchanges the word at `va` with `value` and returns the previous word.
    fn swap(&mut self, va: u32, value: u32) -> Result<u32, PageFault>;

    /// Current register file.
    fn regs(&self) -> TrapFrame;

    /// Loads a register file without entering the kernel.
    fn set_regs(&mut self, tf: TrapFrame);

    /// Returns `true` when the page directory entry covering `va` is present.
    fn pde_present(&self, va: u32) -> bool;

    /// Returns the permission of the page containing `va` when it is mapped.
    fn pte(&self, va: u32) -> Option<PteFlags>;

    /// Reads the thread table slot `id` indexes into.
    fn thread(&self, id: ThreadId) -> ThreadView;

    /// Reads the process table slot `id` indexes into.
    fn process(&self, id: ProcessId) -> ProcessView;
}
