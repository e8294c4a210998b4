// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap entry discipline and user page-fault upcall delivery
//! OWNERS: @kernel-team
//! PUBLIC API: Trap, Entry, enter(), page_fault()
//! DEPENDS_ON: kernel::KernelState, sched, axon_abi::trapframe
//! INVARIANTS: A DYING thread never executes kernel code on its own behalf; a fault without an
//!             upcall is fatal; an exception frame is only pushed into user-writable memory
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use axon_abi::layout::PGSIZE;
use axon_abi::trapframe::{FEC_PR, FEC_U, FEC_WR};
use axon_abi::{Status, TrapFrame, UTrapframe};

use crate::kernel::KernelState;
use crate::mm::PteFlags;
use crate::sched::{self, CpuStatus, Dispatch};
use crate::sync::KernelGuard;

/// Cause of a kernel entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trap {
    Syscall,
    PageFault { va: u32, err: u32 },
    Timer,
}

impl Trap {
    /// Builds a page-fault trap from the access that failed.
    pub fn fault(va: u32, write: bool, present: bool) -> Self {
        let mut err = FEC_U;
        if write {
            err |= FEC_WR;
        }
        if present {
            err |= FEC_PR;
        }
        Trap::PageFault { va, err }
    }
}

/// Result of entering the kernel.
pub enum Entry<'a> {
    /// The trap may be handled; the guard is still held.
    Kernel(KernelGuard<'a, KernelState>),
    /// The trapping thread was DYING and has been reaped; the core already moved on.
    Reaped(Dispatch),
}

/// Common trap prologue: leaves the halted state, reaps a DYING current thread, and saves the
/// incoming registers into the current thread.
pub fn enter<'a>(mut guard: KernelGuard<'a, KernelState>, frame: Option<&TrapFrame>) -> Entry<'a> {
    let cpu = guard.cpu();
    let state = &mut *guard;
    let core = &mut state.cpus[cpu.as_index()];
    if core.status != CpuStatus::Started {
        core.status = CpuStatus::Started;
    }

    if let Some(slot) = core.current {
        if state.tables.thread(slot).status() == Status::Dying {
            log_debug!(target: "trap", "{}: reaping dying thread {}", cpu, state.tables.thread(slot).id());
            state.release_thread(slot);
            return Entry::Reaped(sched::schedule(guard));
        }
        if let Some(frame) = frame {
            state.tables.thread_mut(slot).frame = *frame;
        }
    }
    Entry::Kernel(guard)
}

/// Redirects the current thread to its process's page-fault upcall.
///
/// The exception frame goes on the thread's exception stack, or just below the interrupted
/// frame when the fault happened on that stack already, leaving one scratch word.
pub fn page_fault(mut guard: KernelGuard<'_, KernelState>, va: u32, err: u32) -> Dispatch {
    let cpu = guard.cpu();
    let state = &mut *guard;
    let Some(slot) = state.current_thread(cpu) else {
        log_warn!(target: "trap", "{}: page fault at {:#x} with no current thread", cpu, va);
        return sched::schedule(guard);
    };
    let owner = state.tables.thread(slot).process_slot();
    let proc_id = state.tables.process(owner).id();
    let upcall = state.tables.process(owner).pgfault_upcall();
    let frame = *state.tables.thread(slot).frame();

    if upcall == 0 {
        log_error!(
            target: "trap",
            "[{}] user fault va {:#x} ip {:#x} err {:#x} with no upcall",
            proc_id,
            va,
            frame.eip,
            err
        );
        panic!("unhandled user page fault at {:#x} in {}", va, proc_id);
    }

    let uxstack = state.tables.thread(slot).uxstack();
    let on_exception_stack = frame.esp < uxstack && frame.esp >= uxstack.wrapping_sub(PGSIZE);
    let top = if on_exception_stack { frame.esp.wrapping_sub(4) } else { uxstack };
    let utf_va = top.wrapping_sub(UTrapframe::SIZE as u32);
    let utf = UTrapframe::from_trapframe(&frame, va, err);

    let pushed = match state.tables.process(owner).space() {
        Some(space) => space
            .check_user(utf_va, UTrapframe::SIZE as u32, PteFlags::WRITE)
            .and_then(|()| space.write(&mut state.mem, utf_va, &utf.to_bytes())),
        None => Ok(()),
    };
    if let Err(fault) = pushed {
        log_warn!(target: "trap", "[{}] exception stack unusable: {:?}", proc_id, fault);
        state.destroy_process(cpu, owner);
        return sched::schedule(guard);
    }

    log_trace!(target: "trap", "[{}] upcall for va {:#x} frame at {:#x}", proc_id, va, utf_va);
    let thread = state.tables.thread_mut(slot);
    thread.frame.eip = upcall;
    thread.frame.esp = utf_va;
    sched::run(guard, slot)
}
