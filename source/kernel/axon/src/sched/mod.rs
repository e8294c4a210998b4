// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Round-robin thread scheduler and per-core state
//! OWNERS: @kernel-sched-team
//! PUBLIC API: CpuState, CpuStatus, ActiveSpace, Dispatch, pick_next(), schedule(), run()
//! DEPENDS_ON: task::EntityTables, sync::KernelGuard, kernel::KernelState
//! INVARIANTS: At most one RUNNING thread per core; the kernel guard is released exactly once,
//!             when a Dispatch value is produced; the search starts after the slot this core
//!             last ran and wraps
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use core::fmt;

use axon_abi::{Status, ThreadId, TrapFrame};

use crate::kernel::KernelState;
use crate::mm::FrameNumber;
use crate::sync::KernelGuard;
use crate::task::EntityTables;
use crate::types::CpuId;

/// Lifecycle of one core as seen by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuStatus {
    /// Never entered the kernel.
    Unused,
    /// Executing kernel or user code.
    Started,
    /// Idle until the next interrupt.
    Halted,
}

/// Address space the core's MMU points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveSpace {
    Kernel,
    User(FrameNumber),
}

/// Per-core scheduler state.
#[derive(Debug)]
pub struct CpuState {
    pub(crate) id: CpuId,
    pub(crate) status: CpuStatus,
    pub(crate) current: Option<usize>,
    pub(crate) last_ran: Option<usize>,
    pub(crate) space: ActiveSpace,
}

impl CpuState {
    pub(crate) fn new(id: CpuId) -> Self {
        Self { id, status: CpuStatus::Unused, current: None, last_ran: None, space: ActiveSpace::Kernel }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    pub fn status(&self) -> CpuStatus {
        self.status
    }

    /// Thread slot currently dispatched on this core.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Thread slot most recently dispatched on this core; seeds the round-robin scan.
    pub fn last_ran(&self) -> Option<usize> {
        self.last_ran
    }

    pub fn space(&self) -> ActiveSpace {
        self.space
    }
}

/// Where a core goes when it leaves the kernel.
///
/// Producing one of these consumes the kernel guard: control has left the kernel and the
/// operation that scheduled does not continue.
#[must_use = "a dispatch decides what the core executes next"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Resume `thread` in user mode with `frame`.
    Run { cpu: CpuId, thread: ThreadId, frame: TrapFrame },
    /// Idle until an interrupt re-enters the kernel.
    Halt { cpu: CpuId },
    /// Nothing in the system can ever run again; drop into the monitor.
    Monitor { cpu: CpuId },
}

impl Dispatch {
    pub fn cpu(&self) -> CpuId {
        match *self {
            Dispatch::Run { cpu, .. } | Dispatch::Halt { cpu } | Dispatch::Monitor { cpu } => cpu,
        }
    }

    /// Thread resumed by this dispatch, if any.
    pub fn thread(&self) -> Option<ThreadId> {
        match *self {
            Dispatch::Run { thread, .. } => Some(thread),
            _ => None,
        }
    }
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Run { cpu, thread, frame } => write!(f, "{}: run {} eip={:#x}", cpu, thread, frame.eip),
            Dispatch::Halt { cpu } => write!(f, "{}: halt", cpu),
            Dispatch::Monitor { cpu } => write!(f, "{}: monitor", cpu),
        }
    }
}

fn eligible(tables: &EntityTables, slot: usize) -> bool {
    let thread = tables.thread(slot);
    thread.status() == Status::Runnable
        && tables.process(thread.process_slot()).status() == Status::Runnable
}

/// Chooses the next thread for `cpu` without mutating anything.
///
/// Scans from the slot after the one this core last ran, wrapping once. Falls back to the
/// core's current thread when it is still RUNNING inside a RUNNABLE process.
pub fn pick_next(tables: &EntityTables, cpu: &CpuState) -> Option<usize> {
    let n = tables.thread_capacity();
    let start = cpu.last_ran.map_or(0, |slot| slot + 1);
    (0..n).map(|i| (start + i) % n).find(|&slot| eligible(tables, slot)).or_else(|| {
        cpu.current.filter(|&slot| {
            let thread = tables.thread(slot);
            thread.status() == Status::Running
                && tables.process(thread.process_slot()).status() == Status::Runnable
        })
    })
}

/// Picks and dispatches the next thread on the guard's core, or halts it.
pub fn schedule(guard: KernelGuard<'_, KernelState>) -> Dispatch {
    let cpu = guard.cpu();
    match pick_next(&guard.tables, &guard.cpus[cpu.as_index()]) {
        Some(slot) => run(guard, slot),
        None => halt(guard),
    }
}

/// Dispatches thread `slot` on the guard's core and leaves the kernel.
pub fn run(mut guard: KernelGuard<'_, KernelState>, slot: usize) -> Dispatch {
    let cpu = guard.cpu();
    let state = &mut *guard;
    let core = &mut state.cpus[cpu.as_index()];

    if let Some(prev) = core.current {
        if prev != slot && state.tables.thread(prev).status() == Status::Running {
            state.tables.thread_mut(prev).status = Status::Runnable;
        }
    }

    let owner = state.tables.thread(slot).process_slot();
    let Some(root) = state.tables.process(owner).space().map(|space| space.root()) else {
        log_error!(target: "sched", "{}: process {} has no address space", cpu, state.tables.process(owner).id());
        panic!("dispatch into a process without an address space");
    };

    let thread = state.tables.thread_mut(slot);
    thread.status = Status::Running;
    thread.runs = thread.runs.wrapping_add(1);
    thread.cpu = Some(cpu);
    let (id, frame) = (thread.id, thread.frame);

    core.current = Some(slot);
    core.last_ran = Some(slot);
    core.space = ActiveSpace::User(root);
    core.status = CpuStatus::Started;

    log_trace!(target: "sched", "{}: run {} eip={:#x}", cpu, id, frame.eip);
    drop(guard);
    Dispatch::Run { cpu, thread: id, frame }
}

/// Parks the guard's core until the next interrupt.
pub fn halt(mut guard: KernelGuard<'_, KernelState>) -> Dispatch {
    let cpu = guard.cpu();
    let state = &mut *guard;

    let work = state
        .tables
        .threads()
        .iter()
        .any(|t| matches!(t.status(), Status::Runnable | Status::Running | Status::Dying));

    let core = &mut state.cpus[cpu.as_index()];
    if let Some(prev) = core.current.take() {
        // A RUNNING thread whose process stopped being runnable must stay schedulable later.
        if state.tables.thread(prev).status() == Status::Running {
            state.tables.thread_mut(prev).status = Status::Runnable;
        }
    }
    core.space = ActiveSpace::Kernel;
    core.status = CpuStatus::Halted;
    drop(guard);

    if work {
        log_trace!(target: "sched", "{}: halt", cpu);
        Dispatch::Halt { cpu }
    } else {
        log_warn!(target: "sched", "{}: no runnable threads in the system", cpu);
        Dispatch::Monitor { cpu }
    }
}
