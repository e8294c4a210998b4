// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process and thread tables with free lists and generation-tagged ids
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests + proptest suite (tests_prop.rs)
//! PUBLIC API: EntityTables (alloc/free/lookup), Process, Thread, TaskError
//! DEPENDS_ON: mm::{AddressSpace, FramePool}, ipc::IpcState, axon_abi::{ProcessId, ThreadId, Status}
//! INVARIANTS: A slot is FREE iff it is on its free list; free lists start in slot order;
//!             every live thread appears exactly once in its process's list
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use alloc::vec::Vec;

use axon_abi::layout::{USTACKTOP, UXSTACKTOP};
use axon_abi::{ProcessId, ProcessType, Status, ThreadId, TrapFrame};

use crate::ipc::IpcState;
use crate::mm::{AddressSpace, FramePool};
use crate::types::CpuId;

#[cfg(test)]
mod tests_prop;

/// Errors raised by table operations.
#[must_use = "table errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// Table exhausted.
    NoFreeSlots,
    /// Address-space root could not be allocated.
    OutOfMemory,
    /// Id is negative, names a free slot, is stale, or is not accessible to the caller.
    BadHandle,
}

/// Process record.
pub struct Process {
    pub(crate) id: ProcessId,
    pub(crate) parent: ProcessId,
    pub(crate) kind: ProcessType,
    pub(crate) status: Status,
    pub(crate) space: Option<AddressSpace>,
    pub(crate) pgfault_upcall: u32,
    pub(crate) ipc: IpcState,
    head: Option<usize>,
    tail: Option<usize>,
    next_free: Option<usize>,
}

impl Process {
    fn vacant(next_free: Option<usize>) -> Self {
        Self {
            id: ProcessId::CURRENT,
            parent: ProcessId::CURRENT,
            kind: ProcessType::User,
            status: Status::Free,
            space: None,
            pgfault_upcall: 0,
            ipc: IpcState::default(),
            head: None,
            tail: None,
            next_free,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn parent(&self) -> ProcessId {
        self.parent
    }

    pub fn kind(&self) -> ProcessType {
        self.kind
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    pub fn pgfault_upcall(&self) -> u32 {
        self.pgfault_upcall
    }

    pub fn ipc(&self) -> &IpcState {
        &self.ipc
    }

    /// Returns `true` when the process owns no threads.
    pub fn has_no_threads(&self) -> bool {
        self.head.is_none()
    }
}

/// Thread record.
pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) process: usize,
    pub(crate) frame: TrapFrame,
    pub(crate) status: Status,
    pub(crate) runs: u32,
    pub(crate) cpu: Option<CpuId>,
    pub(crate) uxstack: u32,
    prev: Option<usize>,
    next: Option<usize>,
    next_free: Option<usize>,
}

impl Thread {
    fn vacant(next_free: Option<usize>) -> Self {
        Self {
            id: ThreadId::CURRENT,
            process: 0,
            frame: TrapFrame::default(),
            status: Status::Free,
            runs: 0,
            cpu: None,
            uxstack: 0,
            prev: None,
            next: None,
            next_free,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Slot of the owning process.
    pub fn process_slot(&self) -> usize {
        self.process
    }

    pub fn frame(&self) -> &TrapFrame {
        &self.frame
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Number of times the thread was dispatched.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Core that last dispatched the thread.
    pub fn last_cpu(&self) -> Option<CpuId> {
        self.cpu
    }

    pub fn uxstack(&self) -> u32 {
        self.uxstack
    }
}

/// Fixed-capacity process and thread arenas.
pub struct EntityTables {
    procs: Vec<Process>,
    threads: Vec<Thread>,
    proc_free: Option<usize>,
    thread_free: Option<usize>,
}

impl EntityTables {
    /// Builds both free lists in slot order so the first allocation yields slot 0.
    pub fn new(processes: usize, threads: usize) -> Self {
        let chain = |i: usize, n: usize| if i + 1 < n { Some(i + 1) } else { None };
        Self {
            procs: (0..processes).map(|i| Process::vacant(chain(i, processes))).collect(),
            threads: (0..threads).map(|i| Thread::vacant(chain(i, threads))).collect(),
            proc_free: (processes > 0).then_some(0),
            thread_free: (threads > 0).then_some(0),
        }
    }

    pub fn process_capacity(&self) -> usize {
        self.procs.len()
    }

    pub fn thread_capacity(&self) -> usize {
        self.threads.len()
    }

    pub fn process(&self, slot: usize) -> &Process {
        &self.procs[slot]
    }

    pub(crate) fn process_mut(&mut self, slot: usize) -> &mut Process {
        &mut self.procs[slot]
    }

    pub fn thread(&self, slot: usize) -> &Thread {
        &self.threads[slot]
    }

    pub(crate) fn thread_mut(&mut self, slot: usize) -> &mut Thread {
        &mut self.threads[slot]
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Allocates a RUNNABLE process with one RUNNABLE thread and an empty address space.
    pub fn alloc_process(&mut self, parent: ProcessId, mem: &mut FramePool) -> Result<usize, TaskError> {
        let slot = self.proc_free.ok_or(TaskError::NoFreeSlots)?;
        self.procs[slot].head = None;
        self.procs[slot].tail = None;

        let thread = self.alloc_thread(slot)?;
        let space = match AddressSpace::new(mem) {
            Ok(space) => space,
            Err(_) => {
                self.free_thread(thread);
                return Err(TaskError::OutOfMemory);
            }
        };

        let capacity = self.procs.len();
        let proc = &mut self.procs[slot];
        proc.id = ProcessId::next(proc.id, slot, capacity);
        proc.parent = parent;
        proc.kind = ProcessType::User;
        proc.status = Status::Runnable;
        proc.space = Some(space);
        proc.pgfault_upcall = 0;
        proc.ipc = IpcState::default();

        self.proc_free = proc.next_free.take();
        log_debug!(target: "task", "[{}] new process {}", parent, proc.id);
        Ok(slot)
    }

    /// Allocates a RUNNABLE thread and appends it to the thread list of process `owner`.
    pub fn alloc_thread(&mut self, owner: usize) -> Result<usize, TaskError> {
        let slot = self.thread_free.ok_or(TaskError::NoFreeSlots)?;
        let capacity = self.threads.len();
        let tail = self.procs[owner].tail;

        let t = &mut self.threads[slot];
        t.id = ThreadId::next(t.id, slot, capacity);
        t.process = owner;
        t.status = Status::Runnable;
        t.runs = 0;
        t.cpu = None;
        t.uxstack = UXSTACKTOP;
        t.frame = TrapFrame::user(0, USTACKTOP);
        t.prev = tail;
        t.next = None;
        self.thread_free = t.next_free.take();

        match tail {
            Some(last) => self.threads[last].next = Some(slot),
            None => self.procs[owner].head = Some(slot),
        }
        self.procs[owner].tail = Some(slot);
        Ok(slot)
    }

    /// Unlinks thread `slot` from its process and returns it to the free list.
    pub fn free_thread(&mut self, slot: usize) {
        let t = &self.threads[slot];
        if t.status == Status::Free {
            log_error!(target: "task", "free of free thread slot {}", slot);
            panic!("thread slot {} freed twice", slot);
        }
        let (owner, prev, next) = (t.process, t.prev, t.next);
        match prev {
            Some(p) => self.threads[p].next = next,
            None => self.procs[owner].head = next,
        }
        match next {
            Some(n) => self.threads[n].prev = prev,
            None => self.procs[owner].tail = prev,
        }
        let ipc = &mut self.procs[owner].ipc;
        if ipc.waiting == Some(slot) {
            ipc.receiving = false;
            ipc.waiting = None;
        }
        let t = &mut self.threads[slot];
        t.status = Status::Free;
        t.prev = None;
        t.next = None;
        t.cpu = None;
        t.next_free = self.thread_free;
        self.thread_free = Some(slot);
    }

    /// Reclaims the address space of process `slot` and returns it to the free list.
    /// The thread list must already be empty.
    pub fn free_process(&mut self, slot: usize, mem: &mut FramePool) {
        let proc = &mut self.procs[slot];
        if proc.status == Status::Free || proc.head.is_some() {
            log_error!(target: "task", "free of process {} in state {:?}", proc.id, proc.status);
            panic!("process slot {} freed while free or owning threads", slot);
        }
        let Some(space) = proc.space.take() else {
            log_error!(target: "task", "process {} has no address-space root", proc.id);
            panic!("process {} freed without an address space", proc.id);
        };
        space.teardown(mem);
        log_debug!(target: "task", "free process {}", proc.id);
        proc.status = Status::Free;
        proc.ipc = IpcState::default();
        proc.next_free = self.proc_free;
        self.proc_free = Some(slot);
    }

    /// Resolves a non-zero process id to its slot, rejecting free or stale ids.
    pub fn process_slot(&self, id: ProcessId) -> Result<usize, TaskError> {
        if !id.is_valid() {
            return Err(TaskError::BadHandle);
        }
        let slot = id.index(self.procs.len());
        let proc = &self.procs[slot];
        if proc.status == Status::Free || proc.id != id {
            return Err(TaskError::BadHandle);
        }
        Ok(slot)
    }

    /// Resolves a non-zero thread id to its slot, rejecting free or stale ids.
    pub fn thread_slot(&self, id: ThreadId) -> Result<usize, TaskError> {
        if !id.is_valid() {
            return Err(TaskError::BadHandle);
        }
        let slot = id.index(self.threads.len());
        let t = &self.threads[slot];
        if t.status == Status::Free || t.id != id {
            return Err(TaskError::BadHandle);
        }
        Ok(slot)
    }

    /// Thread slots of process `owner` in list order.
    pub fn threads_of(&self, owner: usize) -> ThreadIter<'_> {
        ThreadIter { tables: self, next: self.procs[owner].head }
    }
}

/// Walks a process's thread list.
pub struct ThreadIter<'a> {
    tables: &'a EntityTables,
    next: Option<usize>,
}

impl Iterator for ThreadIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let cur = self.next?;
        self.next = self.tables.threads[cur].next;
        Some(cur)
    }
}
