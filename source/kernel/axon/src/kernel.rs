// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel state container and trap-level entry points
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/{scheduler,syscalls,ipc_rendezvous,page_faults}.rs
//! PUBLIC API: Kernel (syscall/page_fault/timer/preempt/start/create_process/inspect/port),
//!             KernelState (lookup, destroy, views)
//! DEPENDS_ON: task, sched, trap, syscall, mm, hal, sync::KernelLock
//! INVARIANTS: KernelState is only reachable through the kernel lock; every entry point returns
//!             exactly one Dispatch and holds the lock until it is produced
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use alloc::vec::Vec;
use core::cell::Cell;
use core::marker::PhantomData;

use axon_abi::{ProcessId, ProcessType, ProcessView, Status, ThreadId, ThreadView, TrapFrame};

use crate::boot::{self, Image};
use crate::config::{ConfigError, KernelConfig};
use crate::hal::Devices;
use crate::mm::FramePool;
use crate::sched::{self, ActiveSpace, CpuState, Dispatch};
use crate::sync::{KernelGuard, KernelLock};
use crate::syscall::{api, SyscallTable};
use crate::task::{EntityTables, TaskError};
use crate::trap::{self, Entry, Trap};
use crate::types::CpuId;
use crate::umode::UserPort;

/// Everything guarded by the kernel lock.
pub struct KernelState {
    config: KernelConfig,
    pub(crate) tables: EntityTables,
    pub(crate) mem: FramePool,
    pub(crate) cpus: Vec<CpuState>,
    pub(crate) devices: Devices,
    // Only ever touched through the lock.
    _not_sync: PhantomData<Cell<()>>,
}

static_assertions::assert_impl_all!(KernelState: Send);
static_assertions::assert_not_impl_any!(KernelState: Sync);

impl KernelState {
    pub fn new(config: KernelConfig, devices: Devices) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            tables: EntityTables::new(config.processes, config.threads),
            mem: FramePool::new(config.frames),
            cpus: (0..config.cpus).map(|i| CpuState::new(CpuId::from_raw(i as u16))).collect(),
            devices,
            _not_sync: PhantomData,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn tables(&self) -> &EntityTables {
        &self.tables
    }

    pub fn mem(&self) -> &FramePool {
        &self.mem
    }

    pub fn cpu(&self, cpu: CpuId) -> &CpuState {
        &self.cpus[cpu.as_index()]
    }

    /// Thread slot running on `cpu`.
    pub fn current_thread(&self, cpu: CpuId) -> Option<usize> {
        self.cpus[cpu.as_index()].current
    }

    /// Process slot owning the thread running on `cpu`.
    pub fn current_process(&self, cpu: CpuId) -> Option<usize> {
        self.current_thread(cpu).map(|slot| self.tables.thread(slot).process_slot())
    }

    /// Resolves `id` (`0` meaning the caller's process) to a process slot.
    ///
    /// With `check_perm` the target must be the caller itself or one of its immediate children.
    pub fn lookup_process(&self, cpu: CpuId, id: ProcessId, check_perm: bool) -> Result<usize, TaskError> {
        let current = self.current_process(cpu);
        if id.is_current() {
            return current.ok_or(TaskError::BadHandle);
        }
        let slot = self.tables.process_slot(id)?;
        if check_perm {
            let caller = current.ok_or(TaskError::BadHandle)?;
            let caller_id = self.tables.process(caller).id();
            if slot != caller && self.tables.process(slot).parent() != caller_id {
                return Err(TaskError::BadHandle);
            }
        }
        Ok(slot)
    }

    /// Resolves `id` (`0` meaning the caller's thread) to a thread slot.
    ///
    /// With `check_perm` the target must belong to the caller's process.
    pub fn lookup_thread(&self, cpu: CpuId, id: ThreadId, check_perm: bool) -> Result<usize, TaskError> {
        let current = self.current_thread(cpu);
        if id.is_current() {
            return current.ok_or(TaskError::BadHandle);
        }
        let slot = self.tables.thread_slot(id)?;
        if check_perm {
            let caller = self.current_process(cpu).ok_or(TaskError::BadHandle)?;
            if self.tables.thread(slot).process_slot() != caller {
                return Err(TaskError::BadHandle);
            }
        }
        Ok(slot)
    }

    /// Allocates a process with one thread on behalf of `parent`.
    pub fn alloc_process(&mut self, parent: ProcessId) -> Result<usize, TaskError> {
        self.tables.alloc_process(parent, &mut self.mem)
    }

    /// Returns `true` when thread `slot` is executing on a core other than `cpu`.
    pub(crate) fn running_elsewhere(&self, cpu: CpuId, slot: usize) -> bool {
        self.cpus.iter().any(|core| core.id != cpu && core.current == Some(slot))
    }

    /// Destroys process `slot`.
    ///
    /// Threads executing on other cores are marked DYING and reaped on their next trap; the
    /// process is freed once none remain. Destroying the caller's own process clears this
    /// core's current thread, so the caller must reschedule.
    pub fn destroy_process(&mut self, cpu: CpuId, slot: usize) {
        let threads: Vec<usize> = self.tables.threads_of(slot).collect();
        let caller = self.current_process(cpu).map(|p| self.tables.process(p).id());
        log_info!(
            target: "task",
            "[{}] destroy process {}",
            caller.unwrap_or(ProcessId::CURRENT),
            self.tables.process(slot).id()
        );
        for thread in threads {
            if self.running_elsewhere(cpu, thread) {
                self.tables.thread_mut(thread).status = Status::Dying;
            } else {
                self.forget_current(thread);
                self.tables.free_thread(thread);
            }
        }
        if self.tables.process(slot).has_no_threads() {
            self.free_process(slot);
        } else {
            self.tables.process_mut(slot).status = Status::Dying;
        }
    }

    /// Destroys thread `slot`, freeing its process when it was the last thread.
    pub fn destroy_thread(&mut self, cpu: CpuId, slot: usize) {
        if self.running_elsewhere(cpu, slot) {
            log_debug!(target: "task", "{}: thread {} marked dying", cpu, self.tables.thread(slot).id());
            self.tables.thread_mut(slot).status = Status::Dying;
            return;
        }
        self.release_thread(slot);
    }

    /// Frees a thread that is not executing anywhere else, then its process if it became empty.
    pub(crate) fn release_thread(&mut self, slot: usize) {
        let owner = self.tables.thread(slot).process_slot();
        self.forget_current(slot);
        self.tables.free_thread(slot);
        if self.tables.process(owner).has_no_threads() {
            self.free_process(owner);
        }
    }

    fn forget_current(&mut self, slot: usize) {
        for core in self.cpus.iter_mut().filter(|core| core.current == Some(slot)) {
            core.current = None;
        }
    }

    fn free_process(&mut self, slot: usize) {
        let root = self.tables.process(slot).space().map(|space| space.root());
        // Cores still pointing at the dying root fall back to the kernel space first.
        for core in self.cpus.iter_mut() {
            if root.is_some_and(|root| core.space == ActiveSpace::User(root)) {
                core.space = ActiveSpace::Kernel;
            }
        }
        self.tables.free_process(slot, &mut self.mem);
    }

    /// Ids of the threads of process `id` in list order; empty when `id` is stale.
    pub fn thread_ids(&self, id: ProcessId) -> Vec<ThreadId> {
        self.tables
            .process_slot(id)
            .map(|slot| self.tables.threads_of(slot).map(|t| self.tables.thread(t).id()).collect())
            .unwrap_or_default()
    }

    /// Read-only view of the thread slot `id` indexes into.
    pub fn thread_view(&self, id: ThreadId) -> ThreadView {
        let thread = self.tables.thread(id.index(self.tables.thread_capacity()));
        ThreadView {
            id: thread.id(),
            status: thread.status(),
            process: self.tables.process(thread.process_slot()).id(),
        }
    }

    /// Read-only view of the process slot `id` indexes into.
    pub fn process_view(&self, id: ProcessId) -> ProcessView {
        let proc = self.tables.process(id.index(self.tables.process_capacity()));
        let ipc = proc.ipc();
        ProcessView {
            id: proc.id(),
            parent: proc.parent(),
            status: proc.status(),
            ipc_receiving: ipc.receiving,
            ipc_value: ipc.value,
            ipc_from: ipc.from,
            ipc_perm: ipc.perm,
        }
    }

    /// Runs `f` when `thread` is the one executing on `cpu`.
    pub(crate) fn if_current<R>(
        &mut self,
        cpu: CpuId,
        thread: ThreadId,
        f: impl FnOnce(&mut Self, usize) -> R,
    ) -> Option<R> {
        let slot = self.current_thread(cpu)?;
        (self.tables.thread(slot).id() == thread).then(|| f(self, slot))
    }
}

/// The kernel: shared state behind the big lock plus the syscall table.
pub struct Kernel {
    state: KernelLock<KernelState>,
    table: SyscallTable,
}

static_assertions::assert_impl_all!(Kernel: Send, Sync);

impl Kernel {
    pub fn new(config: KernelConfig, devices: Devices) -> Result<Self, ConfigError> {
        let mut table = SyscallTable::new();
        api::install_handlers(&mut table);
        Ok(Self { state: KernelLock::new(KernelState::new(config, devices)?), table })
    }

    /// Enters the kernel's exclusive section on behalf of `cpu`.
    pub fn lock(&self, cpu: CpuId) -> KernelGuard<'_, KernelState> {
        self.state.lock(cpu)
    }

    /// Creates a boot process from `image`. Failure is fatal.
    pub fn create_process(&self, image: &Image<'_>, kind: ProcessType) -> ProcessId {
        let mut guard = self.state.lock(CpuId::BOOT);
        boot::create_process(&mut guard, image, kind)
    }

    /// First entry of a core: schedules whatever is runnable.
    pub fn start(&self, cpu: CpuId) -> Dispatch {
        let mut guard = self.state.lock(cpu);
        log_info!(target: "sched", "{}: started", cpu);
        guard.cpus[cpu.as_index()].status = sched::CpuStatus::Started;
        sched::schedule(guard)
    }

    /// System-call trap with the caller's registers.
    pub fn syscall(&self, cpu: CpuId, frame: &TrapFrame) -> Dispatch {
        self.handle(self.state.lock(cpu), Some(frame), Trap::Syscall)
    }

    /// User page fault at `va` with hardware error code `err`.
    pub fn page_fault(&self, cpu: CpuId, frame: &TrapFrame, va: u32, err: u32) -> Dispatch {
        self.handle(self.state.lock(cpu), Some(frame), Trap::PageFault { va, err })
    }

    /// Timer interrupt taken while `frame` was executing.
    pub fn timer(&self, cpu: CpuId, frame: &TrapFrame) -> Dispatch {
        self.handle(self.state.lock(cpu), Some(frame), Trap::Timer)
    }

    /// Timer interrupt for a core whose current registers are already saved.
    pub fn preempt(&self, cpu: CpuId) -> Dispatch {
        self.handle(self.state.lock(cpu), None, Trap::Timer)
    }

    /// Runs `f` over the kernel state under the lock.
    pub fn inspect<R>(&self, cpu: CpuId, f: impl FnOnce(&KernelState) -> R) -> R {
        f(&self.state.lock(cpu))
    }

    /// Hosted user-mode port executing as `thread`, preempting `cpu` when it needs to run.
    pub fn port(&self, cpu: CpuId, thread: ThreadId) -> UserPort<'_> {
        UserPort::new(self, cpu, thread)
    }

    /// Delivers `trap` only when `thread` is the one executing on `cpu`.
    pub(crate) fn trap_as(
        &self,
        cpu: CpuId,
        thread: ThreadId,
        frame: Option<&TrapFrame>,
        trap: Trap,
    ) -> Option<Dispatch> {
        let mut guard = self.state.lock(cpu);
        guard.if_current(cpu, thread, |_, _| ())?;
        Some(self.handle(guard, frame, trap))
    }

    /// Runs `f` on the kernel state when `thread` is the one executing on `cpu`.
    pub(crate) fn with_current<R>(
        &self,
        cpu: CpuId,
        thread: ThreadId,
        f: impl FnOnce(&mut KernelState, usize) -> R,
    ) -> Option<R> {
        self.state.lock(cpu).if_current(cpu, thread, f)
    }

    fn handle(&self, guard: KernelGuard<'_, KernelState>, frame: Option<&TrapFrame>, trap: Trap) -> Dispatch {
        let guard = match trap::enter(guard, frame) {
            Entry::Kernel(guard) => guard,
            Entry::Reaped(dispatch) => return dispatch,
        };
        match trap {
            Trap::Syscall => crate::syscall::dispatch(guard, &self.table),
            Trap::PageFault { va, err } => trap::page_fault(guard, va, err),
            Trap::Timer => sched::schedule(guard),
        }
    }
}
