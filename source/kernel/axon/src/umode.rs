// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hosted user mode: executes user code as one kernel thread without real hardware
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/*.rs and the axon-rt suites drive every entry point through it
//! PUBLIC API: UserPort (implements axon_abi::UserEnv)
//! DEPENDS_ON: kernel::Kernel, trap::Trap
//! INVARIANTS: A port only touches memory or traps while its thread is the one dispatched on
//!             the core it uses; the kernel's saved frame always equals the port's registers
//!             while the thread runs
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! Timer interrupts stand in for everything else that would run on the machine: a port whose
//! thread is runnable but not dispatched preempts its home core until the round-robin scan
//! reaches it. Ports sharing a home core must be driven from the same host thread, and a
//! thread should keep running on the core of the host thread that drives it.

use core::hint::spin_loop;

use axon_abi::layout::PteFlags;
use axon_abi::syscall::encode_request;
use axon_abi::{Error, PageFault, ProcessId, ProcessView, Status, Sysno, ThreadId, ThreadView, TrapFrame, UserEnv};

use crate::kernel::{Kernel, KernelState};
use crate::mm::UserAccessError;
use crate::sched::Dispatch;
use crate::trap::Trap;
use crate::types::CpuId;

/// Polls before a port gives up on ever being dispatched.
const SPIN_BUDGET: u32 = 1 << 22;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    Running(CpuId, TrapFrame),
    Runnable,
    Parked,
    Gone,
}

/// Result of one attempt at a user memory access.
enum Access<T> {
    Done(T),
    Fault { va: u32, present: bool },
}

/// User-mode execution context bound to one thread.
pub struct UserPort<'k> {
    kernel: &'k Kernel,
    home: CpuId,
    cpu: CpuId,
    thread: ThreadId,
    regs: TrapFrame,
}

impl<'k> UserPort<'k> {
    pub(crate) fn new(kernel: &'k Kernel, home: CpuId, thread: ThreadId) -> Self {
        let regs = kernel.inspect(home, |s| {
            s.tables().thread_slot(thread).map(|slot| *s.tables().thread(slot).frame()).unwrap_or_default()
        });
        Self { kernel, home, cpu: home, thread, regs }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    /// Core the thread was last seen running on.
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    /// Returns `true` while the thread's slot still holds this thread.
    pub fn is_alive(&self) -> bool {
        self.placement() != Placement::Gone
    }

    fn placement(&self) -> Placement {
        self.kernel.inspect(self.home, |s| placement(s, self.thread))
    }

    fn absorb(&mut self, dispatch: Dispatch) {
        if let Dispatch::Run { cpu, thread, frame } = dispatch {
            if thread == self.thread {
                self.cpu = cpu;
                self.regs = frame;
            }
        }
    }

    /// Blocks until the kernel dispatches this thread, preempting the home core while the
    /// thread is runnable. Fails once the thread has been destroyed.
    pub fn ensure_running(&mut self) -> Result<(), PageFault> {
        for _ in 0..SPIN_BUDGET {
            match self.placement() {
                Placement::Running(cpu, frame) => {
                    self.cpu = cpu;
                    self.regs = frame;
                    return Ok(());
                }
                Placement::Runnable => {
                    let dispatch = self.kernel.preempt(self.home);
                    self.absorb(dispatch);
                }
                Placement::Parked => spin_loop(),
                Placement::Gone => return Err(PageFault::Killed),
            }
        }
        log_error!(target: "trap", "thread {} never dispatched on {}", self.thread, self.home);
        panic!("thread {} starved: never dispatched", self.thread);
    }

    /// Runs `access` against the thread's address space, turning a failed check into a page
    /// fault delivered through the kernel.
    fn access<T>(
        &mut self,
        write: bool,
        mut access: impl FnMut(&mut KernelState, usize) -> Result<T, UserAccessError>,
    ) -> Result<T, PageFault> {
        loop {
            self.ensure_running()?;
            let attempt = self.kernel.with_current(self.cpu, self.thread, |s, slot| {
                match access(s, slot) {
                    Ok(value) => Access::Done(value),
                    Err(UserAccessError::Fault { va }) => {
                        let owner = s.tables().thread(slot).process_slot();
                        let present = s.tables().process(owner).space().is_some_and(|sp| sp.lookup(va).is_some());
                        Access::Fault { va, present }
                    }
                }
            });
            match attempt {
                None => continue,
                Some(Access::Done(value)) => return Ok(value),
                Some(Access::Fault { va, present }) => {
                    let trap = Trap::fault(va, write, present);
                    let Some(dispatch) = self.kernel.trap_as(self.cpu, self.thread, None, trap) else {
                        continue;
                    };
                    if dispatch.thread() == Some(self.thread) {
                        self.absorb(dispatch);
                        return Err(PageFault::Upcall);
                    }
                    return Err(PageFault::Killed);
                }
            }
        }
    }
}

fn placement(s: &KernelState, thread: ThreadId) -> Placement {
    let Ok(slot) = s.tables().thread_slot(thread) else {
        return Placement::Gone;
    };
    let t = s.tables().thread(slot);
    if let Some(cpu) = t.last_cpu().filter(|&cpu| s.cpu(cpu).current() == Some(slot)) {
        return Placement::Running(cpu, *t.frame());
    }
    let runnable = t.status() == Status::Runnable
        && s.tables().process(t.process_slot()).status() == Status::Runnable;
    if runnable {
        Placement::Runnable
    } else {
        Placement::Parked
    }
}

fn user_space(s: &KernelState, slot: usize) -> Result<&crate::mm::AddressSpace, UserAccessError> {
    let owner = s.tables().thread(slot).process_slot();
    s.tables().process(owner).space().ok_or(UserAccessError::Fault { va: 0 })
}

impl UserEnv for UserPort<'_> {
    fn syscall(&mut self, no: Sysno, args: [u32; 5]) -> i32 {
        loop {
            if self.ensure_running().is_err() {
                return Error::BadHandle.code();
            }
            let mut frame = self.regs;
            encode_request(&mut frame, no.raw(), args);
            let Some(dispatch) = self.kernel.trap_as(self.cpu, self.thread, Some(&frame), Trap::Syscall) else {
                continue;
            };
            if dispatch.thread() == Some(self.thread) {
                self.absorb(dispatch);
            } else if self.ensure_running().is_err() {
                // The call destroyed its own caller.
                return Error::BadHandle.code();
            }
            return self.regs.regs.eax as i32;
        }
    }

    fn read(&mut self, va: u32, buf: &mut [u8]) -> Result<(), PageFault> {
        self.access(false, |s, slot| user_space(s, slot)?.read(s.mem(), va, buf))
    }

    fn write(&mut self, va: u32, data: &[u8]) -> Result<(), PageFault> {
        self.access(true, |s, slot| {
            let owner = s.tables.thread(slot).process_slot();
            let space = s.tables.process(owner).space().ok_or(UserAccessError::Fault { va })?;
            space.write(&mut s.mem, va, data)
        })
    }

    fn swap(&mut self, va: u32, value: u32) -> Result<u32, PageFault> {
        self.access(true, |s, slot| {
            let owner = s.tables.thread(slot).process_slot();
            let space = s.tables.process(owner).space().ok_or(UserAccessError::Fault { va })?;
            space.check_user(va, 4, PteFlags::WRITE)?;
            let mut old = [0u8; 4];
            space.read(&s.mem, va, &mut old)?;
            space.write(&mut s.mem, va, &value.to_le_bytes())?;
            Ok(u32::from_le_bytes(old))
        })
    }

    fn regs(&self) -> TrapFrame {
        self.regs
    }

    fn set_regs(&mut self, tf: TrapFrame) {
        self.regs = tf;
        let mut state = self.kernel.lock(self.home);
        if let Ok(slot) = state.tables.thread_slot(self.thread) {
            state.tables.thread_mut(slot).frame = tf;
        }
    }

    fn pde_present(&self, va: u32) -> bool {
        self.kernel.inspect(self.home, |s| {
            s.tables().thread_slot(self.thread).is_ok_and(|slot| user_space(s, slot).is_ok_and(|sp| sp.pde_present(va)))
        })
    }

    fn pte(&self, va: u32) -> Option<PteFlags> {
        self.kernel.inspect(self.home, |s| {
            let slot = s.tables().thread_slot(self.thread).ok()?;
            user_space(s, slot).ok()?.lookup(va).map(|(_, perm)| perm)
        })
    }

    fn thread(&self, id: ThreadId) -> ThreadView {
        self.kernel.inspect(self.home, |s| s.thread_view(id))
    }

    fn process(&self, id: ProcessId) -> ProcessView {
        self.kernel.inspect(self.home, |s| s.process_view(id))
    }
}
