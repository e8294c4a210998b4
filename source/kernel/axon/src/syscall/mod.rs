// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, SysResult, dispatch()
//! DEPENDS_ON: task, ipc, mm, hal, sched, syscall::api
//! INVARIANTS: Stable numbers (axon_abi::Sysno); decode/check/execute discipline; a caller that
//!             hands the kernel inaccessible memory is destroyed instead of getting an error
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

pub mod api;

use core::fmt;

use axon_abi::syscall::{decode_request, NSYSCALLS};

use crate::hal::NetError;
use crate::ipc::IpcError;
use crate::kernel::KernelState;
use crate::mm::{MapError, UserAccessError};
use crate::sched::{self, Dispatch};
use crate::sync::KernelGuard;
use crate::task::TaskError;

/// Result type used by syscall handlers; `Ok` carries the raw result word.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in edx, ecx, ebx, edi, esi.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [u32; 5],
}

impl Args {
    pub const fn new(regs: [u32; 5]) -> Self {
        Self { regs }
    }

    /// Returns the raw argument at `index`.
    pub fn get(&self, index: usize) -> u32 {
        self.regs[index]
    }
}

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table.
    InvalidSyscall,
    /// Malformed argument caught during decode or check.
    InvalidArgument,
    /// Entity lookup or allocation failed.
    Task(TaskError),
    /// Rendezvous failed.
    Ipc(IpcError),
    /// Page table could not be extended or no frame was free.
    Map(MapError),
    /// Network device refused the request.
    Net(NetError),
    /// Caller-supplied memory is not accessible; the caller does not survive this.
    Fault { va: u32 },
}

impl Error {
    /// Stable negative code placed in the caller's result register.
    pub fn code(self) -> i32 {
        use axon_abi::Error as Abi;
        let abi = match self {
            Error::InvalidSyscall | Error::InvalidArgument => Abi::InvalidArgument,
            Error::Task(TaskError::NoFreeSlots) => Abi::NoFreeSlot,
            Error::Task(TaskError::OutOfMemory) => Abi::NoMemory,
            Error::Task(TaskError::BadHandle) => Abi::BadHandle,
            Error::Ipc(IpcError::NotReceiving) => Abi::IpcNotReceiving,
            Error::Ipc(IpcError::InvalidArgument) => Abi::InvalidArgument,
            Error::Ipc(IpcError::NoMemory) | Error::Map(MapError::NoMemory) => Abi::NoMemory,
            Error::Net(NetError::TxFull) | Error::Net(NetError::RxEmpty) => Abi::TryAgain,
            Error::Net(NetError::TooLarge) => Abi::InvalidArgument,
            Error::Fault { .. } => Abi::Fault,
        };
        abi.code()
    }
}

impl From<TaskError> for Error {
    fn from(value: TaskError) -> Self {
        Self::Task(value)
    }
}

impl From<IpcError> for Error {
    fn from(value: IpcError) -> Self {
        Self::Ipc(value)
    }
}

impl From<MapError> for Error {
    fn from(value: MapError) -> Self {
        Self::Map(value)
    }
}

impl From<NetError> for Error {
    fn from(value: NetError) -> Self {
        Self::Net(value)
    }
}

impl From<UserAccessError> for Error {
    fn from(value: UserAccessError) -> Self {
        let UserAccessError::Fault { va } = value;
        Self::Fault { va }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&mut api::Context<'_>, &Args) -> SysResult<u32>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable {
    handlers: [Option<Handler>; NSYSCALLS],
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; NSYSCALLS] }
    }

    /// Registers a handler.
    pub fn register(&mut self, number: usize, handler: Handler) {
        if number < NSYSCALLS {
            self.handlers[number] = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(&self, number: usize, ctx: &mut api::Context<'_>, args: &Args) -> SysResult<u32> {
        self.handlers
            .get(number)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall)
            .and_then(|handler| handler(ctx, args))
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the request saved in the current thread's registers and leaves the kernel.
///
/// The result lands in the caller's eax. The caller resumes directly unless the handler asked
/// for a reschedule or the caller stopped running.
pub fn dispatch(mut guard: KernelGuard<'_, KernelState>, table: &SyscallTable) -> Dispatch {
    let cpu = guard.cpu();
    let Some(slot) = guard.current_thread(cpu) else {
        log_warn!(target: "sys", "{}: syscall with no current thread", cpu);
        return sched::schedule(guard);
    };
    let (number, regs) = decode_request(guard.tables.thread(slot).frame());
    let args = Args::new(regs);

    let mut ctx = api::Context::new(&mut guard, cpu);
    let result = table.dispatch(number as usize, &mut ctx, &args);
    let resched = ctx.resched();

    let ret = match result {
        Ok(value) => value as i32,
        Err(Error::Fault { va }) => {
            let owner = guard.tables.thread(slot).process_slot();
            log_warn!(
                target: "sys",
                "[{}] user_mem_check assertion failure for va {:#x} (syscall {})",
                guard.tables.process(owner).id(),
                va,
                number
            );
            guard.destroy_process(cpu, owner);
            return sched::schedule(guard);
        }
        Err(err) => {
            log_debug!(target: "sys", "{}: syscall {} failed: {}", cpu, number, err);
            err.code()
        }
    };

    match guard.current_thread(cpu) {
        Some(current) => {
            let thread = guard.tables.thread_mut(current);
            thread.frame.regs.eax = ret as u32;
            if !resched && thread.status() == axon_abi::Status::Running {
                return sched::run(guard, current);
            }
            sched::schedule(guard)
        }
        None => sched::schedule(guard),
    }
}
