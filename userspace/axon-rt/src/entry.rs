// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Code addresses for runtime entry points
//! OWNERS: @runtime
//! PUBLIC API: Code, PGFAULT_UPCALL, THREAD_TRAMPOLINE, COW_FAULT, register_thread(),
//!             register_fault_handler()
//! DEPENDS_ON: spin::Mutex, axon_abi::layout::UTEXT
//! INVARIANTS: Codes are unique text addresses and never reassigned; codes are process
//!             independent, like text shared by every image of the same program
//! ADR: docs/adr/0016-kernel-libs-architecture.md
//!
//! The kernel only ever sees instruction pointers. Fixed entry points live at the bottom of
//! the text segment; functions registered at run time get the next free slot above them.

use alloc::vec::Vec;

use axon_abi::layout::UTEXT;
use axon_abi::{UTrapframe, UserEnv};
use spin::Mutex;

use crate::RtError;

/// Body of a thread started by the runtime.
pub type ThreadEntry = fn(&mut dyn UserEnv, u32);

/// Page-fault handler invoked from the upcall with the exception frame.
pub type FaultHandler = fn(&mut dyn UserEnv, &UTrapframe) -> Result<(), RtError>;

/// Text address of an entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Code(u32);

impl Code {
    #[inline]
    pub const fn from_addr(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn addr(self) -> u32 {
        self.0
    }
}

/// Assembly stub the kernel enters on a user page fault.
pub const PGFAULT_UPCALL: Code = Code(UTEXT);
/// Start routine of every runtime thread: calls the entry then destroys the thread.
pub const THREAD_TRAMPOLINE: Code = Code(UTEXT + 0x10);
/// Copy-on-write fault handler installed by `fork`.
pub const COW_FAULT: Code = Code(UTEXT + 0x20);

const DYNAMIC_BASE: u32 = UTEXT + 0x100;
const STRIDE: u32 = 0x10;

#[derive(Clone, Copy)]
enum Registered {
    Thread(ThreadEntry),
    Fault(FaultHandler),
}

static REGISTRY: Mutex<Vec<Registered>> = Mutex::new(Vec::new());

fn register(entry: Registered) -> Code {
    let mut registry = REGISTRY.lock();
    let code = Code(DYNAMIC_BASE + registry.len() as u32 * STRIDE);
    registry.push(entry);
    code
}

fn lookup(code: Code) -> Option<Registered> {
    let offset = code.0.checked_sub(DYNAMIC_BASE)?;
    if offset % STRIDE != 0 {
        return None;
    }
    REGISTRY.lock().get((offset / STRIDE) as usize).copied()
}

/// Gives `entry` a text address usable with `thread::create`.
pub fn register_thread(entry: ThreadEntry) -> Code {
    register(Registered::Thread(entry))
}

/// Gives `handler` a text address usable with `pgfault::set_handler`.
pub fn register_fault_handler(handler: FaultHandler) -> Code {
    register(Registered::Fault(handler))
}

pub(crate) fn thread_entry(code: Code) -> Option<ThreadEntry> {
    match lookup(code)? {
        Registered::Thread(entry) => Some(entry),
        Registered::Fault(_) => None,
    }
}

pub(crate) fn fault_handler(code: Code) -> Option<FaultHandler> {
    if code == COW_FAULT {
        return Some(crate::fork::cow_fault);
    }
    match lookup(code)? {
        Registered::Fault(handler) => Some(handler),
        Registered::Thread(_) => None,
    }
}
