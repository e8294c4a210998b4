// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User page-fault handler registration and the upcall entry
//! OWNERS: @runtime
//! PUBLIC API: set_handler(), run_upcall()
//! DEPENDS_ON: entry (code addresses), globals (handler word), sys
//! INVARIANTS: The upcall resumes the interrupted context exactly as captured in the exception
//!             frame; the exception stack is mapped before the upcall is registered
//! ADR: docs/adr/0016-kernel-libs-architecture.md

use axon_abi::layout::{PteFlags, PGSIZE, UXSTACKTOP};
use axon_abi::{ProcessId, UTrapframe, UserEnv};

use crate::entry::{self, Code};
use crate::{globals, sys, RtError};

/// Installs `handler` for every fault of this process.
///
/// The first installation maps the main exception stack and registers the upcall entry.
pub fn set_handler(env: &mut dyn UserEnv, handler: Code) -> Result<(), RtError> {
    globals::ensure_mapped(env)?;
    if globals::fault_handler_raw(env).is_none() {
        if env.pte(UXSTACKTOP - PGSIZE).is_none() {
            let rw = PteFlags::USER_PRESENT | PteFlags::WRITE;
            sys::page_alloc(env, ProcessId::CURRENT, UXSTACKTOP - PGSIZE, rw)?;
        }
        sys::set_pgfault_upcall(env, ProcessId::CURRENT, entry::PGFAULT_UPCALL.addr())?;
    }
    globals::set_fault_handler(env, handler)
}

/// Body of the upcall stub: the kernel left the thread at `PGFAULT_UPCALL` with the stack
/// pointer on a `UTrapframe`. Calls the installed handler, then resumes the faulting context.
pub fn run_upcall(env: &mut dyn UserEnv) -> Result<(), RtError> {
    let regs = env.regs();
    if regs.eip != entry::PGFAULT_UPCALL.addr() {
        return Err(RtError::UnknownEntry(regs.eip));
    }
    let mut raw = [0u8; UTrapframe::SIZE];
    env.read(regs.esp, &mut raw).map_err(|_| RtError::Killed)?;
    let utf = UTrapframe::from_bytes(&raw);

    let Some(code) = globals::fault_handler_raw(env) else {
        panic!("page fault at {:#x} (eip {:#x}) with no handler installed", utf.fault_va, utf.eip);
    };
    let handler = entry::fault_handler(code).ok_or(RtError::UnknownEntry(code.addr()))?;
    handler(env, &utf)?;

    let mut resume = env.regs();
    resume.regs = utf.regs;
    resume.eip = utf.eip;
    resume.eflags = utf.eflags;
    resume.esp = utf.esp;
    env.set_regs(resume);
    Ok(())
}
