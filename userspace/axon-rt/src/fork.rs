// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Copy-on-write fork built on exofork, page_map and the fault upcall
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/fork_cow.rs
//! PUBLIC API: COW, fork(), resume_child(), cow_fault()
//! DEPENDS_ON: sys, pgfault, globals, mem
//! INVARIANTS: Exception stacks are never copy-on-write; shared pages keep their permission;
//!             a writable or COW page ends up COW in both processes before the child runs
//! ADR: docs/adr/0016-kernel-libs-architecture.md

use alloc::vec;

use axon_abi::layout::{
    page_round_down, utxstacktop, PteFlags, PFTEMP, PGSIZE, PTSIZE, THREAD_MAX, THREAD_SLOT_SPAN,
    USTACKTOP, UTOP, UXSTACKTOP,
};
use axon_abi::{Error, ProcessId, Status, UTrapframe, UserEnv};

use crate::entry;
use crate::{globals, mem, pgfault, sys, RtError};

/// Software PTE bit marking a copy-on-write mapping.
pub const COW: PteFlags = PteFlags::from_bits_retain(0x800);

const RW: PteFlags = PteFlags::USER_PRESENT.union(PteFlags::WRITE);
const COW_PERM: PteFlags = PteFlags::USER_PRESENT.union(COW);

/// Returns `true` for pages holding some thread's exception stack.
fn is_exception_stack(va: u32) -> bool {
    va == UXSTACKTOP - PGSIZE || (1..THREAD_MAX).any(|slot| va == utxstacktop(slot) - PGSIZE)
}

/// Thread stack slot whose stack contains `esp`.
pub fn stack_slot(esp: u32) -> usize {
    let depth = USTACKTOP.saturating_sub(esp);
    ((depth / THREAD_SLOT_SPAN) as usize).min(THREAD_MAX - 1)
}

/// Maps the page at `va` into `child` following the sharing policy for `perm`.
fn duppage(env: &mut dyn UserEnv, child: ProcessId, va: u32, perm: PteFlags) -> Result<(), RtError> {
    let me = ProcessId::CURRENT;
    if perm.contains(PteFlags::SHARE) {
        sys::page_map(env, me, va, child, va, perm & PteFlags::SYSCALL)?;
    } else if perm.intersects(PteFlags::WRITE | COW) {
        sys::page_map(env, me, va, child, va, COW_PERM)?;
        // Ours may have been plainly writable; it must fault from now on too.
        sys::page_map(env, me, va, me, va, COW_PERM)?;
    } else {
        sys::page_map(env, me, va, child, va, perm & PteFlags::SYSCALL)?;
    }
    Ok(())
}

/// Duplicates the calling process. Returns the child's id; the child starts at the same
/// instruction with a zero result and must call [`resume_child`] first.
pub fn fork(env: &mut dyn UserEnv) -> Result<ProcessId, RtError> {
    pgfault::set_handler(env, entry::COW_FAULT)?;
    let child = sys::exofork(env)?;
    if !child.is_valid() {
        // Only the child observes zero; a hosted caller should never get here.
        return Err(RtError::Sys(Error::InvalidArgument));
    }

    let mut va = 0;
    while va < UTOP {
        if !env.pde_present(va) {
            va = (va - va % PTSIZE).saturating_add(PTSIZE);
            continue;
        }
        if let Some(perm) = env.pte(va) {
            if perm.contains(PteFlags::USER_PRESENT) && !is_exception_stack(va) {
                duppage(env, child, va, perm)?;
            }
        }
        va += PGSIZE;
    }

    sys::page_alloc(env, child, UXSTACKTOP - PGSIZE, RW)?;
    sys::set_pgfault_upcall(env, child, entry::PGFAULT_UPCALL.addr())?;
    sys::process_set_status(env, child, Status::Runnable)?;
    Ok(child)
}

/// First step of a freshly forked child: the copied runtime globals still describe the
/// parent, so the calling thread becomes the only and main thread.
pub fn resume_child(env: &mut dyn UserEnv) -> Result<(), RtError> {
    let regs = env.regs();
    if regs.regs.eax != 0 {
        return Err(RtError::Sys(Error::InvalidArgument));
    }
    let me = sys::gettid(env)?;
    globals::reset(env, me, stack_slot(regs.esp))
}

/// Gives the faulting process a private writable copy of a copy-on-write page.
///
/// Any other fault is a bug in the program and stops it.
pub fn cow_fault(env: &mut dyn UserEnv, utf: &UTrapframe) -> Result<(), RtError> {
    let va = page_round_down(utf.fault_va);
    let cow = env.pte(va).is_some_and(|perm| perm.contains(PteFlags::PRESENT | COW));
    if !utf.is_write() || !cow {
        panic!(
            "fault at {:#x} (err {:#x}, eip {:#x}) is not a write to a copy-on-write page",
            utf.fault_va, utf.err, utf.eip
        );
    }

    let me = ProcessId::CURRENT;
    sys::page_alloc(env, me, PFTEMP, RW)?;
    let mut page = vec![0u8; PGSIZE as usize];
    mem::read(env, va, &mut page)?;
    mem::write(env, PFTEMP, &page)?;
    sys::page_map(env, me, PFTEMP, me, va, RW)?;
    sys::page_unmap(env, me, PFTEMP)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_abi::layout::utstacktop;

    #[test]
    fn stack_slots_are_recovered_from_esp() {
        assert_eq!(stack_slot(USTACKTOP), 0);
        assert_eq!(stack_slot(USTACKTOP - 64), 0);
        for slot in 1..THREAD_MAX {
            assert_eq!(stack_slot(utstacktop(slot)), slot);
            assert_eq!(stack_slot(utstacktop(slot) - 8), slot);
        }
    }

    #[test]
    fn exception_stacks_are_excluded() {
        assert!(is_exception_stack(UXSTACKTOP - PGSIZE));
        assert!(is_exception_stack(utxstacktop(3) - PGSIZE));
        assert!(!is_exception_stack(USTACKTOP - PGSIZE));
        assert!(!is_exception_stack(utstacktop(3) - PGSIZE));
    }

    #[test]
    fn cow_bit_is_user_available() {
        assert!(PteFlags::AVAIL.contains(COW));
        assert!(COW_PERM.is_valid_syscall_perm());
        assert!(!COW_PERM.contains(PteFlags::WRITE));
    }
}
