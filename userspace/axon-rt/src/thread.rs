// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-level threads on top of the thread syscalls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/threads.rs
//! PUBLIC API: create(), destroy(), exit(), wait(), trampoline()
//! DEPENDS_ON: globals (slot table + lock), entry (code registry), sys, mem
//! INVARIANTS: Slot 0 belongs to the main thread and is never handed out; a slot is released
//!             only once its previous occupant's table entry reads FREE
//! ADR: docs/adr/0016-kernel-libs-architecture.md
//!
//! Each slot owns a fixed window below `USTACKTOP`: a regular stack page at
//! `utstacktop(slot)` and an exception stack page at `utxstacktop(slot)`. Pages are mapped the
//! first time a slot is used and kept afterwards.

use axon_abi::layout::{utstacktop, utxstacktop, PteFlags, PGSIZE, THREAD_MAX};
use axon_abi::{Error, ProcessId, Status, ThreadId, TrapFrame, UserEnv};

use crate::entry::{self, Code};
use crate::{globals, mem, sys, RtError};

const RW: PteFlags = PteFlags::USER_PRESENT.union(PteFlags::WRITE);

/// Words pushed at the new thread's stack pointer: entry code, then its argument.
const START_WORDS: u32 = 2;

/// Starts `entry(arg)` on a new thread of this process.
///
/// A failure after the kernel thread exists undoes the partial start. If the undo fails too,
/// its error is returned instead of the original one, since the thread or slot is then leaked.
pub fn create(env: &mut dyn UserEnv, entry: Code, arg: u32) -> Result<ThreadId, RtError> {
    let id = sys::thread_create(env)?;
    let slot = match claim_slot(env, id) {
        Ok(Some(slot)) => slot,
        Ok(None) => {
            sys::thread_destroy(env, id)?;
            return Err(RtError::NoThreadSlot);
        }
        Err(err) => {
            sys::thread_destroy(env, id)?;
            return Err(err);
        }
    };
    if let Err(err) = prepare(env, id, slot, entry, arg) {
        globals::thread_lock().with(env, |env| globals::set_slot(env, slot, None))?;
        sys::thread_destroy(env, id)?;
        return Err(err);
    }
    Ok(id)
}

fn claim_slot(env: &mut dyn UserEnv, id: ThreadId) -> Result<Option<usize>, RtError> {
    globals::thread_lock().with(env, |env| {
        for slot in 1..THREAD_MAX {
            if globals::slot(env, slot)?.is_none() {
                globals::set_slot(env, slot, Some(id))?;
                return Ok(Some(slot));
            }
        }
        Ok(None)
    })
}

fn ensure_page(env: &mut dyn UserEnv, va: u32) -> Result<(), RtError> {
    if env.pte(va).is_none() {
        sys::page_alloc(env, ProcessId::CURRENT, va, RW)?;
    }
    Ok(())
}

fn prepare(env: &mut dyn UserEnv, id: ThreadId, slot: usize, entry: Code, arg: u32) -> Result<(), RtError> {
    ensure_page(env, utxstacktop(slot) - PGSIZE)?;
    ensure_page(env, utstacktop(slot) - PGSIZE)?;

    let esp = utstacktop(slot) - 4 * START_WORDS;
    mem::write_word(env, esp, entry.addr())?;
    mem::write_word(env, esp + 4, arg)?;

    let frame = TrapFrame::user(entry::THREAD_TRAMPOLINE.addr(), esp);
    let tf_va = esp - TrapFrame::SIZE as u32;
    mem::write(env, tf_va, &frame.to_bytes())?;
    sys::thread_set_trapframe(env, id, tf_va)?;
    sys::thread_set_uxstack(env, id, utxstacktop(slot))?;
    sys::thread_set_status(env, id, Status::Runnable)?;
    Ok(())
}

fn release(env: &mut dyn UserEnv, id: ThreadId) -> Result<(), RtError> {
    globals::thread_lock().with(env, |env| match globals::find_slot(env, id)? {
        Some(slot) => globals::set_slot(env, slot, None),
        None => Ok(()),
    })
}

/// Destroys thread `id` (`ThreadId::CURRENT` for the caller) and frees its stack slot.
///
/// The main thread cannot be destroyed this way. Destroying the caller does not come back on
/// success: the returned `Ok` is only observed by a hosted driver after the thread is gone.
pub fn destroy(env: &mut dyn UserEnv, id: ThreadId) -> Result<(), RtError> {
    let me = sys::gettid(env)?;
    let target = if id.is_current() { me } else { id };
    if target == globals::main_thread(env)? {
        return Err(RtError::Sys(Error::InvalidArgument));
    }

    if target == me {
        release(env, me)?;
        return match sys::thread_destroy(env, ThreadId::CURRENT) {
            Ok(()) | Err(Error::BadHandle) => Ok(()),
            Err(err) => Err(err.into()),
        };
    }

    sys::thread_destroy(env, target)?;
    wait(env, target)?;
    release(env, target)
}

/// Ends the calling thread.
pub fn exit(env: &mut dyn UserEnv) -> Result<(), RtError> {
    destroy(env, ThreadId::CURRENT)
}

/// Yields until `id` no longer occupies its thread table slot.
pub fn wait(env: &mut dyn UserEnv, id: ThreadId) -> Result<(), RtError> {
    loop {
        let view = env.thread(id);
        if view.status == Status::Free || view.id != id {
            return Ok(());
        }
        sys::yield_now(env)?;
    }
}

/// Body of the trampoline every runtime thread starts in: runs the entry with its argument,
/// then destroys the thread unless the entry already did.
pub fn trampoline(env: &mut dyn UserEnv) -> Result<(), RtError> {
    let regs = env.regs();
    if regs.eip != entry::THREAD_TRAMPOLINE.addr() {
        return Err(RtError::UnknownEntry(regs.eip));
    }
    let code = Code::from_addr(mem::read_word(env, regs.esp)?);
    let arg = mem::read_word(env, regs.esp + 4)?;
    let body = entry::thread_entry(code).ok_or(RtError::UnknownEntry(code.addr()))?;
    body(env, arg);

    match sys::gettid(env) {
        Ok(_) => exit(env),
        Err(Error::BadHandle) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
