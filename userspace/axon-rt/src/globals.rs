// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime globals page at `URUNTIME`.
//!
//! ```text
//! URUNTIME + 0x000  main thread id
//! URUNTIME + 0x004  page-fault handler code (0 = none installed)
//! URUNTIME + 0x008  thread table lock word
//! URUNTIME + 0x010  thread table: THREAD_MAX ids, 0 = slot free
//! ```
//!
//! The page is ordinary writable memory, so `fork` hands the child a copy-on-write snapshot
//! that the child then rewrites for itself.

use axon_abi::layout::{PteFlags, THREAD_MAX, URUNTIME};
use axon_abi::{ProcessId, ThreadId, UserEnv};

use crate::entry::Code;
use crate::mem::{self, UserLock};
use crate::{sys, RtError};

pub const MAIN_THREAD: u32 = URUNTIME;
pub const FAULT_HANDLER: u32 = URUNTIME + 0x4;
pub const THREAD_LOCK: u32 = URUNTIME + 0x8;
pub const THREAD_TABLE: u32 = URUNTIME + 0x10;

const RW: PteFlags = PteFlags::USER_PRESENT.union(PteFlags::WRITE);

/// Lock guarding the thread table.
pub const fn thread_lock() -> UserLock {
    UserLock::at(THREAD_LOCK)
}

#[inline]
pub const fn slot_va(slot: usize) -> u32 {
    THREAD_TABLE + 4 * slot as u32
}

/// Maps the globals page if this process does not have it yet.
pub fn ensure_mapped(env: &mut dyn UserEnv) -> Result<(), RtError> {
    if env.pte(URUNTIME).is_none() {
        sys::page_alloc(env, ProcessId::CURRENT, URUNTIME, RW)?;
    }
    Ok(())
}

pub fn main_thread(env: &mut dyn UserEnv) -> Result<ThreadId, RtError> {
    mem::read_word(env, MAIN_THREAD).map(|raw| ThreadId::from_raw(raw as i32))
}

/// Installed fault handler, read without running upcalls.
///
/// Used from inside the upcall itself, so a fault here is not retried.
pub fn fault_handler_raw(env: &mut dyn UserEnv) -> Option<Code> {
    let mut word = [0u8; 4];
    env.read(FAULT_HANDLER, &mut word).ok()?;
    let addr = u32::from_le_bytes(word);
    (addr != 0).then_some(Code::from_addr(addr))
}

pub fn set_fault_handler(env: &mut dyn UserEnv, code: Code) -> Result<(), RtError> {
    mem::write_word(env, FAULT_HANDLER, code.addr())
}

pub fn slot(env: &mut dyn UserEnv, slot: usize) -> Result<Option<ThreadId>, RtError> {
    let raw = mem::read_word(env, slot_va(slot))?;
    Ok((raw != 0).then_some(ThreadId::from_raw(raw as i32)))
}

pub fn set_slot(env: &mut dyn UserEnv, slot: usize, thread: Option<ThreadId>) -> Result<(), RtError> {
    mem::write_word(env, slot_va(slot), thread.map_or(0, |id| id.raw() as u32))
}

/// Slot currently recording `thread`, if any.
pub fn find_slot(env: &mut dyn UserEnv, thread: ThreadId) -> Result<Option<usize>, RtError> {
    for index in 0..THREAD_MAX {
        if slot(env, index)? == Some(thread) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Makes `thread` the only thread of this process, occupying `slot`.
pub fn reset(env: &mut dyn UserEnv, thread: ThreadId, slot: usize) -> Result<(), RtError> {
    let mut table = [0u8; 4 * THREAD_MAX];
    table[4 * slot..4 * slot + 4].copy_from_slice(&(thread.raw() as u32).to_le_bytes());
    mem::write(env, THREAD_TABLE, &table)?;
    mem::write_word(env, THREAD_LOCK, 0)?;
    mem::write_word(env, MAIN_THREAD, thread.raw() as u32)
}
