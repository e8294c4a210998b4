// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Typed wrappers over the raw syscall interface
//! OWNERS: @runtime
//! PUBLIC API: one function per syscall plus sleep()
//! DEPENDS_ON: axon_abi::{UserEnv, Sysno, Error}
//! INVARIANTS: Negative results are decoded into axon_abi::Error; ids travel as raw words
//! ADR: docs/adr/0016-kernel-libs-architecture.md

use axon_abi::layout::PteFlags;
use axon_abi::{Error, ProcessId, Status, Sysno, ThreadId, UserEnv};

/// Issues `no` and splits the result.
#[inline]
fn call(env: &mut dyn UserEnv, no: Sysno, args: [u32; 5]) -> Result<u32, Error> {
    Error::check(env.syscall(no, args))
}

#[inline]
fn pid(id: ProcessId) -> u32 {
    id.raw() as u32
}

#[inline]
fn tid(id: ThreadId) -> u32 {
    id.raw() as u32
}

/// Writes `len` bytes of user memory at `va` to the console.
pub fn cputs(env: &mut dyn UserEnv, va: u32, len: u32) -> Result<(), Error> {
    call(env, Sysno::Cputs, [va, len, 0, 0, 0]).map(drop)
}

/// Reads one console byte without blocking.
pub fn cgetc(env: &mut dyn UserEnv) -> Result<Option<u8>, Error> {
    let byte = call(env, Sysno::Cgetc, [0; 5])?;
    Ok((byte != 0).then_some(byte as u8))
}

pub fn getpid(env: &mut dyn UserEnv) -> Result<ProcessId, Error> {
    call(env, Sysno::GetProcessId, [0; 5]).map(|raw| ProcessId::from_raw(raw as i32))
}

pub fn gettid(env: &mut dyn UserEnv) -> Result<ThreadId, Error> {
    call(env, Sysno::GetThreadId, [0; 5]).map(|raw| ThreadId::from_raw(raw as i32))
}

pub fn process_destroy(env: &mut dyn UserEnv, id: ProcessId) -> Result<(), Error> {
    call(env, Sysno::ProcessDestroy, [pid(id), 0, 0, 0, 0]).map(drop)
}

/// Maps a fresh zeroed page at `va` in process `id`.
pub fn page_alloc(env: &mut dyn UserEnv, id: ProcessId, va: u32, perm: PteFlags) -> Result<(), Error> {
    call(env, Sysno::PageAlloc, [pid(id), va, perm.bits(), 0, 0]).map(drop)
}

/// Maps the page at `src_va` of `src` at `dst_va` of `dst`.
pub fn page_map(
    env: &mut dyn UserEnv,
    src: ProcessId,
    src_va: u32,
    dst: ProcessId,
    dst_va: u32,
    perm: PteFlags,
) -> Result<(), Error> {
    call(env, Sysno::PageMap, [pid(src), src_va, pid(dst), dst_va, perm.bits()]).map(drop)
}

pub fn page_unmap(env: &mut dyn UserEnv, id: ProcessId, va: u32) -> Result<(), Error> {
    call(env, Sysno::PageUnmap, [pid(id), va, 0, 0, 0]).map(drop)
}

/// Creates a NOT_RUNNABLE child sharing the caller's registers. The child observes `0`.
pub fn exofork(env: &mut dyn UserEnv) -> Result<ProcessId, Error> {
    call(env, Sysno::Exofork, [0; 5]).map(|raw| ProcessId::from_raw(raw as i32))
}

pub fn process_set_status(env: &mut dyn UserEnv, id: ProcessId, status: Status) -> Result<(), Error> {
    call(env, Sysno::ProcessSetStatus, [pid(id), status.raw(), 0, 0, 0]).map(drop)
}

pub fn set_pgfault_upcall(env: &mut dyn UserEnv, id: ProcessId, upcall: u32) -> Result<(), Error> {
    call(env, Sysno::ProcessSetPgfaultUpcall, [pid(id), upcall, 0, 0, 0]).map(drop)
}

pub fn yield_now(env: &mut dyn UserEnv) -> Result<(), Error> {
    call(env, Sysno::Yield, [0; 5]).map(drop)
}

pub fn ipc_try_send(
    env: &mut dyn UserEnv,
    to: ProcessId,
    value: u32,
    src_va: u32,
    perm: PteFlags,
) -> Result<(), Error> {
    call(env, Sysno::IpcTrySend, [pid(to), value, src_va, perm.bits(), 0]).map(drop)
}

/// Parks the caller until a send arrives; a page lands at `dst_va` when it is below `UTOP`.
pub fn ipc_recv(env: &mut dyn UserEnv, dst_va: u32) -> Result<(), Error> {
    call(env, Sysno::IpcRecv, [dst_va, 0, 0, 0, 0]).map(drop)
}

pub fn time_msec(env: &mut dyn UserEnv) -> Result<u32, Error> {
    call(env, Sysno::TimeMsec, [0; 5])
}

pub fn packet_try_send(env: &mut dyn UserEnv, va: u32, len: u32) -> Result<(), Error> {
    call(env, Sysno::PacketTrySend, [va, len, 0, 0, 0]).map(drop)
}

/// Receives one frame into `buf_va` and stores its length at `len_va`.
pub fn packet_receive(env: &mut dyn UserEnv, buf_va: u32, len_va: u32) -> Result<usize, Error> {
    call(env, Sysno::PacketReceive, [buf_va, len_va, 0, 0, 0]).map(|len| len as usize)
}

pub fn thread_create(env: &mut dyn UserEnv) -> Result<ThreadId, Error> {
    call(env, Sysno::ThreadCreate, [0; 5]).map(|raw| ThreadId::from_raw(raw as i32))
}

pub fn thread_destroy(env: &mut dyn UserEnv, id: ThreadId) -> Result<(), Error> {
    call(env, Sysno::ThreadDestroy, [tid(id), 0, 0, 0, 0]).map(drop)
}

pub fn thread_set_status(env: &mut dyn UserEnv, id: ThreadId, status: Status) -> Result<(), Error> {
    call(env, Sysno::ThreadSetStatus, [tid(id), status.raw(), 0, 0, 0]).map(drop)
}

/// Loads the register file stored in user memory at `tf_va` into thread `id`.
pub fn thread_set_trapframe(env: &mut dyn UserEnv, id: ThreadId, tf_va: u32) -> Result<(), Error> {
    call(env, Sysno::ThreadSetTrapframe, [tid(id), tf_va, 0, 0, 0]).map(drop)
}

pub fn thread_set_uxstack(env: &mut dyn UserEnv, id: ThreadId, top: u32) -> Result<(), Error> {
    call(env, Sysno::ThreadSetUxstack, [tid(id), top, 0, 0, 0]).map(drop)
}

/// Yields until at least `ms` milliseconds have passed.
pub fn sleep(env: &mut dyn UserEnv, ms: u32) -> Result<(), Error> {
    let end = time_msec(env)?.wrapping_add(ms);
    while time_msec(env)? < end {
        yield_now(env)?;
    }
    Ok(())
}
