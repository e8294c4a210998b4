// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context
//! DEPENDS_ON: kernel::KernelState, task, ipc, mm, hal
//! INVARIANTS: Stable syscall numbers; Decode→Check→Execute; user memory is checked before it
//!             is touched; RUNNING, DYING and FREE are never externally settable
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use alloc::vec;

use axon_abi::layout::{page_offset, PteFlags};
use axon_abi::trapframe::{FL_IF, FL_IOPL_MASK, USER_CS, USER_DS};
use axon_abi::{ProcessId, Status, Sysno, ThreadId, TrapFrame};

use super::{Args, Error, SysResult, SyscallTable};
use crate::hal::MAX_PACKET;
use crate::ipc;
use crate::kernel::KernelState;
use crate::types::{CpuId, UserPage};

/// Execution context shared across syscalls.
pub struct Context<'a> {
    pub state: &'a mut KernelState,
    pub cpu: CpuId,
    resched: bool,
}

impl<'a> Context<'a> {
    /// Creates a context for the thread running on `cpu`.
    pub fn new(state: &'a mut KernelState, cpu: CpuId) -> Self {
        Self { state, cpu, resched: false }
    }

    /// Handler asked to give up the core after returning.
    pub fn resched(&self) -> bool {
        self.resched
    }

    fn caller_thread(&self) -> SysResult<usize> {
        Ok(self.state.lookup_thread(self.cpu, ThreadId::CURRENT, false)?)
    }

    fn caller_process(&self) -> SysResult<usize> {
        Ok(self.state.lookup_process(self.cpu, ProcessId::CURRENT, false)?)
    }

    fn process(&self, raw: u32, check_perm: bool) -> SysResult<usize> {
        Ok(self.state.lookup_process(self.cpu, ProcessId::from_raw(raw as i32), check_perm)?)
    }

    fn thread(&self, raw: u32, check_perm: bool) -> SysResult<usize> {
        Ok(self.state.lookup_thread(self.cpu, ThreadId::from_raw(raw as i32), check_perm)?)
    }

    /// Copies caller memory, destroying the caller when it is not user-readable.
    fn copy_in(&self, va: u32, buf: &mut [u8]) -> SysResult<()> {
        let proc = self.caller_process()?;
        let space = self.state.tables.process(proc).space().ok_or(Error::Fault { va })?;
        space.read(&self.state.mem, va, buf)?;
        Ok(())
    }

    /// Checks that `[va, va+len)` is mapped in the caller with `perm | USER | PRESENT`.
    fn check_user(&self, va: u32, len: u32, perm: PteFlags) -> SysResult<()> {
        let proc = self.caller_process()?;
        let space = self.state.tables.process(proc).space().ok_or(Error::Fault { va })?;
        space.check_user(va, len, perm)?;
        Ok(())
    }

    fn copy_out(&mut self, va: u32, data: &[u8]) -> SysResult<()> {
        let proc = self.caller_process()?;
        let state = &mut *self.state;
        let space = state.tables.process(proc).space().ok_or(Error::Fault { va })?;
        space.write(&mut state.mem, va, data)?;
        Ok(())
    }
}

// Typed decoders for Decode→Check→Execute

fn decode_page(va: u32) -> SysResult<UserPage> {
    UserPage::new(va).ok_or(Error::InvalidArgument)
}

fn decode_perm(raw: u32) -> SysResult<PteFlags> {
    let perm = PteFlags::from_bits_retain(raw);
    if perm.is_valid_syscall_perm() {
        Ok(perm)
    } else {
        Err(Error::InvalidArgument)
    }
}

/// Only RUNNABLE and NOT_RUNNABLE may be requested from user mode.
fn decode_settable_status(raw: u32) -> SysResult<Status> {
    match Status::from_raw(raw) {
        Some(status @ (Status::Runnable | Status::NotRunnable)) => Ok(status),
        _ => Err(Error::InvalidArgument),
    }
}

#[derive(Copy, Clone)]
struct PageAllocArgsTyped {
    target: u32,
    va: UserPage,
    perm: PteFlags,
}

impl PageAllocArgsTyped {
    #[inline]
    fn decode(args: &Args) -> SysResult<Self> {
        Ok(Self { target: args.get(0), va: decode_page(args.get(1))?, perm: decode_perm(args.get(2))? })
    }
}

#[derive(Copy, Clone)]
struct PageMapArgsTyped {
    src: u32,
    src_va: UserPage,
    dst: u32,
    dst_va: UserPage,
    perm: PteFlags,
}

impl PageMapArgsTyped {
    #[inline]
    fn decode(args: &Args) -> SysResult<Self> {
        Ok(Self {
            src: args.get(0),
            src_va: decode_page(args.get(1))?,
            dst: args.get(2),
            dst_va: decode_page(args.get(3))?,
            perm: decode_perm(args.get(4))?,
        })
    }

    /// Write access cannot be granted from a read-only source mapping.
    #[inline]
    fn check(&self, source: PteFlags) -> SysResult<()> {
        if self.perm.contains(PteFlags::WRITE) && !source.contains(PteFlags::WRITE) {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

#[derive(Copy, Clone)]
struct PacketArgsTyped {
    buf: u32,
    len: u32,
}

impl PacketArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        Self { buf: args.get(0), len: args.get(1) }
    }

    #[inline]
    fn check(&self) -> SysResult<()> {
        if self.len as usize > MAX_PACKET {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

/// Registers the default set of syscall handlers.
pub fn install_handlers(table: &mut SyscallTable) {
    let handlers: [(Sysno, super::Handler); 22] = [
        (Sysno::Cputs, sys_cputs),
        (Sysno::Cgetc, sys_cgetc),
        (Sysno::GetProcessId, sys_get_process_id),
        (Sysno::ProcessDestroy, sys_process_destroy),
        (Sysno::PageAlloc, sys_page_alloc),
        (Sysno::PageMap, sys_page_map),
        (Sysno::PageUnmap, sys_page_unmap),
        (Sysno::Exofork, sys_exofork),
        (Sysno::ProcessSetStatus, sys_process_set_status),
        (Sysno::ProcessSetPgfaultUpcall, sys_process_set_pgfault_upcall),
        (Sysno::Yield, sys_yield),
        (Sysno::IpcTrySend, sys_ipc_try_send),
        (Sysno::IpcRecv, sys_ipc_recv),
        (Sysno::TimeMsec, sys_time_msec),
        (Sysno::PacketTrySend, sys_packet_try_send),
        (Sysno::PacketReceive, sys_packet_receive),
        (Sysno::GetThreadId, sys_get_thread_id),
        (Sysno::ThreadCreate, sys_thread_create),
        (Sysno::ThreadDestroy, sys_thread_destroy),
        (Sysno::ThreadSetStatus, sys_thread_set_status),
        (Sysno::ThreadSetTrapframe, sys_thread_set_trapframe),
        (Sysno::ThreadSetUxstack, sys_thread_set_uxstack),
    ];
    for (number, handler) in handlers {
        table.register(number.raw() as usize, handler);
    }
}

fn sys_cputs(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let (va, len) = (args.get(0), args.get(1));
    ctx.check_user(va, len, PteFlags::empty())?;
    let mut buf = vec![0u8; len as usize];
    ctx.copy_in(va, &mut buf)?;
    ctx.state.devices.console.write(&buf);
    Ok(0)
}

fn sys_cgetc(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    Ok(ctx.state.devices.console.read_byte().map_or(0, u32::from))
}

fn sys_get_process_id(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    let proc = ctx.caller_process()?;
    Ok(ctx.state.tables.process(proc).id().raw() as u32)
}

fn sys_process_destroy(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.process(args.get(0), true)?;
    ctx.state.destroy_process(ctx.cpu, target);
    Ok(0)
}

fn sys_page_alloc(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let typed = PageAllocArgsTyped::decode(args)?;
    let target = ctx.process(typed.target, true)?;
    let state = &mut *ctx.state;
    let frame = state.mem.alloc_zeroed().ok_or(crate::mm::MapError::NoMemory)?;
    let space = state.tables.process_mut(target).space.as_mut().ok_or(Error::InvalidArgument)?;
    if let Err(err) = space.insert(&mut state.mem, frame, typed.va.raw(), typed.perm) {
        state.mem.free(frame);
        return Err(err.into());
    }
    Ok(0)
}

fn sys_page_map(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let typed = PageMapArgsTyped::decode(args)?;
    let src = ctx.process(typed.src, true)?;
    let dst = ctx.process(typed.dst, true)?;
    let state = &mut *ctx.state;
    let (frame, source) = state
        .tables
        .process(src)
        .space()
        .and_then(|space| space.lookup(typed.src_va.raw()))
        .ok_or(Error::InvalidArgument)?;
    typed.check(source)?;
    let space = state.tables.process_mut(dst).space.as_mut().ok_or(Error::InvalidArgument)?;
    space.insert(&mut state.mem, frame, typed.dst_va.raw(), typed.perm)?;
    Ok(0)
}

fn sys_page_unmap(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let va = decode_page(args.get(1))?;
    let target = ctx.process(args.get(0), true)?;
    let state = &mut *ctx.state;
    if let Some(space) = state.tables.process_mut(target).space.as_mut() {
        space.remove(&mut state.mem, va.raw());
    }
    Ok(0)
}

fn sys_exofork(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    let parent = ctx.caller_process()?;
    let caller = ctx.caller_thread()?;
    let parent_id = ctx.state.tables.process(parent).id();
    let child = ctx.state.alloc_process(parent_id)?;

    let mut frame = *ctx.state.tables.thread(caller).frame();
    frame.regs.eax = 0;
    let tables = &mut ctx.state.tables;
    let first = tables.threads_of(child).next().ok_or(Error::Task(crate::task::TaskError::NoFreeSlots))?;
    tables.thread_mut(first).frame = frame;
    tables.process_mut(child).status = Status::NotRunnable;
    let id = tables.process(child).id();
    log_debug!(target: "sys", "[{}] exofork -> {}", parent_id, id);
    Ok(id.raw() as u32)
}

fn sys_process_set_status(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let status = decode_settable_status(args.get(1))?;
    let target = ctx.process(args.get(0), true)?;
    ctx.state.tables.process_mut(target).status = status;
    Ok(0)
}

fn sys_process_set_pgfault_upcall(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.process(args.get(0), true)?;
    ctx.state.tables.process_mut(target).pgfault_upcall = args.get(1);
    Ok(0)
}

fn sys_yield(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    ctx.resched = true;
    Ok(0)
}

fn sys_ipc_try_send(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let sender = ctx.caller_process()?;
    let target = ctx.process(args.get(0), false)?;
    let perm = PteFlags::from_bits_retain(args.get(3));
    let state = &mut *ctx.state;
    ipc::try_send(&mut state.tables, &mut state.mem, sender, target, args.get(1), args.get(2), perm)?;
    Ok(0)
}

fn sys_ipc_recv(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let proc = ctx.caller_process()?;
    let thread = ctx.caller_thread()?;
    ipc::recv(&mut ctx.state.tables, proc, thread, args.get(0))?;
    Ok(0)
}

fn sys_time_msec(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    Ok(ctx.state.devices.timer.now_ms())
}

fn sys_packet_try_send(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let typed = PacketArgsTyped::decode(args);
    typed.check()?;
    let mut frame = vec![0u8; typed.len as usize];
    ctx.copy_in(typed.buf, &mut frame)?;
    ctx.state.devices.net.transmit(&frame)?;
    Ok(0)
}

/// Receives one frame into a `MAX_PACKET` user buffer and stores its length at `len_va`.
fn sys_packet_receive(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let (buf_va, len_va) = (args.get(0), args.get(1));
    ctx.check_user(buf_va, MAX_PACKET as u32, PteFlags::WRITE)?;
    ctx.check_user(len_va, 4, PteFlags::WRITE)?;
    let mut frame = vec![0u8; MAX_PACKET];
    let len = ctx.state.devices.net.receive(&mut frame)?;
    ctx.copy_out(buf_va, &frame[..len])?;
    ctx.copy_out(len_va, &(len as u32).to_le_bytes())?;
    Ok(len as u32)
}

fn sys_get_thread_id(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    let thread = ctx.caller_thread()?;
    Ok(ctx.state.tables.thread(thread).id().raw() as u32)
}

fn sys_thread_create(ctx: &mut Context<'_>, _args: &Args) -> SysResult<u32> {
    let proc = ctx.caller_process()?;
    let slot = ctx.state.tables.alloc_thread(proc)?;
    let thread = ctx.state.tables.thread_mut(slot);
    thread.status = Status::NotRunnable;
    Ok(thread.id().raw() as u32)
}

fn sys_thread_destroy(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.thread(args.get(0), true)?;
    ctx.state.destroy_thread(ctx.cpu, target);
    Ok(0)
}

fn sys_thread_set_status(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let status = decode_settable_status(args.get(1))?;
    let target = ctx.thread(args.get(0), true)?;
    // A thread current on another core keeps its state until that core traps.
    if ctx.state.running_elsewhere(ctx.cpu, target) {
        return Err(Error::InvalidArgument);
    }
    let thread = ctx.state.tables.thread_mut(target);
    if thread.status() == Status::Dying {
        return Err(Error::InvalidArgument);
    }
    thread.status = status;
    Ok(0)
}

/// Installs a caller-supplied register file, forcing user segments, interrupts on and no I/O
/// privilege.
fn sys_thread_set_trapframe(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.thread(args.get(0), true)?;
    let mut raw = [0u8; TrapFrame::SIZE];
    ctx.copy_in(args.get(1), &mut raw)?;
    let mut frame = TrapFrame::from_bytes(&raw);
    frame.ds = USER_DS;
    frame.es = USER_DS;
    frame.ss = USER_DS;
    frame.cs = USER_CS;
    frame.eflags = (frame.eflags | FL_IF) & !FL_IOPL_MASK;
    ctx.state.tables.thread_mut(target).frame = frame;
    Ok(0)
}

fn sys_thread_set_uxstack(ctx: &mut Context<'_>, args: &Args) -> SysResult<u32> {
    let target = ctx.thread(args.get(0), true)?;
    let uxstack = args.get(1);
    if page_offset(uxstack) != 0 {
        return Err(Error::InvalidArgument);
    }
    ctx.state.tables.thread_mut(target).uxstack = uxstack;
    Ok(0)
}
