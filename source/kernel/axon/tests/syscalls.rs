// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall boundary driven from hosted user mode
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 8 integration tests
//!
//! TEST_SCOPE:
//!   - Result register convention and error codes
//!   - User memory validation (caller destroyed on bad pointers)
//!   - Process duplication, permission checks, thread primitives
//!   - Console, timer and packet collaborators
//!
//! TEST_SCENARIOS:
//!   - console_roundtrip(): cputs reaches the console, cgetc reads fed bytes then 0
//!   - bad_pointer_destroys_caller(): cputs on unmapped memory frees the whole process
//!   - exofork_copies_context_with_zero_result(): child is NOT_RUNNABLE with the caller's frame
//!   - unrelated_process_is_out_of_reach(): destroy/alloc on a non-child yields BadHandle
//!   - ids_identify_the_caller(): process and thread ids match the tables
//!   - thread_context_is_sanitized(): privileged bits never reach a saved frame
//!   - self_destroy_of_thread_moves_on(): destroying the caller schedules a sibling
//!   - packets_flow_through_the_nic(): transmit, empty receive, receive with length word
//!
//! DEPENDENCIES:
//!   - axon::{Kernel, UserPort}
//!   - axon::hal::virt::VirtMachine
//!
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
use axon::abi::layout::{PteFlags, PGSIZE, USTACKTOP};
use axon::abi::trapframe::{FL_IF, FL_IOPL_3, USER_CS, USER_DS};
use axon::abi::{Error, ProcessId, ProcessType, Status, Sysno, ThreadId, TrapFrame, UserEnv};
use axon::boot::Image;
use axon::hal::virt::VirtMachine;
use axon::{CpuId, Kernel, KernelConfig};

const ENTRY: u32 = 0x0080_0020;
const STACK_PAGE: u32 = USTACKTOP - PGSIZE;
const RW: u32 = PteFlags::PRESENT.bits() | PteFlags::USER.bits() | PteFlags::WRITE.bits();

struct Booted {
    vm: VirtMachine,
    kernel: Kernel,
    proc: ProcessId,
    thread: ThreadId,
}

fn boot() -> Booted {
    let vm = VirtMachine::new();
    let kernel = Kernel::new(KernelConfig::small(8, 16), vm.devices()).expect("config");
    let proc = kernel.create_process(&Image::entry_only(ENTRY), ProcessType::User);
    let thread = kernel.inspect(CpuId::BOOT, |s| s.thread_ids(proc)[0]);
    assert_eq!(kernel.start(CpuId::BOOT).thread(), Some(thread));
    Booted { vm, kernel, proc, thread }
}

#[test]
fn console_roundtrip() {
    let b = boot();
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    port.write(STACK_PAGE, b"hello, axon\n").expect("stack page is mapped");
    assert_eq!(port.syscall(Sysno::Cputs, [STACK_PAGE, 12, 0, 0, 0]), 0);
    assert_eq!(b.vm.console.take_output(), b"hello, axon\n");

    b.vm.console.feed(b"k");
    assert_eq!(port.syscall(Sysno::Cgetc, [0; 5]), i32::from(b'k'));
    assert_eq!(port.syscall(Sysno::Cgetc, [0; 5]), 0);
}

#[test]
fn bad_pointer_destroys_caller() {
    let b = boot();
    let free_before = b.kernel.inspect(CpuId::BOOT, |s| s.mem().free_count());
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    assert_eq!(port.syscall(Sysno::Cputs, [0x0040_0000, 16, 0, 0, 0]), Error::BadHandle.code());
    assert!(!port.is_alive());
    b.kernel.inspect(CpuId::BOOT, |s| {
        assert_eq!(s.process_view(b.proc).status, Status::Free);
        assert!(s.mem().free_count() > free_before, "address space released");
    });
    assert!(b.vm.console.take_output().is_empty());
}

#[test]
fn exofork_copies_context_with_zero_result() {
    let b = boot();
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    let raw = port.syscall(Sysno::Exofork, [0; 5]);
    assert!(raw > 0);
    let child = ProcessId::from_raw(raw);
    let caller_frame = port.regs();

    b.kernel.inspect(CpuId::BOOT, |s| {
        let view = s.process_view(child);
        assert_eq!(view.parent, b.proc);
        assert_eq!(view.status, Status::NotRunnable);
        let child_thread = s.thread_ids(child)[0];
        let slot = s.tables().thread_slot(child_thread).expect("child thread");
        let frame = s.tables().thread(slot).frame();
        assert_eq!(frame.regs.eax, 0);
        assert_eq!(frame.eip, caller_frame.eip);
        assert_eq!(frame.esp, caller_frame.esp);
    });
    assert_eq!(caller_frame.regs.eax as i32, raw);

    // The child may be started by its parent but not by anyone else.
    assert_eq!(port.syscall(Sysno::ProcessSetStatus, [child.raw() as u32, Status::Running.raw(), 0, 0, 0]), Error::InvalidArgument.code());
    assert_eq!(port.syscall(Sysno::ProcessSetStatus, [child.raw() as u32, Status::Runnable.raw(), 0, 0, 0]), 0);
}

#[test]
fn unrelated_process_is_out_of_reach() {
    let b = boot();
    let other = b.kernel.create_process(&Image::entry_only(ENTRY), ProcessType::User);
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    let target = other.raw() as u32;
    assert_eq!(port.syscall(Sysno::ProcessDestroy, [target, 0, 0, 0, 0]), Error::BadHandle.code());
    assert_eq!(port.syscall(Sysno::PageAlloc, [target, 0x0040_0000, RW, 0, 0]), Error::BadHandle.code());
    assert_eq!(port.syscall(Sysno::ProcessDestroy, [0x7fff_f000, 0, 0, 0, 0]), Error::BadHandle.code());
    // Sending needs no relationship; the target simply is not receiving.
    assert_eq!(port.syscall(Sysno::IpcTrySend, [target, 7, 0xffff_ffff, 0, 0]), Error::IpcNotReceiving.code());
}

#[test]
fn ids_identify_the_caller() {
    let b = boot();
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    assert_eq!(port.syscall(Sysno::GetProcessId, [0; 5]), b.proc.raw());
    assert_eq!(port.syscall(Sysno::GetThreadId, [0; 5]), b.thread.raw());
    let t0 = port.syscall(Sysno::TimeMsec, [0; 5]);
    let t1 = port.syscall(Sysno::TimeMsec, [0; 5]);
    assert!(t1 > t0);
}

#[test]
fn thread_context_is_sanitized() {
    let b = boot();
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    let raw = port.syscall(Sysno::ThreadCreate, [0; 5]);
    assert!(raw > 0);
    let sibling = ThreadId::from_raw(raw);

    let mut forged = TrapFrame::user(0x0080_1000, STACK_PAGE + 0x800);
    forged.cs = 0x08;
    forged.ds = 0x10;
    forged.eflags = FL_IOPL_3;
    port.write(STACK_PAGE, &forged.to_bytes()).expect("stack page is mapped");
    assert_eq!(port.syscall(Sysno::ThreadSetTrapframe, [raw as u32, STACK_PAGE, 0, 0, 0]), 0);
    assert_eq!(port.syscall(Sysno::ThreadSetUxstack, [raw as u32, STACK_PAGE + 4, 0, 0, 0]), Error::InvalidArgument.code());
    assert_eq!(port.syscall(Sysno::ThreadSetUxstack, [raw as u32, STACK_PAGE, 0, 0, 0]), 0);

    b.kernel.inspect(CpuId::BOOT, |s| {
        let slot = s.tables().thread_slot(sibling).expect("sibling");
        let t = s.tables().thread(slot);
        assert_eq!(t.status(), Status::NotRunnable);
        assert_eq!(t.uxstack(), STACK_PAGE);
        let frame = t.frame();
        assert_eq!((frame.cs, frame.ds, frame.es, frame.ss), (USER_CS, USER_DS, USER_DS, USER_DS));
        assert_eq!(frame.eflags & FL_IOPL_3, 0);
        assert_ne!(frame.eflags & FL_IF, 0);
        assert_eq!(frame.eip, 0x0080_1000);
    });

    // A context outside user memory is a fault, which kills the caller.
    assert_eq!(port.syscall(Sysno::ThreadSetTrapframe, [raw as u32, 0xf000_0000, 0, 0, 0]), Error::BadHandle.code());
    assert!(!port.is_alive());
}

#[test]
fn self_destroy_of_thread_moves_on() {
    let b = boot();
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    let raw = port.syscall(Sysno::ThreadCreate, [0; 5]);
    assert_eq!(port.syscall(Sysno::ThreadSetStatus, [raw as u32, Status::Runnable.raw(), 0, 0, 0]), 0);
    assert_eq!(port.syscall(Sysno::ThreadSetStatus, [raw as u32, Status::Dying.raw(), 0, 0, 0]), Error::InvalidArgument.code());

    assert_eq!(port.syscall(Sysno::ThreadDestroy, [0; 5]), Error::BadHandle.code());
    b.kernel.inspect(CpuId::BOOT, |s| {
        assert_eq!(s.thread_view(b.thread).status, Status::Free);
        assert_eq!(s.process_view(b.proc).status, Status::Runnable);
        let current = s.current_thread(CpuId::BOOT).map(|slot| s.tables().thread(slot).id());
        assert_eq!(current, Some(ThreadId::from_raw(raw)));
    });
}

#[test]
fn packets_flow_through_the_nic() {
    let b = boot();
    let mut port = b.kernel.port(CpuId::BOOT, b.thread);
    let buf = 0x0040_0000;
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, buf, RW, 0, 0]), 0);

    port.write(buf, &[0xab; 60]).expect("buffer mapped");
    assert_eq!(port.syscall(Sysno::PacketTrySend, [buf, 60, 0, 0, 0]), 0);
    assert_eq!(b.vm.nic.pop_transmitted(), Some(vec![0xab; 60]));
    assert_eq!(port.syscall(Sysno::PacketTrySend, [buf, 4096, 0, 0, 0]), Error::InvalidArgument.code());

    let len_va = buf + 0x800;
    assert_eq!(port.syscall(Sysno::PacketReceive, [buf, len_va, 0, 0, 0]), Error::TryAgain.code());
    b.vm.nic.inject(&[1, 2, 3, 4, 5]);
    assert_eq!(port.syscall(Sysno::PacketReceive, [buf, len_va, 0, 0, 0]), 5);
    let mut got = [0u8; 5];
    port.read(buf, &mut got).expect("buffer mapped");
    assert_eq!(got, [1, 2, 3, 4, 5]);
    let mut len = [0u8; 4];
    port.read(len_va, &mut len).expect("buffer mapped");
    assert_eq!(u32::from_le_bytes(len), 5);
}
