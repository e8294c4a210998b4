// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Page-fault upcall delivery and deferred destruction across cores
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 8 integration tests
//!
//! TEST_SCOPE:
//!   - Exception frame placement on the user exception stack (first and nested faults)
//!   - Faults without an upcall or without a usable exception stack
//!   - DYING threads reaped on their next trap
//!
//! TEST_SCENARIOS:
//!   - fault_without_upcall_is_fatal(): kernel panics with a diagnostic
//!   - cow_write_without_upcall_is_fatal(): a write to a copy-on-write page needs an upcall
//!   - upcall_receives_exception_frame(): eip/esp redirected, frame carries va/err/resume state
//!   - nested_fault_leaves_a_scratch_word(): second frame sits one word below the first
//!   - missing_exception_stack_kills_the_process(): frame cannot be pushed
//!   - remote_running_thread_keeps_its_status(): status changes wait for the remote core
//!   - remote_thread_is_reaped_on_next_trap(): destroy marks DYING, preempt frees it
//!   - process_outlives_its_destroyer_until_reaped(): last remote thread frees the process
//!
//! DEPENDENCIES:
//!   - axon::{Kernel, UserPort}
//!
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
use axon::abi::layout::{PteFlags, PGSIZE, USTACKTOP, UXSTACKTOP};
use axon::abi::trapframe::{FEC_PR, FEC_U, FEC_WR};
use axon::abi::{Error, PageFault, ProcessId, ProcessType, Status, Sysno, ThreadId, UTrapframe, UserEnv};
use axon::boot::Image;
use axon::hal::virt::VirtMachine;
use axon::{CpuId, Dispatch, Kernel, KernelConfig};

const ENTRY: u32 = 0x0080_0020;
const UPCALL: u32 = 0x0080_1000;
const RW: u32 = PteFlags::PRESENT.bits() | PteFlags::USER.bits() | PteFlags::WRITE.bits();

fn boot(cpus: usize) -> (Kernel, ProcessId, ThreadId) {
    let k = Kernel::new(KernelConfig::small(8, 16).with_cpus(cpus), VirtMachine::new().devices()).expect("config");
    let proc = k.create_process(&Image::entry_only(ENTRY), ProcessType::User);
    let thread = k.inspect(CpuId::BOOT, |s| s.thread_ids(proc)[0]);
    assert_eq!(k.start(CpuId::BOOT).thread(), Some(thread));
    (k, proc, thread)
}

fn read_utf(port: &mut impl UserEnv, va: u32) -> UTrapframe {
    let mut raw = [0u8; UTrapframe::SIZE];
    port.read(va, &mut raw).expect("exception stack mapped");
    UTrapframe::from_bytes(&raw)
}

#[test]
#[should_panic(expected = "unhandled user page fault")]
fn fault_without_upcall_is_fatal() {
    let (k, _, thread) = boot(1);
    let mut port = k.port(CpuId::BOOT, thread);
    let mut buf = [0u8; 4];
    let _ = port.read(0x0040_0000, &mut buf);
}

#[test]
#[should_panic(expected = "unhandled user page fault at 0x600000")]
fn cow_write_without_upcall_is_fatal() {
    let (k, _, thread) = boot(1);
    let mut port = k.port(CpuId::BOOT, thread);
    let cow = PteFlags::PRESENT.bits() | PteFlags::USER.bits() | 0x800;
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, 0x0060_0000, cow, 0, 0]), 0);
    let _ = port.write(0x0060_0000, &[1]);
}

#[test]
fn upcall_receives_exception_frame() {
    let (k, _, thread) = boot(1);
    let mut port = k.port(CpuId::BOOT, thread);
    assert_eq!(port.syscall(Sysno::ProcessSetPgfaultUpcall, [0, UPCALL, 0, 0, 0]), 0);
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, UXSTACKTOP - PGSIZE, RW, 0, 0]), 0);
    let before = port.regs();

    assert_eq!(port.write(0x0050_0000, &[1]), Err(PageFault::Upcall));
    let regs = port.regs();
    assert_eq!(regs.eip, UPCALL);
    assert_eq!(regs.esp, UXSTACKTOP - UTrapframe::SIZE as u32);

    let utf = read_utf(&mut port, regs.esp);
    assert_eq!(utf.fault_va, 0x0050_0000);
    assert_eq!(utf.err, FEC_U | FEC_WR);
    assert!(utf.is_write());
    assert_eq!(utf.eip, before.eip);
    assert_eq!(utf.esp, USTACKTOP);
    assert_eq!(utf.regs, before.regs);
}

#[test]
fn nested_fault_leaves_a_scratch_word() {
    let (k, _, thread) = boot(1);
    let mut port = k.port(CpuId::BOOT, thread);
    assert_eq!(port.syscall(Sysno::ProcessSetPgfaultUpcall, [0, UPCALL, 0, 0, 0]), 0);
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, UXSTACKTOP - PGSIZE, RW, 0, 0]), 0);
    let ro = PteFlags::PRESENT.bits() | PteFlags::USER.bits();
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, 0x0060_0000, ro, 0, 0]), 0);

    let mut buf = [0u8; 4];
    assert_eq!(port.read(0x0050_0000, &mut buf), Err(PageFault::Upcall));
    let first = port.regs().esp;

    // Fault again while running on the exception stack: a write to a read-only page.
    assert_eq!(port.write(0x0060_0000, &[1]), Err(PageFault::Upcall));
    let second = port.regs().esp;
    assert_eq!(second, first - 4 - UTrapframe::SIZE as u32);
    let utf = read_utf(&mut port, second);
    assert_eq!(utf.err, FEC_U | FEC_WR | FEC_PR);
    assert_eq!(utf.esp, first);
    assert_eq!(utf.eip, UPCALL);
}

#[test]
fn missing_exception_stack_kills_the_process() {
    let (k, proc, thread) = boot(1);
    let mut port = k.port(CpuId::BOOT, thread);
    assert_eq!(port.syscall(Sysno::ProcessSetPgfaultUpcall, [0, UPCALL, 0, 0, 0]), 0);
    assert_eq!(port.write(0x0050_0000, &[1]), Err(PageFault::Killed));
    assert!(!port.is_alive());
    k.inspect(CpuId::BOOT, |s| assert_eq!(s.process_view(proc).status, Status::Free));
}

/// Creates a second thread of the boot process and dispatches it on core 1.
fn second_thread_on_cpu1(k: &Kernel, port: &mut impl UserEnv) -> ThreadId {
    let raw = port.syscall(Sysno::ThreadCreate, [0; 5]);
    assert!(raw > 0);
    assert_eq!(port.syscall(Sysno::ThreadSetStatus, [raw as u32, Status::Runnable.raw(), 0, 0, 0]), 0);
    let remote = ThreadId::from_raw(raw);
    assert_eq!(k.start(CpuId::from_raw(1)).thread(), Some(remote));
    remote
}

#[test]
fn remote_running_thread_keeps_its_status() {
    let (k, _, thread) = boot(2);
    let mut port = k.port(CpuId::BOOT, thread);
    let remote = second_thread_on_cpu1(&k, &mut port);

    for status in [Status::Runnable, Status::NotRunnable] {
        let ret = port.syscall(Sysno::ThreadSetStatus, [remote.raw() as u32, status.raw(), 0, 0, 0]);
        assert_eq!(ret, Error::InvalidArgument.code());
    }
    k.inspect(CpuId::BOOT, |s| assert_eq!(s.thread_view(remote).status, Status::Running));

    // Only the caller is runnable here, so the boot core must not pick up the remote thread.
    assert_eq!(k.preempt(CpuId::BOOT).thread(), Some(thread));
    k.inspect(CpuId::BOOT, |s| {
        assert!(s.current_thread(CpuId::from_raw(1)).is_some());
        assert_ne!(s.current_thread(CpuId::BOOT), s.current_thread(CpuId::from_raw(1)));
        assert_eq!(s.thread_view(remote).status, Status::Running);
    });
}

#[test]
fn remote_thread_is_reaped_on_next_trap() {
    let (k, proc, thread) = boot(2);
    let mut port = k.port(CpuId::BOOT, thread);
    let remote = second_thread_on_cpu1(&k, &mut port);

    assert_eq!(port.syscall(Sysno::ThreadDestroy, [remote.raw() as u32, 0, 0, 0, 0]), 0);
    k.inspect(CpuId::BOOT, |s| assert_eq!(s.thread_view(remote).status, Status::Dying));

    assert_eq!(k.preempt(CpuId::from_raw(1)), Dispatch::Halt { cpu: CpuId::from_raw(1) });
    k.inspect(CpuId::BOOT, |s| {
        assert_eq!(s.thread_view(remote).status, Status::Free);
        assert_eq!(s.thread_ids(proc), vec![thread]);
        assert_eq!(s.current_thread(CpuId::from_raw(1)), None);
    });
    // The destroyer keeps running.
    assert_eq!(port.syscall(Sysno::GetThreadId, [0; 5]), thread.raw());
}

#[test]
fn process_outlives_its_destroyer_until_reaped() {
    let k = Kernel::new(KernelConfig::small(8, 16).with_cpus(2), VirtMachine::new().devices()).expect("config");
    let free_at_boot = k.inspect(CpuId::BOOT, |s| s.mem().free_count());
    let proc = k.create_process(&Image::entry_only(ENTRY), ProcessType::User);
    let thread = k.inspect(CpuId::BOOT, |s| s.thread_ids(proc)[0]);
    k.start(CpuId::BOOT);
    let mut port = k.port(CpuId::BOOT, thread);
    let remote = second_thread_on_cpu1(&k, &mut port);

    assert_eq!(port.syscall(Sysno::ProcessDestroy, [0; 5]), Error::BadHandle.code());
    k.inspect(CpuId::BOOT, |s| {
        assert_eq!(s.thread_view(thread).status, Status::Free);
        assert_eq!(s.thread_view(remote).status, Status::Dying);
        assert_eq!(s.process_view(proc).status, Status::Dying);
        assert!(s.mem().free_count() < free_at_boot);
    });

    assert_eq!(k.preempt(CpuId::from_raw(1)), Dispatch::Monitor { cpu: CpuId::from_raw(1) });
    k.inspect(CpuId::BOOT, |s| {
        assert_eq!(s.process_view(proc).status, Status::Free);
        assert_eq!(s.mem().free_count(), free_at_boot);
    });
}
