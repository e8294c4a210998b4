// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: IPC rendezvous across processes and cores
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 4 integration tests
//!
//! TEST_SCOPE:
//!   - recv parks the caller and the core moves on
//!   - try_send page grants, silent page drop, permission rejection
//!   - Exactly one winner among concurrent senders on different cores
//!
//! TEST_SCENARIOS:
//!   - page_grant_shares_the_frame(): receiver sees the sender's bytes at its dst_va
//!   - page_without_interest_is_dropped(): value delivered, perm empty, nothing mapped
//!   - write_upgrade_is_rejected_without_side_effects(): receiver keeps waiting
//!   - concurrent_senders_have_one_winner(): three cores, two senders, one receive
//!
//! DEPENDENCIES:
//!   - axon::{Kernel, UserPort}
//!   - std::thread::scope (one host thread per core)
//!
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
use std::thread;

use axon::abi::layout::{PteFlags, UTOP};
use axon::abi::syscall::encode_request;
use axon::abi::{Error, ProcessId, ProcessType, Status, Sysno, ThreadId, UserEnv};
use axon::boot::Image;
use axon::hal::virt::VirtMachine;
use axon::{CpuId, Dispatch, Kernel, KernelConfig};

const ENTRY: u32 = 0x0080_0020;
const RO: u32 = PteFlags::PRESENT.bits() | PteFlags::USER.bits();
const RW: u32 = RO | PteFlags::WRITE.bits();
const SRC_VA: u32 = 0x0040_0000;
const DST_VA: u32 = 0x00a0_0000;

fn kernel(cpus: usize) -> Kernel {
    Kernel::new(KernelConfig::small(8, 16).with_cpus(cpus), VirtMachine::new().devices()).expect("config")
}

fn spawn(k: &Kernel) -> (ProcessId, ThreadId) {
    let proc = k.create_process(&Image::entry_only(ENTRY), ProcessType::User);
    let thread = k.inspect(CpuId::BOOT, |s| s.thread_ids(proc)[0]);
    (proc, thread)
}

/// Boots a receiver and a sender on the boot core and parks the receiver in `recv(dst_va)`.
/// Returns `(receiver, sender, sender thread)` with the sender dispatched.
fn park_receiver(k: &Kernel, dst_va: u32) -> (ProcessId, ProcessId, ThreadId) {
    let (receiver, _) = spawn(k);
    let (sender, sender_thread) = spawn(k);
    let Dispatch::Run { mut frame, .. } = k.start(CpuId::BOOT) else {
        panic!("receiver not dispatched");
    };
    encode_request(&mut frame, Sysno::IpcRecv.raw(), [dst_va, 0, 0, 0, 0]);
    assert_eq!(k.syscall(CpuId::BOOT, &frame).thread(), Some(sender_thread));
    k.inspect(CpuId::BOOT, |s| assert!(s.process_view(receiver).ipc_receiving));
    (receiver, sender, sender_thread)
}

#[test]
fn page_grant_shares_the_frame() {
    let k = kernel(1);
    let (receiver, sender, sender_thread) = park_receiver(&k, DST_VA);
    let mut port = k.port(CpuId::BOOT, sender_thread);
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, SRC_VA, RW, 0, 0]), 0);
    port.write(SRC_VA, b"grant").expect("mapped");

    let ret = port.syscall(Sysno::IpcTrySend, [receiver.raw() as u32, 42, SRC_VA, RW, 0]);
    assert_eq!(ret, 0);

    let receiver_thread = k.inspect(CpuId::BOOT, |s| {
        let view = s.process_view(receiver);
        assert!(!view.ipc_receiving);
        assert_eq!(view.ipc_value, 42);
        assert_eq!(view.ipc_from, sender);
        assert_eq!(view.ipc_perm, PteFlags::from_bits_retain(RW));
        let thread = s.thread_ids(receiver)[0];
        assert_eq!(s.thread_view(thread).status, Status::Runnable);
        thread
    });

    let mut rport = k.port(CpuId::BOOT, receiver_thread);
    let mut got = [0u8; 5];
    rport.read(DST_VA, &mut got).expect("granted page");
    assert_eq!(&got, b"grant");
    assert_eq!(rport.regs().regs.eax, 0, "recv returns success");

    // Same frame: later writes by the receiver are visible to the sender.
    rport.write(DST_VA, b"G").expect("granted writable");
    let mut first = [0u8; 1];
    port.read(SRC_VA, &mut first).expect("mapped");
    assert_eq!(&first, b"G");
}

#[test]
fn page_without_interest_is_dropped() {
    let k = kernel(1);
    let (receiver, _, sender_thread) = park_receiver(&k, UTOP);
    let mut port = k.port(CpuId::BOOT, sender_thread);
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, SRC_VA, RW, 0, 0]), 0);
    assert_eq!(port.syscall(Sysno::IpcTrySend, [receiver.raw() as u32, 7, SRC_VA, RW, 0]), 0);

    k.inspect(CpuId::BOOT, |s| {
        let view = s.process_view(receiver);
        assert_eq!(view.ipc_value, 7);
        assert!(view.ipc_perm.is_empty());
    });
    // A second send finds nobody waiting.
    assert_eq!(
        port.syscall(Sysno::IpcTrySend, [receiver.raw() as u32, 8, UTOP, 0, 0]),
        Error::IpcNotReceiving.code()
    );
}

#[test]
fn write_upgrade_is_rejected_without_side_effects() {
    let k = kernel(1);
    let (receiver, _, sender_thread) = park_receiver(&k, DST_VA);
    let mut port = k.port(CpuId::BOOT, sender_thread);
    assert_eq!(port.syscall(Sysno::PageAlloc, [0, SRC_VA, RO, 0, 0]), 0);
    let target = receiver.raw() as u32;

    assert_eq!(port.syscall(Sysno::IpcTrySend, [target, 1, SRC_VA, RW, 0]), Error::InvalidArgument.code());
    assert_eq!(port.syscall(Sysno::IpcTrySend, [target, 1, SRC_VA + 8, RO, 0]), Error::InvalidArgument.code());
    assert_eq!(port.syscall(Sysno::IpcTrySend, [target, 1, SRC_VA + 0x1000, RO, 0]), Error::InvalidArgument.code());

    k.inspect(CpuId::BOOT, |s| {
        let view = s.process_view(receiver);
        assert!(view.ipc_receiving);
        assert_eq!(view.ipc_value, 0);
    });
    assert_eq!(port.syscall(Sysno::IpcTrySend, [target, 1, SRC_VA, RO, 0]), 0);
}

#[test]
fn concurrent_senders_have_one_winner() {
    let (cpu0, cpu1, cpu2) = (CpuId::BOOT, CpuId::from_raw(1), CpuId::from_raw(2));
    for round in 0..8u32 {
        let k = kernel(3);
        // Start cores one at a time so each picks up exactly one process.
        let (receiver, receiver_thread) = spawn(&k);
        assert_eq!(k.start(cpu0).thread(), Some(receiver_thread));
        let (a, a_thread) = spawn(&k);
        assert_eq!(k.start(cpu1).thread(), Some(a_thread));
        let (b, b_thread) = spawn(&k);
        assert_eq!(k.start(cpu2).thread(), Some(b_thread));

        let kref = &k;
        let send = move |cpu: CpuId, thread: ThreadId, value: u32| {
            move || {
                // Wait until the receive is armed or already consumed by the other sender.
                while !kref.inspect(cpu, |s| {
                    let view = s.process_view(receiver);
                    view.ipc_receiving || view.ipc_from.is_valid()
                }) {
                    thread::yield_now();
                }
                let mut port = kref.port(cpu, thread);
                port.syscall(Sysno::IpcTrySend, [receiver.raw() as u32, value, UTOP, 0, 0])
            }
        };

        let (got, ra, rb) = thread::scope(|scope| {
            let recv = scope.spawn(move || {
                let mut port = kref.port(cpu0, receiver_thread);
                let ret = port.syscall(Sysno::IpcRecv, [UTOP, 0, 0, 0, 0]);
                (ret, port.process(receiver))
            });
            let ha = scope.spawn(send(cpu1, a_thread, 100 + round));
            let hb = scope.spawn(send(cpu2, b_thread, 200 + round));
            (recv.join().expect("receiver"), ha.join().expect("sender a"), hb.join().expect("sender b"))
        });

        let (ret, view) = got;
        assert_eq!(ret, 0);
        let mut results = [ra, rb];
        results.sort();
        assert_eq!(results, [Error::IpcNotReceiving.code(), 0], "round {round}");
        let (winner, value) = if ra == 0 { (a, 100 + round) } else { (b, 200 + round) };
        assert_eq!(view.ipc_from, winner);
        assert_eq!(view.ipc_value, value);
        assert!(!view.ipc_receiving);
    }
}
