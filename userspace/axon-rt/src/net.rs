// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Network driver helpers between the NIC syscalls and the network server
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/ipc_net.rs
//! PUBLIC API: NSREQ_INPUT, NSREQ_OUTPUT, PacketPage, input_once(), input(), output_once(), output()
//! DEPENDS_ON: sys (packet syscalls), ipc (page grants), mem
//! INVARIANTS: A page handed to the server is not refilled until the ring wraps around to it
//! ADR: docs/adr/0016-kernel-libs-architecture.md
//!
//! Packets travel in one page: the length word at offset 0 followed by the frame bytes.

use core::convert::Infallible;

use axon_abi::layout::{PteFlags, PGSIZE};
use axon_abi::{Error, ProcessId, UserEnv};

use crate::{ipc, mem, sys, RtError};

/// Request carrying a received frame to the network server.
pub const NSREQ_INPUT: u32 = 10;
/// Request from the network server asking the driver to transmit a frame.
pub const NSREQ_OUTPUT: u32 = 11;

/// Base of the driver's packet pages.
pub const BUFFER_BASE: u32 = 0x1000_0000;
/// Pages cycled through by the input driver.
pub const INPUT_RING: u32 = 4;
/// Page the output driver receives requests into.
pub const OUTPUT_PAGE: u32 = BUFFER_BASE + INPUT_RING * PGSIZE;

/// Delay between two received frames.
const INPUT_PAUSE_MS: u32 = 50;

const GRANT: PteFlags = PteFlags::USER_PRESENT.union(PteFlags::WRITE);

/// Packet page at a fixed address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketPage {
    va: u32,
}

impl PacketPage {
    pub const fn at(va: u32) -> Self {
        Self { va }
    }

    pub const fn va(self) -> u32 {
        self.va
    }

    pub const fn len_va(self) -> u32 {
        self.va
    }

    pub const fn data_va(self) -> u32 {
        self.va + 4
    }

    /// Maps the page when it is not present yet.
    pub fn ensure_mapped(self, env: &mut dyn UserEnv) -> Result<(), RtError> {
        if env.pte(self.va).is_none() {
            sys::page_alloc(env, ProcessId::CURRENT, self.va, GRANT)?;
        }
        Ok(())
    }
}

/// Moves at most one frame from the NIC to `ns`. Returns the frame length, or `None` when
/// nothing was waiting.
pub fn input_once(env: &mut dyn UserEnv, ns: ProcessId, page: PacketPage) -> Result<Option<usize>, RtError> {
    page.ensure_mapped(env)?;
    let len = match sys::packet_receive(env, page.data_va(), page.len_va()) {
        Ok(len) => len,
        Err(Error::TryAgain) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    ipc::send(env, ns, NSREQ_INPUT, Some((page.va(), GRANT)))?;
    Ok(Some(len))
}

/// Input driver loop: polls the NIC and hands each frame to `ns`.
pub fn input(env: &mut dyn UserEnv, ns: ProcessId) -> Result<Infallible, RtError> {
    let mut next = 0;
    loop {
        let page = PacketPage::at(BUFFER_BASE + next * PGSIZE);
        match input_once(env, ns, page)? {
            Some(_) => {
                next = (next + 1) % INPUT_RING;
                sys::sleep(env, INPUT_PAUSE_MS)?;
            }
            None => sys::yield_now(env)?,
        }
    }
}

/// Serves one request from the network server. Returns the transmitted length, or `None` when
/// the request was not an output request.
pub fn output_once(env: &mut dyn UserEnv, page: PacketPage) -> Result<Option<usize>, RtError> {
    let msg = ipc::recv(env, Some(page.va()))?;
    if msg.value != NSREQ_OUTPUT {
        return Ok(None);
    }
    let len = mem::read_word(env, page.len_va())?;
    loop {
        match sys::packet_try_send(env, page.data_va(), len) {
            Ok(()) => return Ok(Some(len as usize)),
            Err(Error::TryAgain) => sys::yield_now(env)?,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Output driver loop: forwards every transmit request to the NIC.
pub fn output(env: &mut dyn UserEnv) -> Result<Infallible, RtError> {
    let page = PacketPage::at(OUTPUT_PAGE);
    loop {
        output_once(env, page)?;
    }
}
