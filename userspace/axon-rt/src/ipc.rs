// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Blocking IPC helpers over ipc_try_send/ipc_recv
//! OWNERS: @runtime
//! PUBLIC API: send(), recv(), Message
//! DEPENDS_ON: sys
//! INVARIANTS: send() returns only once the value was delivered or a non-retryable error
//!             occurred
//! ADR: docs/adr/0016-kernel-libs-architecture.md

use axon_abi::layout::{PteFlags, UTOP};
use axon_abi::{Error, ProcessId, UserEnv};

use crate::{sys, RtError};

/// One delivered send as seen by the receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    pub value: u32,
    pub from: ProcessId,
    /// Permission of the granted page; empty when no page arrived.
    pub perm: PteFlags,
}

impl Message {
    pub fn has_page(&self) -> bool {
        !self.perm.is_empty()
    }
}

/// Sends `value` (and optionally the page at `va` with `perm`) to `to`, yielding while the
/// target is not waiting in a receive.
pub fn send(env: &mut dyn UserEnv, to: ProcessId, value: u32, page: Option<(u32, PteFlags)>) -> Result<(), RtError> {
    let (va, perm) = page.unwrap_or((UTOP, PteFlags::empty()));
    loop {
        match sys::ipc_try_send(env, to, value, va, perm) {
            Ok(()) => return Ok(()),
            Err(Error::IpcNotReceiving) => sys::yield_now(env)?,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Waits for one send. A page offered by the sender is mapped at `dst` when given.
pub fn recv(env: &mut dyn UserEnv, dst: Option<u32>) -> Result<Message, RtError> {
    sys::ipc_recv(env, dst.unwrap_or(UTOP))?;
    let me = sys::getpid(env)?;
    let view = env.process(me);
    Ok(Message { value: view.ipc_value, from: view.ipc_from, perm: view.ipc_perm })
}
