// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hardware collaborator interfaces consumed by the kernel core
//! OWNERS: @kernel-hal-team
//! PUBLIC API: Timer, Console, NetDevice, NetError, Devices, MAX_PACKET
//! DEPENDS_ON: alloc::boxed::Box
//! INVARIANTS: Devices are only touched under the kernel lock

use alloc::boxed::Box;

pub mod virt;

/// Largest Ethernet frame accepted by the packet syscalls.
pub const MAX_PACKET: usize = 1518;

/// Millisecond clock.
pub trait Timer: Send {
    fn now_ms(&self) -> u32;
}

/// Byte-oriented console.
pub trait Console: Send {
    fn write(&mut self, bytes: &[u8]);
    /// Non-blocking read.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Network device errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Transmit ring is full.
    TxFull,
    /// No frame waiting.
    RxEmpty,
    /// Frame exceeds `MAX_PACKET`.
    TooLarge,
}

/// Raw frame transport.
pub trait NetDevice: Send {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), NetError>;
    /// Copies the next frame into `buf` and returns its length.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;
}

/// Collaborators handed to the kernel at construction.
pub struct Devices {
    pub console: Box<dyn Console>,
    pub timer: Box<dyn Timer>,
    pub net: Box<dyn NetDevice>,
}
