// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory devices for hosted runs: a ticking clock, a buffered console and a loopback NIC.
//!
//! Every device hands out a cloneable handle so the embedder can feed input and observe output
//! while the kernel owns the device itself.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::{Console, Devices, NetDevice, NetError, Timer, MAX_PACKET};

/// Transmit ring depth of the virtual NIC.
pub const TX_RING: usize = 16;

/// Collection of hosted devices plus the handles used to drive them.
pub struct VirtMachine {
    pub clock: VirtClock,
    pub console: VirtConsole,
    pub nic: VirtNic,
}

impl VirtMachine {
    /// Clock advancing one millisecond per read.
    pub fn new() -> Self {
        Self { clock: VirtClock::ticking(1), console: VirtConsole::new(), nic: VirtNic::new() }
    }

    /// Boxes clones of the devices for the kernel.
    pub fn devices(&self) -> Devices {
        Devices {
            console: Box::new(self.console.clone()),
            timer: Box::new(self.clock.clone()),
            net: Box::new(self.nic.clone()),
        }
    }
}

impl Default for VirtMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Clock that advances by `step` milliseconds each time it is read.
#[derive(Clone)]
pub struct VirtClock {
    now: Arc<AtomicU32>,
    step: u32,
}

impl VirtClock {
    pub fn ticking(step: u32) -> Self {
        Self { now: Arc::new(AtomicU32::new(0)), step }
    }

    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Timer for VirtClock {
    fn now_ms(&self) -> u32 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ConsoleBuffers {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

/// Console backed by shared buffers.
#[derive(Clone, Default)]
pub struct VirtConsole {
    inner: Arc<Mutex<ConsoleBuffers>>,
}

impl VirtConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for `read_byte`.
    pub fn feed(&self, bytes: &[u8]) {
        self.inner.lock().input.extend(bytes.iter().copied());
    }

    /// Drains everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut self.inner.lock().output)
    }
}

impl Console for VirtConsole {
    fn write(&mut self, bytes: &[u8]) {
        self.inner.lock().output.extend_from_slice(bytes);
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.inner.lock().input.pop_front()
    }
}

#[derive(Default)]
struct NicQueues {
    tx: VecDeque<Vec<u8>>,
    rx: VecDeque<Vec<u8>>,
}

/// NIC with a bounded transmit ring and an unbounded receive queue.
#[derive(Clone, Default)]
pub struct VirtNic {
    inner: Arc<Mutex<NicQueues>>,
}

impl VirtNic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a frame available to `receive`.
    pub fn inject(&self, frame: &[u8]) {
        self.inner.lock().rx.push_back(frame.to_vec());
    }

    /// Removes the oldest transmitted frame, freeing a ring slot.
    pub fn pop_transmitted(&self) -> Option<Vec<u8>> {
        self.inner.lock().tx.pop_front()
    }

    pub fn transmitted(&self) -> usize {
        self.inner.lock().tx.len()
    }
}

impl NetDevice for VirtNic {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), NetError> {
        if frame.len() > MAX_PACKET {
            return Err(NetError::TooLarge);
        }
        let mut q = self.inner.lock();
        if q.tx.len() >= TX_RING {
            return Err(NetError::TxFull);
        }
        q.tx.push_back(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        let mut q = self.inner.lock();
        let frame = q.rx.pop_front().ok_or(NetError::RxEmpty)?;
        if frame.len() > buf.len() {
            q.rx.push_front(frame);
            return Err(NetError::TooLarge);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_ticks_per_read() {
        let clock = VirtClock::ticking(2);
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.now_ms(), 2);
        clock.advance(10);
        assert_eq!(clock.now_ms(), 14);
    }

    #[test]
    fn nic_ring_fills_up() {
        let mut nic = VirtNic::new();
        for _ in 0..TX_RING {
            assert_eq!(nic.transmit(&[1, 2, 3]), Ok(()));
        }
        assert_eq!(nic.transmit(&[4]), Err(NetError::TxFull));
        assert_eq!(nic.pop_transmitted(), Some(vec![1, 2, 3]));
        assert_eq!(nic.transmit(&[4]), Ok(()));
    }

    #[test]
    fn nic_receive_drains_injected_frames() {
        let mut nic = VirtNic::new();
        let mut buf = [0u8; 8];
        assert_eq!(nic.receive(&mut buf), Err(NetError::RxEmpty));
        nic.inject(b"ping");
        assert_eq!(nic.receive(&mut buf), Ok(4));
        assert_eq!(&buf[..4], b"ping");
    }
}
