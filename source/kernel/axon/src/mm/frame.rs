// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted physical frame pool.

extern crate alloc;

use alloc::{boxed::Box, vec, vec::Vec};

use super::PAGE_SIZE;

/// Physical frame number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FrameNumber(u32);

impl FrameNumber {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

struct Frame {
    refs: u32,
    // Backing store is allocated on first use.
    data: Option<Box<[u8]>>,
}

static ZERO_PAGE: [u8; PAGE_SIZE] = [0; PAGE_SIZE];

/// Fixed pool of frames handed out with a zero reference count, as `page_alloc` does.
pub struct FramePool {
    frames: Vec<Frame>,
    free: Vec<FrameNumber>,
}

impl FramePool {
    pub fn new(count: usize) -> Self {
        let frames = (0..count).map(|_| Frame { refs: 0, data: None }).collect();
        // Pop order yields frame 0 first.
        let free = (0..count as u32).rev().map(FrameNumber).collect();
        Self { frames, free }
    }

    /// Takes a zero-filled frame. The caller owns it until it is mapped or `free`d.
    pub fn alloc_zeroed(&mut self) -> Option<FrameNumber> {
        let frame = self.free.pop()?;
        self.bytes_mut(frame).fill(0);
        Some(frame)
    }

    /// Returns an unreferenced frame to the pool.
    pub fn free(&mut self, frame: FrameNumber) {
        let refs = self.frames[frame.index()].refs;
        if refs != 0 {
            log_error!(target: "mm", "free of frame {} with {} references", frame.raw(), refs);
            panic!("frame {} freed while referenced", frame.raw());
        }
        self.free.push(frame);
    }

    pub fn incref(&mut self, frame: FrameNumber) {
        self.frames[frame.index()].refs += 1;
    }

    /// Drops one reference; the frame returns to the pool when none remain.
    pub fn decref(&mut self, frame: FrameNumber) {
        let slot = &mut self.frames[frame.index()];
        if slot.refs == 0 {
            log_error!(target: "mm", "decref of unreferenced frame {}", frame.raw());
            panic!("frame {} reference underflow", frame.raw());
        }
        slot.refs -= 1;
        if slot.refs == 0 {
            self.free.push(frame);
        }
    }

    pub fn refcount(&self, frame: FrameNumber) -> u32 {
        self.frames[frame.index()].refs
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn bytes(&self, frame: FrameNumber) -> &[u8] {
        self.frames[frame.index()].data.as_deref().unwrap_or(&ZERO_PAGE)
    }

    pub fn bytes_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        self.frames[frame.index()]
            .data
            .get_or_insert_with(|| vec![0u8; PAGE_SIZE].into_boxed_slice())
    }
}
