// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Leaf page tables and entries of the two-level user page table.

extern crate alloc;

use alloc::{boxed::Box, vec};

use axon_abi::layout::{PteFlags, NPTENTRIES};

use super::FrameNumber;

/// Error returned when manipulating page tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// No frame left for the page or an intermediate table.
    NoMemory,
}

/// Page-table entry: frame number in the high 20 bits, flags in the low 12.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(u32);

impl Pte {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub fn new(frame: FrameNumber, flags: PteFlags) -> Self {
        Self((frame.raw() << 12) | (flags.bits() & 0xfff))
    }

    #[inline]
    pub fn frame(self) -> FrameNumber {
        FrameNumber::from_raw(self.0 >> 12)
    }

    #[inline]
    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_retain(self.0 & 0xfff)
    }

    #[inline]
    pub fn is_present(self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }
}

/// One leaf table covering `PTSIZE` bytes, backed by its own frame.
pub struct PageTable {
    frame: FrameNumber,
    entries: Box<[Pte]>,
}

impl PageTable {
    pub fn new(frame: FrameNumber) -> Self {
        Self { frame, entries: vec![Pte::EMPTY; NPTENTRIES].into_boxed_slice() }
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    #[inline]
    pub fn get(&self, index: usize) -> Pte {
        self.entries[index]
    }

    #[inline]
    pub fn set(&mut self, index: usize, pte: Pte) {
        self.entries[index] = pte;
    }

    /// Present entries with their index.
    pub fn present(&self) -> impl Iterator<Item = (usize, Pte)> + '_ {
        self.entries.iter().copied().enumerate().filter(|(_, pte)| pte.is_present())
    }
}
