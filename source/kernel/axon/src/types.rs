// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal newtypes for safer syscall decoding
//! OWNERS: @kernel-team
//! PUBLIC API: CpuId, UserVa, UserPage
//! DEPENDS_ON: axon_abi::layout
//! INVARIANTS: UserPage is page-aligned and below UTOP; CpuId indexes the per-core array

use core::fmt;

use axon_abi::layout::{page_offset, UTOP};

/// Logical core identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CpuId(u16);

impl CpuId {
    /// Boot core.
    pub const BOOT: Self = Self(0);

    /// Creates a core id from a raw value.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the id as an index into per-core arrays.
    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Page-aligned user address strictly below `UTOP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UserPage(u32);

impl UserPage {
    #[inline]
    pub fn new(va: u32) -> Option<Self> {
        if va < UTOP && page_offset(va) == 0 {
            Some(Self(va))
        } else {
            None
        }
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Optional page target: at or above `UTOP` means "no page".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageTarget {
    None,
    Page(UserPage),
}

impl PageTarget {
    /// Decodes a raw address; `None` when it is below `UTOP` but misaligned.
    #[inline]
    pub fn decode(va: u32) -> Option<Self> {
        if va >= UTOP {
            Some(Self::None)
        } else {
            UserPage::new(va).map(Self::Page)
        }
    }
}
