// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory-manager collaborator: frames, two-level page tables, user access checks
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FramePool, FrameNumber, AddressSpace, PageTable, Pte, MapError, UserAccessError
//! DEPENDS_ON: axon_abi::layout (PteFlags, PGSIZE, UTOP, ULIM)
//! INVARIANTS: A frame is free iff its reference count is zero; every present PTE below UTOP
//!             holds one reference on its frame; page tables hold one on their own frame
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

pub mod address_space;
pub mod frame;
pub mod page_table;

pub use address_space::{AddressSpace, UserAccessError};
pub use axon_abi::layout::PteFlags;
pub use frame::{FrameNumber, FramePool};
pub use page_table::{MapError, PageTable, Pte};

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = axon_abi::layout::PGSIZE as usize;

#[cfg(test)]
mod tests;
