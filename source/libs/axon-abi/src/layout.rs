// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User virtual memory layout and page permission bits.
//!
//! ```text
//!  ULIM       0xef800000 +------------------------------+
//!                        |  read-only page tables (UVPT) |
//!  UVPT       0xef400000 +------------------------------+
//!                        |  read-only tables (UENVS)     |
//!  UTOP       0xeec00000 +------------------------------+ UXSTACKTOP
//!                        |  user exception stack         |
//!                        +------------------------------+
//!                        |  empty guard page             |
//!  USTACKTOP  0xeebfe000 +------------------------------+
//!                        |  main stack, thread stacks    |
//!                        ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
//!  URUNTIME   0x00c00000 |  runtime globals page         |
//!  UTEXT      0x00800000 |  program text and data        |
//!  PFTEMP     0x007ff000 |  fault-handler scratch page   |
//!  UTEMP      0x00400000 +------------------------------+
//! ```

use bitflags::bitflags;

/// Bytes mapped by one page.
pub const PGSIZE: u32 = 4096;
/// Bytes mapped by one page directory entry.
pub const PTSIZE: u32 = PGSIZE * 1024;
/// Page-table entries per page table.
pub const NPTENTRIES: usize = 1024;

/// Top of user-accessible read-only mappings.
pub const ULIM: u32 = 0xef80_0000;
/// Read-only self-map of the page tables.
pub const UVPT: u32 = 0xef40_0000;
/// Top of user-writable memory; everything at or above is off limits to user mappings.
pub const UTOP: u32 = 0xeec0_0000;
/// Top of the user exception stack (one page).
pub const UXSTACKTOP: u32 = UTOP;
/// Top of the main user stack; one guard page separates it from the exception stack.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;
/// Start of program text.
pub const UTEXT: u32 = 2 * PTSIZE;
/// Page reserved for the user runtime's globals.
pub const URUNTIME: u32 = 3 * PTSIZE;
/// Scratch region for temporary mappings.
pub const UTEMP: u32 = PTSIZE;
/// Scratch page used by the copy-on-write fault handler.
pub const PFTEMP: u32 = UTEMP + PTSIZE - PGSIZE;

/// Number of per-process thread stack slots (slot 0 is the main thread).
pub const THREAD_MAX: usize = 64;
/// Virtual span reserved per thread slot: stack, guard, exception stack, guard.
pub const THREAD_SLOT_SPAN: u32 = 4 * PGSIZE;

/// Top of the regular stack for thread slot `slot`.
pub const fn utstacktop(slot: usize) -> u32 {
    USTACKTOP - slot as u32 * THREAD_SLOT_SPAN
}

/// Top of the exception stack for thread slot `slot`.
pub const fn utxstacktop(slot: usize) -> u32 {
    utstacktop(slot) - 2 * PGSIZE
}

/// Rounds `va` down to its page boundary.
#[inline]
pub const fn page_round_down(va: u32) -> u32 {
    va & !(PGSIZE - 1)
}

/// Byte offset of `va` inside its page.
#[inline]
pub const fn page_offset(va: u32) -> u32 {
    va & (PGSIZE - 1)
}

/// Page directory index of `va`.
#[inline]
pub const fn pdx(va: u32) -> usize {
    (va >> 22) as usize
}

/// Page table index of `va`.
#[inline]
pub const fn ptx(va: u32) -> usize {
    ((va >> 12) & 0x3ff) as usize
}

bitflags! {
    /// Page-table entry permission bits visible to user code.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        /// Present.
        const PRESENT = 0x001;
        /// Writeable.
        const WRITE = 0x002;
        /// User accessible.
        const USER = 0x004;
        /// Write-through.
        const WRITE_THROUGH = 0x008;
        /// Cache disabled.
        const CACHE_DISABLE = 0x010;
        /// Accessed.
        const ACCESSED = 0x020;
        /// Dirty.
        const DIRTY = 0x040;
        /// Large page.
        const PAGE_SIZE = 0x080;
        /// Global.
        const GLOBAL = 0x100;
        /// Mapping is shared across fork rather than copied.
        const SHARE = 0x400;
        /// Bits left to user software (includes `SHARE`).
        const AVAIL = 0xe00;
    }
}

impl PteFlags {
    /// The only bits the map/alloc syscalls accept.
    pub const SYSCALL: Self =
        Self::AVAIL.union(Self::PRESENT).union(Self::WRITE).union(Self::USER);

    /// Permission every user mapping must carry.
    pub const USER_PRESENT: Self = Self::USER.union(Self::PRESENT);

    /// Returns `true` when `self` is acceptable as a syscall-supplied permission.
    pub fn is_valid_syscall_perm(self) -> bool {
        self.contains(Self::USER_PRESENT) && Self::SYSCALL.contains(self)
    }
}
