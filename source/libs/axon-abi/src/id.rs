// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generation-tagged process and thread identifiers.
//!
//! ```text
//! +1+--------19--------+-2-+--------10--------+
//! |0|    generation    | 0 |   table index    |
//! +-+------------------+---+------------------+
//! ```
//!
//! The generation starts at bit 12 rather than right above the index so that tables of up to
//! 4096 slots can be configured without their index mask reaching into the generation. With the
//! default 1024-slot tables bits 10 and 11 stay zero.
//!
//! Id `0` names the caller itself. Negative values are error codes, never ids.

use core::fmt;

/// Number of low bits reserved for the table index in the default layout.
pub const INDEX_BITS: u32 = 10;
/// Default process and thread table size.
pub const TABLE_SIZE: usize = 1 << INDEX_BITS;
/// One generation tick. Must be at least as large as any table size.
pub const GENERATION_SHIFT: u32 = 12;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(i32);

        impl $name {
            /// The "caller itself" id.
            pub const CURRENT: Self = Self(0);

            /// Wraps a raw id word.
            #[inline]
            pub const fn from_raw(raw: i32) -> Self {
                Self(raw)
            }

            /// Returns the raw id word.
            #[inline]
            pub const fn raw(self) -> i32 {
                self.0
            }

            /// Returns `true` for the id `0`.
            #[inline]
            pub const fn is_current(self) -> bool {
                self.0 == 0
            }

            /// Returns `true` when the id can name a live slot (strictly positive).
            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 > 0
            }

            /// Table slot encoded in the id for a table of `table_size` entries.
            #[inline]
            pub const fn index(self, table_size: usize) -> usize {
                (self.0 as u32 as usize) & (table_size - 1)
            }

            /// Generation counter (id without the index bits).
            #[inline]
            pub const fn generation(self) -> i32 {
                self.0 >> GENERATION_SHIFT
            }

            /// Computes the id for the next allocation of slot `index`, whose previous
            /// occupant (or `0` for a never-used slot) was `prev`.
            pub const fn next(prev: Self, index: usize, table_size: usize) -> Self {
                let mut generation =
                    prev.0.wrapping_add(1 << GENERATION_SHIFT) & !((table_size as i32) - 1);
                if generation <= 0 {
                    generation = 1 << GENERATION_SHIFT;
                }
                Self(generation | index as i32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:08x}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a process (address space owner).
    ProcessId
);

entity_id!(
    /// Identifier of a thread (schedulable unit).
    ThreadId
);
