// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-process address space: root frame plus lazily created leaf tables.

extern crate alloc;

use alloc::collections::BTreeMap;

use axon_abi::layout::{page_offset, page_round_down, pdx, ptx, PteFlags, PGSIZE, ULIM};

use super::{FrameNumber, FramePool, MapError, PageTable, Pte};

/// A user range failed the access check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAccessError {
    /// First offending address.
    Fault { va: u32 },
}

/// Address space exclusively owned by one process.
pub struct AddressSpace {
    root: FrameNumber,
    tables: BTreeMap<usize, PageTable>,
}

impl AddressSpace {
    /// Allocates the root frame.
    pub fn new(mem: &mut FramePool) -> Result<Self, MapError> {
        let root = mem.alloc_zeroed().ok_or(MapError::NoMemory)?;
        mem.incref(root);
        Ok(Self { root, tables: BTreeMap::new() })
    }

    pub fn root(&self) -> FrameNumber {
        self.root
    }

    /// Returns `true` when a leaf table covers `va`.
    pub fn pde_present(&self, va: u32) -> bool {
        self.tables.contains_key(&pdx(va))
    }

    /// Resolves `va` to its frame and current permission.
    pub fn lookup(&self, va: u32) -> Option<(FrameNumber, PteFlags)> {
        let pte = self.tables.get(&pdx(va))?.get(ptx(va));
        pte.is_present().then(|| (pte.frame(), pte.flags()))
    }

    /// Maps `frame` at `va` with `perm | PRESENT`, replacing any previous mapping.
    pub fn insert(
        &mut self,
        mem: &mut FramePool,
        frame: FrameNumber,
        va: u32,
        perm: PteFlags,
    ) -> Result<(), MapError> {
        let dir = pdx(va);
        if !self.tables.contains_key(&dir) {
            let table = mem.alloc_zeroed().ok_or(MapError::NoMemory)?;
            mem.incref(table);
            self.tables.insert(dir, PageTable::new(table));
        }
        // Take the new reference first so re-inserting the same frame cannot free it.
        mem.incref(frame);
        let index = ptx(va);
        let table = self.tables.get_mut(&dir).ok_or(MapError::NoMemory)?;
        let old = table.get(index);
        if old.is_present() {
            mem.decref(old.frame());
        }
        table.set(index, Pte::new(frame, perm | PteFlags::PRESENT));
        Ok(())
    }

    /// Unmaps `va`. Silently does nothing when nothing is mapped.
    pub fn remove(&mut self, mem: &mut FramePool, va: u32) {
        if let Some(table) = self.tables.get_mut(&pdx(va)) {
            let old = table.get(ptx(va));
            if old.is_present() {
                mem.decref(old.frame());
                table.set(ptx(va), Pte::EMPTY);
            }
        }
    }

    /// Releases every user mapping, the leaf tables, then the root.
    pub fn teardown(mut self, mem: &mut FramePool) {
        let dirs = core::mem::take(&mut self.tables);
        for table in dirs.into_values() {
            for (_, pte) in table.present() {
                mem.decref(pte.frame());
            }
            mem.decref(table.frame());
        }
        mem.decref(self.root);
    }

    /// Number of present user pages.
    pub fn mapped_pages(&self) -> usize {
        self.tables.values().map(|t| t.present().count()).sum()
    }

    /// Checks that `[va, va+len)` is below `ULIM` and mapped with `perm | USER | PRESENT`.
    pub fn check_user(&self, va: u32, len: u32, perm: PteFlags) -> Result<(), UserAccessError> {
        if len == 0 {
            return Ok(());
        }
        let end = va.checked_add(len).ok_or(UserAccessError::Fault { va })?;
        let need = perm | PteFlags::USER_PRESENT;
        let mut page = page_round_down(va);
        while page < end {
            let fault_va = page.max(va);
            if page >= ULIM {
                return Err(UserAccessError::Fault { va: fault_va });
            }
            match self.lookup(page) {
                Some((_, flags)) if flags.contains(need) => {}
                _ => return Err(UserAccessError::Fault { va: fault_va }),
            }
            page = match page.checked_add(PGSIZE) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }

    /// Copies user memory into `buf` after checking user readability.
    pub fn read(&self, mem: &FramePool, va: u32, buf: &mut [u8]) -> Result<(), UserAccessError> {
        self.check_user(va, buf.len() as u32, PteFlags::empty())?;
        let mut done = 0usize;
        while done < buf.len() {
            let cur = va + done as u32;
            let (frame, _) = self.lookup(cur).ok_or(UserAccessError::Fault { va: cur })?;
            let off = page_offset(cur) as usize;
            let n = (PGSIZE as usize - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&mem.bytes(frame)[off..off + n]);
            done += n;
        }
        Ok(())
    }

    /// Copies `data` into user memory after checking user writability.
    pub fn write(&self, mem: &mut FramePool, va: u32, data: &[u8]) -> Result<(), UserAccessError> {
        self.check_user(va, data.len() as u32, PteFlags::WRITE)?;
        let mut done = 0usize;
        while done < data.len() {
            let cur = va + done as u32;
            let (frame, _) = self.lookup(cur).ok_or(UserAccessError::Fault { va: cur })?;
            let off = page_offset(cur) as usize;
            let n = (PGSIZE as usize - off).min(data.len() - done);
            mem.bytes_mut(frame)[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }
}
