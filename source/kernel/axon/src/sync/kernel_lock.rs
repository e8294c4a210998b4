// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: The big kernel lock with holder tracking
//! OWNERS: @kernel-sync-team
//! PUBLIC API: KernelLock::new(), KernelLock::lock(cpu), KernelGuard::cpu()
//! DEPENDS_ON: spin::Mutex
//! INVARIANTS: Non-reentrant; a core acquiring it twice is a fatal bug (debug_lock)
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::types::CpuId;

const NO_HOLDER: usize = usize::MAX;

/// Spin lock recording which core holds it.
pub struct KernelLock<T> {
    inner: spin::Mutex<T>,
    holder: AtomicUsize,
}

impl<T> KernelLock<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: spin::Mutex::new(value), holder: AtomicUsize::new(NO_HOLDER) }
    }

    /// Enters the exclusive section on behalf of `cpu`.
    pub fn lock(&self, cpu: CpuId) -> KernelGuard<'_, T> {
        #[cfg(feature = "debug_lock")]
        if self.holder.load(Ordering::Acquire) == cpu.as_index() {
            log_error!(target: "sync", "LOCKDEP: {} re-entered the kernel lock", cpu);
            panic!("lockdep: recursive kernel lock on {}", cpu);
        }
        let guard = self.inner.lock();
        self.holder.store(cpu.as_index(), Ordering::Release);
        KernelGuard { parent: self, guard, cpu }
    }

    /// Returns `true` when `cpu` currently holds the lock.
    pub fn is_held_by(&self, cpu: CpuId) -> bool {
        self.holder.load(Ordering::Acquire) == cpu.as_index()
    }
}

/// Scoped exclusive section. Dropping it leaves the kernel.
pub struct KernelGuard<'a, T> {
    parent: &'a KernelLock<T>,
    guard: spin::MutexGuard<'a, T>,
    cpu: CpuId,
}

impl<'a, T> KernelGuard<'a, T> {
    /// Core that entered the section.
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }
}

impl<'a, T> Deref for KernelGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<'a, T> DerefMut for KernelGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<'a, T> Drop for KernelGuard<'a, T> {
    fn drop(&mut self) {
        self.parent.holder.store(NO_HOLDER, Ordering::Release);
        // inner guard drops after this
    }
}
