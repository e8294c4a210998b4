// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel synchronisation primitives
//! OWNERS: @kernel-sync-team
//! PUBLIC API: KernelLock, KernelGuard
//! DEPENDS_ON: spin
//! INVARIANTS: One coarse lock guards all entity-table and scheduler state

pub mod kernel_lock;

pub use kernel_lock::{KernelGuard, KernelLock};
