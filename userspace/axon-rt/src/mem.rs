// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User memory access that runs the page-fault upcall and retries
//! OWNERS: @runtime
//! PUBLIC API: read(), write(), read_word(), write_word(), UserLock
//! DEPENDS_ON: pgfault::run_upcall
//! INVARIANTS: An access either completes or the process is gone; an upcall always runs to
//!             completion before the faulting access is retried
//! ADR: docs/adr/0016-kernel-libs-architecture.md

use axon_abi::{PageFault, UserEnv};

use crate::{pgfault, sys, RtError};

fn retry<T>(env: &mut dyn UserEnv, mut access: impl FnMut(&mut dyn UserEnv) -> Result<T, PageFault>) -> Result<T, RtError> {
    loop {
        match access(env) {
            Ok(value) => return Ok(value),
            Err(PageFault::Upcall) => pgfault::run_upcall(env)?,
            Err(PageFault::Killed) => return Err(RtError::Killed),
        }
    }
}

pub fn read(env: &mut dyn UserEnv, va: u32, buf: &mut [u8]) -> Result<(), RtError> {
    retry(env, |env| env.read(va, buf))
}

pub fn write(env: &mut dyn UserEnv, va: u32, data: &[u8]) -> Result<(), RtError> {
    retry(env, |env| env.write(va, data))
}

pub fn read_word(env: &mut dyn UserEnv, va: u32) -> Result<u32, RtError> {
    let mut word = [0u8; 4];
    read(env, va, &mut word)?;
    Ok(u32::from_le_bytes(word))
}

pub fn write_word(env: &mut dyn UserEnv, va: u32, value: u32) -> Result<(), RtError> {
    write(env, va, &value.to_le_bytes())
}

/// Atomic exchange on a user word.
pub fn swap(env: &mut dyn UserEnv, va: u32, value: u32) -> Result<u32, RtError> {
    retry(env, |env| env.swap(va, value))
}

/// Test-and-set lock living in a user word, shared by every thread of the process.
#[derive(Clone, Copy, Debug)]
pub struct UserLock {
    va: u32,
}

impl UserLock {
    pub const fn at(va: u32) -> Self {
        Self { va }
    }

    /// Spins (yielding the core) until the word flips from 0 to 1.
    pub fn lock(self, env: &mut dyn UserEnv) -> Result<(), RtError> {
        while swap(env, self.va, 1)? != 0 {
            sys::yield_now(env)?;
        }
        Ok(())
    }

    pub fn unlock(self, env: &mut dyn UserEnv) -> Result<(), RtError> {
        swap(env, self.va, 0).map(drop)
    }

    /// Runs `f` with the lock held; the lock is released even when `f` fails.
    pub fn with<T>(
        self,
        env: &mut dyn UserEnv,
        f: impl FnOnce(&mut dyn UserEnv) -> Result<T, RtError>,
    ) -> Result<T, RtError> {
        self.lock(env)?;
        let result = f(env);
        self.unlock(env)?;
        result
    }
}
