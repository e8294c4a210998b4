// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot-time kernel sizing
//! OWNERS: @kernel-team
//! PUBLIC API: KernelConfig, ConfigError
//! INVARIANTS: Table sizes are powers of two no larger than one generation tick

use axon_abi::id::{GENERATION_SHIFT, TABLE_SIZE};

/// Sizing parameters fixed for the lifetime of a kernel instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Process table entries.
    pub processes: usize,
    /// Thread table entries.
    pub threads: usize,
    /// Number of cores.
    pub cpus: usize,
    /// Physical frames managed by the frame pool.
    pub frames: usize,
}

/// Rejected configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Table size zero, not a power of two, or wider than the index field.
    TableSize(usize),
    /// No cores configured.
    NoCpus,
    /// No frames configured.
    NoFrames,
}

impl KernelConfig {
    pub const DEFAULT: Self = Self { processes: TABLE_SIZE, threads: TABLE_SIZE, cpus: 8, frames: 4096 };

    /// Small instance used by hosted scenarios.
    pub const fn small(processes: usize, threads: usize) -> Self {
        Self { processes, threads, cpus: 1, frames: 256 }
    }

    pub const fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub const fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for size in [self.processes, self.threads] {
            if size == 0 || !size.is_power_of_two() || size > (1 << GENERATION_SHIFT) {
                return Err(ConfigError::TableSize(size));
            }
        }
        if self.cpus == 0 {
            return Err(ConfigError::NoCpus);
        }
        if self.frames == 0 {
            return Err(ConfigError::NoFrames);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
