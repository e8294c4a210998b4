// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stable negative error codes returned in the syscall result register.

use core::fmt;

/// Errors surfaced across the syscall boundary.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Unspecified or unknown problem.
    Unspecified = -1,
    /// Process or thread id does not exist, is stale, or is not accessible to the caller.
    BadHandle = -2,
    /// Invalid parameter.
    InvalidArgument = -3,
    /// Request failed due to memory shortage.
    NoMemory = -4,
    /// Entity table is exhausted.
    NoFreeSlot = -5,
    /// Memory fault on a caller-supplied range.
    Fault = -6,
    /// Target process is not blocked in a receive.
    IpcNotReceiving = -7,
    /// Unexpected end of file.
    Eof = -8,
    /// Reserved for the block device collaborator.
    NoDisk = -9,
    /// Reserved for the file server.
    MaxOpen = -10,
    /// Reserved for the file server.
    NotFound = -11,
    /// Reserved for the file server.
    BadPath = -12,
    /// Reserved for the file server.
    FileExists = -13,
    /// Reserved for the loader.
    NotExec = -14,
    /// Operation not supported.
    NotSupported = -15,
    /// Device queue is full or empty; retry later.
    TryAgain = -16,
}

impl Error {
    const ALL: [Error; 16] = [
        Error::Unspecified,
        Error::BadHandle,
        Error::InvalidArgument,
        Error::NoMemory,
        Error::NoFreeSlot,
        Error::Fault,
        Error::IpcNotReceiving,
        Error::Eof,
        Error::NoDisk,
        Error::MaxOpen,
        Error::NotFound,
        Error::BadPath,
        Error::FileExists,
        Error::NotExec,
        Error::NotSupported,
        Error::TryAgain,
    ];

    /// Returns the negative wire code.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decodes a negative result word. Non-negative values are not errors.
    pub fn from_code(code: i32) -> Option<Self> {
        if code >= 0 {
            return None;
        }
        Some(Self::ALL.iter().copied().find(|e| e.code() == code).unwrap_or(Self::Unspecified))
    }

    /// Splits a raw syscall result into value or error.
    pub fn check(ret: i32) -> Result<u32, Self> {
        match Self::from_code(ret) {
            Some(err) => Err(err),
            None => Ok(ret as u32),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Unspecified => "unspecified error",
            Error::BadHandle => "bad process or thread id",
            Error::InvalidArgument => "invalid parameter",
            Error::NoMemory => "out of memory",
            Error::NoFreeSlot => "out of process or thread slots",
            Error::Fault => "segmentation fault",
            Error::IpcNotReceiving => "process is not receiving",
            Error::Eof => "unexpected end of file",
            Error::NoDisk => "no free space on disk",
            Error::MaxOpen => "too many files are open",
            Error::NotFound => "file or block not found",
            Error::BadPath => "invalid path",
            Error::FileExists => "file already exists",
            Error::NotExec => "file is not a valid executable",
            Error::NotSupported => "operation not supported",
            Error::TryAgain => "device busy, try again",
        };
        f.write_str(msg)
    }
}
