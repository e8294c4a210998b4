// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Saved execution context and the user exception frame.
//!
//! Both records are flat arrays of little-endian 32-bit words so they can be copied
//! through user memory verbatim.

/// User code segment selector (RPL 3 included).
pub const USER_CS: u32 = 0x18 | 3;
/// User data segment selector (RPL 3 included).
pub const USER_DS: u32 = 0x20 | 3;
/// Interrupts-enabled flag.
pub const FL_IF: u32 = 0x0000_0200;
/// I/O privilege level mask.
pub const FL_IOPL_MASK: u32 = 0x0000_3000;
/// I/O privilege level 3.
pub const FL_IOPL_3: u32 = 0x0000_3000;

/// Page-fault trap number.
pub const T_PGFLT: u32 = 14;
/// Syscall trap number.
pub const T_SYSCALL: u32 = 48;

/// Fault error code: the page was present (protection violation).
pub const FEC_PR: u32 = 0x1;
/// Fault error code: the access was a write.
pub const FEC_WR: u32 = 0x2;
/// Fault error code: the access came from user mode.
pub const FEC_U: u32 = 0x4;

/// General purpose registers in `pusha` order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushRegs {
    /// Destination index.
    pub edi: u32,
    /// Source index.
    pub esi: u32,
    /// Frame pointer.
    pub ebp: u32,
    /// Ignored slot.
    pub oesp: u32,
    /// Base.
    pub ebx: u32,
    /// Data.
    pub edx: u32,
    /// Counter.
    pub ecx: u32,
    /// Accumulator; carries syscall numbers in and results out.
    pub eax: u32,
}

impl PushRegs {
    const WORDS: usize = 8;

    fn write_words(&self, out: &mut [u32]) {
        out[..Self::WORDS].copy_from_slice(&[
            self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax,
        ]);
    }

    fn read_words(w: &[u32]) -> Self {
        Self { edi: w[0], esi: w[1], ebp: w[2], oesp: w[3], ebx: w[4], edx: w[5], ecx: w[6], eax: w[7] }
    }
}

/// Complete saved machine state of a suspended thread.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// General purpose registers.
    pub regs: PushRegs,
    /// Extra data segment.
    pub es: u32,
    /// Data segment.
    pub ds: u32,
    /// Trap number that caused the entry.
    pub trapno: u32,
    /// Hardware error code.
    pub err: u32,
    /// Instruction pointer.
    pub eip: u32,
    /// Code segment.
    pub cs: u32,
    /// Flags register.
    pub eflags: u32,
    /// Stack pointer.
    pub esp: u32,
    /// Stack segment.
    pub ss: u32,
}

impl TrapFrame {
    /// Number of 32-bit words in the encoded frame.
    pub const WORDS: usize = PushRegs::WORDS + 9;
    /// Encoded size in bytes.
    pub const SIZE: usize = Self::WORDS * 4;

    /// A user-mode frame with interrupts enabled, starting at `eip` with stack `esp`.
    pub const fn user(eip: u32, esp: u32) -> Self {
        Self {
            regs: PushRegs { edi: 0, esi: 0, ebp: 0, oesp: 0, ebx: 0, edx: 0, ecx: 0, eax: 0 },
            es: USER_DS,
            ds: USER_DS,
            trapno: 0,
            err: 0,
            eip,
            cs: USER_CS,
            eflags: FL_IF,
            esp,
            ss: USER_DS,
        }
    }

    /// Encodes the frame as little-endian bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut words = [0u32; Self::WORDS];
        self.regs.write_words(&mut words);
        words[PushRegs::WORDS..].copy_from_slice(&[
            self.es, self.ds, self.trapno, self.err, self.eip, self.cs, self.eflags, self.esp,
            self.ss,
        ]);
        words_to_bytes(&words)
    }

    /// Decodes a frame from little-endian bytes.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let w: [u32; Self::WORDS] = bytes_to_words(bytes);
        let t = &w[PushRegs::WORDS..];
        Self {
            regs: PushRegs::read_words(&w),
            es: t[0],
            ds: t[1],
            trapno: t[2],
            err: t[3],
            eip: t[4],
            cs: t[5],
            eflags: t[6],
            esp: t[7],
            ss: t[8],
        }
    }
}

/// Frame the kernel pushes on the user exception stack when delivering a page fault.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UTrapframe {
    /// Faulting virtual address.
    pub fault_va: u32,
    /// Fault error code (`FEC_*`).
    pub err: u32,
    /// Registers at the time of the fault.
    pub regs: PushRegs,
    /// Instruction pointer to resume at.
    pub eip: u32,
    /// Flags to restore.
    pub eflags: u32,
    /// Stack pointer to restore.
    pub esp: u32,
}

impl UTrapframe {
    /// Number of 32-bit words in the encoded frame.
    pub const WORDS: usize = PushRegs::WORDS + 5;
    /// Encoded size in bytes.
    pub const SIZE: usize = Self::WORDS * 4;

    /// Captures the resumable part of `tf` for a fault at `fault_va`.
    pub fn from_trapframe(tf: &TrapFrame, fault_va: u32, err: u32) -> Self {
        Self { fault_va, err, regs: tf.regs, eip: tf.eip, eflags: tf.eflags, esp: tf.esp }
    }

    /// Encodes the frame as little-endian bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut words = [0u32; Self::WORDS];
        words[0] = self.fault_va;
        words[1] = self.err;
        self.regs.write_words(&mut words[2..]);
        words[2 + PushRegs::WORDS..].copy_from_slice(&[self.eip, self.eflags, self.esp]);
        words_to_bytes(&words)
    }

    /// Decodes a frame from little-endian bytes.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let w: [u32; Self::WORDS] = bytes_to_words(bytes);
        let t = &w[2 + PushRegs::WORDS..];
        Self {
            fault_va: w[0],
            err: w[1],
            regs: PushRegs::read_words(&w[2..]),
            eip: t[0],
            eflags: t[1],
            esp: t[2],
        }
    }

    /// Returns `true` when the fault was caused by a write.
    pub const fn is_write(&self) -> bool {
        self.err & FEC_WR != 0
    }
}

fn words_to_bytes<const W: usize, const B: usize>(words: &[u32; W]) -> [u8; B] {
    let mut out = [0u8; B];
    for (chunk, word) in out.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn bytes_to_words<const B: usize, const W: usize>(bytes: &[u8; B]) -> [u32; W] {
    let mut out = [0u32; W];
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}
