//! CONTEXT: Tests for the execution-context encodings shared by kernel and runtime
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCOPE:
//!   - TrapFrame / UTrapframe byte layout
//!   - Syscall register convention
//!
//! TEST_SCENARIOS:
//!   - trapframe_word_order(): eax sits in word 7, eip in word 12
//!   - utrapframe_carries_fault_state(): capture from a trapframe keeps resume state
//!   - request_registers(): number and arguments land in the documented registers
//!
//! DEPENDENCIES:
//!   - axon_abi::{TrapFrame, UTrapframe, syscall}
//!
//! ADR: docs/adr/0016-kernel-libs-architecture.md
use axon_abi::syscall::{decode_request, encode_request};
use axon_abi::trapframe::{FEC_WR, FL_IF, USER_CS};
use axon_abi::{Sysno, TrapFrame, UTrapframe};

fn word(bytes: &[u8], index: usize) -> u32 {
    u32::from_le_bytes([bytes[index * 4], bytes[index * 4 + 1], bytes[index * 4 + 2], bytes[index * 4 + 3]])
}

#[test]
fn trapframe_word_order() {
    let mut tf = TrapFrame::user(0x0080_0020, 0xeebf_dff0);
    tf.regs.eax = 0xdead_beef;
    let bytes = tf.to_bytes();
    assert_eq!(bytes.len(), 68);
    assert_eq!(word(&bytes, 7), 0xdead_beef);
    assert_eq!(word(&bytes, 12), 0x0080_0020);
    assert_eq!(word(&bytes, 13), USER_CS);
    assert_eq!(word(&bytes, 14), FL_IF);
    assert_eq!(TrapFrame::from_bytes(&bytes), tf);
}

#[test]
fn utrapframe_carries_fault_state() {
    let mut tf = TrapFrame::user(0x0080_1000, 0xeebf_d000);
    tf.regs.ebx = 7;
    let utf = UTrapframe::from_trapframe(&tf, 0x0080_2004, FEC_WR);
    assert!(utf.is_write());
    assert_eq!(utf.esp, 0xeebf_d000);
    let bytes = utf.to_bytes();
    assert_eq!(word(&bytes, 0), 0x0080_2004);
    assert_eq!(UTrapframe::from_bytes(&bytes).regs.ebx, 7);
}

#[test]
fn request_registers() {
    let mut tf = TrapFrame::default();
    encode_request(&mut tf, Sysno::PageMap.raw(), [1, 2, 3, 4, 5]);
    assert_eq!((tf.regs.edx, tf.regs.ecx, tf.regs.ebx, tf.regs.edi, tf.regs.esi), (1, 2, 3, 4, 5));
    assert_eq!(decode_request(&tf), (5, [1, 2, 3, 4, 5]));
}
