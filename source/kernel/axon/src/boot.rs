// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot-time creation of user processes from in-memory images
//! OWNERS: @kernel-team
//! PUBLIC API: Image, Segment, create_process()
//! DEPENDS_ON: kernel::KernelState, mm::AddressSpace
//! INVARIANTS: Boot processes have parent 0; exhaustion or a malformed image is fatal
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use axon_abi::layout::{page_round_down, PteFlags, PGSIZE, USTACKTOP, UTOP};
use axon_abi::trapframe::FL_IOPL_3;
use axon_abi::{ProcessId, ProcessType};

use crate::kernel::KernelState;

/// One loadable region: `data` is copied to `va`, the rest up to `mem_size` is zero.
#[derive(Clone, Copy, Debug)]
pub struct Segment<'a> {
    pub va: u32,
    pub data: &'a [u8],
    pub mem_size: u32,
}

/// A program ready to be placed into a fresh address space.
#[derive(Clone, Copy, Debug)]
pub struct Image<'a> {
    pub entry: u32,
    pub segments: &'a [Segment<'a>],
}

impl<'a> Image<'a> {
    /// Image without any segments; user code is supplied by the embedder.
    pub const fn entry_only(entry: u32) -> Self {
        Self { entry, segments: &[] }
    }
}

const SEGMENT_PERM: PteFlags = PteFlags::USER.union(PteFlags::WRITE);

/// Creates a RUNNABLE process of type `kind` running `image`.
///
/// Exhausted tables or memory and malformed images stop the kernel.
pub fn create_process(state: &mut KernelState, image: &Image<'_>, kind: ProcessType) -> ProcessId {
    let slot = match state.alloc_process(ProcessId::CURRENT) {
        Ok(slot) => slot,
        Err(err) => {
            log_error!(target: "boot", "create_process: {:?}", err);
            panic!("create_process: {:?}", err);
        }
    };

    for segment in image.segments {
        load_segment(state, slot, segment);
    }
    map_zeroed(state, slot, USTACKTOP - PGSIZE, PGSIZE);

    let Some(thread) = state.tables.threads_of(slot).next() else {
        panic!("boot process without an initial thread");
    };
    let frame = &mut state.tables.thread_mut(thread).frame;
    frame.eip = image.entry;
    if kind == ProcessType::FsServer {
        frame.eflags |= FL_IOPL_3;
    }
    let proc = state.tables.process_mut(slot);
    proc.kind = kind;
    log_info!(target: "boot", "[{}] new process {} ({:?})", ProcessId::CURRENT, proc.id(), kind);
    proc.id()
}

fn load_segment(state: &mut KernelState, slot: usize, segment: &Segment<'_>) {
    let len = segment.data.len() as u32;
    let end = segment.va.checked_add(segment.mem_size);
    if len > segment.mem_size || end.map_or(true, |end| end > UTOP) {
        log_error!(target: "boot", "malformed segment at {:#x}", segment.va);
        panic!("malformed image: segment at {:#x} len {} memsz {}", segment.va, len, segment.mem_size);
    }
    map_zeroed(state, slot, segment.va, segment.mem_size);
    let state = &mut *state;
    let written = state
        .tables
        .process(slot)
        .space()
        .map(|space| space.write(&mut state.mem, segment.va, segment.data));
    if !matches!(written, Some(Ok(()))) {
        panic!("segment at {:#x} not writable after mapping", segment.va);
    }
}

/// Backs `[va, va+len)` with fresh zeroed pages where nothing is mapped yet.
fn map_zeroed(state: &mut KernelState, slot: usize, va: u32, len: u32) {
    let mut page = page_round_down(va);
    let end = va + len;
    while page < end {
        let state = &mut *state;
        let Some(space) = state.tables.process_mut(slot).space.as_mut() else {
            panic!("boot process without an address space");
        };
        if space.lookup(page).is_none() {
            let inserted = state
                .mem
                .alloc_zeroed()
                .map(|frame| space.insert(&mut state.mem, frame, page, SEGMENT_PERM));
            if !matches!(inserted, Some(Ok(()))) {
                log_error!(target: "boot", "out of memory mapping {:#x}", page);
                panic!("create_process: out of memory at {:#x}", page);
            }
        }
        page += PGSIZE;
    }
}
