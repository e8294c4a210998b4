// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the process and thread tables
//! OWNERS: @kernel-sched-team
//! NOTE: Tests only; no kernel logic. Drives random alloc/free sequences against a model.
//!
//! TEST_SCOPE:
//!   - Slot accounting: allocations never exceed capacity, frees make slots reusable
//!   - Id freshness: a reallocated slot never reissues a previous id
//!   - Thread lists stay consistent with the thread table
//!
//! TEST_SCENARIOS:
//!   - ids_are_never_reissued(): stale ids stop resolving once their slot is reused
//!   - thread_lists_match_table(): every live thread is listed exactly once under its owner

use std::collections::HashSet;
use std::vec::Vec;

use super::{EntityTables, TaskError};
use crate::mm::FramePool;
use axon_abi::{ProcessId, Status};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Spawn,
    Kill(usize),
    AddThread(usize),
    DropThread(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Spawn),
        (0usize..8).prop_map(Op::Kill),
        (0usize..8).prop_map(Op::AddThread),
        (0usize..32).prop_map(Op::DropThread),
    ]
}

fn kill(tables: &mut EntityTables, mem: &mut FramePool, slot: usize) {
    let threads: Vec<usize> = tables.threads_of(slot).collect();
    for t in threads {
        tables.free_thread(t);
    }
    tables.free_process(slot, mem);
}

proptest! {
    #[test]
    fn ids_are_never_reissued(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let mut tables = EntityTables::new(8, 32);
        let mut mem = FramePool::new(64);
        let mut issued = HashSet::new();
        let mut retired = Vec::new();

        for op in ops {
            match op {
                Op::Spawn => match tables.alloc_process(ProcessId::CURRENT, &mut mem) {
                    Ok(slot) => {
                        let id = tables.process(slot).id();
                        prop_assert!(issued.insert(id.raw()), "id {} reissued", id);
                    }
                    Err(err) => prop_assert_eq!(err, TaskError::NoFreeSlots),
                },
                Op::Kill(slot) => {
                    if tables.process(slot).status() != Status::Free {
                        retired.push(tables.process(slot).id());
                        kill(&mut tables, &mut mem, slot);
                    }
                }
                _ => {}
            }
        }
        for id in retired {
            prop_assert_eq!(tables.process_slot(id), Err(TaskError::BadHandle));
        }
    }

    #[test]
    fn thread_lists_match_table(ops in proptest::collection::vec(arb_op(), 1..96)) {
        let mut tables = EntityTables::new(8, 32);
        let mut mem = FramePool::new(64);

        for op in ops {
            match op {
                Op::Spawn => {
                    let _ = tables.alloc_process(ProcessId::CURRENT, &mut mem);
                }
                Op::Kill(slot) => {
                    if tables.process(slot).status() != Status::Free {
                        kill(&mut tables, &mut mem, slot);
                    }
                }
                Op::AddThread(slot) => {
                    if tables.process(slot).status() != Status::Free {
                        let _ = tables.alloc_thread(slot);
                    }
                }
                Op::DropThread(slot) => {
                    if tables.thread(slot).status() != Status::Free {
                        tables.free_thread(slot);
                    }
                }
            }
        }

        let mut listed = HashSet::new();
        for p in 0..tables.process_capacity() {
            if tables.process(p).status() == Status::Free {
                continue;
            }
            for t in tables.threads_of(p) {
                prop_assert!(listed.insert(t), "thread {} listed twice", t);
                prop_assert_eq!(tables.thread(t).process_slot(), p);
                prop_assert_ne!(tables.thread(t).status(), Status::Free);
            }
        }
        let live = tables.threads().iter().filter(|t| t.status() != Status::Free).count();
        prop_assert_eq!(live, listed.len());
    }
}
