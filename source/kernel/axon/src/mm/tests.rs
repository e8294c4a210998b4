// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use axon_abi::layout::{PteFlags, PGSIZE, UTEXT, ULIM};

use super::*;

fn rw() -> PteFlags {
    PteFlags::USER_PRESENT | PteFlags::WRITE
}

#[test]
fn frames_come_out_in_order_and_zeroed() {
    let mut pool = FramePool::new(4);
    let first = pool.alloc_zeroed();
    assert_eq!(first, Some(FrameNumber::from_raw(0)));
    if let Some(f) = first {
        pool.bytes_mut(f)[0] = 0xaa;
        pool.free(f);
    }
    let again = pool.alloc_zeroed();
    assert_eq!(again, Some(FrameNumber::from_raw(0)));
    assert_eq!(again.map(|f| pool.bytes(f)[0]), Some(0));
}

#[test]
fn insert_remove_tracks_references() {
    let mut pool = FramePool::new(8);
    let mut space = AddressSpace::new(&mut pool).expect("root");
    let frame = pool.alloc_zeroed().expect("frame");
    space.insert(&mut pool, frame, UTEXT, rw()).expect("map");
    space.insert(&mut pool, frame, UTEXT + PGSIZE, PteFlags::USER_PRESENT).expect("alias");
    assert_eq!(pool.refcount(frame), 2);
    assert!(space.pde_present(UTEXT));
    assert_eq!(space.lookup(UTEXT + PGSIZE).map(|(_, f)| f), Some(PteFlags::USER_PRESENT));

    // Re-inserting the same frame at the same address keeps its count stable.
    space.insert(&mut pool, frame, UTEXT, rw()).expect("remap");
    assert_eq!(pool.refcount(frame), 2);

    space.remove(&mut pool, UTEXT);
    space.remove(&mut pool, UTEXT);
    assert_eq!(pool.refcount(frame), 1);
    assert_eq!(space.mapped_pages(), 1);
}

#[test]
fn teardown_returns_every_frame() {
    let mut pool = FramePool::new(16);
    let before = pool.free_count();
    let mut space = AddressSpace::new(&mut pool).expect("root");
    for i in 0..3 {
        let frame = pool.alloc_zeroed().expect("frame");
        space.insert(&mut pool, frame, UTEXT + i * PGSIZE, rw()).expect("map");
    }
    assert_eq!(pool.free_count(), before - 5);
    space.teardown(&mut pool);
    assert_eq!(pool.free_count(), before);
}

#[test]
fn insert_reports_exhaustion() {
    let mut pool = FramePool::new(2);
    let mut space = AddressSpace::new(&mut pool).expect("root");
    let frame = pool.alloc_zeroed().expect("frame");
    assert_eq!(space.insert(&mut pool, frame, UTEXT, rw()), Err(MapError::NoMemory));
}

#[test]
fn user_checks_cover_every_page() {
    let mut pool = FramePool::new(8);
    let mut space = AddressSpace::new(&mut pool).expect("root");
    let a = pool.alloc_zeroed().expect("frame");
    let b = pool.alloc_zeroed().expect("frame");
    space.insert(&mut pool, a, UTEXT, rw()).expect("map");
    space.insert(&mut pool, b, UTEXT + PGSIZE, PteFlags::USER_PRESENT).expect("map");

    assert_eq!(space.check_user(UTEXT + 10, PGSIZE, PteFlags::empty()), Ok(()));
    assert_eq!(
        space.check_user(UTEXT + 10, PGSIZE, PteFlags::WRITE),
        Err(UserAccessError::Fault { va: UTEXT + PGSIZE })
    );
    assert_eq!(
        space.check_user(ULIM, 4, PteFlags::empty()),
        Err(UserAccessError::Fault { va: ULIM })
    );
    assert_eq!(space.check_user(0, 0, PteFlags::WRITE), Ok(()));
}

#[test]
fn copies_span_page_boundaries() {
    let mut pool = FramePool::new(8);
    let mut space = AddressSpace::new(&mut pool).expect("root");
    for i in 0..2 {
        let frame = pool.alloc_zeroed().expect("frame");
        space.insert(&mut pool, frame, UTEXT + i * PGSIZE, rw()).expect("map");
    }
    let va = UTEXT + PGSIZE - 3;
    space.write(&mut pool, va, b"abcdef").expect("write");
    let mut out = [0u8; 6];
    space.read(&pool, va, &mut out).expect("read");
    assert_eq!(&out, b"abcdef");
}
