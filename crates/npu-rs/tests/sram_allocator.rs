use npu_rs::SramAllocator;

#[test]
fn reserve_hands_out_ascending_offsets() {
    let mut allocator = SramAllocator::new(1024);
    assert_eq!(allocator.reserve(256), Some(0));
    assert_eq!(allocator.reserve(256), Some(256));
    assert_eq!(allocator.reserve(512), Some(512));
    assert_eq!(allocator.reserve(1), None);
}

#[test]
fn reserve_prefers_the_lowest_offset_that_fits() {
    let mut allocator = SramAllocator::new(1024);
    let a = allocator.reserve(128).unwrap();
    let b = allocator.reserve(256).unwrap();
    let _c = allocator.reserve(128).unwrap();
    assert!(allocator.free(a));
    assert!(allocator.free(b));
    // Both holes fit 128 bytes; the lower offset wins.
    assert_eq!(allocator.reserve(128), Some(0));
    // Only the second hole fits 256 bytes.
    assert_eq!(allocator.reserve(256), Some(128));
}

#[test]
fn free_coalesces_neighbouring_regions() {
    let mut allocator = SramAllocator::new(1024);
    let a = allocator.reserve(256).unwrap();
    let b = allocator.reserve(256).unwrap();
    let c = allocator.reserve(256).unwrap();
    assert!(allocator.free(b));
    assert!(allocator.free(a));
    assert!(allocator.free(c));
    assert_eq!(allocator.free_bytes(), 1024);
    // A fully coalesced allocator can satisfy a whole-capacity request.
    assert_eq!(allocator.reserve(1024), Some(0));
}

#[test]
fn free_rejects_unknown_offsets() {
    let mut allocator = SramAllocator::new(1024);
    let offset = allocator.reserve(64).unwrap();
    assert!(!allocator.free(offset + 1));
    assert!(allocator.free(offset));
    assert!(!allocator.free(offset));
}

#[test]
fn exhaustion_leaves_the_allocator_usable() {
    let mut allocator = SramAllocator::new(512);
    let a = allocator.reserve(512).unwrap();
    assert_eq!(allocator.reserve(64), None);
    assert!(allocator.free(a));
    assert_eq!(allocator.reserve(64), Some(0));
}

#[test]
fn clones_are_independent() {
    let mut master = SramAllocator::new(1024);
    master.reserve(128).unwrap();

    let mut probe = master.clone();
    assert_eq!(probe, master);

    probe.reserve(256).unwrap();
    assert_ne!(probe, master);
    assert_eq!(master.free_bytes(), 1024 - 128);

    // Replaying the same operations on the master reproduces the probe
    // byte for byte.
    master.reserve(256).unwrap();
    assert_eq!(probe, master);
}
