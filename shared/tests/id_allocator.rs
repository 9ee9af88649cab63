/// Tests for the recycling id allocator.
use specter_shared::{EntityId, IdAllocator, RecyclingIdAllocator};

#[test]
fn allocates_sequential_ids_starting_at_one() {
    let mut allocator = RecyclingIdAllocator::new(10);
    assert_eq!(allocator.allocate(0).unwrap(), EntityId(1));
    assert_eq!(allocator.allocate(0).unwrap(), EntityId(2));
    assert_eq!(allocator.allocate(0).unwrap(), EntityId(3));
}

#[test]
fn released_ids_sit_out_the_quarantine() {
    let mut allocator = RecyclingIdAllocator::new(10);
    let id = allocator.allocate(0).unwrap();
    allocator.release(id, 5);

    // too early: a fresh id is handed out instead
    let fresh = allocator.allocate(6).unwrap();
    assert_ne!(fresh, id);

    // after the quarantine the released id returns
    let recycled = allocator.allocate(15).unwrap();
    assert_eq!(recycled, id);
    assert_eq!(allocator.recycled_count(), 0);
}

#[test]
fn zero_quarantine_recycles_immediately() {
    let mut allocator = RecyclingIdAllocator::new(0);
    let id = allocator.allocate(0).unwrap();
    allocator.release(id, 0);
    assert_eq!(allocator.allocate(0).unwrap(), id);
}

#[test]
fn recycling_is_first_in_first_out() {
    let mut allocator = RecyclingIdAllocator::new(0);
    let a = allocator.allocate(0).unwrap();
    let b = allocator.allocate(0).unwrap();
    allocator.release(b, 1);
    allocator.release(a, 1);
    assert_eq!(allocator.allocate(2).unwrap(), b);
    assert_eq!(allocator.allocate(2).unwrap(), a);
}
