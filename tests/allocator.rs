use kestrel::memory::{AllocError, BlockAllocator, ALIGNMENT, HEADER_SIZE};

const LOWEST: u64 = 0x10_0000;

fn check_layout(allocator: &BlockAllocator) {
    let blocks: Vec<_> = allocator.blocks().collect();
    for pair in blocks.windows(2) {
        assert_eq!(pair[0].address + pair[0].size + HEADER_SIZE, pair[1].address);
        assert!(pair[0].occupied || pair[1].occupied, "adjacent free blocks");
    }
    if let Some(last) = blocks.last() {
        assert!(last.occupied, "free block at the tail");
        assert!(last.address + last.size <= allocator.top());
    }
}

#[test]
fn allocations_are_aligned_and_disjoint() {
    let mut allocator = BlockAllocator::new(LOWEST, LOWEST + 0x1_0000);
    let mut live = Vec::new();
    for length in [1, 31, 32, 33, 100, 4096, 7] {
        let address = allocator.allocate(length).unwrap();
        assert_eq!(address % ALIGNMENT, 0);
        live.push((address, allocator.allocation_size(address).unwrap()));
    }
    live.sort();
    for pair in live.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0);
    }
    check_layout(&allocator);
}

#[test]
fn interleaved_frees_keep_the_list_tidy() {
    let mut allocator = BlockAllocator::new(LOWEST, LOWEST + 0x1_0000);
    let addresses: Vec<u64> = (1..=12).map(|i| allocator.allocate(i * 40).unwrap()).collect();

    for address in addresses.iter().step_by(2) {
        allocator.release(*address).unwrap();
        check_layout(&allocator);
    }
    for address in addresses.iter().skip(1).step_by(2).rev() {
        allocator.release(*address).unwrap();
        check_layout(&allocator);
    }
    assert!(allocator.is_empty());
    assert_eq!(allocator.stats().arena_end, LOWEST);
}

#[test]
fn freed_space_is_reused_before_growing() {
    let mut allocator = BlockAllocator::new(LOWEST, LOWEST + 0x1_0000);
    let first = allocator.allocate(256).unwrap();
    let _guard = allocator.allocate(32).unwrap();
    let end = allocator.stats().arena_end;

    allocator.release(first).unwrap();
    assert_eq!(allocator.allocate(64).unwrap(), first);
    assert_eq!(allocator.stats().arena_end, end);
}

#[test]
fn top_of_memory_is_a_hard_limit() {
    let mut allocator = BlockAllocator::new(LOWEST, LOWEST + 1024);
    assert_eq!(allocator.allocate(1024), Err(AllocError::OutOfMemory));
    let address = allocator.allocate(1024 - HEADER_SIZE).unwrap();
    assert_eq!(allocator.allocate(1), Err(AllocError::OutOfMemory));
    assert_eq!(allocator.release(address + ALIGNMENT), Err(AllocError::InvalidAddress));
    allocator.release(address).unwrap();
    assert!(allocator.is_empty());
}
