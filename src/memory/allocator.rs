// First-fit block allocator over the physical arena
//
// Blocks live in a slot map and link to their neighbours by index. The list
// is ordered by address, has no gaps, and never holds two adjacent free
// blocks. Every block is `HEADER_SIZE` bytes of bookkeeping followed by its
// payload; addresses handed out are payload addresses.
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

/// Bytes reserved in front of every payload.
pub const HEADER_SIZE: u64 = 32;

/// Payload sizes are rounded up to this.
pub const ALIGNMENT: u64 = 32;

/// A split only happens if the remainder keeps at least this many payload bytes.
pub const MIN_SPLIT_SLACK: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    OutOfMemory,
    InvalidAddress,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => write!(f, "Out of physical memory"),
            AllocError::InvalidAddress => write!(f, "Address was not handed out by the allocator"),
        }
    }
}

type BlockId = usize;

#[derive(Debug, Clone, Copy)]
struct Block {
    /// Address of the header; the payload follows it.
    address: u64,
    size: u64,
    occupied: bool,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

impl Block {
    fn payload(&self) -> u64 {
        self.address + HEADER_SIZE
    }

    fn end(&self) -> u64 {
        self.address + HEADER_SIZE + self.size
    }
}

/// One block as seen from outside, in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub address: u64,
    pub size: u64,
    pub occupied: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub used_blocks: usize,
    pub free_blocks: usize,
    pub used_bytes: u64,
    pub free_bytes: u64,
    /// First byte past the last block.
    pub arena_end: u64,
    /// Largest `arena_end` ever reached.
    pub peak_arena_end: u64,
}

pub struct BlockAllocator {
    lowest: u64,
    top: u64,
    slots: Vec<Option<Block>>,
    vacant: Vec<BlockId>,
    base: Option<BlockId>,
    tail: Option<BlockId>,
    occupied: BTreeMap<u64, BlockId>,
    peak_arena_end: u64,
}

fn round_up(length: u64) -> Option<u64> {
    let rounded = length.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1);
    Some(rounded.max(ALIGNMENT))
}

impl BlockAllocator {
    /// Creates an empty arena spanning `[lowest, top)`.
    pub fn new(lowest: u64, top: u64) -> Self {
        BlockAllocator {
            lowest,
            top,
            slots: Vec::new(),
            vacant: Vec::new(),
            base: None,
            tail: None,
            occupied: BTreeMap::new(),
            peak_arena_end: lowest,
        }
    }

    pub fn lowest(&self) -> u64 {
        self.lowest
    }

    pub fn top(&self) -> u64 {
        self.top
    }

    pub fn capacity(&self) -> u64 {
        self.top.saturating_sub(self.lowest)
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    /// Payload size of a live allocation.
    pub fn allocation_size(&self, address: u64) -> Option<u64> {
        self.occupied.get(&address).map(|&id| self.block(id).size)
    }

    /// Hands out at least `length` bytes, reusing the first free block that fits
    /// and growing the arena otherwise.
    pub fn allocate(&mut self, length: u64) -> Result<u64, AllocError> {
        let size = round_up(length).ok_or(AllocError::OutOfMemory)?;

        let id = match self.first_fit(size) {
            Some(id) => {
                self.split(id, size);
                id
            }
            None => self.extend(size)?,
        };

        let block = self.block_mut(id);
        block.occupied = true;
        let payload = block.payload();
        self.occupied.insert(payload, id);
        Ok(payload)
    }

    /// Returns an allocation to the arena, merging it with free neighbours and
    /// shrinking the arena when the tail becomes free.
    pub fn release(&mut self, address: u64) -> Result<(), AllocError> {
        let mut current = self.validate(address)?;
        self.occupied.remove(&address);

        loop {
            let block = *self.block(current);
            match block.next {
                Some(next) if !self.block(next).occupied => {
                    let absorbed = self.take(next);
                    let merged = self.block_mut(current);
                    merged.size += HEADER_SIZE + absorbed.size;
                    merged.next = absorbed.next;
                    self.relink_prev(absorbed.next, current);
                    if self.tail == Some(next) {
                        self.tail = Some(current);
                    }
                }
                Some(next) => {
                    match block.prev {
                        Some(prev) if !self.block(prev).occupied => {
                            self.take(current);
                            let merged = self.block_mut(prev);
                            merged.size += HEADER_SIZE + block.size;
                            merged.next = Some(next);
                            self.block_mut(next).prev = Some(prev);
                        }
                        _ => self.block_mut(current).occupied = false,
                    }
                    return Ok(());
                }
                None => {
                    self.take(current);
                    match block.prev {
                        None => {
                            self.base = None;
                            self.tail = None;
                            return Ok(());
                        }
                        Some(prev) => {
                            self.block_mut(prev).next = None;
                            self.tail = Some(prev);
                            if self.block(prev).occupied {
                                return Ok(());
                            }
                            current = prev;
                        }
                    }
                }
            }
        }
    }

    /// Walks the block list in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let mut cursor = self.base;
        core::iter::from_fn(move || {
            let block = self.block(cursor?);
            cursor = block.next;
            Some(BlockInfo {
                address: block.payload(),
                size: block.size,
                occupied: block.occupied,
            })
        })
    }

    pub fn stats(&self) -> AllocatorStats {
        let mut stats = AllocatorStats {
            arena_end: self.arena_end(),
            peak_arena_end: self.peak_arena_end,
            ..AllocatorStats::default()
        };
        for block in self.blocks() {
            if block.occupied {
                stats.used_blocks += 1;
                stats.used_bytes += block.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            }
        }
        stats
    }

    fn arena_end(&self) -> u64 {
        match self.tail {
            Some(id) => self.block(id).end(),
            None => self.lowest,
        }
    }

    fn first_fit(&self, size: u64) -> Option<BlockId> {
        let mut cursor = self.base;
        while let Some(id) = cursor {
            let block = self.block(id);
            if !block.occupied && block.size >= size {
                return Some(id);
            }
            cursor = block.next;
        }
        None
    }

    /// Cuts a free remainder off the back of `id` if it is big enough to stand alone.
    fn split(&mut self, id: BlockId, size: u64) {
        let block = *self.block(id);
        if block.size < size + HEADER_SIZE + MIN_SPLIT_SLACK {
            return;
        }

        let remainder = self.insert(Block {
            address: block.address + HEADER_SIZE + size,
            size: block.size - size - HEADER_SIZE,
            occupied: false,
            prev: Some(id),
            next: block.next,
        });
        self.relink_prev(block.next, remainder);
        if self.tail == Some(id) {
            self.tail = Some(remainder);
        }

        let front = self.block_mut(id);
        front.size = size;
        front.next = Some(remainder);
    }

    fn extend(&mut self, size: u64) -> Result<BlockId, AllocError> {
        let address = self.arena_end();
        let end = address
            .checked_add(HEADER_SIZE)
            .and_then(|a| a.checked_add(size))
            .ok_or(AllocError::OutOfMemory)?;
        if end > self.top {
            return Err(AllocError::OutOfMemory);
        }

        let id = self.insert(Block {
            address,
            size,
            occupied: false,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.block_mut(tail).next = Some(id),
            None => self.base = Some(id),
        }
        self.tail = Some(id);
        self.peak_arena_end = self.peak_arena_end.max(end);
        Ok(id)
    }

    fn validate(&self, address: u64) -> Result<BlockId, AllocError> {
        let id = *self.occupied.get(&address).ok_or(AllocError::InvalidAddress)?;
        let block = self.block(id);
        let in_arena = |link: Option<BlockId>| match link {
            Some(other) => {
                let address = self.block(other).address;
                address >= self.lowest && address < self.top
            }
            None => true,
        };
        if !block.occupied
            || !in_arena(block.prev)
            || !in_arena(block.next)
            || block.size > self.capacity()
        {
            return Err(AllocError::InvalidAddress);
        }
        Ok(id)
    }

    fn relink_prev(&mut self, link: Option<BlockId>, prev: BlockId) {
        if let Some(id) = link {
            self.block_mut(id).prev = Some(prev);
        }
    }

    fn insert(&mut self, block: Block) -> BlockId {
        match self.vacant.pop() {
            Some(id) => {
                self.slots[id] = Some(block);
                id
            }
            None => {
                self.slots.push(Some(block));
                self.slots.len() - 1
            }
        }
    }

    fn take(&mut self, id: BlockId) -> Block {
        let block = *self.block(id);
        self.slots[id] = None;
        self.vacant.push(id);
        block
    }

    fn block(&self, id: BlockId) -> &Block {
        match &self.slots[id] {
            Some(block) => block,
            None => unreachable!("dangling block id {}", id),
        }
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match &mut self.slots[id] {
            Some(block) => block,
            None => unreachable!("dangling block id {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: u64 = 0x10_0000;
    const TOP: u64 = 0x10_0000 + 0x1_0000;

    fn arena() -> BlockAllocator {
        BlockAllocator::new(LOW, TOP)
    }

    /// Contiguity, no adjacent free blocks, nothing past `top`.
    fn assert_well_formed(allocator: &BlockAllocator) {
        let blocks: Vec<BlockInfo> = allocator.blocks().collect();
        let mut expected = LOW + HEADER_SIZE;
        for pair in blocks.windows(2) {
            assert!(pair[0].occupied || pair[1].occupied, "adjacent free blocks");
        }
        for block in &blocks {
            assert_eq!(block.address, expected, "gap in block list");
            assert_eq!(block.size % ALIGNMENT, 0);
            expected = block.address + block.size + HEADER_SIZE;
        }
        assert!(expected - HEADER_SIZE <= TOP);
        if let Some(last) = blocks.last() {
            assert!(last.occupied, "free tail block");
        }
    }

    #[test]
    fn zero_length_takes_one_alignment_unit() {
        let mut allocator = arena();
        let address = allocator.allocate(0).unwrap();
        assert_eq!(address, LOW + HEADER_SIZE);
        assert_eq!(allocator.allocation_size(address), Some(ALIGNMENT));
    }

    #[test]
    fn sizes_round_up_to_alignment() {
        let mut allocator = arena();
        let a = allocator.allocate(33).unwrap();
        let b = allocator.allocate(1).unwrap();
        assert_eq!(allocator.allocation_size(a), Some(64));
        assert_eq!(b, a + 64 + HEADER_SIZE);
    }

    #[test]
    fn coalesces_in_both_orders() {
        for order in [[0, 1], [1, 0]] {
            let mut allocator = arena();
            let blocks = [
                allocator.allocate(64).unwrap(),
                allocator.allocate(64).unwrap(),
            ];
            let _c = allocator.allocate(64).unwrap();
            let end = allocator.stats().arena_end;

            for &i in &order {
                allocator.release(blocks[i]).unwrap();
            }
            assert_eq!(allocator.stats().free_blocks, 1);
            assert_well_formed(&allocator);

            let merged = allocator.allocate(64 + 64 + HEADER_SIZE).unwrap();
            assert_eq!(merged, blocks[0]);
            assert_eq!(allocator.stats().arena_end, end);
        }
    }

    #[test]
    fn splits_only_with_enough_slack() {
        let mut allocator = arena();
        let big = allocator.allocate(256).unwrap();
        let _guard = allocator.allocate(32).unwrap();
        allocator.release(big).unwrap();

        let small = allocator.allocate(32).unwrap();
        assert_eq!(small, big);
        let blocks: Vec<BlockInfo> = allocator.blocks().collect();
        assert_eq!(blocks[1], BlockInfo { address: big + 32 + HEADER_SIZE, size: 192, occupied: false });
        allocator.release(small).unwrap();

        // 256 - 224 leaves exactly one header and no payload: consume the whole block.
        let whole = allocator.allocate(224).unwrap();
        assert_eq!(allocator.allocation_size(whole), Some(256));
        assert_eq!(allocator.stats().free_blocks, 0);
        assert_well_formed(&allocator);
    }

    #[test]
    fn releasing_the_tail_shrinks_the_arena() {
        let mut allocator = arena();
        let a = allocator.allocate(32).unwrap();
        let b = allocator.allocate(32).unwrap();
        let c = allocator.allocate(32).unwrap();

        allocator.release(b).unwrap();
        allocator.release(c).unwrap();
        assert_eq!(allocator.stats().arena_end, a + 32);
        assert_eq!(allocator.blocks().count(), 1);

        allocator.release(a).unwrap();
        assert!(allocator.is_empty());
        assert_eq!(allocator.stats().arena_end, LOW);
        assert_eq!(allocator.stats().peak_arena_end, c + 32);
    }

    #[test]
    fn rejects_foreign_and_double_frees() {
        let mut allocator = arena();
        let a = allocator.allocate(64).unwrap();
        let _b = allocator.allocate(64).unwrap();
        let before: Vec<BlockInfo> = allocator.blocks().collect();

        assert_eq!(allocator.release(a + 8), Err(AllocError::InvalidAddress));
        assert_eq!(allocator.release(0xdead_0000), Err(AllocError::InvalidAddress));
        assert_eq!(allocator.blocks().collect::<Vec<_>>(), before);

        allocator.release(a).unwrap();
        let after: Vec<BlockInfo> = allocator.blocks().collect();
        assert_eq!(allocator.release(a), Err(AllocError::InvalidAddress));
        assert_eq!(allocator.blocks().collect::<Vec<_>>(), after);
    }

    #[test]
    fn fails_past_the_top() {
        let mut allocator = BlockAllocator::new(0, 256);
        let a = allocator.allocate(128).unwrap();
        assert_eq!(allocator.allocate(128), Err(AllocError::OutOfMemory));
        assert_eq!(allocator.allocate(u64::MAX), Err(AllocError::OutOfMemory));
        // 32 header + 128 + 32 header + 64 = 256 exactly.
        assert!(allocator.allocate(64).is_ok());
        allocator.release(a).unwrap();
        assert!(allocator.allocate(96).is_ok());
    }

    #[test]
    fn mixed_workload_keeps_the_list_consistent() {
        let mut allocator = arena();
        let mut live: Vec<u64> = Vec::new();
        let mut seed: u64 = 0x2545_f491;

        for _ in 0..2000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let roll = (seed >> 33) as usize;
            if roll % 3 != 0 || live.is_empty() {
                let length = (roll % 700) as u64;
                if let Ok(address) = allocator.allocate(length) {
                    assert!(!live.contains(&address), "duplicate live address");
                    live.push(address);
                }
            } else {
                let address = live.swap_remove(roll % live.len());
                allocator.release(address).unwrap();
            }

            let stats = allocator.stats();
            let headers = (stats.used_blocks + stats.free_blocks) as u64 * HEADER_SIZE;
            assert!(stats.used_bytes + stats.free_bytes + headers <= allocator.capacity());
        }
        assert_well_formed(&allocator);

        for address in live.drain(..) {
            allocator.release(address).unwrap();
        }
        assert!(allocator.is_empty());
    }
}
