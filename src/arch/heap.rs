// Kernel heap for queue nodes, contexts and the image table
use core::ptr::addr_of_mut;

use linked_list_allocator::LockedHeap;

pub const HEAP_SIZE: usize = 1024 * 1024;

#[repr(align(4096))]
struct HeapSpace([u8; HEAP_SIZE]);

static mut HEAP: HeapSpace = HeapSpace([0; HEAP_SIZE]);

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Must run once, before the first allocation.
pub fn init() {
    // SAFETY: `HEAP` is used by nothing else and lives forever.
    unsafe {
        ALLOCATOR.lock().init(addr_of_mut!(HEAP) as usize, HEAP_SIZE);
    }
}
