// Physical memory: arena bookkeeping and byte access
pub mod allocator;
pub mod physical;

pub use allocator::{AllocError, AllocatorStats, BlockAllocator, BlockInfo, ALIGNMENT, HEADER_SIZE};
pub use physical::{read_c_string, BufferMemory, PhysicalMemory};
