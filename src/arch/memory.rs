// The arena as seen through the bootloader's physical memory mapping
use bootloader::bootinfo::MemoryRegionType;
use bootloader::BootInfo;

use crate::fault::KernelFault;
use crate::memory::PhysicalMemory;

/// Largest usable region, as `[lowest, top)` virtual addresses in the
/// physical memory window.
pub fn arena_window(boot_info: &BootInfo) -> Option<(u64, u64)> {
    let region = boot_info
        .memory_map
        .iter()
        .filter(|region| region.region_type == MemoryRegionType::Usable)
        .max_by_key(|region| region.range.end_addr() - region.range.start_addr())?;
    let offset = boot_info.physical_memory_offset;
    Some((
        offset + region.range.start_addr(),
        offset + region.range.end_addr(),
    ))
}

pub struct MappedArena {
    lowest: u64,
    top: u64,
}

impl MappedArena {
    /// # Safety
    ///
    /// `[lowest, top)` must be mapped writable and owned by nothing else.
    pub unsafe fn new(lowest: u64, top: u64) -> Self {
        MappedArena { lowest, top }
    }

    fn pointer(&self, address: u64, len: u64) -> Result<*mut u8, KernelFault> {
        let end = address
            .checked_add(len)
            .ok_or(KernelFault::MemoryAccess(address))?;
        if address < self.lowest || end > self.top {
            return Err(KernelFault::MemoryAccess(address));
        }
        Ok(address as *mut u8)
    }
}

impl PhysicalMemory for MappedArena {
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), KernelFault> {
        let target = self.pointer(address, bytes.len() as u64)?;
        // SAFETY: the range was checked against the arena.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), target, bytes.len()) };
        Ok(())
    }

    fn fill(&mut self, address: u64, len: u64, value: u8) -> Result<(), KernelFault> {
        let target = self.pointer(address, len)?;
        // SAFETY: as above.
        unsafe { core::ptr::write_bytes(target, value, len as usize) };
        Ok(())
    }

    fn read_byte(&self, address: u64) -> Option<u8> {
        let source = self.pointer(address, 1).ok()?;
        // SAFETY: as above.
        Some(unsafe { core::ptr::read_volatile(source) })
    }
}
