// Access to the bytes behind arena addresses
use alloc::vec;
use alloc::vec::Vec;

use crate::fault::KernelFault;

/// Byte-level view of physical memory.
///
/// The allocator only does bookkeeping; anything that actually touches arena
/// bytes (the ELF loader, the print syscall) goes through this trait.
pub trait PhysicalMemory: Send {
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), KernelFault>;

    fn fill(&mut self, address: u64, len: u64, value: u8) -> Result<(), KernelFault>;

    /// `None` if the address is not backed.
    fn read_byte(&self, address: u64) -> Option<u8>;
}

/// Reads a NUL-terminated string starting at `address`, at most `limit` bytes.
pub fn read_c_string(memory: &dyn PhysicalMemory, address: u64, limit: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut cursor = address;
    while bytes.len() < limit {
        match memory.read_byte(cursor) {
            Some(0) | None => break,
            Some(byte) => bytes.push(byte),
        }
        cursor = match cursor.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }
    bytes
}

/// Heap-backed stand-in for a physical range `[base, base + len)`.
pub struct BufferMemory {
    base: u64,
    bytes: Vec<u8>,
}

impl BufferMemory {
    pub fn new(base: u64, len: usize) -> Self {
        BufferMemory {
            base,
            bytes: vec![0; len],
        }
    }

    pub fn read(&self, address: u64, len: usize) -> Option<&[u8]> {
        let start = address.checked_sub(self.base)? as usize;
        self.bytes.get(start..start.checked_add(len)?)
    }

    fn range_mut(&mut self, address: u64, len: u64) -> Result<&mut [u8], KernelFault> {
        let fault = KernelFault::MemoryAccess(address);
        let start = address.checked_sub(self.base).ok_or(fault)? as usize;
        let end = start.checked_add(len as usize).ok_or(fault)?;
        self.bytes.get_mut(start..end).ok_or(fault)
    }
}

impl PhysicalMemory for BufferMemory {
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), KernelFault> {
        self.range_mut(address, bytes.len() as u64)?
            .copy_from_slice(bytes);
        Ok(())
    }

    fn fill(&mut self, address: u64, len: u64, value: u8) -> Result<(), KernelFault> {
        self.range_mut(address, len)?.fill(value);
        Ok(())
    }

    fn read_byte(&self, address: u64) -> Option<u8> {
        self.read(address, 1).map(|bytes| bytes[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_inside_the_window() {
        let mut memory = BufferMemory::new(0x1000, 64);
        memory.write(0x1010, b"abc").unwrap();
        memory.fill(0x1013, 4, 0xff).unwrap();
        assert_eq!(memory.read(0x1010, 7), Some(&b"abc\xff\xff\xff\xff"[..]));
    }

    #[test]
    fn rejects_writes_outside_the_window() {
        let mut memory = BufferMemory::new(0x1000, 64);
        assert_eq!(memory.write(0xfff, b"x"), Err(KernelFault::MemoryAccess(0xfff)));
        assert_eq!(memory.fill(0x1030, 32, 0), Err(KernelFault::MemoryAccess(0x1030)));
        assert_eq!(memory.read_byte(0x1040), None);
    }

    #[test]
    fn c_strings_stop_at_nul_limit_or_window_end() {
        let mut memory = BufferMemory::new(0, 8);
        memory.write(0, b"hi\0there").unwrap();
        assert_eq!(read_c_string(&memory, 0, 64), b"hi");
        assert_eq!(read_c_string(&memory, 3, 64), b"there");
        assert_eq!(read_c_string(&memory, 3, 2), b"th");
    }
}
