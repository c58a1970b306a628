// ELF64 image loader for kestrel
//
// Images are position independent blobs whose LOAD segments start at virtual
// address 0 and follow each other without gaps. Loading copies them into one
// arena allocation and rebases the entry point onto it.
use alloc::vec::Vec;
use core::fmt;

use crate::fault::KernelFault;
use crate::memory::{AllocError, BlockAllocator, PhysicalMemory};

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// ELF machine: x86_64
pub const EM_X86_64: u16 = 62;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Segment flags
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

/// Size of the ELF64 file header
pub const ELF_HEADER_SIZE: usize = 64;

/// Size of one ELF64 program header
pub const PROGRAM_HEADER_SIZE: usize = 56;

/// Segment file sizes are copied in 8-byte words.
const COPY_GRANULE: u64 = 8;

/// Fields of the ELF64 file header the loader looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Header {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

/// ELF64 program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Header-level rejections. These are recoverable: the image is never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    TooSmall,
    BadMagic,
    Not64Bit,
    NotLittleEndian,
    BadProgramHeaderSize,
    ProgramHeadersOutOfBounds,
    NoLoadableSegments,
    EntryOutsideImage,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElfError::TooSmall => write!(f, "Image is smaller than an ELF header"),
            ElfError::BadMagic => write!(f, "Invalid ELF magic"),
            ElfError::Not64Bit => write!(f, "Not a 64-bit ELF"),
            ElfError::NotLittleEndian => write!(f, "Not little endian"),
            ElfError::BadProgramHeaderSize => write!(f, "Unexpected program header entry size"),
            ElfError::ProgramHeadersOutOfBounds => write!(f, "Program header table lies outside the image"),
            ElfError::NoLoadableSegments => write!(f, "Image has no loadable segments"),
            ElfError::EntryOutsideImage => write!(f, "Entry point lies outside the image"),
        }
    }
}

/// Outcome of a failed `load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    Elf(ElfError),
    OutOfMemory,
    /// The image passed header checks but its segment layout is broken.
    Fault(KernelFault),
}

impl From<ElfError> for LoadError {
    fn from(error: ElfError) -> Self {
        LoadError::Elf(error)
    }
}

impl From<KernelFault> for LoadError {
    fn from(fault: KernelFault) -> Self {
        LoadError::Fault(fault)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Elf(error) => write!(f, "{}", error),
            LoadError::OutOfMemory => write!(f, "Out of memory for the image"),
            LoadError::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

/// Where a loaded image ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub entry_point: u64,
    pub memory_base: u64,
    pub footprint: u64,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// A validated view over an image in the image table.
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    header: Elf64Header,
}

impl<'a> ElfImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        if data.len() < ELF_HEADER_SIZE {
            return Err(ElfError::TooSmall);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[4] != ELFCLASS64 {
            return Err(ElfError::Not64Bit);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::NotLittleEndian);
        }

        let header = Elf64Header {
            e_type: read_u16(data, 16),
            e_machine: read_u16(data, 18),
            e_entry: read_u64(data, 24),
            e_phoff: read_u64(data, 32),
            e_phentsize: read_u16(data, 54),
            e_phnum: read_u16(data, 56),
        };

        if header.e_phnum > 0 && header.e_phentsize as usize != PROGRAM_HEADER_SIZE {
            return Err(ElfError::BadProgramHeaderSize);
        }
        let table_end = (header.e_phnum as u64)
            .checked_mul(PROGRAM_HEADER_SIZE as u64)
            .and_then(|len| len.checked_add(header.e_phoff))
            .ok_or(ElfError::ProgramHeadersOutOfBounds)?;
        if table_end > data.len() as u64 {
            return Err(ElfError::ProgramHeadersOutOfBounds);
        }

        Ok(ElfImage { data, header })
    }

    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    pub fn entry_offset(&self) -> u64 {
        self.header.e_entry
    }

    pub fn program_headers(&self) -> impl Iterator<Item = Elf64ProgramHeader> + 'a {
        let data = self.data;
        let base = self.header.e_phoff as usize;
        (0..self.header.e_phnum as usize).map(move |index| {
            let at = base + index * PROGRAM_HEADER_SIZE;
            Elf64ProgramHeader {
                p_type: read_u32(data, at),
                p_flags: read_u32(data, at + 4),
                p_offset: read_u64(data, at + 8),
                p_vaddr: read_u64(data, at + 16),
                p_filesz: read_u64(data, at + 32),
                p_memsz: read_u64(data, at + 40),
                p_align: read_u64(data, at + 48),
            }
        })
    }

    pub fn load_segments(&self) -> impl Iterator<Item = Elf64ProgramHeader> + 'a {
        self.program_headers().filter(|ph| ph.p_type == PT_LOAD)
    }

    /// Total memory size of the LOAD segments.
    ///
    /// Each segment has to start where the previous one ended, the first one at 0.
    pub fn footprint(&self) -> Result<u64, KernelFault> {
        let mut total: u64 = 0;
        for segment in self.load_segments() {
            if segment.p_vaddr != total {
                return Err(KernelFault::IllegalImageLayout);
            }
            total = total
                .checked_add(segment.p_memsz)
                .ok_or(KernelFault::IllegalImageLayout)?;
        }
        Ok(total)
    }

    fn segment_bytes(&self, segment: &Elf64ProgramHeader) -> Result<&'a [u8], KernelFault> {
        let start = segment.p_offset as usize;
        let end = start
            .checked_add(segment.p_filesz as usize)
            .ok_or(KernelFault::CorruptImage)?;
        self.data.get(start..end).ok_or(KernelFault::CorruptImage)
    }
}

/// Copies `image` into a fresh arena allocation.
///
/// Running out of arena space is reported, not fatal. A segment layout that
/// disagrees with itself is a `KernelFault`.
pub fn load(
    image: &ElfImage,
    arena: &mut BlockAllocator,
    memory: &mut dyn PhysicalMemory,
) -> Result<LoadedImage, LoadError> {
    let footprint = image.footprint()?;
    if footprint == 0 {
        return Err(ElfError::NoLoadableSegments.into());
    }
    if image.entry_offset() >= footprint {
        return Err(ElfError::EntryOutsideImage.into());
    }

    let memory_base = arena.allocate(footprint).map_err(|error| match error {
        AllocError::OutOfMemory => LoadError::OutOfMemory,
        AllocError::InvalidAddress => LoadError::Fault(KernelFault::ArenaCorrupted),
    })?;

    if let Err(fault) = copy_segments(image, footprint, memory_base, memory) {
        arena
            .release(memory_base)
            .map_err(|_| KernelFault::ArenaCorrupted)?;
        return Err(fault.into());
    }

    Ok(LoadedImage {
        entry_point: memory_base + image.entry_offset(),
        memory_base,
        footprint,
    })
}

fn copy_segments(
    image: &ElfImage,
    footprint: u64,
    memory_base: u64,
    memory: &mut dyn PhysicalMemory,
) -> Result<(), KernelFault> {
    let mut used_memory: u64 = 0;
    for segment in image.load_segments() {
        if segment.p_vaddr != used_memory {
            return Err(KernelFault::IllegalImageLayout);
        }
        if segment.p_filesz % COPY_GRANULE != 0 || segment.p_filesz > segment.p_memsz {
            return Err(KernelFault::CorruptImage);
        }
        let end = used_memory
            .checked_add(segment.p_memsz)
            .ok_or(KernelFault::IllegalImageLayout)?;
        if end > footprint {
            return Err(KernelFault::IllegalImageLayout);
        }

        let destination = memory_base + used_memory;
        memory.write(destination, image.segment_bytes(&segment)?)?;
        memory.fill(
            destination + segment.p_filesz,
            segment.p_memsz - segment.p_filesz,
            0,
        )?;
        used_memory = end;
    }
    Ok(())
}

struct SegmentSpec {
    vaddr: u64,
    bytes: Vec<u8>,
    memsz: u64,
    flags: u32,
}

/// Assembles minimal ELF64 executables in memory.
///
/// Segments added with `segment` are placed back to back from address 0;
/// `segment_at` places one anywhere, which is how broken layouts are built.
#[derive(Default)]
pub struct ImageBuilder {
    entry: u64,
    segments: Vec<SegmentSpec>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, offset: u64) -> Self {
        self.entry = offset;
        self
    }

    /// Appends a segment right after the previous one. `bytes` is padded with
    /// zeros to a multiple of 8 and `memsz` is raised to cover it.
    pub fn segment(self, bytes: &[u8], memsz: u64, flags: u32) -> Self {
        let vaddr = self.segments.iter().map(|s| s.memsz).sum();
        let mut padded = bytes.to_vec();
        padded.resize(bytes.len().next_multiple_of(COPY_GRANULE as usize), 0);
        let memsz = memsz.max(padded.len() as u64);
        self.segment_at(vaddr, &padded, memsz, flags)
    }

    /// Adds a segment verbatim.
    pub fn segment_at(mut self, vaddr: u64, bytes: &[u8], memsz: u64, flags: u32) -> Self {
        self.segments.push(SegmentSpec {
            vaddr,
            bytes: bytes.to_vec(),
            memsz,
            flags,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let table_end = ELF_HEADER_SIZE + self.segments.len() * PROGRAM_HEADER_SIZE;
        let mut image = Vec::with_capacity(table_end);

        image.extend_from_slice(&ELF_MAGIC);
        image.extend_from_slice(&[ELFCLASS64, ELFDATA2LSB, 1]);
        image.resize(16, 0);
        image.extend_from_slice(&ET_EXEC.to_le_bytes());
        image.extend_from_slice(&EM_X86_64.to_le_bytes());
        image.extend_from_slice(&1u32.to_le_bytes());
        image.extend_from_slice(&self.entry.to_le_bytes());
        image.extend_from_slice(&(ELF_HEADER_SIZE as u64).to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&(ELF_HEADER_SIZE as u16).to_le_bytes());
        image.extend_from_slice(&(PROGRAM_HEADER_SIZE as u16).to_le_bytes());
        image.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        image.extend_from_slice(&[0; 6]);

        let mut offset = table_end.next_multiple_of(COPY_GRANULE as usize) as u64;
        for segment in &self.segments {
            image.extend_from_slice(&PT_LOAD.to_le_bytes());
            image.extend_from_slice(&segment.flags.to_le_bytes());
            image.extend_from_slice(&offset.to_le_bytes());
            image.extend_from_slice(&segment.vaddr.to_le_bytes());
            image.extend_from_slice(&segment.vaddr.to_le_bytes());
            image.extend_from_slice(&(segment.bytes.len() as u64).to_le_bytes());
            image.extend_from_slice(&segment.memsz.to_le_bytes());
            image.extend_from_slice(&COPY_GRANULE.to_le_bytes());
            offset = (offset + segment.bytes.len() as u64).next_multiple_of(COPY_GRANULE);
        }

        for segment in &self.segments {
            image.resize(image.len().next_multiple_of(COPY_GRANULE as usize), 0);
            image.extend_from_slice(&segment.bytes);
        }
        image
    }
}
