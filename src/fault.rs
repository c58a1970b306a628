// Fatal kernel faults
//
// A `KernelFault` means a kernel invariant no longer holds. Nothing below the
// trap layer halts on its own; faults travel up as values and the trap layer
// prints them and stops the CPU.
use core::fmt;

use crate::process::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFault {
    /// The ready queue was empty where a running process was required.
    QueueEmpty,
    /// No arena space left for a ready-queue node.
    QueueNodeExhausted,
    /// Program headers are out of order, overlap, or overrun the footprint.
    IllegalImageLayout,
    /// A segment's file size is not a multiple of 8 or lies outside the file.
    CorruptImage,
    UnknownInterrupt(u8),
    UnhandledException(u8),
    UnknownSyscall(u64),
    /// A trap arrived from user mode but no context is active.
    NoActiveContext,
    /// The active context points at a process that is not queued.
    StaleContext(ProcessId),
    UnknownProcessor(usize),
    /// Allocator bookkeeping rejected memory the kernel itself owns.
    ArenaCorrupted,
    /// A physical write fell outside the backed arena.
    MemoryAccess(u64),
    /// A trap arrived before the kernel instance was installed.
    NotInstalled,
}

impl fmt::Display for KernelFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelFault::QueueEmpty => write!(f, "process queue is empty"),
            KernelFault::QueueNodeExhausted => write!(f, "out of memory for a process queue node"),
            KernelFault::IllegalImageLayout => write!(f, "illegal ELF program header layout"),
            KernelFault::CorruptImage => write!(f, "corrupt ELF segment"),
            KernelFault::UnknownInterrupt(vector) => write!(f, "unknown interrupt {}", vector),
            KernelFault::UnhandledException(vector) => {
                write!(f, "unhandled CPU exception {}", vector)
            }
            KernelFault::UnknownSyscall(code) => write!(f, "unknown syscall {}", code),
            KernelFault::NoActiveContext => write!(f, "no active context"),
            KernelFault::StaleContext(pid) => {
                write!(f, "active context of process {} is not queued", pid)
            }
            KernelFault::UnknownProcessor(index) => write!(f, "no processor with index {}", index),
            KernelFault::ArenaCorrupted => write!(f, "arena bookkeeping corrupted"),
            KernelFault::MemoryAccess(address) => {
                write!(f, "physical access outside the arena at {:#x}", address)
            }
            KernelFault::NotInstalled => write!(f, "kernel not installed"),
        }
    }
}
