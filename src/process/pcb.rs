// Process descriptors for kestrel
use alloc::boxed::Box;
use core::fmt;

use crate::elf::{ElfError, LoadError};
use crate::fault::KernelFault;
use crate::process::context::Context;

/// Process ID type
pub type ProcessId = u64;

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,   // Queued, waiting for the CPU
    Running, // Head of the ready queue
    Blocked, // Waiting on an event; nothing blocks yet
}

/// The kernel's descriptor for one process.
#[derive(Debug)]
pub struct ProcessEntry {
    pub pid: ProcessId,
    /// Index of the image this process was loaded from.
    pub id: usize,
    /// Base of the loaded image, released on termination.
    pub memory_location: u64,
    pub context: Box<Context>,
    /// Arena reservation standing for the context record.
    pub context_location: u64,
    pub state: ProcessState,
}

/// Snapshot of a queued process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub image: usize,
    pub memory_location: u64,
    pub state: ProcessState,
}

impl From<&ProcessEntry> for ProcessInfo {
    fn from(entry: &ProcessEntry) -> Self {
        ProcessInfo {
            pid: entry.pid,
            image: entry.id,
            memory_location: entry.memory_location,
            state: entry.state,
        }
    }
}

/// Process creation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    InvalidImageIndex(usize),
    InvalidImage(ElfError),
    InsufficientMemory,
    /// Creation ran into a broken kernel invariant.
    Fatal(KernelFault),
}

impl From<LoadError> for ProcessError {
    fn from(error: LoadError) -> Self {
        match error {
            LoadError::Elf(error) => ProcessError::InvalidImage(error),
            LoadError::OutOfMemory => ProcessError::InsufficientMemory,
            LoadError::Fault(fault) => ProcessError::Fatal(fault),
        }
    }
}

impl From<KernelFault> for ProcessError {
    fn from(fault: KernelFault) -> Self {
        ProcessError::Fatal(fault)
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::InvalidImageIndex(index) => write!(f, "No image with index {}", index),
            ProcessError::InvalidImage(error) => write!(f, "Invalid image: {}", error),
            ProcessError::InsufficientMemory => write!(f, "Insufficient memory"),
            ProcessError::Fatal(fault) => write!(f, "{}", fault),
        }
    }
}
