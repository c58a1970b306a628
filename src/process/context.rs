// Saved machine state and per-CPU bookkeeping
use core::fmt;

use crate::process::pcb::ProcessId;

/// Saved state of a process's only thread.
///
/// The FXSAVE area comes first so it keeps the 16-byte alignment
/// `fxrstor64` needs. The resume path reads the registers by field offset.
#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct Context {
    pub fp_context: [u8; 512],
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    /// Set when the context was saved by an interrupt rather than a syscall.
    pub interrupt_context: bool,
}

impl Context {
    pub const fn zeroed() -> Self {
        Context {
            fp_context: [0; 512],
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rdi: 0,
            rsi: 0,
            rbp: 0,
            rsp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0,
            interrupt_context: false,
        }
    }

    /// Context for a process that has not run yet.
    pub fn new(entry_point: u64, rflags: u64) -> Self {
        Context {
            rip: entry_point,
            rflags,
            ..Context::zeroed()
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::zeroed()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("rip", &format_args!("{:#x}", self.rip))
            .field("rsp", &format_args!("{:#x}", self.rsp))
            .field("rflags", &format_args!("{:#x}", self.rflags))
            .field("rax", &self.rax)
            .field("rdi", &self.rdi)
            .field("rsi", &self.rsi)
            .field("interrupt_context", &self.interrupt_context)
            .finish_non_exhaustive()
    }
}

/// Per-processor state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerCpu {
    pub processor_index: usize,
    pub apic_id: u32,
    /// Top of the stack the syscall entry switches to.
    pub syscall_stack: u64,
    active: Option<ProcessId>,
}

impl PerCpu {
    pub fn new(processor_index: usize) -> Self {
        Self {
            processor_index,
            apic_id: processor_index as u32,
            syscall_stack: 0,
            active: None,
        }
    }

    /// Process whose context runs when this CPU returns to user mode.
    pub fn active(&self) -> Option<ProcessId> {
        self.active
    }

    pub fn set_active(&mut self, pid: Option<ProcessId>) {
        self.active = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fpu_area_is_aligned_for_fxsave() {
        assert_eq!(core::mem::offset_of!(Context, fp_context), 0);
        assert_eq!(core::mem::align_of::<Context>(), 16);
        assert_eq!(core::mem::offset_of!(Context, rax), 512);
        assert_eq!(core::mem::offset_of!(Context, rflags), 512 + 17 * 8);
    }

    #[test]
    fn new_context_only_sets_entry_and_flags() {
        let context = Context::new(0x4000, 0x200);
        assert_eq!(context.rip, 0x4000);
        assert_eq!(context.rflags, 0x200);
        assert_eq!(context.rsp, 0);
        assert!(!context.interrupt_context);
        assert!(context.fp_context.iter().all(|&b| b == 0));
    }
}
