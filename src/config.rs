// Boot-time configuration for kestrel
use core::fmt;

/// Timer ticks between two scheduler invocations.
pub const DEFAULT_SCHEDULER_DIVISOR: u64 = 8;

/// Value returned by the version syscall.
pub const KERNEL_VERSION: u64 = 0;

/// RFLAGS for a freshly created process: only IF (bit 9) is set.
pub const DEFAULT_USER_RFLAGS: u64 = 0x200;

/// What the dispatcher does with a syscall code it cannot serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownSyscallPolicy {
    /// Raise a kernel fault and stop the CPU.
    Halt,
    /// Return `ERROR_ILLEGAL_SYSCALL` to the caller and keep it running.
    ReturnIllegal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    EmptyArena,
    ZeroDivisor,
    NoProcessors,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::EmptyArena => write!(f, "Arena upper bound is not above its lower bound"),
            ConfigError::ZeroDivisor => write!(f, "Scheduler divisor must be non-zero"),
            ConfigError::NoProcessors => write!(f, "At least one processor is required"),
        }
    }
}

/// Values handed to the kernel once at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub lowest_available_physical_memory: u64,
    pub top_of_available_physical_memory: u64,
    pub scheduler_divisor: u64,
    pub kernel_version: u64,
    pub user_rflags: u64,
    pub unknown_syscall_policy: UnknownSyscallPolicy,
    pub processor_count: usize,
}

impl KernelConfig {
    pub const fn new(lowest: u64, top: u64) -> Self {
        KernelConfig {
            lowest_available_physical_memory: lowest,
            top_of_available_physical_memory: top,
            scheduler_divisor: DEFAULT_SCHEDULER_DIVISOR,
            kernel_version: KERNEL_VERSION,
            user_rflags: DEFAULT_USER_RFLAGS,
            unknown_syscall_policy: UnknownSyscallPolicy::Halt,
            processor_count: 1,
        }
    }

    pub const fn with_scheduler_divisor(mut self, divisor: u64) -> Self {
        self.scheduler_divisor = divisor;
        self
    }

    pub const fn with_unknown_syscall_policy(mut self, policy: UnknownSyscallPolicy) -> Self {
        self.unknown_syscall_policy = policy;
        self
    }

    pub const fn with_processor_count(mut self, count: usize) -> Self {
        self.processor_count = count;
        self
    }

    pub fn arena_capacity(&self) -> u64 {
        self.top_of_available_physical_memory
            .saturating_sub(self.lowest_available_physical_memory)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena_capacity() == 0 {
            return Err(ConfigError::EmptyArena);
        }
        if self.scheduler_divisor == 0 {
            return Err(ConfigError::ZeroDivisor);
        }
        if self.processor_count == 0 {
            return Err(ConfigError::NoProcessors);
        }
        Ok(())
    }
}
