// src/syscalls.rs
use core::fmt;

use crate::config::UnknownSyscallPolicy;
use crate::console::{kprinthex, kprints};
use crate::fault::KernelFault;
use crate::kernel::Kernel;
use crate::kprintln;
use crate::memory::read_c_string;
use crate::process::ProcessError;
use crate::trap::Platform;

/// Return code when a system call succeeds
pub const ALL_OK: i64 = 0;
/// Return code when a system call fails
pub const ERROR: i64 = -1;
/// Return code for a system call the kernel does not provide
pub const ERROR_ILLEGAL_SYSCALL: i64 = -2;

/// Longest string a single print call writes.
pub const MAX_PRINT_LENGTH: usize = 4096;

/// System call numbers, passed in rax
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Version = 0,
    PrintString = 1,
    PrintHex = 2,
    Debugger = 3,
    Allocate = 4,
    Free = 5,
    Terminate = 6,
    CreateProcess = 7,
    Pause = 8,
    Time = 9,
    CreateThread = 10,
    CreateSemaphore = 11,
    SemaphoreDown = 12,
    SemaphoreUp = 13,
}

impl SyscallNumber {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => SyscallNumber::Version,
            1 => SyscallNumber::PrintString,
            2 => SyscallNumber::PrintHex,
            3 => SyscallNumber::Debugger,
            4 => SyscallNumber::Allocate,
            5 => SyscallNumber::Free,
            6 => SyscallNumber::Terminate,
            7 => SyscallNumber::CreateProcess,
            8 => SyscallNumber::Pause,
            9 => SyscallNumber::Time,
            10 => SyscallNumber::CreateThread,
            11 => SyscallNumber::CreateSemaphore,
            12 => SyscallNumber::SemaphoreDown,
            13 => SyscallNumber::SemaphoreUp,
            _ => return None,
        })
    }
}

/// System call arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
    pub arg0: u64, // rdi
    pub arg1: u64, // rsi
}

/// A decoded system call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Version,
    PrintString { address: u64 },
    PrintHex { value: u64 },
    Debugger,
    Allocate { length: u64 },
    Free { address: u64 },
    Terminate,
    CreateProcess { image: u64 },
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// A known number this kernel does not implement.
    Unsupported(SyscallNumber),
    Unknown(u64),
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::Unsupported(number) => write!(f, "Unsupported syscall {:?}", number),
            SyscallError::Unknown(code) => write!(f, "Invalid syscall number {}", code),
        }
    }
}

impl Syscall {
    pub fn decode(code: u64, args: SyscallArgs) -> Result<Self, SyscallError> {
        let number = SyscallNumber::from_code(code).ok_or(SyscallError::Unknown(code))?;
        Ok(match number {
            SyscallNumber::Version => Syscall::Version,
            SyscallNumber::PrintString => Syscall::PrintString { address: args.arg0 },
            SyscallNumber::PrintHex => Syscall::PrintHex { value: args.arg0 },
            SyscallNumber::Debugger => Syscall::Debugger,
            SyscallNumber::Allocate => Syscall::Allocate { length: args.arg0 },
            SyscallNumber::Free => Syscall::Free { address: args.arg0 },
            SyscallNumber::Terminate => Syscall::Terminate,
            SyscallNumber::CreateProcess => Syscall::CreateProcess { image: args.arg0 },
            unsupported => return Err(SyscallError::Unsupported(unsupported)),
        })
    }
}

/// What a system call left for its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Value for the caller's rax.
    Return(u64),
    /// The caller no longer exists.
    Terminated,
}

impl SyscallOutcome {
    fn code(code: i64) -> Self {
        SyscallOutcome::Return(code as u64)
    }
}

impl Kernel {
    /// Decodes and runs the system call `code`, applying the configured
    /// policy to numbers that cannot be served.
    pub fn syscall(
        &mut self,
        cpu: usize,
        code: u64,
        args: SyscallArgs,
        platform: &mut dyn Platform,
    ) -> Result<SyscallOutcome, KernelFault> {
        match Syscall::decode(code, args) {
            Ok(call) => self.execute_syscall(cpu, call, platform),
            Err(error) => match self.config.unknown_syscall_policy {
                UnknownSyscallPolicy::Halt => Err(KernelFault::UnknownSyscall(code)),
                UnknownSyscallPolicy::ReturnIllegal => {
                    kprintln!("[SYSCALL] {}", error);
                    Ok(SyscallOutcome::code(ERROR_ILLEGAL_SYSCALL))
                }
            },
        }
    }

    pub fn execute_syscall(
        &mut self,
        cpu: usize,
        call: Syscall,
        platform: &mut dyn Platform,
    ) -> Result<SyscallOutcome, KernelFault> {
        let outcome = match call {
            Syscall::Version => SyscallOutcome::Return(self.config.kernel_version),
            Syscall::PrintString { address } => {
                let text = read_c_string(self.memory.as_ref(), address, MAX_PRINT_LENGTH);
                kprints(self.terminal.as_mut(), &text);
                SyscallOutcome::code(ALL_OK)
            }
            Syscall::PrintHex { value } => {
                kprinthex(self.terminal.as_mut(), value);
                SyscallOutcome::code(ALL_OK)
            }
            Syscall::Debugger => {
                platform.enter_debugger();
                SyscallOutcome::code(ALL_OK)
            }
            Syscall::Allocate { length } => match self.allocator.allocate(length) {
                Ok(address) => SyscallOutcome::Return(address),
                Err(error) => {
                    kprintln!("[SYSCALL] Allocate of {} bytes failed: {}", length, error);
                    SyscallOutcome::code(ERROR)
                }
            },
            Syscall::Free { address } if self.queue.owns_block(address) => {
                kprintln!("[SYSCALL] Free of {:#x} refused: block belongs to the kernel", address);
                SyscallOutcome::code(ERROR)
            }
            Syscall::Free { address } => match self.allocator.release(address) {
                Ok(()) => SyscallOutcome::code(ALL_OK),
                Err(error) => {
                    kprintln!("[SYSCALL] Free of {:#x} failed: {}", address, error);
                    SyscallOutcome::code(ERROR)
                }
            },
            Syscall::Terminate => {
                self.terminate_current_process(cpu)?;
                SyscallOutcome::Terminated
            }
            Syscall::CreateProcess { image } => {
                let index = usize::try_from(image).unwrap_or(usize::MAX);
                match self.create_process(cpu, index) {
                    Ok(_) => SyscallOutcome::code(ALL_OK),
                    Err(ProcessError::Fatal(fault)) => return Err(fault),
                    Err(error) => {
                        kprintln!("[SYSCALL] CreateProcess failed: {}", error);
                        SyscallOutcome::code(ERROR)
                    }
                }
            }
        };
        Ok(outcome)
    }
}
