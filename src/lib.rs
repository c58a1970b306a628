// Kestrel kernel runtime core
//
// The library holds everything that keeps processes alive after boot: the
// physical arena allocator, the ready queue, the round-robin scheduler, the
// process lifecycle and the trap dispatcher. All of it is platform-agnostic;
// the x86_64 glue under `arch` is only built for bare-metal targets.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod elf;
pub mod fault;
pub mod interrupts;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod syscalls;
pub mod trap;

#[cfg(target_os = "none")]
pub mod arch;

pub use config::KernelConfig;
pub use fault::KernelFault;
pub use kernel::Kernel;

/// Processor index of the bootstrap CPU, the only one running the scheduler.
pub const BSP: usize = 0;

/// Halts the calling CPU forever.
#[cfg(target_os = "none")]
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
