// Trap dispatch for kestrel
//
// Every entry into the kernel lands here. The `Kernel` methods decide what
// happens and report it as a `TrapExit`; the free functions below are the
// glue that takes the global lock, drops it again and then hands control to
// the platform, which never comes back.
use crate::fault::KernelFault;
use crate::interrupts::InterruptKind;
use crate::kernel::{self, Kernel};
use crate::kprintln;
use crate::process::context::Context;
use crate::syscalls::{SyscallArgs, SyscallOutcome};

/// The hardware side of a trap.
pub trait Platform {
    /// Copies the trapped register state and the FPU area into `context`.
    fn save_into(&mut self, context: &mut Context);

    /// Restores `context` and continues it. The restore path may differ
    /// depending on `context.interrupt_context`.
    fn resume(&mut self, context: &Context) -> !;

    fn end_of_interrupt(&mut self, vector: u8);

    fn enter_debugger(&mut self);

    /// Enables interrupts, waits for one, disables them again.
    fn idle(&mut self);

    fn halt(&mut self) -> !;
}

/// How a trap leaves the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapExit {
    /// Continue this context.
    Resume(Context),
    /// No process is left; wait for interrupts.
    Idle,
    /// Go back to the interrupted kernel code.
    Return,
}

impl Kernel {
    /// Serves the system call of the process active on `cpu`.
    pub fn handle_syscall(
        &mut self,
        cpu: usize,
        platform: &mut dyn Platform,
    ) -> Result<TrapExit, KernelFault> {
        let caller = self.cpu(cpu)?.active().ok_or(KernelFault::NoActiveContext)?;
        let context = self.active_context_mut(cpu)?;
        platform.save_into(context);
        context.interrupt_context = false;

        let code = context.rax;
        let args = SyscallArgs {
            arg0: context.rdi,
            arg1: context.rsi,
        };

        if let SyscallOutcome::Return(value) = self.syscall(cpu, code, args, platform)? {
            let entry = self
                .queue
                .find_mut(caller)
                .ok_or(KernelFault::StaleContext(caller))?;
            entry.context.rax = value;
        }
        Ok(self.exit_to_active(cpu))
    }

    /// Serves interrupt `vector`. `from_process` tells whether it arrived
    /// while a process was running, in which case its context is saved and
    /// a context is resumed afterwards.
    pub fn handle_interrupt(
        &mut self,
        cpu: usize,
        vector: u8,
        from_process: bool,
        platform: &mut dyn Platform,
    ) -> Result<TrapExit, KernelFault> {
        if from_process {
            let context = self.active_context_mut(cpu)?;
            platform.save_into(context);
            context.interrupt_context = true;
        }

        match InterruptKind::classify(vector) {
            InterruptKind::Exception(vector) => return Err(KernelFault::UnhandledException(vector)),
            InterruptKind::Unknown(vector) => return Err(KernelFault::UnknownInterrupt(vector)),
            InterruptKind::Timer => {
                self.timer_tick(cpu)?;
            }
            InterruptKind::InterProcessor(_) | InterruptKind::Spurious(_) => {}
        }
        platform.end_of_interrupt(vector);

        if !from_process {
            return Ok(TrapExit::Return);
        }
        match self.exit_to_active(cpu) {
            TrapExit::Idle => Err(KernelFault::NoActiveContext),
            exit => Ok(exit),
        }
    }

    fn exit_to_active(&self, cpu: usize) -> TrapExit {
        match self.active_context(cpu) {
            Some(context) => TrapExit::Resume(context.clone()),
            None => TrapExit::Idle,
        }
    }
}

/// Prints `fault` and stops the CPU.
pub fn fatal(fault: KernelFault, platform: &mut dyn Platform) -> ! {
    kprintln!("kernel panic: {}", fault);
    platform.halt()
}

/// System call entry on `cpu`.
pub fn syscall_trap(cpu: usize, platform: &mut dyn Platform) -> ! {
    let exit = kernel::with_kernel(|kernel| kernel.handle_syscall(cpu, platform));
    leave(cpu, exit, platform)
}

/// Interrupt entry on `cpu`. Returns only for interrupts that hit kernel code.
pub fn interrupt_trap(cpu: usize, vector: u8, from_process: bool, platform: &mut dyn Platform) {
    let exit = kernel::with_kernel(|kernel| {
        kernel.handle_interrupt(cpu, vector, from_process, platform)
    });
    if let Some(Ok(TrapExit::Return)) = exit {
        return;
    }
    leave(cpu, exit, platform)
}

fn leave(
    cpu: usize,
    exit: Option<Result<TrapExit, KernelFault>>,
    platform: &mut dyn Platform,
) -> ! {
    match exit {
        None => fatal(KernelFault::NotInstalled, platform),
        Some(Err(fault)) => fatal(fault, platform),
        Some(Ok(TrapExit::Resume(context))) => platform.resume(&context),
        Some(Ok(TrapExit::Idle)) | Some(Ok(TrapExit::Return)) => idle_until_runnable(cpu, platform),
    }
}

/// Halt-and-wait loop for a CPU with nothing to run.
pub fn idle_until_runnable(cpu: usize, platform: &mut dyn Platform) -> ! {
    loop {
        platform.idle();
        if let Some(Some(context)) =
            kernel::with_kernel(|kernel| kernel.active_context(cpu).cloned())
        {
            platform.resume(&context);
        }
    }
}

/// Host stand-in for the trap hardware.
#[cfg(not(target_os = "none"))]
pub mod testing {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    /// Records what the kernel asked of the hardware. `registers` plays the
    /// trapped register file that `save_into` copies from.
    #[derive(Default)]
    pub struct RecordingPlatform {
        pub registers: Context,
        pub saves: usize,
        pub end_of_interrupts: Vec<u8>,
        pub debugger_entries: usize,
        pub idles: usize,
        /// Runs on every `idle`, standing in for the interrupt that ends the wait.
        pub idle_hook: Option<Box<dyn FnMut()>>,
    }

    impl RecordingPlatform {
        pub fn with_registers(rax: u64, rdi: u64) -> Self {
            let mut platform = RecordingPlatform::default();
            platform.registers.rax = rax;
            platform.registers.rdi = rdi;
            platform
        }

        pub fn with_idle_hook(mut self, wake: impl FnMut() + 'static) -> Self {
            self.idle_hook = Some(Box::new(wake));
            self
        }
    }

    impl Platform for RecordingPlatform {
        fn save_into(&mut self, context: &mut Context) {
            *context = self.registers.clone();
            self.saves += 1;
        }

        fn resume(&mut self, context: &Context) -> ! {
            panic!("resume at {:#x}", context.rip)
        }

        fn end_of_interrupt(&mut self, vector: u8) {
            self.end_of_interrupts.push(vector);
        }

        fn enter_debugger(&mut self) {
            self.debugger_entries += 1;
        }

        fn idle(&mut self) {
            self.idles += 1;
            if let Some(wake) = self.idle_hook.as_mut() {
                wake();
            }
        }

        fn halt(&mut self) -> ! {
            panic!("halted")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingPlatform;
    use super::*;
    use crate::kernel::fixtures;
    use crate::process::ProcessState;
    use crate::syscalls::{ERROR, SyscallNumber};
    use crate::BSP;

    fn resumed(exit: Result<TrapExit, KernelFault>) -> Context {
        match exit {
            Ok(TrapExit::Resume(context)) => context,
            other => panic!("expected a resume, got {:?}", other),
        }
    }

    #[test]
    fn syscall_result_lands_in_the_callers_rax() {
        let (mut kernel, _) = fixtures::kernel(1);
        kernel.create_process(BSP, 0).unwrap();

        let mut platform = RecordingPlatform::with_registers(SyscallNumber::Allocate as u64, 64);
        platform.registers.rip = 0x1234;
        let context = resumed(kernel.handle_syscall(BSP, &mut platform));

        assert_eq!(platform.saves, 1);
        assert_eq!(context.rip, 0x1234);
        assert!(!context.interrupt_context);
        assert_eq!(kernel.allocator().allocation_size(context.rax), Some(64));
        assert_eq!(kernel.active_context(BSP).unwrap().rax, context.rax);
    }

    #[test]
    fn failed_calls_return_error_codes() {
        let (mut kernel, _) = fixtures::kernel(1);
        kernel.create_process(BSP, 0).unwrap();
        let mut platform = RecordingPlatform::with_registers(SyscallNumber::Free as u64, 0x10);
        let context = resumed(kernel.handle_syscall(BSP, &mut platform));
        assert_eq!(context.rax, ERROR as u64);
    }

    #[test]
    fn terminating_the_last_process_idles() {
        let (mut kernel, terminal) = fixtures::kernel(1);
        kernel.create_process(BSP, 0).unwrap();

        let mut platform = RecordingPlatform::with_registers(SyscallNumber::Terminate as u64, 0);
        assert_eq!(kernel.handle_syscall(BSP, &mut platform), Ok(TrapExit::Idle));
        assert!(kernel.queue().is_empty());
        assert_eq!(terminal.contents(), b"the last process is terminated!\n");
    }

    #[test]
    fn terminate_switches_to_the_next_process() {
        let (mut kernel, _) = fixtures::kernel(2);
        kernel.create_process(BSP, 0).unwrap();
        kernel.create_process(BSP, 1).unwrap();
        let next_entry = kernel.queue().iter().nth(1).unwrap().context.rip;

        let mut platform = RecordingPlatform::with_registers(SyscallNumber::Terminate as u64, 0);
        let context = resumed(kernel.handle_syscall(BSP, &mut platform));
        assert_eq!(context.rip, next_entry);
        assert_eq!(kernel.active_pid(BSP), Some(2));
    }

    #[test]
    fn syscalls_without_a_process_are_faults() {
        let (mut kernel, _) = fixtures::kernel(0);
        let mut platform = RecordingPlatform::with_registers(0, 0);
        assert_eq!(
            kernel.handle_syscall(BSP, &mut platform),
            Err(KernelFault::NoActiveContext)
        );
    }

    #[test]
    fn timer_interrupts_rotate_and_acknowledge() {
        let (mut kernel, _) = fixtures::kernel(2);
        kernel.create_process(BSP, 0).unwrap();
        kernel.create_process(BSP, 1).unwrap();
        let mut platform = RecordingPlatform::default();

        for _ in 0..7 {
            let context = resumed(kernel.handle_interrupt(BSP, 32, true, &mut platform));
            assert!(context.interrupt_context);
            assert_eq!(kernel.active_pid(BSP), Some(1));
        }
        resumed(kernel.handle_interrupt(BSP, 32, true, &mut platform));
        assert_eq!(kernel.active_pid(BSP), Some(2));
        assert_eq!(kernel.queue().peek_front().unwrap().state, ProcessState::Running);
        assert_eq!(platform.end_of_interrupts, [32; 8]);
    }

    #[test]
    fn kernel_mode_interrupts_do_not_touch_contexts() {
        let (mut kernel, _) = fixtures::kernel(0);
        let mut platform = RecordingPlatform::default();
        assert_eq!(kernel.handle_interrupt(BSP, 39, false, &mut platform), Ok(TrapExit::Return));
        assert_eq!(kernel.handle_interrupt(BSP, 245, false, &mut platform), Ok(TrapExit::Return));
        assert_eq!(kernel.handle_interrupt(BSP, 32, false, &mut platform), Ok(TrapExit::Return));
        assert_eq!(platform.saves, 0);
        assert_eq!(platform.end_of_interrupts, [39, 245, 32]);
    }

    #[test]
    fn unknown_vectors_and_exceptions_are_fatal() {
        let (mut kernel, _) = fixtures::kernel(0);
        let mut platform = RecordingPlatform::default();
        assert_eq!(
            kernel.handle_interrupt(BSP, 13, false, &mut platform),
            Err(KernelFault::UnhandledException(13))
        );
        assert_eq!(
            kernel.handle_interrupt(BSP, 50, false, &mut platform),
            Err(KernelFault::UnknownInterrupt(50))
        );
        assert!(platform.end_of_interrupts.is_empty());
    }
}
