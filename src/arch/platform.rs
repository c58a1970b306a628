use core::arch::asm;
use core::mem::offset_of;

use x86_64::instructions::interrupts;

use super::{gdt, idt};
use crate::fault::KernelFault;
use crate::interrupts::SYSCALL_VECTOR;
use crate::kernel;
use crate::process::context::Context;
use crate::trap::{self, Platform};
use crate::{hlt_loop, BSP};

/// Registers as the trap stubs leave them on the stack.
#[repr(C)]
#[derive(Debug)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    // pushed by the CPU
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// FXSAVE image the trap stubs store before calling into Rust.
pub type FpArea = [u8; 512];

pub struct X86Platform {
    frame: *const TrapFrame,
    fp_area: *const FpArea,
}

impl X86Platform {
    /// # Safety
    ///
    /// `frame` and `fp_area` must point at the live frame and FXSAVE area of
    /// the current trap.
    pub unsafe fn new(frame: *const TrapFrame, fp_area: *const FpArea) -> Self {
        X86Platform { frame, fp_area }
    }

    /// Platform for code that did not enter through a trap stub.
    pub fn without_frame() -> Self {
        X86Platform {
            frame: core::ptr::null(),
            fp_area: core::ptr::null(),
        }
    }
}

impl Platform for X86Platform {
    fn save_into(&mut self, context: &mut Context) {
        // SAFETY: see `new`.
        if let Some(fp_area) = unsafe { self.fp_area.as_ref() } {
            context.fp_context = *fp_area;
        }
        // SAFETY: see `new`.
        let Some(frame) = (unsafe { self.frame.as_ref() }) else {
            return;
        };
        context.rax = frame.rax;
        context.rbx = frame.rbx;
        context.rcx = frame.rcx;
        context.rdx = frame.rdx;
        context.rdi = frame.rdi;
        context.rsi = frame.rsi;
        context.rbp = frame.rbp;
        context.rsp = frame.rsp;
        context.r8 = frame.r8;
        context.r9 = frame.r9;
        context.r10 = frame.r10;
        context.r11 = frame.r11;
        context.r12 = frame.r12;
        context.r13 = frame.r13;
        context.r14 = frame.r14;
        context.r15 = frame.r15;
        context.rip = frame.rip;
        context.rflags = frame.rflags;
    }

    fn resume(&mut self, context: &Context) -> ! {
        // SAFETY: the context was built by the kernel from a loaded image or
        // saved from a trap.
        unsafe { resume_context(context) }
    }

    fn end_of_interrupt(&mut self, vector: u8) {
        // SAFETY: the vector came from the PIC range or is ignored by it.
        unsafe { idt::PICS.lock().notify_end_of_interrupt(vector) }
    }

    fn enter_debugger(&mut self) {
        // Bochs magic breakpoint, a no-op everywhere else.
        unsafe { asm!("xchg bx, bx", options(nomem, nostack, preserves_flags)) }
    }

    fn idle(&mut self) {
        interrupts::enable_and_hlt();
        interrupts::disable();
    }

    fn halt(&mut self) -> ! {
        interrupts::disable();
        hlt_loop()
    }
}

/// Loads `context` and jumps to it through `iretq`.
unsafe fn resume_context(context: &Context) -> ! {
    if context.fp_context.iter().all(|&byte| byte == 0) {
        // never saved
        asm!("fninit", options(nomem, nostack));
    } else {
        asm!("fxrstor64 [{}]", in(reg) context.fp_context.as_ptr(), options(nostack, preserves_flags));
    }

    asm!(
        "push 0",
        "push qword ptr [rdi + {rsp_at}]",
        "push qword ptr [rdi + {rflags_at}]",
        "push {cs}",
        "push qword ptr [rdi + {rip_at}]",
        "mov rax, [rdi + {rax_at}]",
        "mov rbx, [rdi + {rbx_at}]",
        "mov rcx, [rdi + {rcx_at}]",
        "mov rdx, [rdi + {rdx_at}]",
        "mov rsi, [rdi + {rsi_at}]",
        "mov rbp, [rdi + {rbp_at}]",
        "mov r8, [rdi + {r8_at}]",
        "mov r9, [rdi + {r9_at}]",
        "mov r10, [rdi + {r10_at}]",
        "mov r11, [rdi + {r11_at}]",
        "mov r12, [rdi + {r12_at}]",
        "mov r13, [rdi + {r13_at}]",
        "mov r14, [rdi + {r14_at}]",
        "mov r15, [rdi + {r15_at}]",
        "mov rdi, [rdi + {rdi_at}]",
        "iretq",
        in("rdi") context as *const Context,
        cs = in(reg) u64::from(gdt::code_selector().0),
        rsp_at = const offset_of!(Context, rsp),
        rflags_at = const offset_of!(Context, rflags),
        rip_at = const offset_of!(Context, rip),
        rax_at = const offset_of!(Context, rax),
        rbx_at = const offset_of!(Context, rbx),
        rcx_at = const offset_of!(Context, rcx),
        rdx_at = const offset_of!(Context, rdx),
        rsi_at = const offset_of!(Context, rsi),
        rdi_at = const offset_of!(Context, rdi),
        rbp_at = const offset_of!(Context, rbp),
        r8_at = const offset_of!(Context, r8),
        r9_at = const offset_of!(Context, r9),
        r10_at = const offset_of!(Context, r10),
        r11_at = const offset_of!(Context, r11),
        r12_at = const offset_of!(Context, r12),
        r13_at = const offset_of!(Context, r13),
        r14_at = const offset_of!(Context, r14),
        r15_at = const offset_of!(Context, r15),
        options(noreturn),
    )
}

fn interrupted_a_process(rip: u64) -> bool {
    kernel::with_kernel(|kernel| {
        let config = kernel.config();
        (config.lowest_available_physical_memory..config.top_of_available_physical_memory)
            .contains(&rip)
    })
    .unwrap_or(false)
}

#[no_mangle]
extern "C" fn trap_dispatch(vector: u64, frame: *const TrapFrame, fp_area: *const FpArea) {
    let vector = vector as u8;
    // SAFETY: the stub passes the frame and FXSAVE area it just stored.
    let mut platform = unsafe { X86Platform::new(frame, fp_area) };
    if vector == SYSCALL_VECTOR {
        trap::syscall_trap(BSP, &mut platform);
    }
    // SAFETY: as above.
    let rip = unsafe { (*frame).rip };
    trap::interrupt_trap(BSP, vector, interrupted_a_process(rip), &mut platform);
}

#[no_mangle]
extern "C" fn exception_dispatch(vector: u64) -> ! {
    trap::fatal(
        KernelFault::UnhandledException(vector as u8),
        &mut X86Platform::without_frame(),
    )
}
