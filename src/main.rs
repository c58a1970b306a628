#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    extern crate alloc;

    use alloc::boxed::Box;
    use alloc::vec;
    use alloc::vec::Vec;
    use bootloader::{entry_point, BootInfo};
    use core::panic::PanicInfo;

    use kestrel::arch::memory::{arena_window, MappedArena};
    use kestrel::arch::platform::X86Platform;
    use kestrel::arch::vga::VgaConsole;
    use kestrel::elf::{ImageBuilder, PF_R, PF_X};
    use kestrel::kernel::{self, ImageTable};
    use kestrel::trap::{self, Platform};
    use kestrel::{hlt_loop, kprintln, Kernel, KernelConfig, BSP};

    entry_point!(kernel_main);

    /// Prints a greeting, starts image 1 and terminates.
    #[rustfmt::skip]
    const INIT: [u8; 51] = [
        0xb8, 0x01, 0x00, 0x00, 0x00,               // mov eax, 1
        0x48, 0x8d, 0x3d, 0x17, 0x00, 0x00, 0x00,   // lea rdi, [rip + 23]
        0xcd, 0x80,                                 // int 0x80
        0xb8, 0x07, 0x00, 0x00, 0x00,               // mov eax, 7
        0xbf, 0x01, 0x00, 0x00, 0x00,               // mov edi, 1
        0xcd, 0x80,                                 // int 0x80
        0xb8, 0x06, 0x00, 0x00, 0x00,               // mov eax, 6
        0xcd, 0x80,                                 // int 0x80
        0xeb, 0xfe,                                 // jmp $
        b'i', b'n', b'i', b't', b':', b' ', b's', b't', b'a', b'r', b't', b'e', b'd', b'\n', 0,
        0,
    ];

    /// Prints a line and terminates.
    #[rustfmt::skip]
    const WORKER: [u8; 40] = [
        0xb8, 0x01, 0x00, 0x00, 0x00,               // mov eax, 1
        0x48, 0x8d, 0x3d, 0x0b, 0x00, 0x00, 0x00,   // lea rdi, [rip + 11]
        0xcd, 0x80,                                 // int 0x80
        0xb8, 0x06, 0x00, 0x00, 0x00,               // mov eax, 6
        0xcd, 0x80,                                 // int 0x80
        0xeb, 0xfe,                                 // jmp $
        b'w', b'o', b'r', b'k', b'e', b'r', b':', b' ', b'h', b'e', b'l', b'l', b'o', b'\n', 0,
        0, 0,
    ];

    fn image(code: &[u8]) -> &'static [u8] {
        ImageBuilder::new()
            .entry(0)
            .segment(code, code.len() as u64, PF_R | PF_X)
            .build()
            .leak()
    }

    fn images() -> ImageTable {
        let table: Vec<&'static [u8]> = vec![image(&INIT), image(&WORKER)];
        table.leak()
    }

    fn kernel_main(boot_info: &'static BootInfo) -> ! {
        kestrel::arch::init();
        kprintln!("kestrel {}", env!("CARGO_PKG_VERSION"));

        let Some((lowest, top)) = arena_window(boot_info) else {
            kprintln!("no usable memory region");
            hlt_loop();
        };
        kprintln!("[BOOT] Arena {:#x}..{:#x}", lowest, top);

        // SAFETY: the window is the largest usable region, mapped by the
        // bootloader and not used by the kernel image or the heap.
        let arena = unsafe { MappedArena::new(lowest, top) };
        let config = KernelConfig::new(lowest, top);
        let kernel = match Kernel::new(config, images(), Box::new(arena), Box::new(VgaConsole)) {
            Ok(kernel) => kernel,
            Err(error) => {
                kprintln!("bad kernel configuration: {}", error);
                hlt_loop();
            }
        };
        if kernel::install(kernel).is_err() {
            kprintln!("kernel already installed");
            hlt_loop();
        }

        let mut platform = X86Platform::without_frame();
        match kernel::with_kernel(|kernel| kernel.create_process(BSP, 0)) {
            Some(Ok(_)) => {}
            Some(Err(error)) => {
                kprintln!("cannot start init: {}", error);
                platform.halt();
            }
            None => platform.halt(),
        }

        match kernel::with_kernel(|kernel| kernel.active_context(BSP).cloned()).flatten() {
            Some(context) => platform.resume(&context),
            None => trap::idle_until_runnable(BSP, &mut platform),
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        kprintln!("{}", info);
        hlt_loop();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("kestrel boots on bare-metal x86_64; build it with `cargo bootimage`");
}
