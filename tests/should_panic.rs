use std::panic;
use std::process;

use kestrel::console::{self, BufferConsole, NullConsole};
use kestrel::elf::{ImageBuilder, PF_R, PF_X};
use kestrel::kernel;
use kestrel::memory::BufferMemory;
use kestrel::trap::{self, testing::RecordingPlatform};
use kestrel::{Kernel, KernelConfig, BSP};

const ARENA: u64 = 0x10_0000;
const ARENA_LEN: usize = 0x1_0000;

fn main() {
    let log = BufferConsole::new();
    console::install(Box::new(log.clone()));

    panic::set_hook(Box::new(move |info| {
        let halted = info.payload().downcast_ref::<&str>() == Some(&"halted");
        let logged = String::from_utf8_lossy(&log.contents()).contains("kernel panic: unknown syscall 42");
        if halted && logged {
            println!("should_panic::unknown_syscall_halts...\t[ok]");
            process::exit(0);
        }
        println!("should_panic::unknown_syscall_halts...\t[failed]");
        println!("{}", info);
        process::exit(1);
    }));

    let image: &'static [u8] = ImageBuilder::new()
        .segment(&[0xcd, 0x80], 16, PF_R | PF_X)
        .build()
        .leak();
    let images: &'static [&'static [u8]] = vec![image].leak();
    let kernel = Kernel::new(
        KernelConfig::new(ARENA, ARENA + ARENA_LEN as u64),
        images,
        Box::new(BufferMemory::new(ARENA, ARENA_LEN)),
        Box::new(NullConsole),
    )
    .unwrap();
    kernel::install(kernel).unwrap();
    kernel::with_kernel(|kernel| kernel.create_process(BSP, 0).unwrap());

    trap::syscall_trap(BSP, &mut RecordingPlatform::with_registers(42, 0));
}
