// x86_64 bare-metal glue
//
// Processes run at kernel privilege straight out of the arena, which the
// bootloader maps at its physical memory offset. Every trap switches to an
// IST stack, so a process never needs a stack of its own.
use alloc::boxed::Box;

use crate::console::{self, Console};

pub mod gdt;
pub mod heap;
pub mod idt;
pub mod memory;
pub mod platform;
pub mod serial;
mod stubs;
pub mod vga;

/// Diagnostic output goes to both COM1 and the screen.
pub struct DiagnosticConsole;

impl Console for DiagnosticConsole {
    fn write_byte(&mut self, byte: u8) {
        serial::SerialConsole.write_byte(byte);
        vga::VgaConsole.write_byte(byte);
    }
}

/// Brings up the BSP. Interrupts stay disabled until the first resume.
pub fn init() {
    x86_64::instructions::interrupts::disable();
    gdt::init();
    idt::init();
    heap::init();
    console::install(Box::new(DiagnosticConsole));
}
