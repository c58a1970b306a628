// Interrupt descriptor table, PIC and PIT setup
use lazy_static::lazy_static;
use pic8259::ChainedPics;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::{Entry, InterruptDescriptorTable};
use x86_64::VirtAddr;

use super::gdt;
use super::stubs::{self, *};
use crate::interrupts::{PIC_1_OFFSET, PIC_2_OFFSET, SYSCALL_VECTOR};

/// Timer rate the scheduler divisor counts against.
pub const TIMER_HZ: u32 = 100;

pub static PICS: spin::Mutex<ChainedPics> =
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

fn set_stub<F>(entry: &mut Entry<F>, stub: unsafe extern "C" fn()) {
    // SAFETY: every stub follows the interrupt calling convention.
    unsafe {
        entry.set_handler_addr(VirtAddr::new(stub as usize as u64));
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        set_stub(&mut idt.divide_error, exception_stub_0);
        set_stub(&mut idt.debug, exception_stub_1);
        set_stub(&mut idt.breakpoint, exception_stub_3);
        set_stub(&mut idt.invalid_opcode, exception_stub_6);
        set_stub(&mut idt.device_not_available, exception_stub_7);
        set_stub(&mut idt.invalid_tss, exception_stub_10);
        set_stub(&mut idt.segment_not_present, exception_stub_11);
        set_stub(&mut idt.stack_segment_fault, exception_stub_12);
        set_stub(&mut idt.general_protection_fault, exception_stub_13);
        set_stub(&mut idt.page_fault, exception_stub_14);
        set_stub(&mut idt.x87_floating_point, exception_stub_16);
        set_stub(&mut idt.alignment_check, exception_stub_17);
        set_stub(&mut idt.simd_floating_point, exception_stub_19);

        // SAFETY: the IST indexes name stacks set up in the TSS.
        unsafe {
            idt.double_fault
                .set_handler_addr(VirtAddr::new(exception_stub_8 as usize as u64))
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);

            for (vector, address) in stubs::trap_stubs() {
                let stack = if vector == SYSCALL_VECTOR {
                    gdt::SYSCALL_IST_INDEX
                } else {
                    gdt::INTERRUPT_IST_INDEX
                };
                idt[vector as usize]
                    .set_handler_addr(VirtAddr::new(address))
                    .set_stack_index(stack);
            }
        }
        idt
    };
}

/// Programs channel 0 of the PIT as a rate generator.
fn init_pit(hz: u32) {
    let divisor = (1_193_182 / hz) as u16;
    let mut command = Port::<u8>::new(0x43);
    let mut channel0 = Port::<u8>::new(0x40);
    // SAFETY: standard PIT ports.
    unsafe {
        command.write(0x36);
        channel0.write((divisor & 0xff) as u8);
        channel0.write((divisor >> 8) as u8);
    }
}

pub fn init() {
    IDT.load();
    init_pit(TIMER_HZ);

    let mut master_mask = Port::<u8>::new(0x21);
    let mut slave_mask = Port::<u8>::new(0xa1);
    // SAFETY: remaps the PICs away from the exception vectors, then leaves
    // only the timer line unmasked.
    unsafe {
        PICS.lock().initialize();
        master_mask.write(0xfe);
        slave_mask.write(0xff);
    }
}
