use core::ptr::addr_of;

use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
pub const INTERRUPT_IST_INDEX: u16 = 1;
pub const SYSCALL_IST_INDEX: u16 = 2;

const STACK_SIZE: usize = 4096 * 5;

#[repr(align(16))]
struct Stack([u8; STACK_SIZE]);

static mut DOUBLE_FAULT_STACK: Stack = Stack([0; STACK_SIZE]);
static mut INTERRUPT_STACK: Stack = Stack([0; STACK_SIZE]);
static mut SYSCALL_STACK: Stack = Stack([0; STACK_SIZE]);

fn stack_top(stack: *const Stack) -> VirtAddr {
    VirtAddr::from_ptr(stack) + STACK_SIZE as u64
}

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        // SAFETY: only the address of each stack is taken; the CPU is the
        // only writer.
        unsafe {
            tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
                stack_top(addr_of!(DOUBLE_FAULT_STACK));
            tss.interrupt_stack_table[INTERRUPT_IST_INDEX as usize] =
                stack_top(addr_of!(INTERRUPT_STACK));
            tss.interrupt_stack_table[SYSCALL_IST_INDEX as usize] =
                stack_top(addr_of!(SYSCALL_STACK));
        }
        tss
    };
}

struct Selectors {
    code: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code = gdt.add_entry(Descriptor::kernel_code_segment());
        let tss = gdt.add_entry(Descriptor::tss_segment(&TSS));
        (gdt, Selectors { code, tss })
    };
}

pub fn init() {
    GDT.0.load();
    // SAFETY: the selectors index the table that was just loaded.
    unsafe {
        CS::set_reg(GDT.1.code);
        load_tss(GDT.1.tss);
    }
}

/// Code selector processes resume with.
pub fn code_selector() -> SegmentSelector {
    GDT.1.code
}
