// Assembly entry points for traps
//
// `trap_stub_N` saves the fifteen general purpose registers in `TrapFrame`
// order and the FPU state in a 16-byte aligned FXSAVE area below them, then
// calls `trap_dispatch(N, frame, fp_area)`. If the dispatcher comes back both
// are restored and the stub returns through `iretq`. `exception_stub_N` never
// returns.
use core::arch::global_asm;

/// Vectors with a `trap_stub`, in `TRAP_STUBS` order.
pub const TRAP_VECTORS: [u8; 33] = [
    32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 128, 240, 241, 242, 243, 244,
    245, 246, 247, 248, 249, 250, 251, 252, 253, 254, 255,
];

global_asm!(
    r#"
    .macro trap_stub vector
    .section .text
    .global trap_stub_\vector
    .type trap_stub_\vector, @function
trap_stub_\vector:
    push rax
    push rcx
    push rdx
    push rbx
    push rbp
    push rsi
    push rdi
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15
    mov rbx, rsp
    and rsp, -16
    sub rsp, 512
    fxsave64 [rsp]
    mov edi, \vector
    mov rsi, rbx
    mov rdx, rsp
    call trap_dispatch
    fxrstor64 [rsp]
    mov rsp, rbx
    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rdi
    pop rsi
    pop rbp
    pop rbx
    pop rdx
    pop rcx
    pop rax
    iretq
    .endm

    .irp vector, 32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,128,240,241,242,243,244,245,246,247,248,249,250,251,252,253,254,255
    trap_stub \vector
    .endr

    .section .rodata
    .balign 8
    .global trap_stub_table
trap_stub_table:
    .irp vector, 32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,128,240,241,242,243,244,245,246,247,248,249,250,251,252,253,254,255
    .quad trap_stub_\vector
    .endr

    .macro exception_stub vector
    .section .text
    .global exception_stub_\vector
    .type exception_stub_\vector, @function
exception_stub_\vector:
    cli
    mov edi, \vector
    and rsp, -16
    call exception_dispatch
    ud2
    .endm

    .irp vector, 0,1,3,6,7,8,10,11,12,13,14,16,17,19
    exception_stub \vector
    .endr

    .section .text
"#
);

extern "C" {
    static trap_stub_table: [u64; 33];

    pub fn exception_stub_0();
    pub fn exception_stub_1();
    pub fn exception_stub_3();
    pub fn exception_stub_6();
    pub fn exception_stub_7();
    pub fn exception_stub_8();
    pub fn exception_stub_10();
    pub fn exception_stub_11();
    pub fn exception_stub_12();
    pub fn exception_stub_13();
    pub fn exception_stub_14();
    pub fn exception_stub_16();
    pub fn exception_stub_17();
    pub fn exception_stub_19();
}

/// `(vector, stub address)` for every trap stub.
pub fn trap_stubs() -> impl Iterator<Item = (u8, u64)> {
    // SAFETY: the table is emitted above and never written.
    let table = unsafe { &*core::ptr::addr_of!(trap_stub_table) };
    TRAP_VECTORS.iter().copied().zip(table.iter().copied())
}
