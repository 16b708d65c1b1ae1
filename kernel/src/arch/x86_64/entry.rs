//! Trap entry and exit.
//!
//! There is one 16-byte stub per vector. Each stub makes the stack look the
//! same whatever the vector: it pushes a dummy error code when the CPU did
//! not push one, then the vector number, then jumps to `alltraps`, which
//! reserves the segment slots, saves the general registers and hands the
//! finished [`TrapFrame`] to Rust.
//!
//! `trap_return` is the single way back to the interrupted context. It is
//! also where a freshly created process "returns" to on its first run.
//!
//! GS base holds the core's `CoreLocal` only while in the kernel. Entry from
//! ring 3 and exit to ring 3 each `swapgs`, so whatever user code does to
//! GS never reaches `cpu_id`.

use core::arch::global_asm;

use crate::arch::{CS_AT_ENTRY, CS_AT_RETURN, TrapFrame};

const STUB_SIZE: usize = 16;

global_asm!(
    r#"
    .section .text
    .p2align 4
    .global cinder_trap_vectors
cinder_trap_vectors:
    .set cinder_vec, 0
    .rept 256
    .p2align 4
    .if (cinder_vec == 8) || ((cinder_vec >= 10) && (cinder_vec <= 14)) || (cinder_vec == 17) || (cinder_vec == 21) || (cinder_vec == 29) || (cinder_vec == 30)
    .else
    pushq $0
    .endif
    pushq $cinder_vec
    jmp cinder_alltraps
    .set cinder_vec, cinder_vec + 1
    .endr

cinder_alltraps:
    testb $3, {cs_entry}(%rsp)
    jz 2f
    swapgs
2:
    subq $32, %rsp
    pushq %rax
    pushq %rcx
    pushq %rdx
    pushq %rbx
    pushq %rbp
    pushq %rsi
    pushq %rdi
    pushq %r8
    pushq %r9
    pushq %r10
    pushq %r11
    pushq %r12
    pushq %r13
    pushq %r14
    pushq %r15
    movq %ds, %rax
    movq %rax, 144(%rsp)
    movq %es, %rax
    movq %rax, 136(%rsp)
    movq %fs, %rax
    movq %rax, 128(%rsp)
    movq %gs, %rax
    movq %rax, 120(%rsp)
    movq %rsp, %rdi
    call cinder_trap_entry

    .global cinder_trap_return
cinder_trap_return:
    popq %r15
    popq %r14
    popq %r13
    popq %r12
    popq %r11
    popq %r10
    popq %r9
    popq %r8
    popq %rdi
    popq %rsi
    popq %rbp
    popq %rbx
    popq %rdx
    popq %rcx
    popq %rax
    testb $3, {cs_return}(%rsp)
    jz 3f
    swapgs
3:
    addq $48, %rsp
    iretq
"#,
    cs_entry = const CS_AT_ENTRY,
    cs_return = const CS_AT_RETURN,
    options(att_syntax)
);

unsafe extern "C" {
    static cinder_trap_vectors: u8;
}

/// Address of the stub for `vector`.
pub fn stub_address(vector: usize) -> u64 {
    let base = unsafe { &raw const cinder_trap_vectors } as u64;
    base + (vector * STUB_SIZE) as u64
}

#[unsafe(no_mangle)]
extern "C" fn cinder_trap_entry(tf: *mut TrapFrame) {
    // The stub hands us the frame it just built on this stack.
    let tf = unsafe { &mut *tf };
    crate::global().handle_trap(tf);
}
