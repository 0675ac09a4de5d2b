//! Low-level context switching primitives using inline assembly.
//!
//! This module provides the two building blocks everything else rests on:
//!
//! - [`Context`]: saved CPU register state for one execution context
//! - [`switch`]: save the current execution into one context, resume
//!   another, and carry one machine word across the switch
//!
//! A context created by [`prepare`] begins life at a trampoline that calls
//! the bound entry function with the bound data pointer and the word passed
//! by the first switch into it. A context that previously suspended inside
//! [`switch`] resumes as if that call had returned, with the carried word
//! as its return value. The word has no meaning here; the two cooperating
//! contexts give it one.
//!
//! Only callee-saved registers are transferred. Everything else is dead at
//! the call boundary under the C ABI, so an ordinary function call is all a
//! switch has to look like.

#[cfg(not(any(all(unix, target_arch = "x86_64"), target_arch = "aarch64")))]
compile_error!("context switching is implemented for x86_64 (System V) and aarch64 only");

use std::arch::naked_asm;

/// Entry function of a fresh context.
///
/// Receives the data pointer bound by [`prepare`] and the word passed by
/// the first [`switch`] into the context. Must never return; the stack
/// below it is the trampoline, not a caller.
pub(crate) type EntryFn = unsafe extern "C" fn(*mut (), usize) -> !;

/// Saved CPU context for context switching
///
/// On x86_64 System V ABI these are the callee-saved registers that must
/// be preserved across function calls, plus the stack pointer.
#[cfg(target_arch = "x86_64")]
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct Context {
    /// Stack pointer
    rsp: u64,
    /// Frame pointer
    rbp: u64,
    /// General purpose (callee-saved)
    rbx: u64,
    /// Data pointer of a fresh context
    r12: u64,
    /// Entry function of a fresh context
    r13: u64,
    r14: u64,
    r15: u64,
}

/// Switch from one context to another
///
/// Saves the current CPU state into `out`, restores state from `in_`, and
/// makes `value` appear in the resumed context: as the return value of the
/// `switch` call it suspended in, or as the second trampoline argument if
/// `in_` is fresh. Returns when some later switch targets `out` again.
///
/// # Safety
///
/// Both pointers must be valid. `in_` must hold either state saved by a
/// previous `switch` or state built by [`prepare`] over a live stack, and
/// no other execution may be using that state.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(out: *mut Context, in_: *const Context, value: usize) -> usize {
    naked_asm!(
        // Save callee-saved registers into the outgoing context (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Load callee-saved registers from the incoming context (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // The carried word: return value for a resumed context, and what
        // the trampoline forwards for a fresh one
        "mov rax, rdx",
        // Fresh context: pops the trampoline address planted by `prepare`.
        // Resumed context: returns to where it called `switch`.
        "ret",
    );
}

/// Trampoline a fresh context starts in.
///
/// The first switch into the context arrives here with the carried word in
/// rax and the values planted by [`prepare`] in r12 (data) and r13 (entry).
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn fiber_start() -> ! {
    naked_asm!(
        "mov rdi, r12",
        "mov rsi, rax",
        "call r13",
        // The entry function never returns
        "ud2",
    );
}

/// Builds a fresh context over `stack_top` that will begin executing
/// `entry(data, value)` when first switched into.
///
/// # Safety
///
/// `stack_top` must be the 16-aligned upper end of a live, exclusively
/// owned stack region large enough for the entry function's frames.
#[cfg(target_arch = "x86_64")]
pub(crate) unsafe fn prepare(stack_top: *mut u8, entry: EntryFn, data: *mut ()) -> Context {
    // Plant the trampoline address where the first switch's `ret` pops it.
    // rsp ends up at `stack_top` inside the trampoline, 16-aligned, which
    // is what the `call` there requires.
    let sp = unsafe { stack_top.sub(8) };
    unsafe { (sp as *mut u64).write(fiber_start as usize as u64) };
    Context {
        rsp: sp as u64,
        r12: data as u64,
        r13: entry as usize as u64,
        ..Context::default()
    }
}

/// Saved CPU context for context switching
///
/// On aarch64 (AAPCS64) these are x19-x28, the frame pointer, the link
/// register, the stack pointer, and the low halves of v8-v15.
#[cfg(target_arch = "aarch64")]
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct Context {
    /// Stack pointer
    sp: u64,
    /// Data pointer of a fresh context
    x19: u64,
    /// Entry function of a fresh context
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    /// Frame pointer
    x29: u64,
    /// Link register; trampoline address in a fresh context
    x30: u64,
    /// d8-d15
    d: [u64; 8],
}

/// Switch from one context to another
///
/// See the x86_64 variant for the contract; the carried word travels in
/// x2 and lands in x0.
///
/// # Safety
///
/// Both pointers must be valid. `in_` must hold either state saved by a
/// previous `switch` or state built by [`prepare`] over a live stack, and
/// no other execution may be using that state.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(out: *mut Context, in_: *const Context, value: usize) -> usize {
    naked_asm!(
        // Save callee-saved state into the outgoing context (x0)
        "mov x9, sp",
        "str x9, [x0, 0x00]",
        "stp x19, x20, [x0, 0x08]",
        "stp x21, x22, [x0, 0x18]",
        "stp x23, x24, [x0, 0x28]",
        "stp x25, x26, [x0, 0x38]",
        "stp x27, x28, [x0, 0x48]",
        "stp x29, x30, [x0, 0x58]",
        "stp d8, d9, [x0, 0x68]",
        "stp d10, d11, [x0, 0x78]",
        "stp d12, d13, [x0, 0x88]",
        "stp d14, d15, [x0, 0x98]",
        // Load callee-saved state from the incoming context (x1)
        "ldr x9, [x1, 0x00]",
        "mov sp, x9",
        "ldp x19, x20, [x1, 0x08]",
        "ldp x21, x22, [x1, 0x18]",
        "ldp x23, x24, [x1, 0x28]",
        "ldp x25, x26, [x1, 0x38]",
        "ldp x27, x28, [x1, 0x48]",
        "ldp x29, x30, [x1, 0x58]",
        "ldp d8, d9, [x1, 0x68]",
        "ldp d10, d11, [x1, 0x78]",
        "ldp d12, d13, [x1, 0x88]",
        "ldp d14, d15, [x1, 0x98]",
        // The carried word
        "mov x0, x2",
        // Fresh context: x30 is the trampoline. Resumed context: x30 is
        // the return path out of `switch`.
        "ret",
    );
}

/// Trampoline a fresh context starts in.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn fiber_start() -> ! {
    naked_asm!(
        "mov x1, x0",
        "mov x0, x19",
        "blr x20",
        // The entry function never returns
        "brk #0",
    );
}

/// Builds a fresh context over `stack_top` that will begin executing
/// `entry(data, value)` when first switched into.
///
/// # Safety
///
/// `stack_top` must be the 16-aligned upper end of a live, exclusively
/// owned stack region large enough for the entry function's frames.
#[cfg(target_arch = "aarch64")]
pub(crate) unsafe fn prepare(stack_top: *mut u8, entry: EntryFn, data: *mut ()) -> Context {
    Context {
        sp: stack_top as u64,
        x19: data as u64,
        x20: entry as usize as u64,
        x30: fiber_start as usize as u64,
        ..Context::default()
    }
}
