//! IA-32 context switch, callee-saved style.
//!
//! [`context_switch`] pushes the cdecl callee-saved registers and EFLAGS
//! onto the current stack, publishes ESP through the caller's slot, then
//! adopts the target stack and jumps to the target EIP. A process that was
//! suspended here has its saved EIP pointing at [`context_switch_resume`],
//! which unwinds the pushes and returns into the scheduler as if
//! `context_switch` had returned normally. A brand-new process has its
//! saved EIP pointing at its entry function and its stack topped with the
//! exit trampoline's return address, so a plain `ret` from the entry lands
//! in the trampoline.

use core::arch::naked_asm;

/// Switch stacks.
///
/// # Safety
///
/// Must be called with interrupts disabled. `old_esp_slot` must point at
/// the saved-ESP field of the outgoing PCB; `new_esp`/`new_eip` must come
/// from a PCB whose stack is live and whose saved EIP is either an entry
/// function or [`context_switch_resume`].
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn context_switch(old_esp_slot: *mut u32, new_esp: u32, new_eip: u32) {
    naked_asm!(
        // Callee-saved registers plus flags; everything else is dead across
        // a cdecl call boundary.
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "pushfd",
        // Five pushes above the return address: args start at esp+24.
        "mov eax, [esp + 24]",
        "mov [eax], esp",
        "mov ecx, [esp + 28]",
        "mov edx, [esp + 32]",
        "mov esp, ecx",
        // The switched-to process runs with interrupts on.
        "sti",
        "jmp edx",
    );
}

/// Resume point for a previously suspended process.
///
/// # Safety
///
/// Only reachable as a jump target from [`context_switch`], with ESP
/// pointing at a frame that function saved.
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn context_switch_resume() {
    naked_asm!("popfd", "pop edi", "pop esi", "pop ebx", "pop ebp", "ret",);
}
