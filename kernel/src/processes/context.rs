//! The context switch primitive.
//!
//! A switch saves the callee-saved registers and the return address of the
//! outgoing process on its own stack, records that stack pointer in the save
//! slot, loads the incoming stack pointer from the load slot and restores in
//! reverse. The scheduler only relies on this contract.

/// Anything able to move the CPU from one saved stack to another.
pub trait ContextSwitch {
    /// # Safety
    ///
    /// `save` must be valid for writes and `load` must hold a stack pointer
    /// produced by an earlier switch or by `InitialFrame::install`.
    unsafe fn switch(&mut self, save: *mut usize, load: *const usize);
}

#[cfg(target_os = "none")]
mod hw {
    use core::arch::global_asm;

    // cdecl: [esp + 4] = save slot, [esp + 8] = load slot
    global_asm!(
        ".global ctxsw",
        "ctxsw:",
        "    mov eax, [esp + 4]",
        "    mov edx, [esp + 8]",
        "    push ebp",
        "    push ebx",
        "    push esi",
        "    push edi",
        "    mov [eax], esp",
        "    mov esp, [edx]",
        "    pop edi",
        "    pop esi",
        "    pop ebx",
        "    pop ebp",
        "    ret",
        "",
        ".global process_trampoline",
        "process_trampoline:",
        "    sti",
        "    call ebx",
        "2:  hlt",
        "    jmp 2b",
    );

    extern "C" {
        pub fn ctxsw(save: *mut usize, load: *const usize);
        pub fn process_trampoline() -> !;
    }
}

/// Switches stacks on the CPU.
#[derive(Debug, Default)]
pub struct StackSwitch;

#[cfg(target_os = "none")]
impl ContextSwitch for StackSwitch {
    unsafe fn switch(&mut self, save: *mut usize, load: *const usize) {
        hw::ctxsw(save, load);
    }
}

/// Hosted builds have no second stack to run; the switch is only counted.
#[cfg(not(target_os = "none"))]
impl ContextSwitch for StackSwitch {
    unsafe fn switch(&mut self, _save: *mut usize, _load: *const usize) {
        use core::sync::atomic::Ordering;
        HOSTED_SWITCHES.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(not(target_os = "none"))]
pub static HOSTED_SWITCHES: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

/// Return address seeded into every fresh stack. It enables interrupts and
/// calls the entry point held in `ebx`.
#[cfg(target_os = "none")]
pub fn trampoline_address() -> usize {
    hw::process_trampoline as usize
}

#[cfg(not(target_os = "none"))]
pub fn trampoline_address() -> usize {
    hosted_trampoline as usize
}

#[cfg(not(target_os = "none"))]
extern "C" fn hosted_trampoline() -> ! {
    crate::interrupts::halt_forever()
}
