//! Interrupt flag control and vector registration.
//!
//! The interrupt-enable flag is saved and restored, never counted. Nesting two
//! disable/restore regions and restoring the inner one first re-enables
//! interrupts early, so every region is strictly non-reentrant.

pub mod idt;
#[cfg(target_os = "none")]
mod pic;

pub use idt::{register_vector, registered_handler};

/// Loads the IDT and silences the legacy PIC. Preemption stays inactive.
pub fn init() {
    idt::init_idt();
    #[cfg(target_os = "none")]
    pic::mask_all();
}

/// Enables interrupts on the current CPU.
pub fn enable() {
    cpu::enable();
}

/// Disables interrupts and returns whether they were enabled before.
pub fn disable() -> bool {
    let previous = cpu::are_enabled();
    cpu::disable();
    previous
}

/// Puts the interrupt flag back to what `disable` returned.
pub fn restore(previous: bool) {
    if previous {
        cpu::enable();
    } else {
        cpu::disable();
    }
}

/// Checks if interrupts are enabled on the current CPU.
pub fn are_enabled() -> bool {
    cpu::are_enabled()
}

/// Executes a closure with interrupts disabled, restoring the previous state after.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = disable();
    let result = f();
    restore(previous);
    result
}

/// Waits for the next interrupt.
pub fn halt() {
    cpu::halt();
}

/// Stops the processor for good.
pub fn halt_forever() -> ! {
    cpu::disable();
    loop {
        cpu::halt();
    }
}

#[cfg(target_os = "none")]
mod cpu {
    use core::arch::asm;

    const EFLAGS_IF: u32 = 1 << 9;

    pub fn are_enabled() -> bool {
        let eflags: u32;
        unsafe {
            asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags));
        }
        eflags & EFLAGS_IF != 0
    }

    pub fn enable() {
        unsafe { asm!("sti", options(nomem, nostack)) };
    }

    pub fn disable() {
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    pub fn halt() {
        unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }
}

// Hosted builds keep the flag in memory. Test threads each get their own
// simulated CPU so parallel tests do not observe each other's flag.
#[cfg(all(not(target_os = "none"), test))]
mod cpu {
    use core::cell::Cell;

    std::thread_local! {
        static ENABLED: Cell<bool> = const { Cell::new(false) };
    }

    pub fn are_enabled() -> bool {
        ENABLED.with(|flag| flag.get())
    }

    pub fn enable() {
        ENABLED.with(|flag| flag.set(true));
    }

    pub fn disable() {
        ENABLED.with(|flag| flag.set(false));
    }

    pub fn halt() {
        core::hint::spin_loop();
    }
}

#[cfg(all(not(target_os = "none"), not(test)))]
mod cpu {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(false);

    pub fn are_enabled() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }

    pub fn enable() {
        ENABLED.store(true, Ordering::SeqCst);
    }

    pub fn disable() {
        ENABLED.store(false, Ordering::SeqCst);
    }

    pub fn halt() {
        core::hint::spin_loop();
    }
}
