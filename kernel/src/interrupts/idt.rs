//! Interrupt Descriptor Table
//!
//! This module provides:
//! - a 256-gate protected-mode IDT and its `lidt` loading
//! - `register_vector` for components that own a vector (paging owns #PF)
//! - breakpoint and double fault handlers
//!
//! Hosted builds keep the same table of handler addresses in memory so that
//! vector ownership can be checked without a CPU to load it into.

use spin::Mutex;

use crate::constants::idt::IDT_ENTRIES;

static HANDLERS: Mutex<[usize; IDT_ENTRIES]> = Mutex::new([0; IDT_ENTRIES]);

/// Returns the handler address installed for `vector`, if any.
pub fn registered_handler(vector: u8) -> Option<usize> {
    match HANDLERS.lock()[vector as usize] {
        0 => None,
        handler => Some(handler),
    }
}

#[cfg(not(target_os = "none"))]
pub fn init_idt() {}

/// Installs `handler` as the interrupt gate for `vector`.
#[cfg(not(target_os = "none"))]
pub fn register_vector(vector: u8, handler: usize) {
    HANDLERS.lock()[vector as usize] = handler;
}

/// Address registered for the page fault vector.
#[cfg(not(target_os = "none"))]
pub fn page_fault_entry() -> usize {
    crate::memory::paging::handle_page_fault as usize
}

#[cfg(target_os = "none")]
pub use hw::{init_idt, page_fault_entry, register_vector};

#[cfg(target_os = "none")]
mod hw {
    use core::arch::asm;

    use lazy_static::lazy_static;
    use spin::Mutex;

    use super::HANDLERS;
    use crate::{
        constants::idt::{BREAKPOINT_VECTOR, DOUBLE_FAULT_VECTOR, IDT_ENTRIES, INTERRUPT_GATE},
        memory::paging::handle_page_fault,
        serial_println,
    };

    #[derive(Clone, Copy)]
    #[repr(C, packed)]
    struct GateDescriptor {
        offset_low: u16,
        selector: u16,
        zero: u8,
        type_attr: u8,
        offset_high: u16,
    }

    impl GateDescriptor {
        const fn missing() -> Self {
            Self {
                offset_low: 0,
                selector: 0,
                zero: 0,
                type_attr: 0,
                offset_high: 0,
            }
        }

        fn interrupt_gate(handler: usize, selector: u16) -> Self {
            Self {
                offset_low: handler as u16,
                selector,
                zero: 0,
                type_attr: INTERRUPT_GATE,
                offset_high: (handler >> 16) as u16,
            }
        }
    }

    #[repr(C, align(8))]
    struct InterruptDescriptorTable([GateDescriptor; IDT_ENTRIES]);

    #[repr(C, packed)]
    struct DescriptorTablePointer {
        limit: u16,
        base: u32,
    }

    /// What the CPU pushes on an interrupt taken without a privilege change.
    #[derive(Debug, Clone, Copy)]
    #[repr(C)]
    pub struct InterruptStackFrame {
        pub eip: u32,
        pub cs: u32,
        pub eflags: u32,
    }

    lazy_static! {
        /// The system's Interrupt Descriptor Table.
        /// Starts with handlers for breakpoint and double fault; paging adds
        /// the page fault gate during its initialization.
        static ref IDT: Mutex<InterruptDescriptorTable> = {
            let mut idt = InterruptDescriptorTable([GateDescriptor::missing(); IDT_ENTRIES]);
            let selector = code_selector();
            idt.0[BREAKPOINT_VECTOR as usize] =
                GateDescriptor::interrupt_gate(breakpoint_handler as usize, selector);
            idt.0[DOUBLE_FAULT_VECTOR as usize] =
                GateDescriptor::interrupt_gate(double_fault_handler as usize, selector);
            Mutex::new(idt)
        };
    }

    pub fn init_idt() {
        let idt = IDT.lock();
        let pointer = DescriptorTablePointer {
            limit: (core::mem::size_of::<InterruptDescriptorTable>() - 1) as u16,
            base: idt.0.as_ptr() as u32,
        };
        // The table lives in a static, so the loaded base outlives the guard.
        unsafe {
            asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        }
        let mut handlers = HANDLERS.lock();
        handlers[BREAKPOINT_VECTOR as usize] = breakpoint_handler as usize;
        handlers[DOUBLE_FAULT_VECTOR as usize] = double_fault_handler as usize;
    }

    pub fn register_vector(vector: u8, handler: usize) {
        IDT.lock().0[vector as usize] = GateDescriptor::interrupt_gate(handler, code_selector());
        HANDLERS.lock()[vector as usize] = handler;
    }

    pub fn page_fault_entry() -> usize {
        page_fault_handler as usize
    }

    fn code_selector() -> u16 {
        let selector: u16;
        unsafe {
            asm!("mov {0:x}, cs", out(reg) selector, options(nomem, nostack, preserves_flags));
        }
        selector
    }

    fn read_cr2() -> u32 {
        let address: u32;
        unsafe {
            asm!("mov {}, cr2", out(reg) address, options(nomem, nostack, preserves_flags));
        }
        address
    }

    /// Handles breakpoint exceptions by printing debug information.
    extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
        serial_println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
    }

    /// Handles double fault exceptions by panicking with debug information.
    extern "x86-interrupt" fn double_fault_handler(
        stack_frame: InterruptStackFrame,
        _error_code: u32,
    ) -> ! {
        panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
    }

    extern "x86-interrupt" fn page_fault_handler(stack_frame: InterruptStackFrame, error_code: u32) {
        handle_page_fault(read_cr2(), error_code, stack_frame.eip);
    }
}
