use core::mem;

use crate::processes::{context, process::ProcessEntry};

/// The register image a fresh stack is seeded with, lowest address first.
///
/// The context switch pops the four callee-saved registers and returns, so
/// the first switch into a new process lands in the entry trampoline with
/// `ebx` holding the entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct InitialFrame {
    pub edi: usize,
    pub esi: usize,
    pub ebx: usize,
    pub ebp: usize,
    pub eip: usize,
}

impl InitialFrame {
    pub fn new(entry: ProcessEntry) -> Self {
        InitialFrame {
            edi: 0,
            esi: 0,
            ebx: entry as usize,
            // terminates frame-pointer walks
            ebp: 0,
            eip: context::trampoline_address(),
        }
    }

    /// Writes the frame just below the 16-byte aligned top of `stack` and
    /// returns the stack pointer a switch should load.
    pub fn install(self, stack: &mut [u8]) -> usize {
        let base = stack.as_mut_ptr() as usize;
        let top = (base + stack.len()) & !0xF;
        let stack_pointer = top - mem::size_of::<Self>();
        assert!(stack_pointer >= base, "stack too small for the initial frame");

        // In bounds and word aligned per the computation above.
        unsafe { (stack_pointer as *mut Self).write(self) };
        stack_pointer
    }

    /// # Safety
    ///
    /// `stack_pointer` must point at a frame written by [`InitialFrame::install`].
    pub unsafe fn read(stack_pointer: usize) -> Self {
        (stack_pointer as *const Self).read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processes::process::tests::parked;

    #[repr(C, align(16))]
    struct Stack([u8; 256]);

    #[test]
    fn test_frame_sits_below_aligned_top() {
        let mut stack = Stack([0; 256]);
        let top = stack.0.as_ptr() as usize + stack.0.len();

        let sp = InitialFrame::new(parked).install(&mut stack.0);
        assert_eq!(sp, top - mem::size_of::<InitialFrame>());

        let frame = unsafe { InitialFrame::read(sp) };
        assert_eq!(frame.ebx, parked as usize);
        assert_eq!(frame.ebp, 0);
        assert_eq!(frame.eip, context::trampoline_address());
    }

    #[test]
    fn test_unaligned_top_is_rounded_down() {
        let mut stack = Stack([0; 256]);
        let sp = InitialFrame::new(parked).install(&mut stack.0[..250]);
        assert_eq!((sp + mem::size_of::<InitialFrame>()) % 16, 0);
    }
}
