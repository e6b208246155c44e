#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]
#![cfg_attr(feature = "strict", deny(warnings))]
extern crate alloc;

pub mod constants;
pub mod devices;
pub mod init;
pub mod interrupts;
pub mod logging;
pub mod memory;
pub mod processes;

pub use devices::serial;

pub mod prelude {
    pub use crate::debug_print;
    pub use crate::debug_println;
    pub use crate::serial_print;
    pub use crate::serial_println;
}

#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {
        #[cfg(debug_assertions)]
        $crate::serial_print!($($arg)*);
    }
}

#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        #[cfg(debug_assertions)]
        $crate::serial_println!($($arg)*);
    }
}

#[cfg(test)]
mod tests {
    use core::alloc::{GlobalAlloc, Layout};
    use spin::Mutex;

    use crate::{
        constants::{
            memory::{ENTRIES_PER_TABLE, FRAME_SIZE, HEAP_SIZE, RECURSIVE_INDEX},
            processes::{IDLE_PRIORITY, STACK_SIZE},
        },
        memory::{
            addr::{PhysFrame, VirtAddr},
            build_address_space,
            heap::LockedHeap,
            paging::{
                active_directory,
                tests::{layout, FrameArena},
                FrameAccess,
            },
        },
        processes::{
            context::ContextSwitch,
            init_on,
            process::{tests::parked, Pid, ProcessState},
            scheduler::{dispatch_on, start_on},
        },
    };

    struct NoSwitch;

    impl ContextSwitch for NoSwitch {
        unsafe fn switch(&mut self, _save: *mut usize, _load: *const usize) {}
    }

    #[test]
    fn test_boot_scenario() {
        // paging
        let mut arena = FrameArena::new(3 + HEAP_SIZE / FRAME_SIZE);
        let access = arena.access();
        let lookup = arena.access();
        let (vmm, heap_start) =
            build_address_space(&mut arena, layout(), access).expect("address space");

        assert_eq!(active_directory(), vmm.directory_frame().start_address());
        let directory = vmm.directory();
        assert!(directory[0].present());
        assert!(directory[layout().directory_index()].present());
        assert_eq!(directory[RECURSIVE_INDEX].mapped_frame(), Some(vmm.directory_frame()));
        for page in 0..ENTRIES_PER_TABLE {
            let addr = VirtAddr::new((page * FRAME_SIZE) as u32);
            assert_eq!(vmm.translate(addr).map(|phys| phys.as_u32()), Some(addr.as_u32()));
        }

        // a 1 MiB heap in the mapped window
        let phys = vmm.translate(heap_start).expect("heap mapped");
        let base = lookup.frame_ptr(PhysFrame::from_start_address(phys).expect("aligned")) as *mut u8;
        let heap = LockedHeap::empty();
        unsafe { heap.init(base, HEAP_SIZE) }.expect("heap init");

        // A hosted build keeps the host's global allocator, so the PCBs below
        // come from it. A process stack drawn through the kernel heap's
        // allocator interface shows where they land on hardware.
        let stack_layout = Layout::from_size_align(STACK_SIZE, 16).expect("stack layout");
        let stack = unsafe { heap.alloc(stack_layout) };
        assert!(!stack.is_null());
        let offset = stack as usize - base as usize;
        assert!(offset + STACK_SIZE <= HEAP_SIZE);
        unsafe { heap.dealloc(stack, stack_layout) };
        assert_eq!(heap.stats().map(|stats| stats.free_blocks), Some(1));

        // idle and worker take turns
        let scheduler = Mutex::new(None);
        init_on(&scheduler, parked).expect("processes");
        {
            let guard = scheduler.lock();
            let table = guard.as_ref().expect("scheduler").table();
            assert_eq!(table.get(Pid::IDLE).map(|pcb| pcb.priority()), Some(IDLE_PRIORITY));
            assert_eq!(table.get(Pid::new(1)).map(|pcb| pcb.priority()), Some(0));
        }

        let mut order = vec![start_on(&scheduler, &mut NoSwitch).expect("start").expect("switch")];
        for _ in 0..5 {
            order.extend(dispatch_on(&scheduler, &mut NoSwitch));
            let guard = scheduler.lock();
            let table = guard.as_ref().expect("scheduler").table();
            assert_eq!(table.count_in(ProcessState::Running), 1);
        }
        let order: Vec<u16> = order.into_iter().map(Pid::as_u16).collect();
        assert_eq!(order, vec![0, 1, 0, 1, 0, 1]);
    }
}
