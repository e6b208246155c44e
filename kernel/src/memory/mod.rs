pub mod addr;
pub mod boot_frame_allocator;
pub mod frame_allocator;
pub mod heap;
pub mod paging;
pub mod tlb;

use core::fmt;

use addr::{PhysAddr, VirtAddr};
use boot_frame_allocator::BootFrameAllocator;
use frame_allocator::{with_frame_allocator, FrameAllocator, FRAME_ALLOCATOR};
use heap::HeapError;
use log::info;
use paging::{FrameAccess, IdentityAccess, KernelLayout, Vmm, VmmError};
use spin::{Mutex, Once};

use crate::constants::memory::{FRAME_SIZE, HEAP_SIZE, IDENTITY_LIMIT};

/// The kernel address space, set once by [`init`].
pub static KERNEL_VMM: Once<Mutex<Vmm<IdentityAccess>>> = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    Vmm(VmmError),
    Heap(HeapError),
    AlreadyInitialized,
}

impl From<VmmError> for MemoryError {
    fn from(err: VmmError) -> Self {
        MemoryError::Vmm(err)
    }
}

impl From<HeapError> for MemoryError {
    fn from(err: HeapError) -> Self {
        MemoryError::Heap(err)
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Vmm(err) => write!(f, "Paging: {}", err),
            MemoryError::Heap(err) => write!(f, "Heap: {}", err),
            MemoryError::AlreadyInitialized => write!(f, "Memory is already initialized"),
        }
    }
}

/// Brings up paging and the kernel heap.
///
/// Frames come from the memory between the end of the kernel image and the
/// top of the identity window.
pub fn init(layout: KernelLayout) -> Result<(), MemoryError> {
    if KERNEL_VMM.is_completed() {
        return Err(MemoryError::AlreadyInitialized);
    }

    *FRAME_ALLOCATOR.lock() = Some(BootFrameAllocator::new(
        layout.phys_end(),
        PhysAddr::new(IDENTITY_LIMIT),
    ));

    let heap_start = with_frame_allocator(|frames| -> Result<VirtAddr, MemoryError> {
        let (vmm, heap_start) = build_address_space(frames, layout, IdentityAccess)?;
        KERNEL_VMM.call_once(|| Mutex::new(vmm));
        info!(
            "Frame allocator: {} frames used, {} left",
            frames.allocated_count(),
            frames.remaining()
        );
        Ok(heap_start)
    })?;

    heap::init_heap(heap_start, HEAP_SIZE)?;
    Ok(())
}

/// Builds and activates the kernel address space, then maps the heap window
/// on the first page past the image. Returns the address space and the heap's
/// first address.
pub fn build_address_space<A: FrameAccess>(
    frames: &mut impl FrameAllocator,
    layout: KernelLayout,
    access: A,
) -> Result<(Vmm<A>, VirtAddr), MemoryError> {
    let mut vmm = Vmm::initialize(frames, layout, access)?;
    let heap_start = vmm.allocate_pages(frames, layout.virt_end(), HEAP_SIZE / FRAME_SIZE)?;
    Ok((vmm, heap_start))
}

/// Runs `f` against the kernel address space.
pub fn with_vmm<F, R>(f: F) -> R
where
    F: FnOnce(&mut Vmm<IdentityAccess>) -> R,
{
    let vmm = KERNEL_VMM.get().expect("Kernel address space does not exist.");
    f(&mut vmm.lock())
}

/// Layout of the running image, taken from the linker script.
#[cfg(target_os = "none")]
pub fn kernel_layout() -> KernelLayout {
    extern "C" {
        static _kernel_start: u8;
        static _kernel_end: u8;
    }

    let (start, end) = unsafe {
        (
            core::ptr::addr_of!(_kernel_start) as usize as u32,
            core::ptr::addr_of!(_kernel_end) as usize as u32,
        )
    };
    KernelLayout {
        virt_base: VirtAddr::new(crate::constants::memory::KERNEL_VIRT_BASE),
        phys_base: PhysAddr::new(start),
        image_len: end - start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::memory::PAGE_SIZE,
        memory::{
            addr::PhysFrame,
            heap::KernelHeap,
            paging::tests::{layout, FrameArena},
        },
    };

    const HEAP_PAGES: usize = HEAP_SIZE / FRAME_SIZE;

    #[test]
    fn test_heap_window_follows_image() {
        let mut arena = FrameArena::new(3 + HEAP_PAGES);
        let access = arena.access();
        let (vmm, heap_start) =
            build_address_space(&mut arena, layout(), access).expect("address space");

        assert_eq!(heap_start, layout().virt_end());
        for page in 0..HEAP_PAGES {
            let addr = heap_start.checked_add_pages(page).expect("inside window");
            assert!(vmm.translate(addr).is_some(), "{:?} is not mapped", addr);
        }
        let past = heap_start.checked_add_pages(HEAP_PAGES).expect("inside window");
        assert!(vmm.translate(past).is_none());
    }

    #[test]
    fn test_heap_runs_in_mapped_memory() {
        let mut arena = FrameArena::new(3 + HEAP_PAGES);
        let access = arena.access();
        let lookup = arena.access();
        let (vmm, heap_start) =
            build_address_space(&mut arena, layout(), access).expect("address space");

        // the arena hands out frames in order, so the heap is contiguous behind its first frame
        let phys = vmm.translate(heap_start).expect("heap mapped");
        let frame = PhysFrame::from_start_address(phys).expect("page aligned");
        let base = lookup.frame_ptr(frame) as *mut u8;
        let region = unsafe { heap::BreakRegion::new(base, HEAP_SIZE) };
        let mut kernel_heap = KernelHeap::new(region);

        let first = kernel_heap.allocate(PAGE_SIZE as usize).expect("allocation");
        let second = kernel_heap.allocate_aligned(64).expect("aligned allocation");
        assert!(second.as_ptr() > first.as_ptr());
        assert!(kernel_heap.stats().remaining < HEAP_SIZE);
    }

    #[test]
    fn test_too_few_frames_for_heap() {
        let mut arena = FrameArena::new(3 + 10);
        let access = arena.access();
        let err = build_address_space(&mut arena, layout(), access).err();
        assert_eq!(
            err,
            Some(MemoryError::Vmm(VmmError::FrameExhausted { mapped: 10 }))
        );
    }
}
