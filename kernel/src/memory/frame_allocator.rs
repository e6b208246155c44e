use spin::Mutex;

use crate::memory::{addr::PhysFrame, boot_frame_allocator::BootFrameAllocator};

/// Source of physical frames. There is no release path.
pub trait FrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame>;
}

/// Global frame allocator that makes it so we just have one actual allocator throughout codebase
pub static FRAME_ALLOCATOR: Mutex<Option<BootFrameAllocator>> = Mutex::new(None);

/// Exposed function to allocate a frame from the global allocator
pub fn alloc_frame() -> Option<PhysFrame> {
    with_frame_allocator(|allocator| allocator.allocate_frame())
}

pub fn with_frame_allocator<F, R>(f: F) -> R
where
    F: FnOnce(&mut BootFrameAllocator) -> R,
{
    let mut guard = FRAME_ALLOCATOR.lock();
    if let Some(ref mut allocator) = *guard {
        f(allocator)
    } else {
        panic!("Frame allocator does not exist.");
    }
}
