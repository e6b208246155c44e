//! Boot Frame Allocator
//!
//! - Hands out frames in address order from the memory after the kernel image
//! - Never crosses the identity-mapped window, so every frame it returns can
//!   still be edited through the identity map once paging is active

use crate::{
    constants::memory::PAGE_SIZE,
    memory::{
        addr::{PhysAddr, PhysFrame},
        frame_allocator::FrameAllocator,
    },
};

/// Bump allocator over the physical range `[next, end)`
///
/// * `next`: the next frame to hand out
/// * `end`: first address past the usable range
/// * `allocated_count`: the number of frames handed out so far
#[derive(Debug)]
pub struct BootFrameAllocator {
    next: u32,
    end: u32,
    allocated_count: usize,
}

impl BootFrameAllocator {
    /// Creates an allocator over `[start, end)`; `start` is rounded up to a
    /// page boundary and `end` down to one.
    pub fn new(start: PhysAddr, end: PhysAddr) -> Self {
        let next = start.as_u32().next_multiple_of(PAGE_SIZE);
        let end = end.as_u32() & !(PAGE_SIZE - 1);
        BootFrameAllocator {
            next,
            end: end.max(next),
            allocated_count: 0,
        }
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Frames still available.
    pub fn remaining(&self) -> usize {
        ((self.end - self.next) / PAGE_SIZE) as usize
    }
}

impl FrameAllocator for BootFrameAllocator {
    /// Allocate the single next available frame
    ///
    /// # Returns
    /// Either a PhysFrame or None (if out of frames)
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        if self.next >= self.end {
            return None;
        }
        let frame = PhysFrame::from_start_address(PhysAddr::new(self.next))?;
        self.next += PAGE_SIZE;
        self.allocated_count += 1;
        Some(frame)
    }
}
