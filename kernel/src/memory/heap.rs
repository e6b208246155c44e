//! The Kernel Heap
//!
//! First-fit allocator over one break region. Every payload is preceded by a
//! tagged `BlockHeader`. Blocks are chained in creation order and never given
//! back to the break; freeing only flags a block for reuse. Free blocks are not
//! split and neighbouring free blocks are not coalesced, so fragmentation only
//! ever grows.

use core::{
    alloc::{GlobalAlloc, Layout},
    fmt, mem,
    ptr::{self, NonNull},
};

use log::{info, warn};
use spin::{Mutex, MutexGuard};

use crate::{
    constants::memory::{
        BLOCK_TAG_FREED, BLOCK_TAG_FRESH, BLOCK_TAG_REUSED, FRAME_SIZE, HEAP_MIN_ALIGN,
    },
    memory::addr::{PhysAddr, VirtAddr},
};

/// Bookkeeping stored immediately before every payload.
#[repr(C, align(8))]
pub struct BlockHeader {
    size: usize,
    free: bool,
    prev: Option<NonNull<BlockHeader>>,
    next: Option<NonNull<BlockHeader>>,
    debug: u32,
}

pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

impl BlockHeader {
    /// Payload bytes owned by the block.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    /// One of the `BLOCK_TAG_*` constants.
    pub fn tag(&self) -> u32 {
        self.debug
    }

    pub fn prev(&self) -> Option<NonNull<BlockHeader>> {
        self.prev
    }

    fn payload(block: NonNull<BlockHeader>) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked((block.as_ptr() as *mut u8).add(HEADER_SIZE)) }
    }

    fn of(payload: *mut u8) -> *mut BlockHeader {
        unsafe { payload.sub(HEADER_SIZE) as *mut BlockHeader }
    }
}

/// The raw memory the heap grows into. The break only moves up.
#[derive(Debug)]
pub struct BreakRegion {
    current: usize,
    end: usize,
}

impl BreakRegion {
    /// # Safety
    ///
    /// `[start, start + size)` must be writable memory that nothing else uses
    /// for as long as the region and any block carved from it are alive.
    pub unsafe fn new(start: *mut u8, size: usize) -> Self {
        let start = start as usize;
        let end = start.saturating_add(size);
        let current = align_up(start, HEAP_MIN_ALIGN).unwrap_or(end).min(end);
        BreakRegion { current, end }
    }

    /// Current break.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Moves the break up by `bytes` and returns where it was, or `None` if
    /// the region cannot grow that far. `grow(0)` reads the break.
    pub fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let new = self.current.checked_add(bytes)?;
        if new > self.end {
            return None;
        }
        let previous = self.current;
        self.current = new;
        NonNull::new(previous as *mut u8)
    }

    fn advance_to(&mut self, addr: usize) {
        debug_assert!(addr >= self.current && addr <= self.end);
        self.current = addr;
    }
}

/// A snapshot of one block, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub payload: usize,
    pub size: usize,
    pub free: bool,
    pub tag: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub blocks: usize,
    pub free_blocks: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub brk: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    AlreadyInitialized,
    RegionTooSmall,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::AlreadyInitialized => write!(f, "Kernel heap is already initialized"),
            HeapError::RegionTooSmall => write!(f, "Heap region cannot hold a single block"),
        }
    }
}

pub struct KernelHeap {
    region: BreakRegion,
    head: Option<NonNull<BlockHeader>>,
}

// Block pointers only ever point into the heap's own region.
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    pub fn new(region: BreakRegion) -> Self {
        KernelHeap { region, head: None }
    }

    /// First-fit allocation of at least `size` bytes. `None` for a zero size or
    /// when the break region is exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = align_up(size, HEAP_MIN_ALIGN)?;

        let Some(head) = self.head else {
            return self.request_block(None, size).map(BlockHeader::payload);
        };

        let block = match Self::find_free(head, size) {
            (Some(block), predecessor) => {
                unsafe {
                    let header = block.as_ptr();
                    (*header).free = false;
                    (*header).debug = BLOCK_TAG_REUSED;
                    (*header).prev = predecessor;
                }
                block
            }
            (None, last) => self.request_block(last, size)?,
        };
        Some(BlockHeader::payload(block))
    }

    /// Allocates a fresh block whose payload starts on a page boundary.
    ///
    /// The payload is aligned rather than the header, so the break moves to
    /// the first page boundary with room for a header below it. A break that
    /// is itself page aligned still moves: the header takes the tail of that
    /// page and the payload starts on the next one. Only a break exactly one
    /// header short of a boundary stays put. Free blocks are never reused
    /// here since their payloads sit wherever they were first carved.
    pub fn allocate_aligned(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = align_up(size, HEAP_MIN_ALIGN)?;
        let brk = self.region.current();

        if (brk + HEADER_SIZE) % FRAME_SIZE != 0 {
            let payload = align_up(brk.checked_add(HEADER_SIZE)?, FRAME_SIZE)?;
            if payload.checked_add(size)? > self.region.end() {
                return None;
            }
            self.region.advance_to(payload - HEADER_SIZE);
        }

        let last = self.head.map(Self::last_block);
        self.request_block(last, size).map(BlockHeader::payload)
    }

    /// `allocate`, also reporting the payload's physical address. Only valid
    /// while the heap is identity mapped.
    pub fn allocate_with_physical(&mut self, size: usize) -> Option<(NonNull<u8>, PhysAddr)> {
        let payload = self.allocate(size)?;
        Some((payload, PhysAddr::new(payload.as_ptr() as usize as u32)))
    }

    /// Marks the block owning `payload` free. Null is ignored.
    ///
    /// The block stays in the chain, so the forward scan in `allocate` finds it
    /// again. The predecessor's `next` still points at it rather than being
    /// spliced past it, since a spliced-out block is never scanned again. Its
    /// bytes are left untouched until it is reused.
    ///
    /// # Safety
    ///
    /// `payload` must be null or a live pointer returned by this heap.
    pub unsafe fn free(&mut self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }
        let header = BlockHeader::of(payload);
        (*header).free = true;
        (*header).debug = BLOCK_TAG_FREED;
    }

    /// Grows an allocation. A block that is already big enough is returned as
    /// is; otherwise the old payload is copied into a new block and the old
    /// block freed. Null behaves like `allocate`.
    ///
    /// # Safety
    ///
    /// `payload` must be null or a live pointer returned by this heap.
    pub unsafe fn reallocate(&mut self, payload: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if payload.is_null() {
            return self.allocate(size);
        }
        let old_size = (*BlockHeader::of(payload)).size;
        if old_size >= size {
            return NonNull::new(payload);
        }

        let moved = self.allocate(size)?;
        ptr::copy_nonoverlapping(payload, moved.as_ptr(), old_size);
        self.free(payload);
        Some(moved)
    }

    /// Allocates `count * element_size` zeroed bytes.
    ///
    /// Requests larger than the current break address are refused outright;
    /// this is a coarse sanity bound, not a free-memory check.
    pub fn zero_allocate(&mut self, count: usize, element_size: usize) -> Option<NonNull<u8>> {
        let size = count.checked_mul(element_size)?;
        if size > self.region.current() {
            return None;
        }
        let payload = self.allocate(size)?;
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, size) };
        Some(payload)
    }

    pub fn brk(&self) -> usize {
        self.region.current()
    }

    /// Walks the block chain in creation order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            next: self.head,
            _heap: self,
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            brk: self.region.current(),
            remaining: self.region.end() - self.region.current(),
            ..HeapStats::default()
        };
        for block in self.blocks() {
            stats.blocks += 1;
            if block.free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            } else {
                stats.used_bytes += block.size;
            }
        }
        stats
    }

    /// Returns the first free block of at least `size` bytes together with the
    /// block scanned just before it, or no block and the last one in the chain.
    fn find_free(
        head: NonNull<BlockHeader>,
        size: usize,
    ) -> (Option<NonNull<BlockHeader>>, Option<NonNull<BlockHeader>>) {
        let mut predecessor = None;
        let mut current = Some(head);
        while let Some(block) = current {
            let header = unsafe { block.as_ref() };
            if header.free && header.size >= size {
                return (Some(block), predecessor);
            }
            predecessor = Some(block);
            current = header.next;
        }
        (None, predecessor)
    }

    fn last_block(head: NonNull<BlockHeader>) -> NonNull<BlockHeader> {
        let mut block = head;
        while let Some(next) = unsafe { block.as_ref() }.next {
            block = next;
        }
        block
    }

    /// Carves a new block of `size` payload bytes from the break and links it
    /// after `last`.
    fn request_block(
        &mut self,
        last: Option<NonNull<BlockHeader>>,
        size: usize,
    ) -> Option<NonNull<BlockHeader>> {
        let total = size.checked_add(HEADER_SIZE)?;
        let Some(memory) = self.region.grow(total) else {
            warn!(
                "Kernel heap exhausted: {} bytes requested, {} left",
                total,
                self.region.end() - self.region.current()
            );
            return None;
        };

        let block = memory.cast::<BlockHeader>();
        unsafe {
            block.as_ptr().write(BlockHeader {
                size,
                free: false,
                prev: last,
                next: None,
                debug: BLOCK_TAG_FRESH,
            });
            match last {
                Some(mut last) => last.as_mut().next = Some(block),
                None => self.head = Some(block),
            }
        }
        Some(block)
    }
}

pub struct Blocks<'a> {
    next: Option<NonNull<BlockHeader>>,
    _heap: &'a KernelHeap,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.next?;
        let header = unsafe { block.as_ref() };
        self.next = header.next;
        Some(BlockInfo {
            payload: BlockHeader::payload(block).as_ptr() as usize,
            size: header.size,
            free: header.free,
            tag: header.debug,
        })
    }
}

/// The kernel heap behind a spinlock, usable as the global allocator.
///
/// Alignments up to `HEAP_MIN_ALIGN` go through `allocate`, up to a page
/// through `allocate_aligned`; anything larger fails.
pub struct LockedHeap(Mutex<Option<KernelHeap>>);

impl LockedHeap {
    pub const fn empty() -> Self {
        LockedHeap(Mutex::new(None))
    }

    /// # Safety
    ///
    /// Same contract as [`BreakRegion::new`].
    pub unsafe fn init(&self, start: *mut u8, size: usize) -> Result<(), HeapError> {
        let mut heap = self.0.lock();
        if heap.is_some() {
            return Err(HeapError::AlreadyInitialized);
        }
        if size < HEADER_SIZE + HEAP_MIN_ALIGN {
            return Err(HeapError::RegionTooSmall);
        }
        *heap = Some(KernelHeap::new(BreakRegion::new(start, size)));
        Ok(())
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<KernelHeap>> {
        self.0.lock()
    }

    pub fn stats(&self) -> Option<HeapStats> {
        self.0.lock().as_ref().map(KernelHeap::stats)
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut guard = self.0.lock();
        let Some(heap) = guard.as_mut() else {
            return ptr::null_mut();
        };
        let payload = if layout.align() <= HEAP_MIN_ALIGN {
            heap.allocate(layout.size())
        } else if layout.align() <= FRAME_SIZE {
            heap.allocate_aligned(layout.size())
        } else {
            None
        };
        payload.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(heap) = self.0.lock().as_mut() {
            heap.free(ptr);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > HEAP_MIN_ALIGN {
            let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
                return ptr::null_mut();
            };
            let moved = self.alloc(new_layout);
            if !moved.is_null() {
                ptr::copy_nonoverlapping(ptr, moved, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
            return moved;
        }
        match self.0.lock().as_mut() {
            Some(heap) => heap.reallocate(ptr, new_size).map_or(ptr::null_mut(), NonNull::as_ptr),
            None => ptr::null_mut(),
        }
    }
}

#[cfg_attr(target_os = "none", global_allocator)]
pub static KERNEL_HEAP: LockedHeap = LockedHeap::empty();

/// Hands `[start, start + size)` of mapped kernel memory to the kernel heap.
pub fn init_heap(start: VirtAddr, size: usize) -> Result<(), HeapError> {
    // The caller has just mapped this range for the heap alone.
    unsafe { KERNEL_HEAP.init(start.as_u32() as usize as *mut u8, size)? };
    info!("Kernel heap at {:?}, {} KiB", start, size / 1024);
    Ok(())
}

fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::alloc::{alloc_zeroed, dealloc};

    use super::*;

    /// Page-aligned host memory used as a break region.
    pub(crate) struct TestRegion {
        base: *mut u8,
        layout: Layout,
    }

    impl TestRegion {
        pub(crate) fn new(size: usize) -> Self {
            let layout = Layout::from_size_align(size, FRAME_SIZE).expect("region layout");
            let base = unsafe { alloc_zeroed(layout) };
            assert!(!base.is_null());
            TestRegion { base, layout }
        }

        pub(crate) fn base(&self) -> *mut u8 {
            self.base
        }

        pub(crate) fn size(&self) -> usize {
            self.layout.size()
        }

        pub(crate) fn heap(&self) -> KernelHeap {
            KernelHeap::new(unsafe { BreakRegion::new(self.base, self.size()) })
        }
    }

    impl Drop for TestRegion {
        fn drop(&mut self) {
            unsafe { dealloc(self.base, self.layout) };
        }
    }

    fn header<'a>(payload: NonNull<u8>) -> &'a BlockHeader {
        unsafe { &*BlockHeader::of(payload.as_ptr()) }
    }

    fn fill(payload: NonNull<u8>, bytes: &[u8]) {
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), payload.as_ptr(), bytes.len()) };
    }

    fn read(payload: NonNull<u8>, len: usize) -> &'static [u8] {
        unsafe { core::slice::from_raw_parts(payload.as_ptr(), len) }
    }

    #[test]
    fn test_header_precedes_payload() {
        let region = TestRegion::new(16 * 1024);
        let mut heap = region.heap();

        for size in [1, 11, 64, 100] {
            let payload = heap.allocate(size).expect("allocation failed");
            let block = header(payload);
            assert!(!block.is_free());
            assert!(block.size() >= size);
            assert_eq!(block.tag(), BLOCK_TAG_FRESH);
            assert_eq!(payload.as_ptr() as usize % HEAP_MIN_ALIGN, 0);
        }
        assert_eq!(heap.stats().blocks, 4);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();
        let brk = heap.brk();

        assert!(heap.allocate(0).is_none());
        assert!(heap.allocate_aligned(0).is_none());
        assert_eq!(heap.brk(), brk);
    }

    #[test]
    fn test_free_marks_block_and_keeps_bytes() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();
        let text = b"Hello world..?";

        let payload = heap.allocate(text.len()).expect("allocation failed");
        fill(payload, text);
        unsafe { heap.free(payload.as_ptr()) };

        let block = header(payload);
        assert!(block.is_free());
        assert_eq!(block.tag(), BLOCK_TAG_FREED);
        assert_eq!(read(payload, text.len()), text);

        // null is ignored
        unsafe { heap.free(ptr::null_mut()) };
    }

    #[test]
    fn test_free_keeps_block_linked() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();

        let a = heap.allocate(16).expect("a");
        let b = heap.allocate(16).expect("b");
        let c = heap.allocate(16).expect("c");
        unsafe { heap.free(b.as_ptr()) };

        let b_block = NonNull::new(BlockHeader::of(b.as_ptr()));
        let c_block = NonNull::new(BlockHeader::of(c.as_ptr()));
        assert_eq!(header(a).next, b_block);
        assert_eq!(header(b).next, c_block);
        assert_eq!(heap.blocks().count(), 3);
        assert_eq!(heap.allocate(16), Some(b));
    }

    #[test]
    fn test_first_fit_reuses_freed_block() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();

        let first = heap.allocate(64).expect("first");
        let second = heap.allocate(16).expect("second");
        let third = heap.allocate(64).expect("third");
        unsafe {
            heap.free(first.as_ptr());
            heap.free(third.as_ptr());
        }
        let brk = heap.brk();

        let reused = heap.allocate(48).expect("reuse");
        assert_eq!(reused, first);
        assert_eq!(header(reused).tag(), BLOCK_TAG_REUSED);
        assert_eq!(header(reused).size(), 64);
        assert!(header(reused).prev().is_none());

        // the scan passes the still-used second block and finds the third
        let again = heap.allocate(64).expect("reuse third");
        assert_eq!(again, third);
        assert_eq!(
            header(again).prev(),
            NonNull::new(BlockHeader::of(second.as_ptr()))
        );
        assert_eq!(heap.brk(), brk);
    }

    #[test]
    fn test_freed_blocks_are_not_coalesced() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();

        let left = heap.allocate(32).expect("left");
        let right = heap.allocate(32).expect("right");
        unsafe {
            heap.free(left.as_ptr());
            heap.free(right.as_ptr());
        }
        let brk = heap.brk();

        let wide = heap.allocate(64).expect("wide");
        assert_ne!(wide, left);
        assert!(heap.brk() > brk);
        let stats = heap.stats();
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.free_bytes, 64);
    }

    #[test]
    fn test_reallocate_in_place_when_big_enough() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();

        let payload = heap.allocate(32).expect("allocation failed");
        fill(payload, &[7; 32]);

        let same = unsafe { heap.reallocate(payload.as_ptr(), 32) };
        assert_eq!(same, Some(payload));
        let smaller = unsafe { heap.reallocate(payload.as_ptr(), 4) };
        assert_eq!(smaller, Some(payload));
        assert_eq!(read(payload, 32), &[7; 32]);
        assert!(!header(payload).is_free());
    }

    #[test]
    fn test_reallocate_moves_and_frees() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();
        let factors: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 0];

        let payload = heap.allocate(factors.len()).expect("allocation failed");
        fill(payload, &factors);

        let grown = unsafe { heap.reallocate(payload.as_ptr(), 44) }.expect("reallocation failed");
        assert_ne!(grown, payload);
        assert_eq!(read(grown, factors.len()), &factors);
        assert!(header(payload).is_free());
        assert_eq!(header(payload).tag(), BLOCK_TAG_FREED);
        assert!(header(grown).size() >= 44);
    }

    #[test]
    fn test_reallocate_null_allocates() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();

        let payload = unsafe { heap.reallocate(ptr::null_mut(), 24) }.expect("allocation failed");
        assert!(header(payload).size() >= 24);
        assert_eq!(heap.stats().blocks, 1);
    }

    #[test]
    fn test_zero_allocate_clears_reused_memory() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();

        let dirty = heap.allocate(40).expect("allocation failed");
        fill(dirty, &[0xAA; 40]);
        unsafe { heap.free(dirty.as_ptr()) };

        let zeroed = heap.zero_allocate(10, 4).expect("zeroed allocation failed");
        assert_eq!(zeroed, dirty);
        assert_eq!(read(zeroed, 40), &[0; 40]);

        assert!(heap.zero_allocate(usize::MAX, 2).is_none());
        assert!(heap.zero_allocate(0, 8).is_none());
    }

    #[test]
    fn test_aligned_allocation_starts_on_fresh_page() {
        let region = TestRegion::new(8 * FRAME_SIZE);
        let mut heap = region.heap();

        let small = heap.allocate(10).expect("small");
        let end_of_small = small.as_ptr() as usize + header(small).size();
        unsafe { heap.free(small.as_ptr()) };

        let aligned = heap.allocate_aligned(100).expect("aligned");
        assert_eq!(aligned.as_ptr() as usize % FRAME_SIZE, 0);
        assert!(aligned.as_ptr() as usize - HEADER_SIZE >= end_of_small);
        assert_ne!(aligned, small);

        // later blocks chain after the aligned one
        let next = heap.allocate(200).expect("after aligned");
        assert!(next.as_ptr() > aligned.as_ptr());
        assert_eq!(heap.stats().blocks, 3);
    }

    #[test]
    fn test_aligned_allocation_from_page_aligned_break() {
        let region = TestRegion::new(4 * FRAME_SIZE);
        let base = region.base() as usize;
        let mut heap = region.heap();
        assert_eq!(heap.brk(), base);

        // the header needs room, so the payload goes to the next page
        let aligned = heap.allocate_aligned(64).expect("aligned");
        assert_eq!(aligned.as_ptr() as usize, base + FRAME_SIZE);
    }

    #[test]
    fn test_aligned_allocation_without_skipping() {
        let region = TestRegion::new(4 * FRAME_SIZE);
        let base = region.base() as usize;
        let mut heap = region.heap();

        heap.allocate(FRAME_SIZE - 2 * HEADER_SIZE).expect("filler");
        assert_eq!(heap.brk() + HEADER_SIZE, base + FRAME_SIZE);

        let aligned = heap.allocate_aligned(64).expect("aligned");
        assert_eq!(aligned.as_ptr() as usize, base + FRAME_SIZE);
        assert_eq!(heap.stats().blocks, 2);
    }

    #[test]
    fn test_exhaustion_leaves_break_alone() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();
        let brk = heap.brk();

        assert!(heap.allocate(4096).is_none());
        assert_eq!(heap.brk(), brk);
        assert!(heap.allocate_aligned(4096).is_none());
        assert_eq!(heap.brk(), brk);

        let fits = heap.allocate(4096 - HEADER_SIZE).expect("exact fit");
        assert!(header(fits).size() >= 4096 - HEADER_SIZE);
        assert_eq!(heap.stats().remaining, 0);
        assert!(heap.allocate(1).is_none());
    }

    #[test]
    fn test_physical_address_matches_identity() {
        let region = TestRegion::new(4096);
        let mut heap = region.heap();

        let (payload, phys) = heap.allocate_with_physical(16).expect("allocation failed");
        assert_eq!(phys.as_u32(), payload.as_ptr() as usize as u32);
    }

    #[test]
    fn test_locked_heap_serves_global_alloc_requests() {
        let region = TestRegion::new(16 * FRAME_SIZE);
        let heap = LockedHeap::empty();

        unsafe {
            assert!(heap.alloc(Layout::new::<u64>()).is_null());
            assert_eq!(heap.init(region.base(), region.size()), Ok(()));
            assert_eq!(
                heap.init(region.base(), region.size()),
                Err(HeapError::AlreadyInitialized)
            );

            let word = heap.alloc(Layout::new::<u64>());
            assert!(!word.is_null());
            let page = heap.alloc(Layout::from_size_align(64, FRAME_SIZE).expect("layout"));
            assert_eq!(page as usize % FRAME_SIZE, 0);
            assert!(heap
                .alloc(Layout::from_size_align(64, 2 * FRAME_SIZE).expect("layout"))
                .is_null());

            let grown = heap.realloc(word, Layout::new::<u64>(), 128);
            assert!(!grown.is_null());
            heap.dealloc(grown, Layout::from_size_align(128, 8).expect("layout"));
        }

        let stats = heap.stats().expect("initialized");
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.free_blocks, 2);
    }

    #[test]
    fn test_region_too_small() {
        let region = TestRegion::new(4096);
        let heap = LockedHeap::empty();
        assert_eq!(
            unsafe { heap.init(region.base(), HEADER_SIZE) },
            Err(HeapError::RegionTooSmall)
        );
    }
}
