//! Two-level 32-bit paging.
//!
//! The kernel address space is one directory with three tables installed:
//! - entry 0: the identity table covering the first 4 MiB
//! - the entry for the kernel's link-time base: the kernel window table
//! - entry 1023: the directory itself (recursive self-mapping)
//!
//! Only this module writes page table entries or the active directory.

use core::{
    fmt,
    ops::{Index, IndexMut},
};

use log::{debug, error, info};

use crate::{
    constants::{
        idt::PAGE_FAULT_VECTOR,
        memory::{ENTRIES_PER_TABLE, PAGE_SIZE, RECURSIVE_INDEX, TABLE_SPAN},
    },
    interrupts::{self, idt::page_fault_entry, without_interrupts},
    memory::{
        addr::{PhysAddr, PhysFrame, VirtAddr},
        frame_allocator::FrameAllocator,
        tlb,
    },
    serial_println,
};

const PRESENT: u32 = 1 << 0;
const WRITABLE: u32 = 1 << 1;
const USER: u32 = 1 << 2;
const ACCESSED: u32 = 1 << 3;
const DIRTY: u32 = 1 << 4;
const RESERVED_SHIFT: u32 = 5;
const RESERVED_MASK: u32 = 0x7F << RESERVED_SHIFT;
const FRAME_SHIFT: u32 = 12;
const FRAME_MASK: u32 = 0xFFFF_F000;

/// One page table or page directory entry.
///
/// | bits  | field    |
/// |-------|----------|
/// | 0     | present  |
/// | 1     | writable |
/// | 2     | user     |
/// | 3     | accessed |
/// | 4     | dirty    |
/// | 5-11  | reserved |
/// | 12-31 | frame    |
///
/// `frame` only means something while `present` is set.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    pub const fn unused() -> Self {
        PageTableEntry(0)
    }

    pub const fn from_raw(raw: u32) -> Self {
        PageTableEntry(raw)
    }

    /// Present, writable, supervisor-only mapping of `frame`.
    pub fn kernel_mapping(frame: PhysFrame) -> Self {
        let mut entry = Self::unused();
        entry.set_present(true);
        entry.set_writable(true);
        entry.set_frame(frame.number());
        entry
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_unused(self) -> bool {
        self.0 == 0
    }

    pub const fn present(self) -> bool {
        self.0 & PRESENT != 0
    }

    pub fn set_present(&mut self, value: bool) {
        self.set_bit(PRESENT, value);
    }

    pub const fn writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    pub fn set_writable(&mut self, value: bool) {
        self.set_bit(WRITABLE, value);
    }

    pub const fn user(self) -> bool {
        self.0 & USER != 0
    }

    pub fn set_user(&mut self, value: bool) {
        self.set_bit(USER, value);
    }

    pub const fn accessed(self) -> bool {
        self.0 & ACCESSED != 0
    }

    pub fn set_accessed(&mut self, value: bool) {
        self.set_bit(ACCESSED, value);
    }

    pub const fn dirty(self) -> bool {
        self.0 & DIRTY != 0
    }

    pub fn set_dirty(&mut self, value: bool) {
        self.set_bit(DIRTY, value);
    }

    pub const fn reserved(self) -> u32 {
        (self.0 & RESERVED_MASK) >> RESERVED_SHIFT
    }

    pub fn set_reserved(&mut self, value: u32) {
        self.0 = (self.0 & !RESERVED_MASK) | ((value << RESERVED_SHIFT) & RESERVED_MASK);
    }

    /// Physical frame number (physical address >> 12).
    pub const fn frame(self) -> u32 {
        (self.0 & FRAME_MASK) >> FRAME_SHIFT
    }

    pub fn set_frame(&mut self, number: u32) {
        self.0 = (self.0 & !FRAME_MASK) | ((number << FRAME_SHIFT) & FRAME_MASK);
    }

    /// The mapped frame, if the entry is present.
    pub fn mapped_frame(self) -> Option<PhysFrame> {
        self.present().then(|| PhysFrame::from_number(self.frame()))
    }

    fn set_bit(&mut self, mask: u32, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("present", &self.present())
            .field("writable", &self.writable())
            .field("user", &self.user())
            .field("frame", &format_args!("{:#07x}", self.frame()))
            .finish()
    }
}

/// 1024 entries covering 4 MiB. A page directory has the same layout, each
/// entry pointing at a table instead of a page.
#[derive(Clone)]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    pub const fn new() -> Self {
        PageTable {
            entries: [PageTableEntry::unused(); ENTRIES_PER_TABLE],
        }
    }

    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::unused());
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }

    /// Index of the first entry that is not present.
    pub fn first_free(&self) -> Option<usize> {
        self.entries.iter().position(|entry| !entry.present())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;

    fn index(&self, index: usize) -> &PageTableEntry {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }
}

/// How the kernel reaches the memory behind a physical frame.
pub trait FrameAccess {
    /// Pointer to the table stored in `frame` while building paging structures.
    fn frame_ptr(&self, frame: PhysFrame) -> *mut PageTable;

    /// Pointer to `page`, a kernel-window page that has just been mapped onto `frame`.
    fn mapped_ptr(&self, page: VirtAddr, frame: PhysFrame) -> *mut PageTable;
}

/// Physical frames are reached through the identity window, mapped pages at
/// their virtual address.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAccess;

impl FrameAccess for IdentityAccess {
    fn frame_ptr(&self, frame: PhysFrame) -> *mut PageTable {
        frame.start_address().as_u32() as usize as *mut PageTable
    }

    fn mapped_ptr(&self, page: VirtAddr, _frame: PhysFrame) -> *mut PageTable {
        page.as_u32() as usize as *mut PageTable
    }
}

/// Where the kernel image is linked and loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLayout {
    pub virt_base: VirtAddr,
    pub phys_base: PhysAddr,
    pub image_len: u32,
}

impl KernelLayout {
    /// Pages occupied by the kernel image.
    pub const fn image_pages(&self) -> usize {
        self.image_len.div_ceil(PAGE_SIZE) as usize
    }

    /// First physical address past the image, page aligned.
    pub const fn phys_end(&self) -> PhysAddr {
        PhysAddr::new(self.phys_base.as_u32() + self.image_pages() as u32 * PAGE_SIZE)
    }

    /// First virtual page past the image inside the kernel window.
    pub const fn virt_end(&self) -> VirtAddr {
        VirtAddr::new(self.virt_base.as_u32() + self.image_pages() as u32 * PAGE_SIZE)
    }

    /// Directory entry holding the kernel window table.
    pub const fn directory_index(&self) -> usize {
        self.virt_base.directory_index()
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        let offset = addr.as_u32().wrapping_sub(self.virt_base.as_u32());
        addr >= self.virt_base && offset < TABLE_SPAN
    }

    /// Kernel window table slot translating `addr`.
    const fn window_slot(&self, addr: VirtAddr) -> usize {
        ((addr.as_u32() - self.virt_base.as_u32()) / PAGE_SIZE) as usize
    }

    fn validate(&self) -> Result<(), VmmError> {
        let index = self.directory_index();
        let aligned = self.virt_base.as_u32() % TABLE_SPAN == 0 && self.phys_base.is_page_aligned();
        if !aligned || index == 0 || index == RECURSIVE_INDEX || self.image_pages() > ENTRIES_PER_TABLE {
            return Err(VmmError::InvalidLayout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmError {
    /// The frame source ran dry after `mapped` pages of the request were mapped.
    FrameExhausted { mapped: usize },
    Misaligned(VirtAddr),
    OutsideKernelWindow(VirtAddr),
    AlreadyMapped(VirtAddr),
    NoFreeSlot,
    InvalidLayout,
}

impl fmt::Display for VmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmmError::FrameExhausted { mapped } => {
                write!(f, "Out of physical frames after mapping {} pages", mapped)
            }
            VmmError::Misaligned(addr) => write!(f, "{:?} is not page aligned", addr),
            VmmError::OutsideKernelWindow(addr) => {
                write!(f, "{:?} is outside the kernel window", addr)
            }
            VmmError::AlreadyMapped(addr) => write!(f, "{:?} is already mapped", addr),
            VmmError::NoFreeSlot => write!(f, "No free kernel page table slot"),
            VmmError::InvalidLayout => write!(f, "Kernel layout cannot be paged"),
        }
    }
}

/// The kernel's address space and the operations that change it.
pub struct Vmm<A: FrameAccess> {
    directory: PhysFrame,
    kernel_table: PhysFrame,
    identity_table: PhysFrame,
    layout: KernelLayout,
    access: A,
}

impl<A: FrameAccess> Vmm<A> {
    /// Builds the kernel address space, makes it the active one and claims the
    /// page fault vector. Called once per boot.
    pub fn initialize(
        frames: &mut impl FrameAllocator,
        layout: KernelLayout,
        access: A,
    ) -> Result<Self, VmmError> {
        layout.validate()?;

        let mut take = || frames.allocate_frame().ok_or(VmmError::FrameExhausted { mapped: 0 });
        let kernel_table = take()?;
        let directory = take()?;
        let identity_table = take()?;

        let mut vmm = Vmm {
            directory,
            kernel_table,
            identity_table,
            layout,
            access,
        };

        without_interrupts(|| {
            vmm.build_identity_table();
            vmm.build_kernel_table();
            vmm.build_directory();
            vmm.activate();
        });
        interrupts::register_vector(PAGE_FAULT_VECTOR, page_fault_entry());

        info!(
            "Paging active: directory {:?}, kernel window at {:?} (entry {})",
            directory,
            layout.virt_base,
            layout.directory_index()
        );
        Ok(vmm)
    }

    fn build_identity_table(&mut self) {
        let identity = self.table_mut(self.identity_table);
        for page in 0..ENTRIES_PER_TABLE {
            identity[page] = PageTableEntry::kernel_mapping(PhysFrame::from_number(page as u32));
        }
    }

    fn build_kernel_table(&mut self) {
        let phys_base = self.layout.phys_base.as_u32();
        let image_pages = self.layout.image_pages();
        let table = self.table_mut(self.kernel_table);
        table.zero();
        for page in 0..image_pages {
            let frame = PhysFrame::containing_address(PhysAddr::new(phys_base + page as u32 * PAGE_SIZE));
            table[page] = PageTableEntry::kernel_mapping(frame);
        }
    }

    fn build_directory(&mut self) {
        let (identity, kernel, own) = (self.identity_table, self.kernel_table, self.directory);
        let kernel_index = self.layout.directory_index();
        let directory = self.table_mut(own);
        directory.zero();
        directory[0] = PageTableEntry::kernel_mapping(identity);
        directory[kernel_index] = PageTableEntry::kernel_mapping(kernel);
        directory[RECURSIVE_INDEX] = PageTableEntry::kernel_mapping(own);
    }

    /// Loads the kernel directory as the active address space.
    pub fn activate(&self) {
        load_directory(self.directory.start_address());
    }

    /// Maps `count` fresh frames at `start`, which must be page aligned and lie
    /// with the whole range inside the kernel window.
    ///
    /// There is no rollback: running out of frames part way leaves the pages
    /// mapped so far in place and reports how many there were.
    pub fn allocate_pages(
        &mut self,
        frames: &mut impl FrameAllocator,
        start: VirtAddr,
        count: usize,
    ) -> Result<VirtAddr, VmmError> {
        if !start.is_page_aligned() {
            return Err(VmmError::Misaligned(start));
        }
        let end = start
            .checked_add_pages(count)
            .ok_or(VmmError::OutsideKernelWindow(start))?;
        let window_end = self.layout.virt_base.as_u32() as u64 + TABLE_SPAN as u64;
        if !self.layout.contains(start) || end.as_u32() as u64 > window_end {
            return Err(VmmError::OutsideKernelWindow(start));
        }

        let first = self.layout.window_slot(start);
        let kernel_table = self.kernel_table;
        if let Some(taken) = (first..first + count).find(|&slot| self.table(kernel_table)[slot].present()) {
            let addr = VirtAddr::new(start.as_u32() + (taken - first) as u32 * PAGE_SIZE);
            return Err(VmmError::AlreadyMapped(addr));
        }

        without_interrupts(|| {
            for page in 0..count {
                let frame = frames
                    .allocate_frame()
                    .ok_or(VmmError::FrameExhausted { mapped: page })?;
                self.table_mut(kernel_table)[first + page] = PageTableEntry::kernel_mapping(frame);
                tlb::flush(VirtAddr::new(start.as_u32() + page as u32 * PAGE_SIZE));
            }
            Ok(())
        })?;

        debug!("Mapped {} pages at {:?}", count, start);
        Ok(start)
    }

    /// Creates a directory sharing every kernel mapping and returns its frame.
    ///
    /// The new frame is mapped into the first free kernel window slot for the
    /// copy and unmapped again afterwards. The copy is verbatim except for the
    /// recursive entry, which points at the new directory instead of the
    /// kernel's.
    pub fn create_address_space(
        &mut self,
        frames: &mut impl FrameAllocator,
    ) -> Result<PhysFrame, VmmError> {
        let (kernel_table, kernel_directory) = (self.kernel_table, self.directory);
        let Some(slot) = self.table(kernel_table).first_free() else {
            error!("Error creating address space: no free kernel page table slot");
            return Err(VmmError::NoFreeSlot);
        };
        let frame = frames
            .allocate_frame()
            .ok_or(VmmError::FrameExhausted { mapped: 0 })?;
        let window = VirtAddr::new(self.layout.virt_base.as_u32() + slot as u32 * PAGE_SIZE);

        without_interrupts(|| {
            self.table_mut(kernel_table)[slot] = PageTableEntry::kernel_mapping(frame);
            tlb::flush(window);

            let source: *const PageTable = self.access.frame_ptr(kernel_directory);
            let target = self.access.mapped_ptr(window, frame);
            // The target is a fresh frame, never the kernel directory.
            unsafe {
                core::ptr::copy_nonoverlapping(source, target, 1);
                (&mut *target)[RECURSIVE_INDEX] = PageTableEntry::kernel_mapping(frame);
            }

            self.table_mut(kernel_table)[slot] = PageTableEntry::unused();
            tlb::flush(window);
        });

        debug!("Created address space {:?} (copied through slot {})", frame, slot);
        Ok(frame)
    }

    /// Walks the kernel directory to find what `addr` maps to.
    pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        let table = self.directory()[addr.directory_index()].mapped_frame()?;
        let page = self.table(table)[addr.table_index()].mapped_frame()?;
        Some(PhysAddr::new(page.start_address().as_u32() + addr.page_offset()))
    }

    pub fn directory_frame(&self) -> PhysFrame {
        self.directory
    }

    pub fn layout(&self) -> KernelLayout {
        self.layout
    }

    pub fn directory(&self) -> &PageTable {
        self.table(self.directory)
    }

    pub fn kernel_table(&self) -> &PageTable {
        self.table(self.kernel_table)
    }

    pub fn identity_table(&self) -> &PageTable {
        self.table(self.identity_table)
    }

    fn table(&self, frame: PhysFrame) -> &PageTable {
        // Frames handed to the VMM hold page tables for the life of the kernel.
        unsafe { &*self.access.frame_ptr(frame) }
    }

    fn table_mut(&mut self, frame: PhysFrame) -> &mut PageTable {
        unsafe { &mut *self.access.frame_ptr(frame) }
    }
}

/// The single page fault path: report and stop. Faults are never recovered.
pub fn handle_page_fault(address: u32, error_code: u32, eip: u32) -> ! {
    serial_println!(
        "EXCEPTION: PAGE FAULT\nFaulting Address: {:#010x}\nError Code: {:#x}\nInstruction: {:#010x}",
        address,
        error_code,
        eip
    );
    interrupts::halt_forever()
}

/// Physical address of the directory translating addresses right now.
pub fn active_directory() -> PhysAddr {
    PhysAddr::new(cr3::read())
}

fn load_directory(directory: PhysAddr) {
    cr3::write(directory.as_u32());
}

#[cfg(target_os = "none")]
mod cr3 {
    use core::arch::asm;

    const CR0_PAGING: u32 = 1 << 31;

    pub fn read() -> u32 {
        let value: u32;
        unsafe { asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    /// Loads the directory and makes sure paging is on.
    pub fn write(directory: u32) {
        unsafe {
            asm!("mov cr3, {}", in(reg) directory, options(nostack, preserves_flags));
            let mut cr0: u32;
            asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
            cr0 |= CR0_PAGING;
            asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(all(not(target_os = "none"), test))]
mod cr3 {
    use core::cell::Cell;

    std::thread_local! {
        static ACTIVE: Cell<u32> = const { Cell::new(0) };
    }

    pub fn read() -> u32 {
        ACTIVE.with(|active| active.get())
    }

    pub fn write(directory: u32) {
        ACTIVE.with(|active| active.set(directory));
    }
}

#[cfg(all(not(target_os = "none"), not(test)))]
mod cr3 {
    use core::sync::atomic::{AtomicU32, Ordering};

    static ACTIVE: AtomicU32 = AtomicU32::new(0);

    pub fn read() -> u32 {
        ACTIVE.load(Ordering::SeqCst)
    }

    pub fn write(directory: u32) {
        ACTIVE.store(directory, Ordering::SeqCst);
    }
}
