//! 32-bit physical and virtual address types.

use core::fmt;

use crate::constants::memory::{ENTRIES_PER_TABLE, PAGE_SHIFT, PAGE_SIZE};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u32);

/// A page-sized, page-aligned region of physical memory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame(PhysAddr);

impl PhysAddr {
    pub const fn new(addr: u32) -> Self {
        PhysAddr(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        VirtAddr(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    /// Index of the directory entry translating this address.
    pub const fn directory_index(self) -> usize {
        (self.0 >> (PAGE_SHIFT + 10)) as usize
    }

    /// Index of the table entry translating this address.
    pub const fn table_index(self) -> usize {
        (self.0 >> PAGE_SHIFT) as usize % ENTRIES_PER_TABLE
    }

    pub const fn page_offset(self) -> u32 {
        self.0 % PAGE_SIZE
    }

    /// Address `pages` pages further on, or `None` past 4 GiB.
    pub fn checked_add_pages(self, pages: usize) -> Option<Self> {
        let bytes = u32::try_from(pages).ok()?.checked_mul(PAGE_SIZE)?;
        self.0.checked_add(bytes).map(VirtAddr)
    }
}

impl PhysFrame {
    /// Frame starting at `addr`, which must be page aligned.
    pub fn from_start_address(addr: PhysAddr) -> Option<Self> {
        addr.is_page_aligned().then_some(PhysFrame(addr))
    }

    pub const fn containing_address(addr: PhysAddr) -> Self {
        PhysFrame(PhysAddr(addr.0 & !(PAGE_SIZE - 1)))
    }

    /// Frame with physical frame number `number` (address >> 12).
    pub const fn from_number(number: u32) -> Self {
        PhysFrame(PhysAddr(number << PAGE_SHIFT))
    }

    pub const fn start_address(self) -> PhysAddr {
        self.0
    }

    pub const fn number(self) -> u32 {
        self.0 .0 >> PAGE_SHIFT
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Debug for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysFrame({:#010x})", self.0 .0)
    }
}
