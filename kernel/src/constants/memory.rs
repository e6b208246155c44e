//! Paging geometry, kernel placement and heap configuration.

pub const PAGE_SIZE: u32 = 4096;
pub const FRAME_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Entries in one page table or page directory.
pub const ENTRIES_PER_TABLE: usize = 1024;
/// Bytes covered by one page table (one directory entry).
pub const TABLE_SPAN: u32 = PAGE_SIZE * ENTRIES_PER_TABLE as u32;
/// Directory slot holding the recursive self-mapping.
pub const RECURSIVE_INDEX: usize = ENTRIES_PER_TABLE - 1;

/// Link-time virtual base of the kernel image.
pub const KERNEL_VIRT_BASE: u32 = 0xC000_0000;
/// Physical address the loader places the kernel image at.
pub const KERNEL_PHYS_BASE: u32 = 0x0010_0000;
/// Everything below this is identity mapped once paging is active.
pub const IDENTITY_LIMIT: u32 = TABLE_SPAN;

pub const HEAP_SIZE: usize = 1024 * 1024; // 1 MB

/// Payload sizes are rounded up to this, and every payload is aligned to it.
pub const HEAP_MIN_ALIGN: usize = 8;

// Debug tags stamped into heap block headers
pub const BLOCK_TAG_FRESH: u32 = 0xBADD_DD1E;
pub const BLOCK_TAG_REUSED: u32 = 0xBAD1_DEED;
pub const BLOCK_TAG_FREED: u32 = 0xBAAD_F00D;
