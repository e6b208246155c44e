use crate::memory::addr::VirtAddr;

/// Drops any cached translation of the page containing `addr` on this CPU.
#[cfg(target_os = "none")]
pub fn flush(addr: VirtAddr) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) addr.as_u32(), options(nostack, preserves_flags));
    }
}

/// Hosted builds have no TLB to invalidate.
#[cfg(not(target_os = "none"))]
pub fn flush(_addr: VirtAddr) {}
