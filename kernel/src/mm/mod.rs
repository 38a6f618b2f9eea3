//! Memory management: physical frames, paging, kernel heap.
//!
//! The layout constants here are the kernel's whole configuration surface.
//! The address space is split at [`KERNEL_BASE`]: directory entries below it
//! are per-process, entries at or above it are shared by every process
//! directory. The top 4 MiB window is the recursive self-map of the current
//! page directory and is unusable for anything else.

pub mod frame_allocator;
pub mod heap;
#[cfg(target_arch = "x86")]
pub mod paging;

use bitflags::bitflags;

pub use frame_allocator::MemoryRegion;

/// Size of a page and of a physical frame.
pub const PAGE_SIZE: u32 = 0x1000;

/// First virtual address of kernel space.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// End of the window the boot stub maps before paging is rebuilt. A kernel
/// image growing past this cannot boot.
pub const KERNEL_INITIAL_MAP_END: u32 = 0xC040_0000;

/// Kernel heap placement. The base is 4 MiB aligned so payload alignment can
/// be computed relative to it.
pub const KERNEL_HEAP_BEGIN: u32 = 0xD000_0000;
pub const KERNEL_HEAP_SIZE: u32 = 0x0100_0000;

/// Where user program code is loaded and entered.
pub const USER_CODE_BASE: u32 = 0x0000_1000;

/// The user stack grows down from the bottom of kernel space.
pub const USER_STACK_TOP: u32 = KERNEL_BASE;

/// Virtual address of the current page directory through the recursive
/// mapping at directory index 1023.
pub const PAGE_DIRECTORY_ALIAS: u32 = 0xFFFF_F000;

/// Base of the per-directory-index page table aliases.
pub const PAGE_TABLES_ALIAS: u32 = 0xFFC0_0000;

/// Physical frame bits of a directory or table entry.
pub const PAGE_FRAME_MASK: u32 = 0xFFFF_F000;

bitflags! {
    /// x86 page directory/table entry bits the kernel cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}

impl PageFlags {
    /// Bits callers may request when mapping; PRESENT is owned by the
    /// mapping code itself.
    pub fn settable(self) -> PageFlags {
        self & (PageFlags::WRITABLE | PageFlags::USER)
    }
}

/// Index of `virt` in the page directory.
pub const fn directory_index(virt: u32) -> u32 {
    virt >> 22
}

/// Index of `virt` in its page table.
pub const fn table_index(virt: u32) -> u32 {
    (virt >> 12) & 0x3FF
}

/// Virtual address of the page table for directory index `dir` through the
/// recursive mapping.
pub const fn table_alias(dir: u32) -> u32 {
    PAGE_TABLES_ALIAS + dir * PAGE_SIZE
}

/// First directory index belonging to kernel space.
pub const fn kernel_directory_index() -> u32 {
    directory_index(KERNEL_BASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_and_table_index() {
        assert_eq!(directory_index(0), 0);
        assert_eq!(directory_index(0xC000_0000), 768);
        assert_eq!(directory_index(0xFFFF_F000), 1023);
        assert_eq!(table_index(0x0000_1000), 1);
        assert_eq!(table_index(0x0040_0000), 0);
        assert_eq!(table_index(0xB000_0000 + 5 * PAGE_SIZE), 5);
    }

    #[test]
    fn test_recursive_alias_addresses() {
        // Table 1023 aliases the directory itself.
        assert_eq!(table_alias(1023), PAGE_DIRECTORY_ALIAS);
        assert_eq!(table_alias(0), PAGE_TABLES_ALIAS);
        assert_eq!(directory_index(table_alias(512)), 1023);
        assert_eq!(table_index(table_alias(512)), 512);
    }

    #[test]
    fn test_settable_strips_present() {
        let requested = PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE;
        assert_eq!(requested.settable(), PageFlags::USER | PageFlags::WRITABLE);
    }

    #[test]
    fn test_kernel_split() {
        assert_eq!(kernel_directory_index(), 768);
        assert!(KERNEL_HEAP_BEGIN >= KERNEL_BASE);
        assert!(KERNEL_HEAP_BEGIN + KERNEL_HEAP_SIZE <= PAGE_TABLES_ALIAS);
    }
}
