//! Two-level paging with a recursive self-map.
//!
//! Directory entry 1023 of every address space points back at the directory
//! itself, so the active directory is always visible at
//! [`PAGE_DIRECTORY_ALIAS`] and the table for directory index `d` at
//! `PAGE_TABLES_ALIAS + d * 0x1000`. Editing page tables therefore never
//! needs a scratch mapping.

use crate::{
    arch::x86::{self, idt, trap::{TrapFrame, VECTOR_PAGE_FAULT}},
    mm::{
        directory_index, frame_allocator, kernel_directory_index, table_alias, table_index,
        PageFlags, PAGE_DIRECTORY_ALIAS, PAGE_FRAME_MASK, PAGE_SIZE,
    },
    utils::math::divide_up,
};

use bitflags::bitflags;

bitflags! {
    /// Page fault error code pushed by the CPU.
    #[derive(Debug, Clone, Copy)]
    struct FaultCode: u32 {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
        const RESERVED = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

// Provided by the boot stub: the directory that mapped the kernel into the
// higher half before Rust code ran.
extern "C" {
    static mut boot_page_directory: [u32; 1024];
}

/// Take over from the bootstrap mapping.
///
/// Installs the recursive entry on the boot directory, drops every
/// pre-kernel directory entry, and rebuilds the low-memory identity window
/// to cover exactly the kernel image, its modules and the boot information
/// (`boot_end`), which stay in use until user processes exist.
pub fn init(boot_end: u32) {
    idt::register_handler(VECTOR_PAGE_FAULT, page_fault_handler);

    // SAFETY: the boot directory is a 'static page-aligned table; writes
    // happen before any other context can observe it.
    unsafe {
        let directory = core::ptr::addr_of_mut!(boot_page_directory) as *mut u32;
        let directory_phys = directory as u32 - crate::mm::KERNEL_BASE;

        *directory.add(1023) =
            directory_phys | (PageFlags::PRESENT | PageFlags::WRITABLE).bits();
        x86::invalidate_page(crate::mm::PAGE_TABLES_ALIAS);

        let end = boot_end.max(frame_allocator::kernel_end());
        let pages = divide_up(end, PAGE_SIZE);

        for index in 0..kernel_directory_index() - 1 {
            *directory.add(index as usize) = 0;
        }

        map_pages(0, 0, pages, PageFlags::WRITABLE);
        x86::invalidate_page(0);
    }

    log::info!("paging: recursive directory live, {:#x} bytes identity mapped", boot_end);
}

/// Physical address of the running address space's directory, read through
/// the recursive mapping.
pub fn current_directory() -> u32 {
    let entry = get_page(PAGE_DIRECTORY_ALIAS, false, PageFlags::empty())
        .expect("recursive directory entry must exist");
    // SAFETY: the recursive entry is installed for every address space.
    (unsafe { *entry }) & PAGE_FRAME_MASK
}

/// Pointer to the page table entry backing `virt`, through the recursive
/// alias.
///
/// With `create`, a missing page table is allocated (zeroed, wired with
/// `flags` restricted to the settable bits) and the call never returns
/// `None`. The address must be page-aligned; anything else is a kernel bug.
pub fn get_page(virt: u32, create: bool, flags: PageFlags) -> Option<*mut u32> {
    assert!(virt % PAGE_SIZE == 0, "get_page: unaligned address {:#010x}", virt);

    let dir_index = directory_index(virt);
    let directory = PAGE_DIRECTORY_ALIAS as *mut u32;
    let table = table_alias(dir_index) as *mut u32;

    // SAFETY: the directory alias is mapped in every address space; the
    // table alias becomes valid the moment its directory entry is present.
    unsafe {
        let entry = directory.add(dir_index as usize);

        if *entry & PageFlags::PRESENT.bits() == 0 && create {
            let table_phys = frame_allocator::alloc_page();
            *entry = table_phys
                | (PageFlags::PRESENT | PageFlags::WRITABLE).bits()
                | flags.settable().bits();
            core::ptr::write_bytes(table, 0, 1024);
        }

        if *entry & PageFlags::PRESENT.bits() != 0 {
            Some(table.add(table_index(virt) as usize))
        } else {
            None
        }
    }
}

/// Map `virt` to `phys`. Double-mapping a live page is a kernel bug.
pub fn map_page(virt: u32, phys: u32, flags: PageFlags) {
    let entry = get_page(virt, true, flags).expect("created page table cannot be absent");

    // SAFETY: entry points into the live table via the recursive alias.
    unsafe {
        if *entry & PageFlags::PRESENT.bits() != 0 {
            panic!(
                "tried to map an already mapped virtual address {:#010x} to {:#010x} \
                 (previous mapping: {:#010x})",
                virt,
                phys,
                *entry & PAGE_FRAME_MASK
            );
        }
        *entry = phys | PageFlags::PRESENT.bits() | flags.settable().bits();
    }
    x86::invalidate_page(virt);
}

/// Unmap `virt` if mapped, returning its backing frame to the allocator.
pub fn unmap_page(virt: u32) {
    if let Some(entry) = get_page(virt, false, PageFlags::empty()) {
        // SAFETY: entry points into the live table via the recursive alias.
        unsafe {
            if *entry & PageFlags::PRESENT.bits() != 0 {
                frame_allocator::free_page(*entry & PAGE_FRAME_MASK);
            }
            *entry = 0;
        }
        x86::invalidate_page(virt);
    }
}

/// Map `count` consecutive pages starting at `virt`/`phys`.
pub fn map_pages(virt: u32, phys: u32, count: u32, flags: PageFlags) {
    for page in 0..count {
        map_page(virt + page * PAGE_SIZE, phys + page * PAGE_SIZE, flags);
    }
}

/// Unmap `count` consecutive pages starting at `virt`.
pub fn unmap_pages(virt: u32, count: u32) {
    for page in 0..count {
        unmap_page(virt + page * PAGE_SIZE);
    }
}

/// Allocate `count` frames (not necessarily contiguous) and map them
/// user-writable starting at `virt`. Pages mapped this way belong to the
/// current address space only.
pub fn alloc_pages(virt: u32, count: u32) -> Option<u32> {
    for page in 0..count {
        let frame = frame_allocator::alloc_page();
        let entry = get_page(
            virt + page * PAGE_SIZE,
            true,
            PageFlags::WRITABLE | PageFlags::USER,
        )
        .expect("created page table cannot be absent");
        // SAFETY: entry points into the live table via the recursive alias.
        unsafe {
            *entry = frame
                | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER).bits();
        }
    }
    Some(virt)
}

/// Current physical mapping of `virt`, or 0 when unmapped.
pub fn virt_to_phys(virt: u32) -> u32 {
    match get_page(virt & PAGE_FRAME_MASK, false, PageFlags::empty()) {
        // SAFETY: entry points into the live table via the recursive alias.
        Some(entry) => unsafe {
            if *entry & PageFlags::PRESENT.bits() != 0 {
                (*entry & PAGE_FRAME_MASK) + (virt & 0xFFF)
            } else {
                0
            }
        },
        None => 0,
    }
}

/// Switch CR3 to another page directory.
pub fn switch_directory(directory_phys: u32) {
    // SAFETY: callers hand over directories built by process creation or
    // boot, all of which share the kernel half.
    unsafe { x86::write_cr3(directory_phys) };
}

/// Flush the whole TLB by reloading CR3.
pub fn invalidate_cache() {
    // SAFETY: rewriting CR3 with its own value only drops TLB entries.
    unsafe { x86::write_cr3(x86::read_cr3()) };
}

/// Vector 14. Faults are terminal: nothing is demand-paged, so any page
/// fault is a kernel or user program bug worth a full diagnostic.
fn page_fault_handler(frame: &mut TrapFrame) {
    let code = FaultCode::from_bits_truncate(frame.err_code);
    let address = x86::read_cr2();

    log::error!(
        "page fault caused by instruction at {:#010x} from process {}:",
        frame.eip,
        crate::process::current_pid()
    );
    log::error!(
        "the page at {:#010x} {} present",
        address,
        if code.contains(FaultCode::PRESENT) { "was" } else { "wasn't" }
    );
    log::error!(
        "when a process tried to {} it",
        if code.contains(FaultCode::WRITE) { "write to" } else { "read from" }
    );
    log::error!(
        "this process was in {} mode",
        if code.contains(FaultCode::USER) { "user" } else { "kernel" }
    );

    if code.contains(FaultCode::PRESENT) {
        if let Some(entry) = get_page(address & PAGE_FRAME_MASK, false, PageFlags::empty()) {
            // SAFETY: entry points into the live table via the recursive
            // alias.
            let user = unsafe { *entry } & PageFlags::USER.bits() != 0;
            log::error!("the page was in {} mode", if user { "user" } else { "kernel" });
        }
    }
    if code.contains(FaultCode::RESERVED) {
        log::error!("the reserved bits were overwritten");
    }
    if code.contains(FaultCode::INSTRUCTION_FETCH) {
        log::error!("the fault occured during an instruction fetch");
    }

    frame.dump();
    panic!("unrecoverable page fault at {:#010x}", address);
}
