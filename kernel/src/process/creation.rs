//! Process creation.
//!
//! `spawn` builds a complete address space for a raw code image and forges
//! the process's first kernel stack so that electing it is indistinguishable
//! from resuming a preempted one: the switch path pops four callee-saved
//! registers, returns into the interrupt stub's exit half, and that pops a
//! trap frame whose `iret` image drops into ring 3 at the program entry
//! point. The frame and argv layouts are pure functions so they can be
//! verified on the host.

use crate::arch::x86::gdt;
use crate::mm::USER_CODE_BASE;

/// EFLAGS for a starting process: reserved bit 1 plus IF, so the first
/// instruction already runs with preemption live.
const INITIAL_EFLAGS: u32 = 0x202;

/// Words the synthesized kernel-stack image occupies: five for the `iret`
/// frame, two for error code and vector, eight for the `pushad` image, four
/// data segment registers, the stub return address, and four callee-saved
/// registers.
const INITIAL_FRAME_WORDS: usize = 5 + 2 + 8 + 4 + 1 + 4;

/// Build the `(argc, argv)` region at the top of a fresh user stack.
///
/// `stack` is the stack's backing memory, ending at virtual address
/// `stack_top` (exclusive). Argument strings are copied 4-byte aligned and
/// NUL terminated, descending from the top; below them the pointer array is
/// written so `argv[0]` sits lowest, then `argv` (null when empty) and
/// `argc`. Returns the initial user stack pointer, which points one word
/// below the `argc` slot, so `argc` is at `4(%esp)` at program entry.
pub fn write_argv_stack(stack: &mut [u8], stack_top: u32, argv: &[&str]) -> u32 {
    debug_assert!(argv.len() <= 32);

    let base = stack_top - stack.len() as u32;
    let write_word = |stack: &mut [u8], addr: u32, value: u32| {
        let offset = (addr - base) as usize;
        stack[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    };

    // Copy the strings, last argument highest.
    let mut char_ptr = stack_top - 1;
    let mut addresses = [0u32; 32];
    let mut count = 0;
    for arg in argv.iter().rev() {
        let len = arg.len() as u32;
        // The string itself must start 4-byte aligned.
        char_ptr -= (char_ptr - len) % 4;
        let dest = char_ptr - len;

        let offset = (dest - base) as usize;
        stack[offset..offset + len as usize].copy_from_slice(arg.as_bytes());
        stack[offset + len as usize] = 0;

        addresses[count] = dest;
        count += 1;
        char_ptr = dest - 1;
    }

    // The pointer array, highest to lowest, leaves argv[0] at the lowest
    // address.
    let mut word_ptr = char_ptr & !0x3;
    for &address in addresses[..count].iter() {
        write_word(stack, word_ptr, address);
        word_ptr -= 4;
    }

    let argv_pointer = if count > 0 { word_ptr + 4 } else { 0 };
    write_word(stack, word_ptr, argv_pointer);
    word_ptr -= 4;
    write_word(stack, word_ptr, count as u32);
    word_ptr -= 4;

    word_ptr
}

/// Forge the initial kernel-stack image for a process that has never run.
///
/// `stack` is the whole kernel stack as words; the image is written against
/// its top, exactly as if the process had been interrupted at the program
/// entry point and then preempted by the switch path. Returns the word index
/// the saved kernel stack pointer must start at.
pub fn write_initial_kernel_frame(
    stack: &mut [u32],
    user_stack: u32,
    return_address: u32,
) -> usize {
    debug_assert!(stack.len() > INITIAL_FRAME_WORDS);

    // The top-of-stack word itself stays free, matching hardware interrupt
    // entry through the TSS.
    let mut sp = stack.len() - 1;
    let mut push = |stack: &mut [u32], value: u32| {
        sp -= 1;
        stack[sp] = value;
        sp
    };

    // What iret pops, in reverse push order.
    push(stack, gdt::USER_DATA as u32); // ss
    push(stack, user_stack); // esp
    push(stack, INITIAL_EFLAGS); // eflags
    push(stack, gdt::USER_CODE as u32); // cs
    push(stack, USER_CODE_BASE); // eip

    // Error code and vector.
    push(stack, 0);
    push(stack, 0);

    // The pushad image, all zero.
    for _ in 0..8 {
        push(stack, 0);
    }

    // Data segment registers the stub exit pops.
    for _ in 0..4 {
        push(stack, gdt::USER_DATA_RPL0 as u32);
    }

    // Where the switch path's ret lands.
    push(stack, return_address);

    // Callee-saved registers the switch path pops.
    for _ in 0..4 {
        push(stack, 0);
    }

    sp
}

#[cfg(target_arch = "x86")]
mod spawn {
    use alloc::{
        boxed::Box,
        string::{String, ToString},
        vec::Vec,
    };
    use core::ptr::NonNull;

    use spin::Once;

    use super::*;
    use crate::{
        arch::x86::idt,
        mm::{
            frame_allocator, heap, paging, PageFlags, PAGE_DIRECTORY_ALIAS, PAGE_SIZE,
            USER_STACK_TOP,
        },
        process::{self, FpuState, Process, KERNEL_STACK_PAGES, STACK_PAGES},
        sched,
        utils::math::divide_up,
    };

    /// A heap page whose table entry gets retargeted whenever a page
    /// directory must be edited before it is live.
    static TEMP_PAGE: Once<u32> = Once::new();

    fn temp_page() -> u32 {
        *TEMP_PAGE.call_once(|| heap::aligned_alloc(PAGE_SIZE, PAGE_SIZE) as u32)
    }

    /// Create a process running `code` (raw instructions, loaded at the
    /// fixed entry point) and make it electable. Returns the new PID.
    pub fn spawn(code: &[u8], argv: &[&str]) -> u32 {
        // Hold argv copies on the kernel heap: the strings must survive the
        // address-space switches below.
        let args: Vec<String> = argv.iter().map(|arg| arg.to_string()).collect();

        let code_pages = divide_up(code.len() as u32, PAGE_SIZE);
        let kernel_stack_bytes = KERNEL_STACK_PAGES * PAGE_SIZE;
        let kernel_stack_base = heap::aligned_alloc(4, kernel_stack_bytes) as u32;
        let directory_phys = frame_allocator::alloc_page();

        // Clone the kernel directory into the new frame through the
        // temporary page, then strip the user half and point entry 1023
        // back at the new directory.
        let temp = temp_page();
        let entry = paging::get_page(temp, false, PageFlags::empty())
            .expect("heap pages are always mapped");
        // SAFETY: `entry` addresses the live table slot for the heap page;
        // the retarget is undone before anything else can touch the page.
        unsafe {
            let saved = *entry;
            *entry = directory_phys | (PageFlags::PRESENT | PageFlags::WRITABLE).bits();
            crate::arch::x86::invalidate_page(temp);

            let directory = temp as *mut u32;
            core::ptr::copy_nonoverlapping(PAGE_DIRECTORY_ALIAS as *const u32, directory, 1024);
            *directory.add(1023) =
                directory_phys | (PageFlags::PRESENT | PageFlags::WRITABLE).bits();
            for index in 0..crate::mm::kernel_directory_index() as usize {
                *directory.add(index) = 0;
            }

            *entry = saved;
            crate::arch::x86::invalidate_page(temp);
        }

        let previous_directory = paging::current_directory();
        paging::switch_directory(directory_phys);

        // Map and fill the code window, zeroing the slack so fresh static
        // storage reads as zero.
        let code_phys = frame_allocator::alloc_pages(code_pages)
            .unwrap_or_else(|| panic!("kernel is out of physical memory"));
        paging::map_pages(
            USER_CODE_BASE,
            code_phys,
            code_pages,
            PageFlags::USER | PageFlags::WRITABLE,
        );
        // SAFETY: the window was just mapped writable in the active address
        // space and `code` lives on the shared kernel heap.
        unsafe {
            core::ptr::copy_nonoverlapping(code.as_ptr(), USER_CODE_BASE as *mut u8, code.len());
            core::ptr::write_bytes(
                (USER_CODE_BASE as usize + code.len()) as *mut u8,
                0,
                (code_pages * PAGE_SIZE) as usize - code.len(),
            );
        }

        // The user stack, just below kernel space.
        let stack_bytes = STACK_PAGES * PAGE_SIZE;
        let stack_phys = frame_allocator::alloc_pages(STACK_PAGES)
            .unwrap_or_else(|| panic!("kernel is out of physical memory"));
        paging::map_pages(
            USER_STACK_TOP - stack_bytes,
            stack_phys,
            STACK_PAGES,
            PageFlags::USER | PageFlags::WRITABLE,
        );

        let arg_slices: Vec<&str> = args.iter().map(|arg| arg.as_str()).collect();
        // SAFETY: the stack window was just mapped writable in the active
        // address space.
        let user_stack = unsafe {
            let stack = core::slice::from_raw_parts_mut(
                (USER_STACK_TOP - stack_bytes) as *mut u8,
                stack_bytes as usize,
            );
            write_argv_stack(stack, USER_STACK_TOP, &arg_slices)
        };

        paging::switch_directory(previous_directory);

        let kernel_stack_top = kernel_stack_base + kernel_stack_bytes - 4;
        // SAFETY: the kernel stack block was just allocated and is unused.
        let saved_index = unsafe {
            let stack = core::slice::from_raw_parts_mut(
                kernel_stack_base as *mut u32,
                (kernel_stack_bytes / 4) as usize,
            );
            write_initial_kernel_frame(stack, user_stack, idt::irq_return_address())
        };

        let record = NonNull::from(Box::leak(Box::new(Process {
            pid: process::allocate_pid(),
            stack_pages: STACK_PAGES,
            code_pages,
            directory: directory_phys,
            kernel_stack: kernel_stack_top,
            saved_kernel_stack: kernel_stack_base + saved_index as u32 * 4,
            initial_user_stack: user_stack,
            heap_len: 0,
            sleep_ticks: 0,
            fpu_registers: FpuState::new(),
        })));

        sched::with(|scheduler| scheduler.add(record));

        // SAFETY: just created, live by construction.
        unsafe { record.as_ref().pid }
    }
}

#[cfg(target_arch = "x86")]
pub use spawn::spawn;

#[cfg(test)]
mod tests {
    use super::*;

    const STACK_TOP: u32 = 0xC000_0000;

    fn word_at(stack: &[u8], stack_top: u32, addr: u32) -> u32 {
        let base = stack_top - stack.len() as u32;
        let offset = (addr - base) as usize;
        u32::from_le_bytes(stack[offset..offset + 4].try_into().unwrap())
    }

    fn bytes_at<'a>(stack: &'a [u8], stack_top: u32, addr: u32, len: usize) -> &'a [u8] {
        let base = stack_top - stack.len() as u32;
        let offset = (addr - base) as usize;
        &stack[offset..offset + len]
    }

    #[test]
    fn test_empty_argv_pushes_zero_and_null() {
        let mut stack = [0u8; 4096];
        let esp = write_argv_stack(&mut stack, STACK_TOP, &[]);

        // argc then argv one word apart, esp one word below argc.
        assert_eq!(esp, 0xBFFF_FFF4);
        assert_eq!(word_at(&stack, STACK_TOP, esp + 4), 0); // argc
        assert_eq!(word_at(&stack, STACK_TOP, esp + 8), 0); // argv == NULL
    }

    #[test]
    fn test_argv_strings_are_aligned_and_terminated() {
        let mut stack = [0u8; 4096];
        let esp = write_argv_stack(&mut stack, STACK_TOP, &["program1", "-v"]);

        let argc = word_at(&stack, STACK_TOP, esp + 4);
        let argv = word_at(&stack, STACK_TOP, esp + 8);
        assert_eq!(argc, 2);
        assert_ne!(argv, 0);

        let arg0 = word_at(&stack, STACK_TOP, argv);
        let arg1 = word_at(&stack, STACK_TOP, argv + 4);
        assert_eq!(arg0 % 4, 0);
        assert_eq!(arg1 % 4, 0);
        assert!(arg0 < arg1, "argv[0] is copied below argv[1]");

        assert_eq!(bytes_at(&stack, STACK_TOP, arg0, 9), b"program1\0");
        assert_eq!(bytes_at(&stack, STACK_TOP, arg1, 3), b"-v\0");
    }

    #[test]
    fn test_argv_pointer_targets_first_slot() {
        let mut stack = [0u8; 4096];
        let esp = write_argv_stack(&mut stack, STACK_TOP, &["a", "b", "c"]);

        let argv = word_at(&stack, STACK_TOP, esp + 8);
        // argv points at the slot right above itself.
        assert_eq!(argv, esp + 12);
    }

    #[test]
    fn test_initial_frame_matches_interrupt_return_layout() {
        let mut stack = [0u32; 1024];
        let sp = write_initial_kernel_frame(&mut stack, 0xBFFF_FFF4, 0xC010_0000);

        assert_eq!(sp, 1024 - 1 - INITIAL_FRAME_WORDS);

        // Four callee-saved scratch words, then the stub return address.
        assert_eq!(&stack[sp..sp + 4], &[0, 0, 0, 0]);
        assert_eq!(stack[sp + 4], 0xC010_0000);

        // Data segment registers restored by the stub exit.
        assert_eq!(&stack[sp + 5..sp + 9], &[0x20, 0x20, 0x20, 0x20]);

        // pushad image and the error/vector pair, all zero.
        assert_eq!(&stack[sp + 9..sp + 19], &[0; 10]);

        // The iret image: eip, cs, eflags, esp, ss.
        assert_eq!(stack[sp + 19], USER_CODE_BASE);
        assert_eq!(stack[sp + 20], 0x1B);
        assert_eq!(stack[sp + 21], 0x202);
        assert_eq!(stack[sp + 22], 0xBFFF_FFF4);
        assert_eq!(stack[sp + 23], 0x23);

        // The very top word stays untouched.
        assert_eq!(sp + INITIAL_FRAME_WORDS, stack.len() - 1);
    }

    #[test]
    fn test_initial_frame_spans_trap_frame_exactly() {
        use crate::arch::x86::trap::TrapFrame;

        let mut stack = [0u32; 1024];
        let sp = write_initial_kernel_frame(&mut stack, 0, 0);

        // Skipping the switch image (4 registers + return address) must
        // land exactly on a TrapFrame's worth of words.
        let frame_words = core::mem::size_of::<TrapFrame>() / 4;
        assert_eq!(sp + 5 + frame_words, stack.len() - 1);
    }
}
