//! Process termination.
//!
//! Runs on the dying process's own kernel stack, in its own address space:
//! the recursive mapping makes the directory walkable while its frames are
//! handed back. Nothing is allocated between the teardown and the final
//! switch, so the freed kernel stack stays intact exactly long enough to
//! leave it.

use crate::{
    mm::{
        frame_allocator, heap, kernel_directory_index, table_alias, PageFlags,
        PAGE_DIRECTORY_ALIAS, PAGE_FRAME_MASK, PAGE_SIZE,
    },
    process::{self, KERNEL_STACK_PAGES},
    sched,
};

/// Tear down the current process and hand the CPU to the next one.
///
/// Frees every user frame, every user page table, the page directory and
/// the kernel stack, withdraws the process from the scheduler, and lets the
/// scheduler pick a successor. The `Process` record itself is not reclaimed:
/// the final stack-pointer store of the switch path still writes into it.
pub fn exit() -> ! {
    let current = process::current().expect("exit without a current process");

    // SAFETY: the recursive alias addresses this process's live paging
    // structures; the frames freed here are not touched again before CR3
    // changes.
    unsafe {
        let directory = PAGE_DIRECTORY_ALIAS as *mut u32;

        for dir_index in 0..kernel_directory_index() {
            let dir_entry = *directory.add(dir_index as usize);
            if dir_entry & PageFlags::PRESENT.bits() == 0 {
                continue;
            }

            // User frames first, then the table that mapped them.
            let table = table_alias(dir_index) as *mut u32;
            for table_index in 0..(PAGE_SIZE / 4) {
                let entry = *table.add(table_index as usize);
                if entry & PageFlags::PRESENT.bits() != 0 {
                    frame_allocator::free_page(entry & PAGE_FRAME_MASK);
                }
            }
            frame_allocator::free_page(dir_entry & PAGE_FRAME_MASK);
        }

        let directory_frame = *directory.add(1023) & PAGE_FRAME_MASK;
        frame_allocator::free_page(directory_frame);
    }

    // The block is marked free but stays usable until the next allocation,
    // which cannot happen before the switch below.
    // SAFETY: current is live; plain field read.
    let kernel_stack = unsafe { current.as_ref().kernel_stack };
    heap::kfree((kernel_stack + 4 - KERNEL_STACK_PAGES * PAGE_SIZE) as *mut u8);

    sched::with(|scheduler| scheduler.exit(current));
    process::schedule();

    unreachable!("terminated process was elected again");
}
