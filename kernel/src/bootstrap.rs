//! Boot entry: from the Multiboot2 handoff to the first user process.
//!
//! The assembly stub and linker script put the kernel in the higher half,
//! leave a provisional identity mapping in place and jump here with the
//! Multiboot2 magic and information pointer. Initialization is strictly
//! ordered: CPU tables and devices first, then physical memory, then
//! paging, then the subsystems that allocate.

use alloc::vec::Vec;

use multiboot2::{BootInformation, BootInformationHeader};
use spin::Mutex;

use crate::{
    arch::{self, x86},
    mm::{self, frame_allocator, paging},
    process, sched, serial, syscall,
};

/// Name under which the initial user program is passed as a boot module.
const INIT_MODULE: &str = "program1";

/// Linker script symbols delimiting the kernel image.
extern "C" {
    static __kernel_end_virt__: u8;
    static __kernel_end_phys__: u8;
}

/// Framebuffer parameters recorded for the rendering layer.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    pub address: u64,
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
}

static FRAMEBUFFER: Mutex<Option<FramebufferInfo>> = Mutex::new(None);

/// Framebuffer reported by the bootloader, if any.
pub fn framebuffer() -> Option<FramebufferInfo> {
    *FRAMEBUFFER.lock()
}

/// Kernel entry point, called by the boot stub.
pub fn kmain(magic: u32, boot_info_addr: u32) -> ! {
    serial::init();
    crate::logger::init();
    log::info!("cinder {} booting", env!("CARGO_PKG_VERSION"));

    if magic != multiboot2::MAGIC {
        log::warn!("unexpected multiboot2 magic {:#010x}, continuing anyway", magic);
    }

    x86::init();

    // SAFETY: the boot stub's identity window covers the information
    // structure, and nothing below frees or remaps it.
    let boot = unsafe { BootInformation::load(boot_info_addr as *const BootInformationHeader) }
        .unwrap_or_else(|_| panic!("unreadable multiboot2 information structure"));

    // SAFETY: linker symbols are addresses, never dereferenced.
    let (kernel_end_virt, mut kernel_end_phys) = unsafe {
        (
            core::ptr::addr_of!(__kernel_end_virt__) as u32,
            core::ptr::addr_of!(__kernel_end_phys__) as u32,
        )
    };
    if kernel_end_virt > mm::KERNEL_INITIAL_MAP_END {
        panic!("the kernel is too large for its initial mapping");
    }

    // Modules usually sit after the image, but nothing guarantees it.
    for module in boot.module_tags() {
        kernel_end_phys = kernel_end_phys.max(module.end_address());
    }

    frame_allocator::init(&boot, kernel_end_phys)
        .unwrap_or_else(|err| panic!("physical memory init failed: {}", err));
    paging::init(boot_info_addr + boot.total_size() as u32);

    if let Some(Ok(tag)) = boot.framebuffer_tag() {
        let info = FramebufferInfo {
            address: tag.address(),
            pitch: tag.pitch(),
            width: tag.width(),
            height: tag.height(),
            bpp: tag.bpp(),
        };
        log::info!(
            "framebuffer: {}x{} at {:#x}, {} bpp",
            info.width,
            info.height,
            info.address,
            info.bpp
        );
        *FRAMEBUFFER.lock() = Some(info);
    }

    syscall::init();
    sched::init();

    let mut spawned = 0;
    for module in boot.module_tags() {
        let name = module.cmdline().unwrap_or("");
        if name != INIT_MODULE {
            continue;
        }

        let size = (module.end_address() - module.start_address()) as usize;
        // SAFETY: the module range is identity mapped and was protected
        // from the frame allocator at init.
        let image = unsafe {
            core::slice::from_raw_parts(module.start_address() as *const u8, size)
        };
        // The module's low-memory home is not mapped in the new address
        // space; copy it through the shared kernel heap first.
        let code: Vec<u8> = image.to_vec();

        let pid = process::creation::spawn(&code, &[INIT_MODULE]);
        log::info!("loaded module '{}' as pid {}", name, pid);
        spawned += 1;
    }

    if spawned == 0 {
        log::info!("no user modules found, idling");
        x86::enable_interrupts();
        arch::halt_loop();
    }

    process::enter_usermode()
}
