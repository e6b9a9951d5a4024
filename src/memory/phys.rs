/*
 * Physical Frame Allocator
 *
 * Free-list allocator for 4 KiB frames, above a reserved low region (the
 * kernel image and the BIOS/firmware range BOOTBOOT's memory map never
 * marks free). Uses the BOOTBOOT memory map (embedded after the BOOTBOOT
 * header) to seed the list.
 *
 * The list is intrusive: a free frame's first 8 bytes hold the physical
 * address of the next free frame (or `NIL` for the last one), so pushing
 * and popping a frame costs one write/read and no extra storage. A
 * parallel bitmap (1 bit/frame, 1 = currently free) exists solely to turn
 * a double `free_frame` into a panic instead of silent list corruption -
 * pushing the same frame onto an intrusive list twice creates a cycle.
 *
 * Frame addresses are poked directly as identity-mapped pointers, which
 * holds during the boot window this allocator runs in - BOOTBOOT identity-
 * maps physical memory until the kernel switches to its own page tables
 * and activates the physmap.
 */

use crate::bootboot::{BOOTBOOT, BOOTBOOT_CORE, MMAP_FREE, MMapEnt};
use crate::memory::PhysFrame;
use spin::Mutex;

/// Maximum number of frames we can manage (1 GiB / 4 KiB = 262,144 frames)
const MAX_FRAMES: usize = 262_144;
const BITMAP_LEN: usize = MAX_FRAMES / 64;

/// Sentinel "no next frame" value. Not a valid frame-aligned physical address.
const NIL: u64 = u64::MAX;

/// Kernel physical base address (where BOOTBOOT loads the kernel)
const KERNEL_PHYS_BASE: u64 = 0x0020_0000; // 2 MiB

struct FreeList {
    /// Physical address of the head free frame, or `NIL` if empty.
    head: u64,
    free_frames: usize,
    total_frames: usize,
}

static FREE_LIST: Mutex<FreeList> = Mutex::new(FreeList { head: NIL, free_frames: 0, total_frames: 0 });

/// 1 = frame currently on the free list, 0 = allocated or never freed.
///
/// IMPORTANT: we never take & or &mut to this static; we only touch it
/// via raw pointers obtained from `addr_of!` / `addr_of_mut!`.
static mut FREE_BITMAP: [u64; BITMAP_LEN] = [0; BITMAP_LEN];

fn bitmap_test(frame_num: usize) -> bool {
    let word_idx = frame_num / 64;
    let bit_idx = frame_num % 64;
    unsafe {
        let ptr = core::ptr::addr_of!(FREE_BITMAP) as *const u64;
        (*ptr.add(word_idx) & (1u64 << bit_idx)) != 0
    }
}

fn bitmap_set(frame_num: usize, free: bool) {
    let word_idx = frame_num / 64;
    let bit_idx = frame_num % 64;
    let mask = 1u64 << bit_idx;
    unsafe {
        let ptr = core::ptr::addr_of_mut!(FREE_BITMAP) as *mut u64;
        let val = *ptr.add(word_idx);
        *ptr.add(word_idx) = if free { val | mask } else { val & !mask };
    }
}

unsafe fn write_next(frame_addr: u64, next: u64) {
    unsafe { (frame_addr as *mut u64).write_volatile(next) }
}

unsafe fn read_next(frame_addr: u64) -> u64 {
    unsafe { (frame_addr as *const u64).read_volatile() }
}

/// Push `frame_num` onto the free list. Caller holds `list`'s lock already.
fn push_free(list: &mut FreeList, frame_num: usize) {
    let frame_addr = (frame_num as u64) * PhysFrame::SIZE;
    unsafe { write_next(frame_addr, list.head) };
    list.head = frame_addr;
    bitmap_set(frame_num, true);
    list.free_frames += 1;
}

/// Remove `frame_num` from the free list, wherever it sits. Used only
/// during init to carve the kernel's own frames back out after the
/// BOOTBOOT map (which doesn't know our load address) marked them free.
fn remove_from_list(list: &mut FreeList, frame_num: usize) {
    if !bitmap_test(frame_num) {
        return;
    }
    let target = (frame_num as u64) * PhysFrame::SIZE;

    if list.head == target {
        list.head = unsafe { read_next(target) };
        bitmap_set(frame_num, false);
        list.free_frames = list.free_frames.saturating_sub(1);
        return;
    }

    let mut prev = list.head;
    while prev != NIL {
        let next = unsafe { read_next(prev) };
        if next == target {
            let next_next = unsafe { read_next(next) };
            unsafe { write_next(prev, next_next) };
            bitmap_set(frame_num, false);
            list.free_frames = list.free_frames.saturating_sub(1);
            return;
        }
        prev = next;
    }
}

/// Initialize the physical frame allocator from BOOTBOOT memory map
pub fn init_from_bootboot(bootboot_ptr: *const BOOTBOOT) {
    let mut list = FREE_LIST.lock();

    log::info!("Initializing physical frame allocator...");

    list.head = NIL;
    list.free_frames = 0;
    list.total_frames = MAX_FRAMES;
    unsafe {
        let ptr = core::ptr::addr_of_mut!(FREE_BITMAP) as *mut u64;
        for i in 0..BITMAP_LEN {
            *ptr.add(i) = 0;
        }
    }

    let bootboot_ref = unsafe { &*bootboot_ptr };

    // Copy packed field to local (avoid unaligned reference)
    let bb_size = bootboot_ref.size;

    // num_entries = (bootboot.size - 128) / sizeof(MMapEnt) (16 bytes)
    let total_bytes = (bb_size as usize).saturating_sub(128);
    let mmap_entries = total_bytes / core::mem::size_of::<MMapEnt>();

    log::info!(
        "BOOTBOOT: size = {}, memory map entries = {}",
        bb_size,
        mmap_entries
    );

    // First entry is at bootboot.mmap, the rest are contiguous.
    let mmap_base: *const MMapEnt = core::ptr::addr_of!(bootboot_ref.mmap);

    for i in 0..mmap_entries {
        let entry = unsafe { &*mmap_base.add(i) };

        // Copy packed fields to locals to avoid unaligned references
        let region_ptr: u64 = entry.ptr;
        let raw_size: u64 = entry.size; // lower 4 bits store type
        let entry_type: u32 = (raw_size & 0xF) as u32;
        let region_size: u64 = raw_size & !0xF;

        if region_size == 0 {
            continue;
        }

        log::info!(
            "MMAP entry {}: ptr=0x{:x}, size=0x{:x}, type={}",
            i,
            region_ptr,
            region_size,
            entry_type
        );

        if entry_type == MMAP_FREE {
            let start_frame = region_ptr / PhysFrame::SIZE;
            let end_frame = (region_ptr + region_size - 1) / PhysFrame::SIZE;

            log::info!("  Free region frames: {} - {}", start_frame, end_frame);

            for frame_num in start_frame..=end_frame {
                if (frame_num as usize) < MAX_FRAMES {
                    push_free(&mut list, frame_num as usize);
                }
            }
        }
    }

    // Mark kernel frames as used
    mark_kernel_frames_used(&mut list);

    log::info!("Physical frame allocator initialized");
}

/// Mark kernel frames as used based on linker symbols
fn mark_kernel_frames_used(list: &mut FreeList) {
    unsafe extern "C" {
        static __text_start: u8;
        static __bss_end: u8;
    }

    let kernel_virt_start = core::ptr::addr_of!(__text_start) as u64;
    let kernel_virt_end = core::ptr::addr_of!(__bss_end) as u64;

    // Convert to physical addresses:
    // Kernel linked at BOOTBOOT_CORE (virtual), loaded at 2 MiB (physical).
    let kernel_phys_start = kernel_virt_start - (BOOTBOOT_CORE as u64) + KERNEL_PHYS_BASE;
    let kernel_phys_end = kernel_virt_end - (BOOTBOOT_CORE as u64) + KERNEL_PHYS_BASE;

    let start_frame = kernel_phys_start / PhysFrame::SIZE;
    let end_frame = (kernel_phys_end + PhysFrame::SIZE - 1) / PhysFrame::SIZE;

    log::info!(
        "Marking kernel frames as used: phys 0x{:x}-0x{:x} (frames {}-{})",
        kernel_phys_start,
        kernel_phys_end,
        start_frame,
        end_frame
    );

    for frame_num in start_frame..end_frame {
        if (frame_num as usize) < MAX_FRAMES {
            remove_from_list(list, frame_num as usize);
        }
    }
}

/// Allocate a physical frame
pub fn alloc_frame() -> Option<PhysFrame> {
    let mut list = FREE_LIST.lock();

    if list.head == NIL {
        return None;
    }

    let frame_addr = list.head;
    let frame_num = (frame_addr / PhysFrame::SIZE) as usize;
    list.head = unsafe { read_next(frame_addr) };
    bitmap_set(frame_num, false);
    list.free_frames -= 1;

    Some(PhysFrame::containing_address(frame_addr))
}

/// Free a physical frame
///
/// Panics on double-free: the bitmap bit for `frame` is still set from the
/// first free, so a second free would otherwise push the same frame onto
/// the list twice and corrupt it into a cycle.
pub fn free_frame(frame: PhysFrame) {
    let mut list = FREE_LIST.lock();

    let frame_num = (frame.start_address() / PhysFrame::SIZE) as usize;
    if frame_num >= MAX_FRAMES {
        return;
    }

    if bitmap_test(frame_num) {
        panic!(
            "double free of physical frame {} (addr 0x{:x})",
            frame_num,
            frame.start_address()
        );
    }

    push_free(&mut list, frame_num);
}

/// Get statistics about frame usage: (used_frames, total_frames)
pub fn get_stats() -> (usize, usize) {
    let list = FREE_LIST.lock();
    (list.total_frames - list.free_frames, list.total_frames)
}
