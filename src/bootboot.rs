/*
 * BOOTBOOT Protocol Bindings
 *
 * Structures and linker-provided symbols for the BOOTBOOT boot protocol.
 * BOOTBOOT hands off to the kernel with paging already enabled: the whole
 * of physical memory is identity-mapped, and a handful of fixed virtual
 * addresses are reserved for the boot info, the environment, and the
 * framebuffer.
 *
 * Reserved virtual addresses (see the BOOTBOOT spec):
 *   0xffff_ffff_f800_0000  BOOTBOOT_MMIO  (local APIC, one page)
 *   0xffff_ffff_fc00_0000  BOOTBOOT_FB    (linear framebuffer)
 *   0xffff_ffff_ffe0_0000  BOOTBOOT_INFO  (this header)
 *   0xffff_ffff_ffe0_1000  BOOTBOOT_ENV   (environment string, one page)
 *   0xffff_ffff_ffe0_2000  BOOTBOOT_CORE  (kernel load address, higher half)
 */

/// MMIO region (local APIC registers)
pub const BOOTBOOT_MMIO: u64 = 0xffff_ffff_f800_0000;
/// Linear framebuffer
pub const BOOTBOOT_FB: u64 = 0xffff_ffff_fc00_0000;
/// Boot info structure
pub const BOOTBOOT_INFO: u64 = 0xffff_ffff_ffe0_0000;
/// NUL-terminated environment string
pub const BOOTBOOT_ENV: u64 = 0xffff_ffff_ffe0_1000;
/// Kernel higher-half load address
pub const BOOTBOOT_CORE: u64 = 0xffff_ffff_ffe0_2000;

/// Memory map entry type: usable RAM
pub const MMAP_FREE: u32 = 1;
/// Memory map entry type: used/reserved by firmware or bootloader
pub const MMAP_USED: u32 = 0;
/// Memory map entry type: ACPI reclaimable
pub const MMAP_ACPI: u32 = 2;
/// Memory map entry type: memory-mapped I/O
pub const MMAP_MMIO: u32 = 3;

/// One BOOTBOOT memory map entry.
///
/// `size`'s low 4 bits hold the entry type (see `MMAP_*`); the actual
/// region size is `size & !0xf`.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MMapEnt {
    pub ptr: u64,
    pub size: u64,
}

/// BOOTBOOT boot information header, followed immediately by a
/// variable-length array of `MMapEnt` filling out the rest of the page.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BOOTBOOT {
    pub magic: [u8; 4],
    pub size: u32,
    pub protocol: u8,
    pub fb_type: u8,
    pub numcores: u16,
    pub bspid: u16,
    pub timezone: i16,
    pub datetime: [u8; 8],
    pub initrd_ptr: u64,
    pub initrd_size: u64,
    pub fb_ptr: u64,
    pub fb_size: u32,
    pub fb_width: u32,
    pub fb_height: u32,
    pub fb_scanline: u32,
    pub acpi_ptr: u64,
    pub smbi_ptr: u64,
    pub efi_ptr: u64,
    pub mp_ptr: u64,
    pub unused0: u64,
    pub unused1: u64,
    pub unused2: u64,
    pub unused3: u64,
    /// First entry of the memory map; further entries follow contiguously.
    pub mmap: MMapEnt,
}

/// PSF2 font header, for the embedded console font blob linked in via
/// `_binary_font_psf_start`.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Psf2T {
    pub magic: u32,
    pub version: u32,
    pub headersize: u32,
    pub flags: u32,
    pub numglyph: u32,
    pub bytesperglyph: u32,
    pub height: u32,
    pub width: u32,
}

unsafe extern "C" {
    /// BOOTBOOT info header, placed by the linker script at `BOOTBOOT_INFO`.
    #[link_name = "bootboot"]
    pub static bootboot: BOOTBOOT;

    /// NUL-terminated `key=value\n` environment, at `BOOTBOOT_ENV`.
    #[link_name = "environment"]
    pub static environment: [u8; 4096];

    /// Start of the linear framebuffer, at `BOOTBOOT_FB`.
    #[link_name = "fb"]
    pub static mut fb: u32;

    /// Start of the embedded PSF2 console font, linked in as a binary blob.
    pub static _binary_font_psf_start: u64;
}
