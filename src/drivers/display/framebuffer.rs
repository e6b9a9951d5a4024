/*
 * Framebuffer Graphics Driver
 *
 * This module implements a basic framebuffer driver for graphics output.
 * It provides pixel-level access to the display and text rendering
 * capabilities using a PSF2 font.
 *
 * The framebuffer is memory-mapped and allows direct pixel manipulation.
 * Text rendering is implemented using bitmap fonts embedded in the kernel.
 */

use core::{
    ptr::{addr_of, write_bytes},
    slice,
};

pub struct FrameBuffer {
    pub screen: &'static mut [u32],
    pub scanline: u32,
    pub width: u32,
    pub height: u32,
}

impl FrameBuffer {
    pub fn new(
        screen: *mut u32,
        scanline: u32,
        width: u32,
        height: u32,
    ) -> Result<FrameBuffer, &'static str> {
        Ok(FrameBuffer {
            screen: unsafe {
                let size = (scanline * height) as usize;
                write_bytes(screen, 0, size);
                slice::from_raw_parts_mut(screen, size)
            },
            scanline,
            width,
            height,
        })
    }

    pub fn draw_screen_test(&mut self) {
        let s = self.scanline;
        let w = self.width;
        let h = self.height;

        if s > 0 {
            for y in 0..h {
                self.put_pixel(w / 2, y, 0x00FFFFFF)
            }
            for x in 0..w {
                self.put_pixel(x, h / 2, 0x00FFFFFF)
            }
        }

        log::info!("Screentest was drawn.");
    }

    /// Writes a pixel at (x, y). Caller must keep coordinates within bounds.
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, color: u32) {
        *unsafe {
            self.screen
                .get_unchecked_mut(((self.height - 1 - y) * self.scanline / 4 + x) as usize)
        } = color;
    }

    /// Draws a string using the embedded PSF2 font, for early boot diagnostics.
    pub fn puts(&mut self, string: &'static str) {
        use crate::bootboot::*;

        let font: *mut Psf2T = { addr_of!(_binary_font_psf_start) } as *const u64 as *mut Psf2T;
        let psf = unsafe { *font };

        let headersize = psf.headersize;
        let numglyph = psf.numglyph;
        let bytesperglyph = psf.bytesperglyph;
        let height = psf.height;
        let width = psf.width;
        let bpl = (width + 7) / 8;
        let fb_scanline = unsafe { bootboot.fb_scanline };

        let glyph_start_addr = (font as u64 + headersize as u64) as *mut u8;

        for (kx, s) in string.bytes().enumerate() {
            let glyph_offset = (s as u32).min(numglyph - 1) * bytesperglyph;
            let mut glyph = unsafe { glyph_start_addr.offset(glyph_offset as isize) };
            let mut offs = kx as u32 * (width + 1) * 4;

            for _ in 0..height {
                let mut line = offs as u64;
                let mut mask = 1 << (width - 1);

                for _ in 0..width {
                    let target_pixel = &mut self.screen[(line / 4) as usize];
                    let pixel_value = if unsafe { *glyph } & mask > 0 { 0xFFFFFF } else { 0 };
                    *target_pixel = pixel_value;
                    mask >>= 1;
                    line += 4;
                }

                self.screen[(line / 4) as usize] = 0;
                glyph = unsafe { glyph.offset(bpl as isize) };
                offs += fb_scanline;
            }
        }
    }
}
