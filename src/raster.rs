//! RGBA raster implementation.

use crate::container::BlendMethod;

/// Rectangle on the canvas, in pixels.
#[derive(Clone,Copy,Debug,Default,Eq,PartialEq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Full-canvas RGBA buffer, four bytes per pixel, rows packed.
///
/// The decoder composites each frame onto one of these.
#[derive(Clone,Debug,Eq,PartialEq)]
pub struct Canvas {
    w: u32,
    h: u32,
    buf: Vec<u8>,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Rect { x: x, y: y, w: w, h: h }
    }

    /// Rectangle covering a whole `w` x `h` canvas.
    pub fn full(w: u32, h: u32) -> Self {
        Rect::new(0, 0, w, h)
    }

    /// True if the rectangle is non-empty and lies within the canvas.
    pub fn fits(&self, canvas_w: u32, canvas_h: u32) -> bool {
        self.w > 0 && self.h > 0
            && self.x as u64 + self.w as u64 <= canvas_w as u64
            && self.y as u64 + self.h as u64 <= canvas_h as u64
    }

    pub fn num_pixels(&self) -> usize {
        self.w as usize * self.h as usize
    }
}

impl Canvas {
    /// Allocate a canvas filled with a single RGBA color.
    pub fn new(w: u32, h: u32, color: [u8; 4]) -> Self {
        let mut buf = Vec::with_capacity(4 * w as usize * h as usize);
        for _ in 0..(w as usize * h as usize) {
            buf.extend_from_slice(&color);
        }
        Canvas { w: w, h: h, buf: buf }
    }

    pub fn width(&self) -> u32 {
        self.w
    }

    pub fn height(&self) -> u32 {
        self.h
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Fill the whole canvas.
    pub fn fill(&mut self, color: [u8; 4]) {
        for px in self.buf.chunks_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Fill a rectangle.  The rectangle must fit the canvas.
    pub fn fill_rect(&mut self, rect: &Rect, color: [u8; 4]) {
        debug_assert!(rect.fits(self.w, self.h));
        let stride = 4 * self.w as usize;
        let start = stride * rect.y as usize;
        let end = stride * (rect.y + rect.h) as usize;
        for row in self.buf[start..end].chunks_mut(stride) {
            let start = 4 * rect.x as usize;
            let end = start + 4 * rect.w as usize;
            for px in row[start..end].chunks_mut(4) {
                px.copy_from_slice(&color);
            }
        }
    }

    /// Draw a packed `rect.w` x `rect.h` RGBA buffer at the rectangle.
    pub fn blit(&mut self, rect: &Rect, src: &[u8], blend: BlendMethod) {
        debug_assert!(rect.fits(self.w, self.h));
        debug_assert_eq!(src.len(), 4 * rect.num_pixels());

        let stride = 4 * self.w as usize;
        let start = stride * rect.y as usize;
        let end = stride * (rect.y + rect.h) as usize;
        let src_rows = src.chunks(4 * rect.w as usize);
        let dst_rows = self.buf[start..end].chunks_mut(stride);
        for (src_row, dst_row) in src_rows.zip(dst_rows) {
            let start = 4 * rect.x as usize;
            let end = start + 4 * rect.w as usize;
            match blend {
                BlendMethod::Overwrite =>
                    dst_row[start..end].copy_from_slice(src_row),
                BlendMethod::AlphaBlend => {
                    for (s, d) in src_row.chunks(4).zip(dst_row[start..end].chunks_mut(4)) {
                        blend_pixel(s, d);
                    }
                },
            }
        }
    }
}

/// Composite a non-premultiplied source pixel over the destination.
///
///   blend.A   = src.A + dst.A * (1 - src.A / 255)
///   blend.RGB = (src.RGB * src.A + dst.RGB * dst.A * (1 - src.A / 255)) / blend.A
fn blend_pixel(src: &[u8], dst: &mut [u8]) {
    let src_a = src[3] as u32;
    if src_a == 255 {
        dst.copy_from_slice(src);
        return;
    } else if src_a == 0 {
        return;
    }

    let dst_factor = dst[3] as u32 * (255 - src_a) / 255;
    let blend_a = src_a + dst_factor;
    for c in 0..3 {
        let v = (src[c] as u32 * src_a + dst[c] as u32 * dst_factor) / blend_a;
        dst[c] = v as u8;
    }
    dst[3] = blend_a as u8;
}

/// Convert a packed ARGB color to RGBA bytes.
pub fn argb_to_rgba(argb: u32) -> [u8; 4] {
    [(argb >> 16) as u8, (argb >> 8) as u8, argb as u8, (argb >> 24) as u8]
}
