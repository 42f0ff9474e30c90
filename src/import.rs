//! Frame import: normalise pixel sources to canonical RGBA.

use std::borrow::Cow;

use crate::{AnimError,AnimResult};

/// Memory layout of a raw pixel buffer.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum PixelLayout {
    Rgba8,
    Bgra8,
    Rgb8,
    Bgr8,
    /// Luma.
    L8,
    /// Luma and alpha.
    La8,
}

/// Anything that can produce RGBA pixels.
pub trait PixelSource {
    /// Width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// The RGBA pixel at (x, y).  Sources without alpha report 255.
    fn rgba_at(&self, x: u32, y: u32) -> [u8; 4];

    /// Rows of canonical RGBA and their stride in bytes, if the source
    /// is already stored that way.
    fn rgba_rows(&self) -> Option<(&[u8], usize)> {
        None
    }
}

/// A borrowed pixel buffer with an explicit layout and stride.
#[derive(Clone,Copy,Debug)]
pub struct RawImage<'a> {
    data: &'a [u8],
    w: u32,
    h: u32,
    stride: usize,
    layout: PixelLayout,
}

/// Converts pixel sources into the fixed-size RGBA buffers the encoder
/// requires.
#[derive(Clone,Copy,Debug)]
pub struct FrameImporter {
    w: u32,
    h: u32,
}

/*--------------------------------------------------------------*/

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgba8 | PixelLayout::Bgra8 => 4,
            PixelLayout::Rgb8 | PixelLayout::Bgr8 => 3,
            PixelLayout::La8 => 2,
            PixelLayout::L8 => 1,
        }
    }
}

impl<'a> RawImage<'a> {
    /// Wrap a tightly packed buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use webpanim::import::{PixelLayout,RawImage};
    ///
    /// let rgb = [0u8; 2 * 2 * 3];
    /// let image = RawImage::new(&rgb, 2, 2, PixelLayout::Rgb8).unwrap();
    /// ```
    pub fn new(data: &'a [u8], w: u32, h: u32, layout: PixelLayout)
            -> AnimResult<Self> {
        Self::with_stride(data, w, h, w as usize * layout.bytes_per_pixel(), layout)
    }

    /// Wrap a buffer whose rows are `stride` bytes apart.
    pub fn with_stride(
            data: &'a [u8], w: u32, h: u32, stride: usize, layout: PixelLayout)
            -> AnimResult<Self> {
        let row_len = w as usize * layout.bytes_per_pixel();
        if stride < row_len {
            return Err(AnimError::DimensionMismatch(
                    (w, h), ((stride / layout.bytes_per_pixel()) as u32, h)));
        }

        let needed = if h == 0 { 0 } else { stride * (h as usize - 1) + row_len };
        if data.len() < needed {
            let rows = if stride == 0 { 0 } else { data.len() / stride };
            return Err(AnimError::DimensionMismatch((w, h), (w, rows as u32)));
        }

        Ok(RawImage {
            data: data,
            w: w,
            h: h,
            stride: stride,
            layout: layout,
        })
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }
}

impl<'a> PixelSource for RawImage<'a> {
    fn dimensions(&self) -> (u32, u32) {
        (self.w, self.h)
    }

    fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let bpp = self.layout.bytes_per_pixel();
        let i = self.stride * y as usize + bpp * x as usize;
        let p = &self.data[i..(i + bpp)];
        match self.layout {
            PixelLayout::Rgba8 => [p[0], p[1], p[2], p[3]],
            PixelLayout::Bgra8 => [p[2], p[1], p[0], p[3]],
            PixelLayout::Rgb8 => [p[0], p[1], p[2], 0xFF],
            PixelLayout::Bgr8 => [p[2], p[1], p[0], 0xFF],
            PixelLayout::L8 => [p[0], p[0], p[0], 0xFF],
            PixelLayout::La8 => [p[0], p[0], p[0], p[1]],
        }
    }

    fn rgba_rows(&self) -> Option<(&[u8], usize)> {
        if self.layout == PixelLayout::Rgba8 {
            Some((self.data, self.stride))
        } else {
            None
        }
    }
}

impl FrameImporter {
    /// Importer for a `w` x `h` canvas.
    pub fn new(w: u32, h: u32) -> Self {
        FrameImporter { w: w, h: h }
    }

    /// Normalise a pixel source to packed RGBA.
    ///
    /// Packed RGBA sources pass through without a copy.  Anything else
    /// is converted into a new buffer.  The source must match the
    /// canvas size exactly; it is never cropped or scaled.
    pub fn import<'a, S: PixelSource + ?Sized>(&self, src: &'a S)
            -> AnimResult<Cow<'a, [u8]>> {
        let (w, h) = src.dimensions();
        if w != self.w || h != self.h {
            return Err(AnimError::DimensionMismatch((self.w, self.h), (w, h)));
        }

        let row_len = 4 * w as usize;
        let len = row_len * h as usize;

        if let Some((data, stride)) = src.rgba_rows() {
            if stride == row_len && data.len() >= len {
                return Ok(Cow::Borrowed(&data[..len]));
            } else if stride >= row_len {
                let mut buf = Vec::with_capacity(len);
                for row in data.chunks(stride).take(h as usize) {
                    if row.len() < row_len {
                        return Err(AnimError::DimensionMismatch(
                                (self.w, self.h), (w, (buf.len() / row_len) as u32)));
                    }
                    buf.extend_from_slice(&row[..row_len]);
                }
                if buf.len() == len {
                    return Ok(Cow::Owned(buf));
                }
                return Err(AnimError::DimensionMismatch(
                        (self.w, self.h), (w, (buf.len() / row_len) as u32)));
            }
        }

        let mut buf = Vec::with_capacity(len);
        for y in 0..h {
            for x in 0..w {
                buf.extend_from_slice(&src.rgba_at(x, y));
            }
        }
        Ok(Cow::Owned(buf))
    }
}
