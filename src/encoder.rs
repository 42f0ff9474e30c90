//! Animation encoder.
//!
//! Frames are compressed as they arrive and held until `finalize`,
//! which assembles the container in the order the frames were added.

use log::{debug,warn};

use crate::{AnimError,AnimResult};
use crate::codec::{FrameCodec,FrameConfig,FramePayload,Vp8lStoreCodec};
use crate::container::{AnimationParams,BlendMethod,ContainerMuxer,
        DisposeMethod,FrameChunk,MAX_FRAME_DURATION,Metadata};
use crate::import::{FrameImporter,PixelLayout,PixelSource,RawImage};
use crate::raster::Rect;
use crate::remux;

/// Duration given to the last frame of a single-frame animation.
pub const DEFAULT_FRAME_DURATION: u32 = 100;

/// Largest canvas width or height accepted by the encoder.
pub const MAX_CANVAS_SIZE: u32 = 16384;

/// Animation-wide encoding options.
#[derive(Clone,Debug,Eq,PartialEq)]
pub struct AnimationOptions {
    /// Packed ARGB background color.
    pub background_color: u32,
    /// Number of loops, 0 is infinite.
    pub loop_count: u16,
    /// Encode only the region that changed since the previous frame.
    pub minimize_size: bool,
    /// Duration of the last frame, in milliseconds.  If unset, the
    /// average of the other frames' durations is used.
    pub last_frame_duration: Option<u32>,
}

/// An accepted frame, waiting for assembly.
#[derive(Clone,Debug)]
struct PendingFrame {
    timestamp: u32,
    rect: Rect,
    blend: BlendMethod,
    // Index into the encoder's payloads.  Repeat frames share the
    // payload of the frame they repeat.
    payload: usize,
}

/// Animated WebP encode session.
pub struct AnimationEncoder<C: FrameCodec = Vp8lStoreCodec> {
    w: u32,
    h: u32,
    options: AnimationOptions,
    metadata: Metadata,
    codec: C,
    importer: FrameImporter,
    frames: Vec<PendingFrame>,
    payloads: Vec<FramePayload>,
    // Canvas after the last accepted frame, kept for minimize_size.
    previous: Option<Vec<u8>>,
    closed: bool,
}

/*--------------------------------------------------------------*/

impl Default for AnimationOptions {
    fn default() -> Self {
        AnimationOptions {
            background_color: 0,
            loop_count: 0,
            minimize_size: false,
            last_frame_duration: None,
        }
    }
}

impl AnimationEncoder<Vp8lStoreCodec> {
    /// Start an encode session for a `w` x `h` canvas, using the
    /// built-in lossless codec.
    ///
    /// # Examples
    ///
    /// ```
    /// use webpanim::{AnimationEncoder,AnimationOptions,FrameConfig};
    ///
    /// let red = [255u8, 0, 0, 255].repeat(16);
    /// let mut encoder = AnimationEncoder::new(4, 4, AnimationOptions::default()).unwrap();
    /// encoder.add_rgba(Some(&red), 0, &FrameConfig::lossless()).unwrap();
    /// let webp = encoder.finalize().unwrap();
    /// assert_eq!(&webp[0..4], b"RIFF");
    /// ```
    pub fn new(w: u32, h: u32, options: AnimationOptions)
            -> AnimResult<Self> {
        Self::with_codec(w, h, options, Vp8lStoreCodec::new())
    }
}

impl<C: FrameCodec> AnimationEncoder<C> {
    /// Start an encode session compressing frames with `codec`.
    ///
    /// Both dimensions must lie in `1..=MAX_CANVAS_SIZE`, and a fixed
    /// last frame duration in `1..=MAX_FRAME_DURATION`.
    pub fn with_codec(w: u32, h: u32, options: AnimationOptions, codec: C)
            -> AnimResult<Self> {
        check_canvas_size(w, h)?;
        if let Some(d) = options.last_frame_duration {
            if d == 0 || d > MAX_FRAME_DURATION {
                return Err(AnimError::InvalidTimestamp(d, 0));
            }
        }

        Ok(AnimationEncoder {
            w: w,
            h: h,
            options: options,
            metadata: Metadata::default(),
            codec: codec,
            importer: FrameImporter::new(w, h),
            frames: Vec::new(),
            payloads: Vec::new(),
            previous: None,
            closed: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.w
    }

    pub fn height(&self) -> u32 {
        self.h
    }

    pub fn options(&self) -> &AnimationOptions {
        &self.options
    }

    /// Number of frames accepted so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// True after `finalize` succeeded or `release` was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut C {
        &mut self.codec
    }

    /// Set the ICC profile, EXIF and XMP chunks to write.
    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    /// Add a frame shown from `timestamp` milliseconds.
    ///
    /// `None` repeats the previous frame without invoking the codec.
    /// Timestamps must be strictly increasing.  On failure nothing is
    /// added and the session stays usable.
    pub fn add_frame<S: PixelSource + ?Sized>(
            &mut self, pixels: Option<&S>, timestamp: u32, config: &FrameConfig)
            -> AnimResult<()> {
        if self.closed {
            return Err(AnimError::SessionClosed);
        }
        self.check_timestamp(timestamp)?;

        let src = match pixels {
            Some(src) => src,
            None => return self.push_repeat(timestamp),
        };

        let rgba = self.importer.import(src)?;
        config.validate()?;

        let rect = match self.previous {
            Some(ref prev) if self.options.minimize_size =>
                changed_rect(prev, &rgba, self.w, self.h)
                    .unwrap_or(Rect::new(0, 0, 1, 1)),
            _ => Rect::full(self.w, self.h),
        };

        let payload =
            if rect == Rect::full(self.w, self.h) {
                self.codec.compress(&rgba, self.w, self.h, config)
            } else {
                let sub = crop(&rgba, self.w, &rect);
                self.codec.compress(&sub, rect.w, rect.h, config)
            };
        let payload = payload.map_err(|e| match e {
            AnimError::EncodeFailed(reason) => AnimError::EncodeFailed(reason),
            other => AnimError::EncodeFailed(other.to_string()),
        })?;

        debug!("frame {} at {} ms: {}x{}+{}+{}, {} bytes",
                self.frames.len(), timestamp, rect.w, rect.h, rect.x, rect.y,
                payload.bitstream.len());

        self.payloads.push(payload);
        self.frames.push(PendingFrame {
            timestamp: timestamp,
            rect: rect,
            blend: BlendMethod::Overwrite,
            payload: self.payloads.len() - 1,
        });
        if self.options.minimize_size {
            self.previous = Some(rgba.into_owned());
        }
        Ok(())
    }

    /// Add a packed RGBA frame, or repeat the previous one with `None`.
    pub fn add_rgba(&mut self, rgba: Option<&[u8]>, timestamp: u32, config: &FrameConfig)
            -> AnimResult<()> {
        match rgba {
            Some(buf) => {
                let stride = 4 * self.w as usize;
                let expected = stride * self.h as usize;
                if buf.len() != expected {
                    // Round away from the expected height, so a partial
                    // row never reports as a match.
                    let rows = if buf.len() < expected {
                        buf.len() / stride
                    } else {
                        (buf.len() + stride - 1) / stride
                    };
                    return Err(AnimError::DimensionMismatch(
                            (self.w, self.h), (self.w, rows as u32)));
                }
                let image = RawImage::new(buf, self.w, self.h, PixelLayout::Rgba8)?;
                self.add_frame(Some(&image), timestamp, config)
            },
            None => self.add_repeat(timestamp),
        }
    }

    /// Show the previous frame again from `timestamp`.
    pub fn add_repeat(&mut self, timestamp: u32)
            -> AnimResult<()> {
        self.add_frame(None::<&RawImage>, timestamp, &FrameConfig::default())
    }

    /// Assemble the container.
    ///
    /// Closes the session on success.  With no frames this fails with
    /// `EmptyAnimation` and the session stays open.
    pub fn finalize(&mut self)
            -> AnimResult<Vec<u8>> {
        if self.closed {
            return Err(AnimError::SessionClosed);
        }
        if self.frames.is_empty() {
            return Err(AnimError::EmptyAnimation);
        }

        let durations = self.durations();
        let chunks: Vec<FrameChunk> = self.frames.iter().zip(durations.iter())
            .map(|(frame, &duration)| FrameChunk {
                rect: frame.rect,
                duration: duration,
                dispose: DisposeMethod::None,
                blend: frame.blend,
                payload: self.payloads[frame.payload].as_ref(),
            })
            .collect();

        let params = AnimationParams {
            background_color: self.options.background_color,
            loop_count: 0,
        };
        let mut muxer = ContainerMuxer::new(self.w, self.h, params);
        muxer.set_metadata(self.metadata.clone());
        let mut data = muxer.assemble(&chunks)?;

        if self.options.loop_count > 0 {
            remux::set_loop_count(&mut data, self.options.loop_count)?;
        }

        debug!("finalized {} frame(s) into {} bytes", self.frames.len(), data.len());
        self.release();
        Ok(data)
    }

    /// Drop all buffered frames and close the session.  Safe to call
    /// more than once.
    pub fn release(&mut self) {
        self.frames = Vec::new();
        self.payloads = Vec::new();
        self.previous = None;
        self.closed = true;
    }

    fn check_timestamp(&self, timestamp: u32)
            -> AnimResult<()> {
        if let Some(last) = self.frames.last() {
            if timestamp <= last.timestamp
                    || timestamp - last.timestamp > MAX_FRAME_DURATION {
                return Err(AnimError::InvalidTimestamp(timestamp, last.timestamp));
            }
        }
        Ok(())
    }

    fn push_repeat(&mut self, timestamp: u32)
            -> AnimResult<()> {
        let last = match self.frames.last() {
            Some(last) => last.clone(),
            None => return Err(AnimError::EncodeFailed(
                    "no previous frame to repeat".to_string())),
        };

        self.frames.push(PendingFrame {
            timestamp: timestamp,
            ..last
        });
        Ok(())
    }

    /// Frame durations, from the gaps between timestamps.
    fn durations(&self)
            -> Vec<u32> {
        let mut durations: Vec<u32> = self.frames.windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect();

        let last = match self.options.last_frame_duration {
            Some(d) => d,
            None if durations.is_empty() => DEFAULT_FRAME_DURATION,
            None => {
                let sum: u64 = durations.iter().map(|&d| d as u64).sum();
                (sum / durations.len() as u64) as u32
            },
        };
        durations.push(last);
        durations
    }
}

impl<C: FrameCodec> Drop for AnimationEncoder<C> {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            warn!("encoder dropped with {} frame(s) never finalized", self.frames.len());
        }
    }
}

/*--------------------------------------------------------------*/

/// Fails with `DimensionMismatch` if `w` x `h` is not an encodable
/// canvas.  The expected size reported is the nearest valid one.
pub fn check_canvas_size(w: u32, h: u32)
        -> AnimResult<()> {
    let clamp = |n: u32| n.max(1).min(MAX_CANVAS_SIZE);
    if clamp(w) != w || clamp(h) != h {
        return Err(AnimError::DimensionMismatch((clamp(w), clamp(h)), (w, h)));
    }
    Ok(())
}

/// Bounding box of the pixels that differ between two canvases, with
/// its origin snapped to even coordinates.  None if they are identical.
fn changed_rect(prev: &[u8], next: &[u8], w: u32, h: u32)
        -> Option<Rect> {
    let (mut x0, mut y0) = (w, h);
    let (mut x1, mut y1) = (0, 0);

    let stride = 4 * w as usize;
    for (y, (a, b)) in prev.chunks(stride).zip(next.chunks(stride)).enumerate() {
        if a == b {
            continue;
        }
        let y = y as u32;
        for (x, (p, q)) in a.chunks(4).zip(b.chunks(4)).enumerate() {
            if p != q {
                let x = x as u32;
                x0 = x0.min(x);
                x1 = x1.max(x + 1);
                y0 = y0.min(y);
                y1 = y1.max(y + 1);
            }
        }
    }

    if x1 == 0 {
        return None;
    }
    let x0 = x0 & !1;
    let y0 = y0 & !1;
    Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
}

/// Copy a rectangle out of a packed RGBA canvas.
fn crop(rgba: &[u8], w: u32, rect: &Rect)
        -> Vec<u8> {
    let stride = 4 * w as usize;
    let mut out = Vec::with_capacity(4 * rect.num_pixels());
    for row in rgba.chunks(stride).skip(rect.y as usize).take(rect.h as usize) {
        let start = 4 * rect.x as usize;
        out.extend_from_slice(&row[start..(start + 4 * rect.w as usize)]);
    }
    out
}
