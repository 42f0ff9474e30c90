//! Animation decoder.
//!
//! The decoder walks the frames of a parsed container in stored order,
//! decompressing each payload and compositing it onto a canvas that
//! persists between frames.  Each call returns the whole canvas.
//!
//!   State     | Reached by
//!   ----------|----------------------------------------------
//!   Created   | `new`
//!   InfoRead  | `get_info`
//!   Iterating | `get_next` with frames left, or `reset`
//!   Exhausted | `get_next` returning the last frame
//!   Released  | `release`

use std::borrow::Cow;
use log::{trace,warn};

use crate::{AnimError,AnimResult};
use crate::codec::{FrameCodec,Vp8lStoreCodec};
use crate::container::{self,Container,DisposeMethod,Metadata};
use crate::raster::{Canvas,Rect,argb_to_rgba};

/// Largest canvas the decoder will allocate, in pixels.
pub const MAX_CANVAS_PIXELS: u64 = 1 << 28;

/// Decoder session state.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum DecoderState {
    Created,
    InfoRead,
    Iterating,
    Exhausted,
    Released,
}

/// Global animation properties.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub struct AnimationInfo {
    pub width: u32,
    pub height: u32,
    pub loop_count: u16,
    /// Packed ARGB.
    pub background_color: u32,
    pub frame_count: usize,
    pub has_alpha: bool,
}

/// A fully composited frame.
#[derive(Clone,Debug,Eq,PartialEq)]
pub struct DecodedFrame {
    /// Canvas-sized RGBA.
    pub pixels: Vec<u8>,
    /// Milliseconds since the start of the animation.
    pub timestamp: u32,
    pub duration: u32,
}

/// Every frame of an animation.
#[derive(Clone,Debug,Eq,PartialEq)]
pub struct DecodedAnimation {
    pub width: u32,
    pub height: u32,
    pub loop_count: u16,
    pub background_color: u32,
    pub frame_count: usize,
    pub frames: Vec<DecodedFrame>,
}

/// Animated WebP decode session.
pub struct AnimationDecoder<'a, C: FrameCodec = Vp8lStoreCodec> {
    data: Cow<'a, [u8]>,
    container: Container,
    codec: C,
    canvas: Option<Canvas>,
    // Rectangle to clear before drawing the next frame.
    pending_dispose: Option<Rect>,
    next_frame: usize,
    state: DecoderState,
}

/*--------------------------------------------------------------*/

impl<'a> AnimationDecoder<'a, Vp8lStoreCodec> {
    /// Open a container, using the built-in lossless codec.
    pub fn new<D>(data: D)
            -> AnimResult<Self>
            where D: Into<Cow<'a, [u8]>> {
        Self::with_codec(data, Vp8lStoreCodec::new())
    }
}

impl<'a, C: FrameCodec> AnimationDecoder<'a, C> {
    /// Open a container, decompressing frames with `codec`.
    ///
    /// Only the chunk layout is read; no frame is decoded yet.
    pub fn with_codec<D>(data: D, codec: C)
            -> AnimResult<Self>
            where D: Into<Cow<'a, [u8]>> {
        let data = data.into();
        let container = container::parse(&data)?;

        if container.frames.is_empty() {
            return Err(AnimError::InvalidContainer("no frames".to_string()));
        }
        if container.w as u64 * container.h as u64 > MAX_CANVAS_PIXELS {
            return Err(AnimError::InvalidContainer(
                    format!("canvas {}x{} too large", container.w, container.h)));
        }
        for (i, frame) in container.frames.iter().enumerate() {
            if !frame.rect.fits(container.w, container.h) {
                return Err(AnimError::InvalidContainer(
                        format!("frame {} at ({}, {}) size {}x{} exceeds canvas {}x{}",
                                i, frame.rect.x, frame.rect.y, frame.rect.w, frame.rect.h,
                                container.w, container.h)));
            }
        }

        Ok(AnimationDecoder {
            data: data,
            container: container,
            codec: codec,
            canvas: None,
            pending_dispose: None,
            next_frame: 0,
            state: DecoderState::Created,
        })
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn codec_mut(&mut self) -> &mut C {
        &mut self.codec
    }

    /// The canvas after the last frame returned, if any.
    pub fn canvas(&self) -> Option<&[u8]> {
        self.canvas.as_ref().map(|c| c.as_bytes())
    }

    /// Global animation properties.  May be called any number of times
    /// before `release`.
    pub fn get_info(&mut self)
            -> AnimResult<AnimationInfo> {
        match self.state {
            DecoderState::Released => return Err(AnimError::InfoUnavailable),
            DecoderState::Created => self.state = DecoderState::InfoRead,
            _ => (),
        }

        Ok(AnimationInfo {
            width: self.container.w,
            height: self.container.h,
            loop_count: self.container.params.loop_count,
            background_color: self.container.params.background_color,
            frame_count: self.container.frames.len(),
            has_alpha: self.container.has_alpha,
        })
    }

    /// ICC profile, EXIF and XMP chunks.
    pub fn metadata(&self)
            -> AnimResult<Metadata> {
        if self.state == DecoderState::Released {
            return Err(AnimError::InfoUnavailable);
        }
        Ok(self.container.metadata(&self.data))
    }

    /// Decode the next frame.  Returns `None` once every frame has been
    /// returned.
    ///
    /// If decoding fails the canvas is left as it was and the same frame
    /// is attempted again on the next call.
    pub fn get_next(&mut self)
            -> AnimResult<Option<DecodedFrame>> {
        match self.state {
            DecoderState::Released => return Err(AnimError::SessionClosed),
            DecoderState::Exhausted => return Ok(None),
            DecoderState::Created => { self.get_info()?; },
            DecoderState::InfoRead | DecoderState::Iterating => (),
        }
        if self.next_frame >= self.container.frames.len() {
            self.state = DecoderState::Exhausted;
            return Ok(None);
        }

        let index = self.next_frame;
        let frame = &self.container.frames[index];
        let payload = frame.payload(&self.data);
        let pixels = self.codec.decompress(payload, frame.rect.w, frame.rect.h)
            .map_err(|e| match e {
                AnimError::DecodeFailed(reason) => AnimError::DecodeFailed(reason),
                other => AnimError::DecodeFailed(other.to_string()),
            })?;
        if pixels.len() != 4 * frame.rect.num_pixels() {
            return Err(AnimError::DecodeFailed(
                    format!("frame {}: codec returned {} bytes for {}x{}",
                            index, pixels.len(), frame.rect.w, frame.rect.h)));
        }

        let background = argb_to_rgba(self.container.params.background_color);
        let (w, h) = (self.container.w, self.container.h);
        let canvas = self.canvas.get_or_insert_with(|| Canvas::new(w, h, background));
        if let Some(rect) = self.pending_dispose.take() {
            canvas.fill_rect(&rect, background);
        }
        canvas.blit(&frame.rect, &pixels, frame.blend);

        self.pending_dispose =
            if frame.dispose == DisposeMethod::Background {
                Some(frame.rect)
            } else {
                None
            };
        self.next_frame += 1;
        self.state =
            if self.next_frame == self.container.frames.len() {
                DecoderState::Exhausted
            } else {
                DecoderState::Iterating
            };

        trace!("decoded frame {} at {} ms", index, frame.timestamp);

        Ok(Some(DecodedFrame {
            pixels: canvas.as_bytes().to_vec(),
            timestamp: frame.timestamp,
            duration: frame.duration,
        }))
    }

    /// Rewind to the first frame and clear the canvas to the background
    /// color.
    pub fn reset(&mut self)
            -> AnimResult<()> {
        if self.state == DecoderState::Released {
            return Err(AnimError::SessionClosed);
        }

        let background = argb_to_rgba(self.container.params.background_color);
        if let Some(ref mut canvas) = self.canvas {
            canvas.fill(background);
        }
        self.pending_dispose = None;
        self.next_frame = 0;
        self.state = DecoderState::Iterating;
        Ok(())
    }

    /// Free the canvas and container.  Safe to call more than once.
    pub fn release(&mut self) {
        self.canvas = None;
        self.data = Cow::Borrowed(&[]);
        self.container.frames = Vec::new();
        self.pending_dispose = None;
        self.state = DecoderState::Released;
    }

    /// Decode every frame, from the first.
    pub fn decode_all(&mut self)
            -> AnimResult<DecodedAnimation> {
        let info = self.get_info()?;
        self.reset()?;

        let mut frames = Vec::with_capacity(info.frame_count);
        while let Some(frame) = self.get_next()? {
            frames.push(frame);
        }

        Ok(DecodedAnimation {
            width: info.width,
            height: info.height,
            loop_count: info.loop_count,
            background_color: info.background_color,
            frame_count: frames.len(),
            frames: frames,
        })
    }
}

/// Stops after the first error.
impl<'a, C: FrameCodec> Iterator for AnimationDecoder<'a, C> {
    type Item = AnimResult<DecodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.get_next();
        if result.is_err() && self.state != DecoderState::Released {
            self.state = DecoderState::Exhausted;
        }
        result.transpose()
    }
}

impl<'a, C: FrameCodec> Drop for AnimationDecoder<'a, C> {
    fn drop(&mut self) {
        if self.state != DecoderState::Released {
            warn!("decoder dropped without release");
        }
    }
}

/*--------------------------------------------------------------*/

/// Decode a whole animation with the built-in lossless codec.
///
/// # Examples
///
/// ```
/// use webpanim::{AnimationEncoder,AnimationOptions,FrameConfig};
///
/// let mut encoder = AnimationEncoder::new(2, 2, AnimationOptions::default()).unwrap();
/// encoder.add_rgba(Some(&[0u8; 16][..]), 0, &FrameConfig::lossless()).unwrap();
/// let webp = encoder.finalize().unwrap();
///
/// let anim = webpanim::decode(&webp).unwrap();
/// assert_eq!(anim.frame_count, 1);
/// ```
pub fn decode(data: &[u8])
        -> AnimResult<DecodedAnimation> {
    decode_with(data, Vp8lStoreCodec::new())
}

/// Decode a whole animation, decompressing frames with `codec`.
pub fn decode_with<C: FrameCodec>(data: &[u8], codec: C)
        -> AnimResult<DecodedAnimation> {
    let mut decoder = AnimationDecoder::with_codec(data, codec)?;
    let result = decoder.decode_all();
    decoder.release();
    result
}

#[cfg(test)]
mod tests {
    use byteorder::LittleEndian as LE;
    use byteorder::WriteBytesExt;
    use pretty_assertions::assert_eq;
    use crate::AnimError;
    use crate::codec::{FramePayload,PayloadFormat,encode_vp8l};
    use crate::container::{AnimationParams,BlendMethod,ContainerMuxer,DisposeMethod,FrameChunk};
    use crate::raster::Rect;
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const BACKGROUND: u32 = 0x8000FF00;

    fn lossless(rgba: [u8; 4], rect: &Rect) -> FramePayload {
        let pixels = rgba.repeat(rect.num_pixels());
        FramePayload {
            format: PayloadFormat::Lossless,
            bitstream: encode_vp8l(&pixels, rect.w, rect.h).expect("encode"),
            alpha: None,
        }
    }

    /// A 4x4 red frame, then a 2x2 blue frame at (2, 2).
    fn partial_update(dispose: DisposeMethod) -> Vec<u8> {
        let full = Rect::full(4, 4);
        let part = Rect::new(2, 2, 2, 2);
        let a = lossless(RED, &full);
        let b = lossless(BLUE, &part);
        let frames = [
            FrameChunk {
                rect: full,
                duration: 100,
                dispose: dispose,
                blend: BlendMethod::Overwrite,
                payload: a.as_ref(),
            },
            FrameChunk {
                rect: part,
                duration: 50,
                dispose: DisposeMethod::None,
                blend: BlendMethod::AlphaBlend,
                payload: b.as_ref(),
            },
        ];
        let params = AnimationParams { background_color: BACKGROUND, loop_count: 0 };
        ContainerMuxer::new(4, 4, params).assemble(&frames).expect("assemble")
    }

    fn pixel(buf: &[u8], x: usize, y: usize) -> [u8; 4] {
        let i = 4 * (4 * y + x);
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    #[test]
    fn test_partial_update_compositing() {
        let data = partial_update(DisposeMethod::None);
        let mut decoder = AnimationDecoder::new(&data[..]).expect("new");

        let first = decoder.get_next().expect("decode").expect("frame");
        assert_eq!(first.pixels, RED.repeat(16));

        let second = decoder.get_next().expect("decode").expect("frame");
        assert_eq!(second.timestamp, 100);
        for y in 0..4 {
            for x in 0..4 {
                let expected = if x >= 2 && y >= 2 { BLUE } else { RED };
                assert_eq!(pixel(&second.pixels, x, y), expected, "pixel ({}, {})", x, y);
            }
        }
        decoder.release();
    }

    #[test]
    fn test_dispose_to_background() {
        let data = partial_update(DisposeMethod::Background);
        let mut decoder = AnimationDecoder::new(&data[..]).expect("new");
        decoder.get_next().expect("decode");
        let second = decoder.get_next().expect("decode").expect("frame");

        assert_eq!(pixel(&second.pixels, 0, 0), argb_to_rgba(BACKGROUND));
        assert_eq!(pixel(&second.pixels, 3, 3), BLUE);
        decoder.release();
    }

    #[test]
    fn test_state_machine() {
        let data = partial_update(DisposeMethod::None);
        let mut decoder = AnimationDecoder::new(data.clone()).expect("new");
        assert_eq!(decoder.state(), DecoderState::Created);

        let info = decoder.get_info().expect("info");
        assert_eq!(decoder.get_info().expect("info"), info);
        assert_eq!(decoder.state(), DecoderState::InfoRead);
        assert_eq!((info.width, info.height, info.frame_count), (4, 4, 2));
        assert_eq!(info.background_color, BACKGROUND);

        let first = decoder.get_next().expect("decode").expect("frame");
        assert_eq!(decoder.state(), DecoderState::Iterating);
        decoder.get_next().expect("decode").expect("frame");
        assert_eq!(decoder.state(), DecoderState::Exhausted);
        assert_eq!(decoder.get_next().expect("decode"), None);
        assert_eq!(decoder.get_next().expect("decode"), None);

        decoder.reset().expect("reset");
        assert_eq!(decoder.state(), DecoderState::Iterating);
        assert_eq!(decoder.get_next().expect("decode"), Some(first));

        decoder.release();
        decoder.release();
        assert!(matches!(decoder.get_info(), Err(AnimError::InfoUnavailable)));
        assert!(matches!(decoder.get_next(), Err(AnimError::SessionClosed)));
        assert!(matches!(decoder.reset(), Err(AnimError::SessionClosed)));
    }

    #[test]
    fn test_get_next_without_info() {
        let data = partial_update(DisposeMethod::None);
        let mut decoder = AnimationDecoder::new(&data[..]).expect("new");
        assert!(decoder.get_next().expect("decode").is_some());
        decoder.release();
    }

    #[test]
    fn test_failed_frame_keeps_canvas() {
        let full = Rect::full(2, 2);
        let a = lossless(RED, &full);
        let frames = [
            FrameChunk {
                rect: full,
                duration: 10,
                dispose: DisposeMethod::None,
                blend: BlendMethod::Overwrite,
                payload: a.as_ref(),
            },
            FrameChunk {
                rect: full,
                duration: 10,
                dispose: DisposeMethod::None,
                blend: BlendMethod::Overwrite,
                payload: crate::codec::PayloadRef {
                    format: PayloadFormat::Lossy,
                    bitstream: &[0; 10],
                    alpha: None,
                },
            },
        ];
        let data = ContainerMuxer::new(2, 2, AnimationParams::default())
            .assemble(&frames).expect("assemble");

        let mut decoder = AnimationDecoder::new(&data[..]).expect("new");
        decoder.get_next().expect("decode");
        let before = decoder.canvas().expect("canvas").to_vec();

        for _ in 0..2 {
            match decoder.get_next() {
                Err(AnimError::DecodeFailed(_)) => (),
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(decoder.canvas().expect("canvas"), &before[..]);
        }

        match decode(&data) {
            Err(AnimError::DecodeFailed(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
        decoder.release();
    }

    #[test]
    fn test_iterator() {
        let data = partial_update(DisposeMethod::None);
        let mut decoder = AnimationDecoder::new(&data[..]).expect("new");
        let timestamps: Vec<u32> = decoder.by_ref()
            .map(|frame| frame.expect("decode").timestamp)
            .collect();
        assert_eq!(timestamps, vec![0, 100]);
        decoder.release();
    }

    #[test]
    fn test_invalid_container() {
        match AnimationDecoder::new(&b"RIFF\x04\x00\x00\x00WEBX"[..]) {
            Err(AnimError::MalformedContainer(_)) => (),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        // Shrink the canvas below the first frame's size.
        let mut data = partial_update(DisposeMethod::None);
        (&mut data[24..27]).write_u24::<LE>(1).expect("write");
        match AnimationDecoder::new(&data[..]) {
            Err(AnimError::InvalidContainer(_)) => (),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        };
    }

    #[test]
    fn test_decode_still_image() {
        let rect = Rect::full(2, 1);
        let payload = lossless(BLUE, &rect);
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        let padded = payload.bitstream.len() + (payload.bitstream.len() & 1);
        data.write_u32::<LE>((4 + 8 + padded) as u32).expect("write");
        data.extend_from_slice(b"WEBPVP8L");
        data.write_u32::<LE>(payload.bitstream.len() as u32).expect("write");
        data.extend_from_slice(&payload.bitstream);
        if payload.bitstream.len() & 1 != 0 {
            data.push(0);
        }

        let anim = decode(&data).expect("decode");
        assert_eq!((anim.width, anim.height, anim.loop_count), (2, 1, 0));
        assert_eq!(anim.frame_count, 1);
        assert_eq!(anim.frames[0].pixels, BLUE.repeat(2));
    }
}
