//! WebP container implementation.
//!
//! An animated WebP file is a RIFF file made of chunks.  Every chunk
//! starts with an 8-byte header, described below.  All values are
//! little-endian.
//!
//!   Offset | Length |  Name   | Description
//!   ------:| ------:|:-------:| -------------------------------------
//!        0 |      4 |  fourcc | Chunk identifier, e.g. "ANMF".
//!        4 |      4 |   size  | Size of the payload, excluding this header and padding.
//!        8 |   size | payload | Chunk data.  One zero byte of padding follows if size is odd.
//!
//! The file itself is a single RIFF chunk whose payload begins with
//! "WEBP" and continues with the VP8X, optional ICCP, ANIM, one ANMF
//! per frame, then optional EXIF and XMP chunks.

use std::io::{Cursor,Read,Write};
use std::ops::Range;
use byteorder::LittleEndian as LE;
use byteorder::{ReadBytesExt,WriteBytesExt};
use log::{debug,warn};

use crate::{AnimError,AnimResult};
use crate::codec::{PayloadFormat,PayloadRef,VP8L_SIGNATURE};
use crate::raster::Rect;

/// Magic for the file wrapper chunk.
pub const FCC_RIFF: &[u8; 4] = b"RIFF";

/// Form type following the RIFF chunk header.
pub const FCC_WEBP: &[u8; 4] = b"WEBP";

/// Magic for the extended format header.
///
///   Offset | Length |   Name   | Description
///   ------:| ------:|:--------:| -----------------------------------
///        0 |      1 |   flags  | Bit 1 animation, bit 2 XMP, bit 3 EXIF, bit 4 alpha, bit 5 ICC.
///        1 |      3 | reserved | Set to zero.
///        4 |      3 |   width  | Canvas width minus one.
///        7 |      3 |  height  | Canvas height minus one.
pub const FCC_VP8X: &[u8; 4] = b"VP8X";

/// Magic for the animation parameters chunk.
///
///   Offset | Length |   Name   | Description
///   ------:| ------:|:--------:| -----------------------------------
///        0 |      4 |  bgcolor | Background color, bytes in B, G, R, A order.
///        4 |      2 |   loops  | Number of times to play the animation, 0 is infinite.
pub const FCC_ANIM: &[u8; 4] = b"ANIM";

/// Magic for an animation frame chunk.
///
///   Offset | Length |   Name   | Description
///   ------:| ------:|:--------:| -----------------------------------
///        0 |      3 |     x    | Frame x offset divided by 2.
///        3 |      3 |     y    | Frame y offset divided by 2.
///        6 |      3 |   width  | Frame width minus one.
///        9 |      3 |  height  | Frame height minus one.
///       12 |      3 | duration | Display time in milliseconds.
///       15 |      1 |   flags  | Bit 0 dispose to background, bit 1 do not blend.
///       16 |      - |   data   | ALPH and VP8, or VP8L, sub-chunks.
pub const FCC_ANMF: &[u8; 4] = b"ANMF";

/// Magic for a lossy bitstream chunk.
pub const FCC_VP8: &[u8; 4] = b"VP8 ";

/// Magic for a lossless bitstream chunk.
pub const FCC_VP8L: &[u8; 4] = b"VP8L";

/// Magic for the alpha plane of a lossy frame.
pub const FCC_ALPH: &[u8; 4] = b"ALPH";

pub const FCC_ICCP: &[u8; 4] = b"ICCP";
pub const FCC_EXIF: &[u8; 4] = b"EXIF";
pub const FCC_XMP: &[u8; 4] = b"XMP ";

/// Size of a chunk header on disk.
pub const SIZE_OF_CHUNK_HEADER: usize = 8;

/// Size of the VP8X payload.
pub const SIZE_OF_VP8X: usize = 10;

/// Size of the ANIM payload.
pub const SIZE_OF_ANIM: usize = 6;

/// Size of the fixed part of an ANMF payload.
pub const SIZE_OF_ANMF_HEADER: usize = 16;

/// Largest canvas width or height the VP8X chunk can describe.
pub const MAX_CANVAS_DIMENSION: u32 = 1 << 24;

/// Largest frame duration, in milliseconds.
pub const MAX_FRAME_DURATION: u32 = (1 << 24) - 1;

const VP8X_FLAG_ANIMATION: u8 = 0x02;
const VP8X_FLAG_XMP: u8 = 0x04;
const VP8X_FLAG_EXIF: u8 = 0x08;
const VP8X_FLAG_ALPHA: u8 = 0x10;
const VP8X_FLAG_ICC: u8 = 0x20;
const VP8X_FLAGS_KNOWN: u8 = VP8X_FLAG_ANIMATION | VP8X_FLAG_XMP
        | VP8X_FLAG_EXIF | VP8X_FLAG_ALPHA | VP8X_FLAG_ICC;

/// Highest VP8 frame tag version.
const VP8_MAX_VERSION: u8 = 3;

const ANMF_FLAG_DISPOSE_BACKGROUND: u8 = 0x01;
const ANMF_FLAG_NO_BLEND: u8 = 0x02;

/// What happens to the frame's rectangle before the next frame is drawn.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum DisposeMethod {
    /// Leave the canvas as it is.
    None,
    /// Fill the frame's rectangle with the background color.
    Background,
}

/// How the frame is drawn onto the canvas.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum BlendMethod {
    /// Alpha-composite the frame over the canvas.
    AlphaBlend,
    /// Replace the canvas pixels in the frame's rectangle.
    Overwrite,
}

/// Global animation parameters, stored in the ANIM chunk.
#[derive(Clone,Copy,Debug,Default,Eq,PartialEq)]
pub struct AnimationParams {
    /// Packed ARGB.
    pub background_color: u32,
    /// 0 loops forever.
    pub loop_count: u16,
}

/// A frame to be written into an ANMF chunk.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub struct FrameChunk<'a> {
    pub rect: Rect,
    pub duration: u32,
    pub dispose: DisposeMethod,
    pub blend: BlendMethod,
    pub payload: PayloadRef<'a>,
}

/// A frame found by the parser.  Holds byte ranges into the container,
/// the payload is not decoded.
#[derive(Clone,Debug,Eq,PartialEq)]
pub struct FrameDescriptor {
    /// Sum of the durations of all preceding frames.
    pub timestamp: u32,
    pub duration: u32,
    pub rect: Rect,
    pub dispose: DisposeMethod,
    pub blend: BlendMethod,
    pub format: PayloadFormat,
    pub bitstream: Range<usize>,
    pub alpha: Option<Range<usize>>,
}

/// Optional metadata chunks.
#[derive(Clone,Debug,Default,Eq,PartialEq)]
pub struct Metadata {
    pub icc: Option<Vec<u8>>,
    pub exif: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
}

/// Parsed container layout.
#[derive(Clone,Debug,Eq,PartialEq)]
pub struct Container {
    pub w: u32,
    pub h: u32,
    pub animated: bool,
    pub has_alpha: bool,
    pub params: AnimationParams,
    /// Offset of the ANIM payload, if the chunk is present.
    pub params_offset: Option<usize>,
    pub frames: Vec<FrameDescriptor>,
    pub icc: Option<Range<usize>>,
    pub exif: Option<Range<usize>>,
    pub xmp: Option<Range<usize>>,
}

/// Animated WebP assembler.
#[derive(Clone,Debug)]
pub struct ContainerMuxer {
    w: u32,
    h: u32,
    params: AnimationParams,
    metadata: Metadata,
}

/// Chunk header.
struct ChunkHeader {
    fourcc: [u8; 4],
    payload: Range<usize>,
    // Offset of the following chunk, after padding.
    next: usize,
}

/*--------------------------------------------------------------*/

impl FrameDescriptor {
    /// The frame's payload bytes within the container.
    pub fn payload<'a>(&self, data: &'a [u8]) -> PayloadRef<'a> {
        PayloadRef {
            format: self.format,
            bitstream: &data[self.bitstream.clone()],
            alpha: self.alpha.as_ref().map(|r| &data[r.clone()]),
        }
    }
}

impl Container {
    /// Copy the metadata chunks out of the container.
    pub fn metadata(&self, data: &[u8]) -> Metadata {
        Metadata {
            icc: self.icc.as_ref().map(|r| data[r.clone()].to_vec()),
            exif: self.exif.as_ref().map(|r| data[r.clone()].to_vec()),
            xmp: self.xmp.as_ref().map(|r| data[r.clone()].to_vec()),
        }
    }
}

impl ContainerMuxer {
    /// Create an assembler for a `w` x `h` canvas.
    pub fn new(w: u32, h: u32, params: AnimationParams) -> Self {
        ContainerMuxer {
            w: w,
            h: h,
            params: params,
            metadata: Metadata::default(),
        }
    }

    pub fn set_params(&mut self, params: AnimationParams) {
        self.params = params;
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    /// Assemble the container from frames, in the given order.
    pub fn assemble(&self, frames: &[FrameChunk])
            -> AnimResult<Vec<u8>> {
        if self.w == 0 || self.h == 0
                || self.w > MAX_CANVAS_DIMENSION || self.h > MAX_CANVAS_DIMENSION {
            return Err(AnimError::InvalidContainer(
                    format!("canvas {}x{} out of range", self.w, self.h)));
        }
        if frames.is_empty() {
            return Err(AnimError::EmptyAnimation);
        }
        for (i, frame) in frames.iter().enumerate() {
            self.check_frame(i, frame)?;
        }

        let mut total = FCC_WEBP.len() as u64 + chunk_size(SIZE_OF_VP8X);
        total += self.metadata.icc.as_ref().map_or(0, |d| chunk_size(d.len()));
        total += chunk_size(SIZE_OF_ANIM);
        for frame in frames {
            total += chunk_size(anmf_payload_size(frame));
        }
        total += self.metadata.exif.as_ref().map_or(0, |d| chunk_size(d.len()));
        total += self.metadata.xmp.as_ref().map_or(0, |d| chunk_size(d.len()));

        if total > ::std::u32::MAX as u64 {
            return Err(AnimError::EncodeFailed(
                    format!("container of {} bytes exceeds the RIFF limit", total)));
        }

        let mut out = Vec::with_capacity(SIZE_OF_CHUNK_HEADER + total as usize);
        out.write_all(FCC_RIFF)?;
        out.write_u32::<LE>(total as u32)?;
        out.write_all(FCC_WEBP)?;

        let mut flags = VP8X_FLAG_ANIMATION;
        if frames.iter().any(|f| f.payload.has_alpha()) {
            flags |= VP8X_FLAG_ALPHA;
        }
        if self.metadata.icc.is_some() {
            flags |= VP8X_FLAG_ICC;
        }
        if self.metadata.exif.is_some() {
            flags |= VP8X_FLAG_EXIF;
        }
        if self.metadata.xmp.is_some() {
            flags |= VP8X_FLAG_XMP;
        }

        write_chunk_header(FCC_VP8X, SIZE_OF_VP8X, &mut out)?;
        out.write_u8(flags)?;
        out.write_all(&[0; 3])?;
        out.write_u24::<LE>(self.w - 1)?;
        out.write_u24::<LE>(self.h - 1)?;

        if let Some(ref icc) = self.metadata.icc {
            write_chunk(FCC_ICCP, icc, &mut out)?;
        }

        write_chunk_header(FCC_ANIM, SIZE_OF_ANIM, &mut out)?;
        out.write_u32::<LE>(self.params.background_color)?;
        out.write_u16::<LE>(self.params.loop_count)?;

        for frame in frames {
            write_anmf(frame, &mut out)?;
        }

        if let Some(ref exif) = self.metadata.exif {
            write_chunk(FCC_EXIF, exif, &mut out)?;
        }
        if let Some(ref xmp) = self.metadata.xmp {
            write_chunk(FCC_XMP, xmp, &mut out)?;
        }

        debug_assert_eq!(out.len() as u64, SIZE_OF_CHUNK_HEADER as u64 + total);
        debug!("assembled {} frame(s), {}x{} canvas, into {} bytes",
                frames.len(), self.w, self.h, out.len());

        Ok(out)
    }

    fn check_frame(&self, i: usize, frame: &FrameChunk)
            -> AnimResult<()> {
        let r = &frame.rect;
        if r.x % 2 != 0 || r.y % 2 != 0 {
            return Err(AnimError::InvalidContainer(
                    format!("frame {} offset ({}, {}) is not even", i, r.x, r.y)));
        }
        if !r.fits(self.w, self.h) {
            return Err(AnimError::InvalidContainer(
                    format!("frame {} at ({}, {}) size {}x{} exceeds canvas {}x{}",
                            i, r.x, r.y, r.w, r.h, self.w, self.h)));
        }
        if frame.duration > MAX_FRAME_DURATION {
            return Err(AnimError::InvalidContainer(
                    format!("frame {} duration {} too long", i, frame.duration)));
        }
        if frame.payload.format == PayloadFormat::Lossless && frame.payload.alpha.is_some() {
            return Err(AnimError::InvalidContainer(
                    format!("frame {} is VP8L with a separate alpha plane", i)));
        }
        Ok(())
    }
}

/*--------------------------------------------------------------*/

/// Parse a WebP container's chunk layout.
///
/// Still images are reported as a one-frame, non-animated container.
/// No frame payload is decoded.
pub fn parse(data: &[u8])
        -> AnimResult<Container> {
    if data.len() < SIZE_OF_CHUNK_HEADER + FCC_WEBP.len() {
        return Err(AnimError::MalformedContainer(
                format!("file too small ({} bytes)", data.len())));
    }

    let mut r = Cursor::new(data);
    let mut fourcc = [0; 4];
    r.read_exact(&mut fourcc)?;
    if &fourcc != FCC_RIFF {
        return Err(AnimError::MalformedContainer("missing RIFF signature".to_string()));
    }
    let riff_size = r.read_u32::<LE>()? as u64;
    r.read_exact(&mut fourcc)?;
    if &fourcc != FCC_WEBP {
        return Err(AnimError::MalformedContainer("missing WEBP signature".to_string()));
    }

    let riff_end = SIZE_OF_CHUNK_HEADER as u64 + riff_size;
    if riff_end > data.len() as u64 {
        return Err(AnimError::MalformedContainer(
                format!("truncated: RIFF declares {} bytes, found {}", riff_end, data.len())));
    } else if riff_end < data.len() as u64 {
        warn!("ignoring {} bytes after the RIFF chunk", data.len() as u64 - riff_end);
    }
    let data = &data[..(riff_end as usize)];

    let first = read_chunk_header(data, SIZE_OF_CHUNK_HEADER + FCC_WEBP.len())?;
    match &first.fourcc {
        FCC_VP8 => parse_simple(data, &first, PayloadFormat::Lossy),
        FCC_VP8L => parse_simple(data, &first, PayloadFormat::Lossless),
        FCC_VP8X => parse_extended(data, &first),
        other => Err(AnimError::UnsupportedVersion(
                format!("unknown chunk {:?} after WEBP", String::from_utf8_lossy(other)))),
    }
}

/// Parse a simple format file, a single VP8 or VP8L chunk.
fn parse_simple(data: &[u8], chunk: &ChunkHeader, format: PayloadFormat)
        -> AnimResult<Container> {
    let payload = &data[chunk.payload.clone()];
    let (w, h) = bitstream_dimensions(payload, format)?;
    let has_alpha = PayloadRef {
        format: format,
        bitstream: payload,
        alpha: None,
    }.has_alpha();

    Ok(Container {
        w: w,
        h: h,
        animated: false,
        has_alpha: has_alpha,
        params: AnimationParams::default(),
        params_offset: None,
        frames: vec![still_frame(w, h, format, chunk.payload.clone(), None)],
        icc: None,
        exif: None,
        xmp: None,
    })
}

/// Parse an extended format file, starting from its VP8X chunk.
fn parse_extended(data: &[u8], vp8x: &ChunkHeader)
        -> AnimResult<Container> {
    if vp8x.payload.len() < SIZE_OF_VP8X {
        return Err(AnimError::MalformedContainer(
                format!("VP8X chunk too small ({} bytes)", vp8x.payload.len())));
    }

    let mut r = Cursor::new(&data[vp8x.payload.clone()]);
    let flags = r.read_u8()?;
    if flags & !VP8X_FLAGS_KNOWN != 0 {
        return Err(AnimError::UnsupportedVersion(
                format!("unknown VP8X flags {:#04x}", flags & !VP8X_FLAGS_KNOWN)));
    }
    let _reserved = r.read_u24::<LE>()?;
    let w = r.read_u24::<LE>()? + 1;
    let h = r.read_u24::<LE>()? + 1;

    let mut container = Container {
        w: w,
        h: h,
        animated: flags & VP8X_FLAG_ANIMATION != 0,
        has_alpha: flags & VP8X_FLAG_ALPHA != 0,
        params: AnimationParams::default(),
        params_offset: None,
        frames: Vec::new(),
        icc: None,
        exif: None,
        xmp: None,
    };

    let mut still: Option<(PayloadFormat, Range<usize>)> = None;
    let mut still_alpha = None;
    let mut timestamp = 0u32;
    let mut offset = vp8x.next;

    while offset < data.len() {
        let chunk = read_chunk_header(data, offset)?;

        match &chunk.fourcc {
            FCC_ANIM if container.animated => {
                if chunk.payload.len() < SIZE_OF_ANIM {
                    return Err(AnimError::MalformedContainer(
                            format!("ANIM chunk too small ({} bytes)", chunk.payload.len())));
                }
                let mut r = Cursor::new(&data[chunk.payload.clone()]);
                container.params.background_color = r.read_u32::<LE>()?;
                container.params.loop_count = r.read_u16::<LE>()?;
                container.params_offset = Some(chunk.payload.start);
            },
            FCC_ANMF if container.animated => {
                if container.params_offset.is_none() {
                    return Err(AnimError::MalformedContainer(
                            "frame chunk before the ANIM chunk".to_string()));
                }
                let frame = parse_anmf(data, &chunk, timestamp, container.frames.len())?;
                timestamp = timestamp.saturating_add(frame.duration);
                container.frames.push(frame);
            },
            FCC_VP8 | FCC_VP8L if !container.animated && still.is_none() => {
                let format =
                    if &chunk.fourcc == FCC_VP8 { PayloadFormat::Lossy } else { PayloadFormat::Lossless };
                still = Some((format, chunk.payload.clone()));
            },
            FCC_ALPH if !container.animated => {
                still_alpha = Some(chunk.payload.clone());
            },
            FCC_ICCP => container.icc = Some(chunk.payload.clone()),
            FCC_EXIF => container.exif = Some(chunk.payload.clone()),
            FCC_XMP => container.xmp = Some(chunk.payload.clone()),
            other => warn!("skipping chunk {:?} at offset {}",
                    String::from_utf8_lossy(other), offset),
        }

        offset = chunk.next;
    }

    if !container.animated {
        let (format, range) = match still {
            Some(s) => s,
            None => return Err(AnimError::MalformedContainer(
                    "no image data chunk".to_string())),
        };
        let alpha = if format == PayloadFormat::Lossy { still_alpha } else { None };
        container.frames.push(still_frame(w, h, format, range, alpha));
    }

    Ok(container)
}

/// Parse an ANMF chunk.
fn parse_anmf(data: &[u8], chunk: &ChunkHeader, timestamp: u32, index: usize)
        -> AnimResult<FrameDescriptor> {
    if chunk.payload.len() < SIZE_OF_ANMF_HEADER {
        return Err(AnimError::MalformedContainer(
                format!("frame {} header too small ({} bytes)", index, chunk.payload.len())));
    }

    let mut r = Cursor::new(&data[chunk.payload.clone()]);
    let x = r.read_u24::<LE>()? * 2;
    let y = r.read_u24::<LE>()? * 2;
    let w = r.read_u24::<LE>()? + 1;
    let h = r.read_u24::<LE>()? + 1;
    let duration = r.read_u24::<LE>()?;
    let flags = r.read_u8()?;

    // Sub-chunks may not extend past the ANMF payload.
    let frame_data = &data[..chunk.payload.end];
    let mut offset = chunk.payload.start + SIZE_OF_ANMF_HEADER;
    let mut alpha = None;
    let mut bitstream = None;
    while offset < frame_data.len() {
        let sub = read_chunk_header(frame_data, offset)?;
        match &sub.fourcc {
            FCC_ALPH => alpha = Some(sub.payload.clone()),
            FCC_VP8 => {
                bitstream = Some((PayloadFormat::Lossy, sub.payload.clone()));
                break;
            },
            FCC_VP8L => {
                bitstream = Some((PayloadFormat::Lossless, sub.payload.clone()));
                break;
            },
            other => warn!("frame {} - skipping sub-chunk {:?}",
                    index, String::from_utf8_lossy(other)),
        }
        offset = sub.next;
    }

    let (format, bitstream) = match bitstream {
        Some(b) => b,
        None => return Err(AnimError::MalformedContainer(
                format!("frame {} has no bitstream", index))),
    };
    check_version(&data[bitstream.clone()], format)?;
    if format == PayloadFormat::Lossless && alpha.is_some() {
        warn!("frame {} - ignoring ALPH chunk before VP8L", index);
        alpha = None;
    }

    Ok(FrameDescriptor {
        timestamp: timestamp,
        duration: duration,
        rect: Rect::new(x, y, w, h),
        dispose:
            if flags & ANMF_FLAG_DISPOSE_BACKGROUND != 0 {
                DisposeMethod::Background
            } else {
                DisposeMethod::None
            },
        blend:
            if flags & ANMF_FLAG_NO_BLEND != 0 {
                BlendMethod::Overwrite
            } else {
                BlendMethod::AlphaBlend
            },
        format: format,
        bitstream: bitstream,
        alpha: alpha,
    })
}

fn still_frame(w: u32, h: u32, format: PayloadFormat,
        bitstream: Range<usize>, alpha: Option<Range<usize>>)
        -> FrameDescriptor {
    FrameDescriptor {
        timestamp: 0,
        duration: 0,
        rect: Rect::full(w, h),
        dispose: DisposeMethod::None,
        blend: BlendMethod::Overwrite,
        format: format,
        bitstream: bitstream,
        alpha: alpha,
    }
}

/// Fails with `UnsupportedVersion` if the bitstream header names a
/// version newer than VP8 version 3 or VP8L version 0.  Headers too
/// short to carry a version are left to the codec.
fn check_version(payload: &[u8], format: PayloadFormat)
        -> AnimResult<()> {
    let version = match format {
        PayloadFormat::Lossy if !payload.is_empty() => {
            let v = (payload[0] >> 1) & 0x07;
            if v <= VP8_MAX_VERSION { return Ok(()); }
            v
        },
        PayloadFormat::Lossless if payload.len() >= 5 && payload[0] == VP8L_SIGNATURE => {
            let v = payload[4] >> 5;
            if v == 0 { return Ok(()); }
            v
        },
        _ => return Ok(()),
    };
    Err(AnimError::UnsupportedVersion(
            format!("{:?} bitstream version {}", format, version)))
}

/// Read the image dimensions from a VP8 or VP8L bitstream header.
fn bitstream_dimensions(payload: &[u8], format: PayloadFormat)
        -> AnimResult<(u32, u32)> {
    check_version(payload, format)?;
    match format {
        PayloadFormat::Lossy => {
            if payload.len() < 10 {
                return Err(AnimError::MalformedContainer("VP8 chunk too small".to_string()));
            }
            if payload[0] & 1 != 0 {
                return Err(AnimError::MalformedContainer("VP8 frame is not a key frame".to_string()));
            }
            if payload[3..6] != [0x9D, 0x01, 0x2A] {
                return Err(AnimError::MalformedContainer("bad VP8 start code".to_string()));
            }
            let mut r = Cursor::new(&payload[6..10]);
            let w = r.read_u16::<LE>()? & 0x3FFF;
            let h = r.read_u16::<LE>()? & 0x3FFF;
            Ok((w as u32, h as u32))
        },
        PayloadFormat::Lossless => {
            if payload.len() < 5 || payload[0] != VP8L_SIGNATURE {
                return Err(AnimError::MalformedContainer("bad VP8L header".to_string()));
            }
            let header = Cursor::new(&payload[1..5]).read_u32::<LE>()?;
            Ok(((header & 0x3FFF) + 1, ((header >> 14) & 0x3FFF) + 1))
        },
    }
}

/// Read the chunk header at `offset`.  The payload must lie within `data`.
fn read_chunk_header(data: &[u8], offset: usize)
        -> AnimResult<ChunkHeader> {
    if offset + SIZE_OF_CHUNK_HEADER > data.len() {
        return Err(AnimError::MalformedContainer(
                format!("truncated chunk header at offset {}", offset)));
    }

    let mut r = Cursor::new(&data[offset..(offset + SIZE_OF_CHUNK_HEADER)]);
    let mut fourcc = [0; 4];
    r.read_exact(&mut fourcc)?;
    let size = r.read_u32::<LE>()? as usize;

    let start = offset + SIZE_OF_CHUNK_HEADER;
    if size > data.len() - start {
        return Err(AnimError::MalformedContainer(
                format!("chunk {:?} at offset {} declares {} bytes, {} available",
                        String::from_utf8_lossy(&fourcc), offset, size, data.len() - start)));
    }
    let end = start + size;

    Ok(ChunkHeader {
        fourcc: fourcc,
        payload: start..end,
        next: ::std::cmp::min(end + (size & 1), data.len()),
    })
}

/*--------------------------------------------------------------*/

/// On-disk size of a chunk with the given payload size.
fn chunk_size(payload_size: usize)
        -> u64 {
    (SIZE_OF_CHUNK_HEADER + payload_size + (payload_size & 1)) as u64
}

fn anmf_payload_size(frame: &FrameChunk)
        -> usize {
    let alpha = match frame.payload.alpha {
        Some(a) if frame.payload.format == PayloadFormat::Lossy => chunk_size(a.len()),
        _ => 0,
    };
    SIZE_OF_ANMF_HEADER + alpha as usize + chunk_size(frame.payload.bitstream.len()) as usize
}

fn write_chunk_header<W: Write>(fourcc: &[u8; 4], size: usize, w: &mut W)
        -> AnimResult<()> {
    w.write_all(fourcc)?;
    w.write_u32::<LE>(size as u32)?;
    Ok(())
}

/// Write a chunk, padded to an even length.
fn write_chunk<W: Write>(fourcc: &[u8; 4], payload: &[u8], w: &mut W)
        -> AnimResult<()> {
    write_chunk_header(fourcc, payload.len(), w)?;
    w.write_all(payload)?;
    if payload.len() & 1 != 0 {
        w.write_u8(0)?;
    }
    Ok(())
}

/// Write an ANMF chunk and its bitstream sub-chunks.
fn write_anmf<W: Write>(frame: &FrameChunk, w: &mut W)
        -> AnimResult<()> {
    let mut flags = 0;
    if frame.dispose == DisposeMethod::Background {
        flags |= ANMF_FLAG_DISPOSE_BACKGROUND;
    }
    if frame.blend == BlendMethod::Overwrite {
        flags |= ANMF_FLAG_NO_BLEND;
    }

    write_chunk_header(FCC_ANMF, anmf_payload_size(frame), w)?;
    w.write_u24::<LE>(frame.rect.x / 2)?;
    w.write_u24::<LE>(frame.rect.y / 2)?;
    w.write_u24::<LE>(frame.rect.w - 1)?;
    w.write_u24::<LE>(frame.rect.h - 1)?;
    w.write_u24::<LE>(frame.duration)?;
    w.write_u8(flags)?;

    if let (PayloadFormat::Lossy, Some(alpha)) = (frame.payload.format, frame.payload.alpha) {
        write_chunk(FCC_ALPH, alpha, w)?;
    }
    write_chunk(frame.payload.format.fourcc(), frame.payload.bitstream, w)
}

#[cfg(test)]
mod tests {
    use byteorder::LittleEndian as LE;
    use byteorder::WriteBytesExt;
    use pretty_assertions::assert_eq;
    use crate::AnimError;
    use crate::codec::{PayloadFormat,PayloadRef};
    use crate::raster::Rect;
    use super::*;

    const LOSSLESS_A: [u8; 5] = [0x2F, 0x03, 0xC0, 0x00, 0x00];
    const LOSSLESS_B: [u8; 7] = [0x2F, 0x01, 0x40, 0x00, 0x10, 0xAA, 0xBB];

    fn lossless(bitstream: &[u8]) -> PayloadRef<'_> {
        PayloadRef {
            format: PayloadFormat::Lossless,
            bitstream: bitstream,
            alpha: None,
        }
    }

    fn sample_frames<'a>() -> Vec<FrameChunk<'a>> {
        vec![
            FrameChunk {
                rect: Rect::full(4, 4),
                duration: 100,
                dispose: DisposeMethod::None,
                blend: BlendMethod::Overwrite,
                payload: lossless(&LOSSLESS_A),
            },
            FrameChunk {
                rect: Rect::new(2, 0, 2, 2),
                duration: 250,
                dispose: DisposeMethod::Background,
                blend: BlendMethod::AlphaBlend,
                payload: lossless(&LOSSLESS_B),
            },
            FrameChunk {
                rect: Rect::new(0, 2, 3, 1),
                duration: 40,
                dispose: DisposeMethod::None,
                blend: BlendMethod::Overwrite,
                payload: PayloadRef {
                    format: PayloadFormat::Lossy,
                    bitstream: &[1, 2, 3],
                    alpha: Some(&[9, 9]),
                },
            },
        ]
    }

    fn sample_container() -> Vec<u8> {
        let params = AnimationParams { background_color: 0xFF336699, loop_count: 3 };
        ContainerMuxer::new(4, 4, params).assemble(&sample_frames()).expect("assemble")
    }

    #[test]
    fn test_assemble_parse_roundtrip() {
        let params = AnimationParams { background_color: 0xFF336699, loop_count: 3 };
        let frames = sample_frames();
        let data = sample_container();

        let container = parse(&data).expect("parse");
        assert_eq!((container.w, container.h), (4, 4));
        assert!(container.animated);
        assert!(container.has_alpha);
        assert_eq!(container.params, params);
        assert_eq!(container.frames.len(), frames.len());

        let mut timestamp = 0;
        for (parsed, frame) in container.frames.iter().zip(frames.iter()) {
            assert_eq!(parsed.timestamp, timestamp);
            assert_eq!(parsed.duration, frame.duration);
            assert_eq!(parsed.rect, frame.rect);
            assert_eq!(parsed.dispose, frame.dispose);
            assert_eq!(parsed.blend, frame.blend);
            assert_eq!(parsed.payload(&data), frame.payload);
            timestamp += frame.duration;
        }
    }

    #[test]
    fn test_assemble_layout() {
        let data = sample_container();

        assert_eq!(&data[0..4], b"RIFF");
        let riff_size = u32::from(data[4]) | u32::from(data[5]) << 8
            | u32::from(data[6]) << 16 | u32::from(data[7]) << 24;
        assert_eq!(riff_size as usize, data.len() - 8);
        assert_eq!(&data[8..12], b"WEBP");
        assert_eq!(&data[12..16], b"VP8X");
        assert_eq!(data[20], 0x12);
        assert_eq!(&data[30..34], b"ANIM");
        // Background color 0xFF336699 is stored B, G, R, A.
        assert_eq!(&data[38..44], &[0x99, 0x66, 0x33, 0xFF, 3, 0]);
        assert_eq!(&data[44..48], b"ANMF");
        assert_eq!(data.len() % 2, 0);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut muxer = ContainerMuxer::new(4, 4, AnimationParams::default());
        let metadata = Metadata {
            icc: Some(vec![1, 2, 3]),
            exif: None,
            xmp: Some(b"<x/>".to_vec()),
        };
        muxer.set_metadata(metadata.clone());
        let data = muxer.assemble(&sample_frames()[..1]).expect("assemble");

        let container = parse(&data).expect("parse");
        assert_eq!(container.metadata(&data), metadata);
        assert_eq!(data[20] & 0x24, 0x24);
        assert_eq!(container.frames.len(), 1);
    }

    #[test]
    fn test_assemble_rejects_bad_frames() {
        let muxer = ContainerMuxer::new(4, 4, AnimationParams::default());
        match muxer.assemble(&[]) {
            Err(AnimError::EmptyAnimation) => (),
            other => panic!("unexpected {:?}", other),
        }

        let mut frames = sample_frames();
        frames[1].rect = Rect::new(1, 0, 2, 2);
        match muxer.assemble(&frames) {
            Err(AnimError::InvalidContainer(_)) => (),
            other => panic!("unexpected {:?}", other),
        }

        let mut frames = sample_frames();
        frames[1].rect = Rect::new(2, 2, 4, 2);
        assert!(muxer.assemble(&frames).is_err());

        let mut frames = sample_frames();
        frames[0].duration = MAX_FRAME_DURATION + 1;
        assert!(muxer.assemble(&frames).is_err());

        let zero = ContainerMuxer::new(0, 4, AnimationParams::default());
        assert!(zero.assemble(&sample_frames()).is_err());
    }

    #[test]
    fn test_parse_truncated() {
        let data = sample_container();
        for len in 0..data.len() {
            match parse(&data[..len]) {
                Err(AnimError::MalformedContainer(_)) => (),
                other => panic!("length {}: unexpected {:?}", len, other),
            }
        }
    }

    #[test]
    fn test_parse_bad_magic() {
        let mut data = sample_container();
        data[0] = b'X';
        assert!(matches!(parse(&data), Err(AnimError::MalformedContainer(_))));

        let mut data = sample_container();
        data[11] = b'X';
        assert!(matches!(parse(&data), Err(AnimError::MalformedContainer(_))));
    }

    #[test]
    fn test_parse_unknown_first_chunk() {
        let mut data = sample_container();
        data[12..16].copy_from_slice(b"VP9X");
        assert!(matches!(parse(&data), Err(AnimError::UnsupportedVersion(_))));
    }

    #[test]
    fn test_parse_unknown_versions() {
        // VP8X flags start at offset 20.
        let mut data = sample_container();
        data[20] |= 0x80;
        assert!(matches!(parse(&data), Err(AnimError::UnsupportedVersion(_))));

        let mut data = sample_container();
        let container = parse(&data).expect("parse");
        let start = container.frames[0].bitstream.start;
        data[start + 4] |= 0x20;
        assert!(matches!(parse(&data), Err(AnimError::UnsupportedVersion(_))));

        let mut data = sample_container();
        let start = container.frames[2].bitstream.start;
        data[start] = 0x0E;
        assert!(matches!(parse(&data), Err(AnimError::UnsupportedVersion(_))));

        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.write_u32::<LE>(4 + 8 + 6).expect("write");
        data.extend_from_slice(b"WEBP");
        let mut header = LOSSLESS_A;
        header[4] = 0xE0;
        write_chunk(FCC_VP8L, &header, &mut data).expect("chunk");
        assert!(matches!(parse(&data), Err(AnimError::UnsupportedVersion(_))));
    }

    #[test]
    fn test_parse_oversized_chunk() {
        let mut data = sample_container();
        // ANMF declares more bytes than the file holds.
        (&mut data[48..52]).write_u32::<LE>(0xFFFF).expect("write");
        assert!(matches!(parse(&data), Err(AnimError::MalformedContainer(_))));
    }

    #[test]
    fn test_parse_frame_before_params() {
        let mut data = sample_container();
        data[30..34].copy_from_slice(b"JUNK");
        assert!(matches!(parse(&data), Err(AnimError::MalformedContainer(_))));
    }

    #[test]
    fn test_parse_skips_unknown_chunks() {
        let data = sample_container();
        let mut extended = data.clone();
        extended.extend_from_slice(b"ZZZZ");
        extended.write_u32::<LE>(3).expect("write");
        extended.extend_from_slice(&[1, 2, 3, 0]);
        let riff_size = (extended.len() - 8) as u32;
        (&mut extended[4..8]).write_u32::<LE>(riff_size).expect("write");

        let a = parse(&data).expect("parse");
        let b = parse(&extended).expect("parse");
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_trailing_garbage() {
        let mut data = sample_container();
        let expected = parse(&data).expect("parse");
        data.extend_from_slice(&[0xDE, 0xAD]);
        assert_eq!(parse(&data).expect("parse"), expected);
    }

    #[test]
    fn test_parse_simple_lossless() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.write_u32::<LE>(4 + 8 + 6).expect("write");
        data.extend_from_slice(b"WEBP");
        write_chunk(FCC_VP8L, &LOSSLESS_A, &mut data).expect("chunk");

        let container = parse(&data).expect("parse");
        assert!(!container.animated);
        assert_eq!((container.w, container.h), (4, 4));
        assert_eq!(container.params_offset, None);
        assert_eq!(container.frames.len(), 1);
        assert_eq!(container.frames[0].rect, Rect::full(4, 4));
        assert_eq!(container.frames[0].payload(&data).bitstream, &LOSSLESS_A[..]);
    }

    #[test]
    fn test_parse_simple_lossy() {
        let vp8 = [0x10, 0x02, 0x00, 0x9D, 0x01, 0x2A, 0x03, 0x00, 0x05, 0x00];
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.write_u32::<LE>(4 + 8 + 10).expect("write");
        data.extend_from_slice(b"WEBP");
        write_chunk(FCC_VP8, &vp8, &mut data).expect("chunk");

        let container = parse(&data).expect("parse");
        assert_eq!((container.w, container.h), (3, 5));
        assert_eq!(container.frames[0].format, PayloadFormat::Lossy);
        assert!(!container.has_alpha);
    }
}
