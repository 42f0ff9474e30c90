//! Codec for VP8L (lossless) frame payloads.

use log::trace;

use crate::{AnimError,AnimResult};
use super::bits::{BitReader,BitWriter,PrefixCode,canonical_codes};
use super::{FrameCodec,FrameConfig,FramePayload,PayloadFormat,PayloadRef};

/// First byte of every VP8L bitstream.
///
/// The signature is followed by a 32-bit header, packed LSB first:
///
///   Bits | Name          | Description
///   ----:|:-------------:| ------------------------------------------
///     14 | width - 1     | Image width minus one.
///     14 | height - 1    | Image height minus one.
///      1 | alpha_is_used | Hint that some pixel is not fully opaque.
///      3 | version       | Always zero.
pub const VP8L_SIGNATURE: u8 = 0x2F;

/// Largest width or height a VP8L bitstream can describe.
pub const VP8L_MAX_DIMENSION: u32 = 1 << 14;

/// Number of length prefix codes following the 256 green literals.
const NUM_LENGTH_CODES: usize = 24;

/// Alphabet size of the distance prefix code.
const NUM_DISTANCE_CODES: usize = 40;

/// Order in which code length code lengths are stored.
const CODE_LENGTH_CODE_ORDER: [usize; 19] = [
    17, 18, 0, 1, 2, 3, 4, 5, 16, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15 ];

/// Lossless codec storing every pixel as a literal.
///
/// The encoder writes a VP8L bitstream without transforms, using flat
/// 8-bit prefix codes, so any WebP reader accepts it.  The decoder
/// handles transform-free VP8L streams: simple and normal prefix codes
/// and the colour cache.  Streams using transforms, meta prefix codes
/// or backward references are rejected.
///
/// Compression settings in the frame config are validated but
/// otherwise ignored, every frame is lossless.
#[derive(Clone,Debug,Default)]
pub struct Vp8lStoreCodec {
    _priv: (),
}

/// The five prefix codes of a prefix code group.
struct CodeGroup {
    green: PrefixCode,
    red: PrefixCode,
    blue: PrefixCode,
    alpha: PrefixCode,
}

/*--------------------------------------------------------------*/

impl Vp8lStoreCodec {
    pub fn new() -> Self {
        Vp8lStoreCodec { _priv: () }
    }
}

impl FrameCodec for Vp8lStoreCodec {
    fn compress(&mut self, rgba: &[u8], w: u32, h: u32, config: &FrameConfig)
            -> AnimResult<FramePayload> {
        config.validate()?;
        let bitstream = encode_vp8l(rgba, w, h)?;
        trace!("vp8l: stored {}x{} frame in {} bytes", w, h, bitstream.len());

        Ok(FramePayload {
            format: PayloadFormat::Lossless,
            bitstream: bitstream,
            alpha: None,
        })
    }

    fn decompress(&mut self, payload: PayloadRef, w: u32, h: u32)
            -> AnimResult<Vec<u8>> {
        match payload.format {
            PayloadFormat::Lossless => decode_vp8l(payload.bitstream, w, h),
            PayloadFormat::Lossy => Err(AnimError::DecodeFailed(
                    "lossy VP8 payloads are not supported".to_string())),
        }
    }
}

/*--------------------------------------------------------------*/

/// Encode a VP8L bitstream holding every pixel as a literal.
pub fn encode_vp8l(rgba: &[u8], w: u32, h: u32)
        -> AnimResult<Vec<u8>> {
    if w == 0 || h == 0 || w > VP8L_MAX_DIMENSION || h > VP8L_MAX_DIMENSION {
        return Err(AnimError::EncodeFailed(
                format!("VP8L cannot hold a {}x{} image", w, h)));
    }
    let num_pixels = w as usize * h as usize;
    if rgba.len() != 4 * num_pixels {
        return Err(AnimError::EncodeFailed(
                format!("expected {} bytes of RGBA, got {}", 4 * num_pixels, rgba.len())));
    }

    let has_alpha = rgba.chunks(4).any(|px| px[3] != 0xFF);

    let mut bw = BitWriter::with_capacity(4 * num_pixels + 512);
    bw.put(VP8L_SIGNATURE as u32, 8);
    bw.put(w - 1, 14);
    bw.put(h - 1, 14);
    bw.put(has_alpha as u32, 1);
    bw.put(0, 3); // version

    bw.put(0, 1); // no transform
    bw.put(0, 1); // no colour cache
    bw.put(0, 1); // no meta prefix codes

    let literal_lengths = [8u8; 256];
    let literal_codes = canonical_codes(&literal_lengths);

    write_flat_code(&mut bw, 256 + NUM_LENGTH_CODES);
    write_flat_code(&mut bw, 256);
    write_flat_code(&mut bw, 256);
    write_flat_code(&mut bw, 256);

    // Distance code: a simple code with the lone symbol 0.
    bw.put(1, 1);
    bw.put(0, 1);
    bw.put(0, 1);
    bw.put(0, 1);

    for px in rgba.chunks(4) {
        for &c in [px[1], px[0], px[2], px[3]].iter() {
            bw.put_code(literal_codes[c as usize], literal_lengths[c as usize]);
        }
    }

    Ok(bw.finish())
}

/// Write a normal prefix code giving the 256 literals length 8 and any
/// other symbol length 0.
fn write_flat_code(bw: &mut BitWriter, alphabet_size: usize) {
    // Code length code: symbols 0 and 8, both of length 1.
    let num_code_lengths = 12;
    bw.put(0, 1);
    bw.put((num_code_lengths - 4) as u32, 4);
    for &symbol in CODE_LENGTH_CODE_ORDER[..num_code_lengths].iter() {
        let len = if symbol == 0 || symbol == 8 { 1 } else { 0 };
        bw.put(len, 3);
    }

    bw.put(0, 1); // max_symbol = alphabet_size
    for symbol in 0..alphabet_size {
        bw.put(if symbol < 256 { 1 } else { 0 }, 1);
    }
}

/*--------------------------------------------------------------*/

/// Decode a transform-free VP8L bitstream to RGBA.
pub fn decode_vp8l(src: &[u8], w: u32, h: u32)
        -> AnimResult<Vec<u8>> {
    let mut r = BitReader::new(src);

    if r.read(8)? != VP8L_SIGNATURE as u32 {
        return Err(AnimError::DecodeFailed("bad VP8L signature".to_string()));
    }
    let width = r.read(14)? + 1;
    let height = r.read(14)? + 1;
    let _alpha_is_used = r.read(1)?;
    let version = r.read(3)?;

    if version != 0 {
        return Err(AnimError::DecodeFailed(format!("VP8L version {}", version)));
    }
    if width != w || height != h {
        return Err(AnimError::DecodeFailed(
                format!("bitstream is {}x{}, frame is {}x{}", width, height, w, h)));
    }
    if r.read(1)? != 0 {
        return Err(AnimError::DecodeFailed(
                "VP8L transforms are not supported".to_string()));
    }

    let cache_bits =
        if r.read(1)? != 0 {
            let bits = r.read(4)?;
            if bits < 1 || bits > 11 {
                return Err(AnimError::DecodeFailed(
                        format!("colour cache bits {}", bits)));
            }
            bits
        } else {
            0
        };
    let cache_size = if cache_bits > 0 { 1usize << cache_bits } else { 0 };
    let mut cache = vec![0u32; cache_size];

    if r.read(1)? != 0 {
        return Err(AnimError::DecodeFailed(
                "VP8L meta prefix codes are not supported".to_string()));
    }

    let group = CodeGroup {
        green: read_prefix_code(&mut r, 256 + NUM_LENGTH_CODES + cache_size)?,
        red: read_prefix_code(&mut r, 256)?,
        blue: read_prefix_code(&mut r, 256)?,
        alpha: read_prefix_code(&mut r, 256)?,
    };
    let _distance = read_prefix_code(&mut r, NUM_DISTANCE_CODES)?;

    let num_pixels = w as usize * h as usize;
    let mut dst = Vec::with_capacity(4 * num_pixels);
    while dst.len() < 4 * num_pixels {
        let g = group.green.read_symbol(&mut r)? as usize;
        let argb =
            if g < 256 {
                let red = group.red.read_symbol(&mut r)? as u32;
                let blue = group.blue.read_symbol(&mut r)? as u32;
                let alpha = group.alpha.read_symbol(&mut r)? as u32;
                (alpha << 24) | (red << 16) | ((g as u32) << 8) | blue
            } else if g < 256 + NUM_LENGTH_CODES {
                return Err(AnimError::DecodeFailed(
                        "VP8L backward references are not supported".to_string()));
            } else {
                let idx = g - 256 - NUM_LENGTH_CODES;
                match cache.get(idx) {
                    Some(&argb) => argb,
                    None => return Err(AnimError::DecodeFailed(
                            "colour cache index out of range".to_string())),
                }
            };

        if cache_size > 0 {
            let key = (0x1E35_A7BDu32.wrapping_mul(argb) >> (32 - cache_bits)) as usize;
            cache[key] = argb;
        }

        dst.push((argb >> 16) as u8);
        dst.push((argb >> 8) as u8);
        dst.push(argb as u8);
        dst.push((argb >> 24) as u8);
    }

    Ok(dst)
}

/// Read one prefix code for an alphabet of the given size.
fn read_prefix_code(r: &mut BitReader, alphabet_size: usize)
        -> AnimResult<PrefixCode> {
    let mut lengths = vec![0u8; alphabet_size];

    if r.read(1)? != 0 {
        // Simple code: one or two symbols.
        let num_symbols = r.read(1)? + 1;
        let first_bits = if r.read(1)? != 0 { 8 } else { 1 };
        let s0 = r.read(first_bits)? as usize;
        set_simple_length(&mut lengths, s0)?;
        if num_symbols == 2 {
            let s1 = r.read(8)? as usize;
            set_simple_length(&mut lengths, s1)?;
        }
        return PrefixCode::from_lengths(&lengths);
    }

    let num_code_lengths = r.read(4)? as usize + 4;
    if num_code_lengths > CODE_LENGTH_CODE_ORDER.len() {
        return Err(AnimError::DecodeFailed("too many code lengths".to_string()));
    }
    let mut code_length_lengths = [0u8; 19];
    for &symbol in CODE_LENGTH_CODE_ORDER[..num_code_lengths].iter() {
        code_length_lengths[symbol] = r.read(3)? as u8;
    }
    let code_length_code = PrefixCode::from_lengths(&code_length_lengths)?;

    let mut max_symbol =
        if r.read(1)? != 0 {
            let length_bits = 2 + 2 * r.read(3)?;
            let max = 2 + r.read(length_bits)? as usize;
            if max > alphabet_size {
                return Err(AnimError::DecodeFailed("max_symbol too large".to_string()));
            }
            max
        } else {
            alphabet_size
        };

    let mut symbol = 0;
    let mut prev_len = 8u8;
    while symbol < alphabet_size {
        if max_symbol == 0 {
            break;
        }
        max_symbol = max_symbol - 1;

        let code_len = code_length_code.read_symbol(r)?;
        if code_len < 16 {
            lengths[symbol] = code_len as u8;
            symbol = symbol + 1;
            if code_len != 0 {
                prev_len = code_len as u8;
            }
        } else {
            let (extra_bits, offset, len) = match code_len {
                16 => (2, 3, prev_len),
                17 => (3, 3, 0),
                _ => (7, 11, 0),
            };
            let repeat = r.read(extra_bits)? as usize + offset;
            if symbol + repeat > alphabet_size {
                return Err(AnimError::DecodeFailed("code length repeat overflows".to_string()));
            }
            for e in &mut lengths[symbol..(symbol + repeat)] {
                *e = len;
            }
            symbol = symbol + repeat;
        }
    }

    PrefixCode::from_lengths(&lengths)
}

fn set_simple_length(lengths: &mut [u8], symbol: usize)
        -> AnimResult<()> {
    match lengths.get_mut(symbol) {
        Some(e) => {
            *e = 1;
            Ok(())
        },
        None => Err(AnimError::DecodeFailed(
                format!("simple code symbol {} out of range", symbol))),
    }
}
