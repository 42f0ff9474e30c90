//! LSB-first bit packing and canonical prefix codes, as used by VP8L.

use crate::{AnimError,AnimResult};

/// Longest code length a VP8L prefix code may use.
pub const MAX_CODE_LENGTH: usize = 15;

/// Bit writer.  Bits are packed from the least significant bit of
/// each byte upwards.
pub struct BitWriter {
    buf: Vec<u8>,
    acc: u64,
    nbits: u32,
}

/// Bit reader, the mirror of BitWriter.
pub struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Canonical prefix code, decoded one bit at a time.
///
/// The first bit read is the most significant bit of the code, which
/// is why BitWriter users must emit codes bit-reversed.
pub struct PrefixCode {
    counts: [u16; MAX_CODE_LENGTH + 1],
    symbols: Vec<u16>,
    single: Option<u16>,
}

/*--------------------------------------------------------------*/

impl BitWriter {
    pub fn with_capacity(n: usize) -> Self {
        BitWriter {
            buf: Vec::with_capacity(n),
            acc: 0,
            nbits: 0,
        }
    }

    /// Append the low `n` bits of `bits`.
    pub fn put(&mut self, bits: u32, n: u32) {
        debug_assert!(n <= 32);
        if n == 0 {
            return;
        }

        let mask = (1u64 << n) - 1;
        self.acc |= (bits as u64 & mask) << self.nbits;
        self.nbits += n;
        while self.nbits >= 8 {
            self.buf.push(self.acc as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    /// Append a prefix code of the given length, most significant bit
    /// first.
    pub fn put_code(&mut self, code: u16, len: u8) {
        self.put(reverse_bits(code, len) as u32, len as u32);
    }

    /// Flush the partial byte and return the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.buf.push(self.acc as u8);
        }
        self.buf
    }
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BitReader { buf: buf, pos: 0 }
    }

    pub fn read_bit(&mut self) -> AnimResult<u32> {
        let byte = match self.buf.get(self.pos >> 3) {
            Some(&b) => b,
            None => return Err(AnimError::DecodeFailed(
                    "bitstream ended early".to_string())),
        };
        let bit = (byte >> (self.pos & 7)) & 1;
        self.pos = self.pos + 1;
        Ok(bit as u32)
    }

    /// Read `n` bits, first bit read in the least significant position.
    pub fn read(&mut self, n: u32) -> AnimResult<u32> {
        debug_assert!(n <= 32);
        let mut value = 0;
        for i in 0..n {
            value |= self.read_bit()? << i;
        }
        Ok(value)
    }
}

impl PrefixCode {
    /// Build a decoding table from per-symbol code lengths.
    ///
    /// A code with a single used symbol consumes no bits when read.
    pub fn from_lengths(lengths: &[u8])
            -> AnimResult<Self> {
        let mut counts = [0u16; MAX_CODE_LENGTH + 1];
        for &len in lengths {
            if len as usize > MAX_CODE_LENGTH {
                return Err(AnimError::DecodeFailed(
                        format!("code length {} too long", len)));
            }
            counts[len as usize] += 1;
        }

        let used = lengths.len() - counts[0] as usize;
        if used == 0 {
            return Err(AnimError::DecodeFailed("empty prefix code".to_string()));
        }
        if used == 1 {
            let symbol = lengths.iter().position(|&l| l != 0).unwrap_or(0);
            return Ok(PrefixCode {
                counts: counts,
                symbols: Vec::new(),
                single: Some(symbol as u16),
            });
        }

        let mut left: i32 = 1;
        for len in 1..(MAX_CODE_LENGTH + 1) {
            left = (left << 1) - counts[len] as i32;
            if left < 0 {
                return Err(AnimError::DecodeFailed(
                        "over-subscribed prefix code".to_string()));
            }
        }
        if left > 0 {
            return Err(AnimError::DecodeFailed(
                    "incomplete prefix code".to_string()));
        }

        let mut offsets = [0usize; MAX_CODE_LENGTH + 2];
        for len in 1..(MAX_CODE_LENGTH + 1) {
            offsets[len + 1] = offsets[len] + counts[len] as usize;
        }

        let mut symbols = vec![0u16; used];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbols[offsets[len as usize]] = symbol as u16;
                offsets[len as usize] += 1;
            }
        }

        Ok(PrefixCode {
            counts: counts,
            symbols: symbols,
            single: None,
        })
    }

    /// Read one symbol.
    pub fn read_symbol(&self, r: &mut BitReader)
            -> AnimResult<u16> {
        if let Some(symbol) = self.single {
            return Ok(symbol);
        }

        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..(MAX_CODE_LENGTH + 1) {
            code |= r.read_bit()? as i32;
            let count = self.counts[len] as i32;
            if code - count < first {
                return Ok(self.symbols[(index + code - first) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }

        Err(AnimError::DecodeFailed("invalid prefix code".to_string()))
    }
}

/*--------------------------------------------------------------*/

/// Assign canonical codes to the given code lengths.
pub fn canonical_codes(lengths: &[u8])
        -> Vec<u16> {
    let mut bl_count = [0u16; MAX_CODE_LENGTH + 1];
    for &len in lengths {
        if len > 0 {
            bl_count[len as usize] += 1;
        }
    }

    let mut next_code = [0u16; MAX_CODE_LENGTH + 1];
    let mut code = 0u16;
    for bits in 1..(MAX_CODE_LENGTH + 1) {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    lengths.iter().map(|&len| {
        if len == 0 {
            0
        } else {
            let c = next_code[len as usize];
            next_code[len as usize] += 1;
            c
        }
    }).collect()
}

fn reverse_bits(code: u16, len: u8)
        -> u16 {
    let mut out = 0;
    for i in 0..len {
        out |= ((code >> i) & 1) << (len - 1 - i);
    }
    out
}
