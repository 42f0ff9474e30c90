//! Frame codecs.
//!
//! The container engine never touches pixel compression directly.  A
//! [`FrameCodec`] turns a tightly packed RGBA buffer into a frame
//! payload (a VP8 or VP8L bitstream, plus an optional ALPH payload for
//! lossy frames) and back.

macro_rules! module {
    ($e:ident) => {
        pub use self::$e::*;
        mod $e;
    };
}

mod bits;

module!(vp8l);

use crate::{AnimError,AnimResult};

/// Bitstream format of a frame payload.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum PayloadFormat {
    /// VP8 key frame, optionally with a separate ALPH payload.
    Lossy,
    /// VP8L bitstream.
    Lossless,
}

/// Compressed frame payload, as produced by a codec.
#[derive(Clone,Debug,Eq,PartialEq)]
pub struct FramePayload {
    pub format: PayloadFormat,
    pub bitstream: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
}

/// Borrowed view of a frame payload.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub struct PayloadRef<'a> {
    pub format: PayloadFormat,
    pub bitstream: &'a [u8],
    pub alpha: Option<&'a [u8]>,
}

/// Per-frame compression parameters.
///
/// The field set follows libwebp's `WebPConfig`; which fields matter is
/// up to the codec.
#[derive(Clone,Debug,PartialEq)]
pub struct FrameConfig {
    /// Encode losslessly.
    pub lossless: bool,
    /// Quality factor, 0 (small) to 100 (best).
    pub quality: f32,
    /// Effort level, 0 (fast) to 6 (slow).
    pub method: u8,
    /// Deblocking filter strength, 0 to 100.
    pub filter_strength: u8,
    /// Deblocking filter sharpness, 0 to 7.
    pub filter_sharpness: u8,
    /// Near-lossless preprocessing, 100 disables it.
    pub near_lossless: u8,
    /// Preserve RGB values under fully transparent pixels.
    pub exact: bool,
    /// Alpha plane quality, 0 to 100.
    pub alpha_quality: u8,
}

/// Pluggable frame compressor.
///
/// Buffers are canonical RGBA, four bytes per pixel, rows packed
/// without padding.
pub trait FrameCodec {
    /// Compress a `w` x `h` RGBA buffer.
    fn compress(&mut self, rgba: &[u8], w: u32, h: u32, config: &FrameConfig)
            -> AnimResult<FramePayload>;

    /// Decompress a payload into a `w` x `h` RGBA buffer.
    fn decompress(&mut self, payload: PayloadRef, w: u32, h: u32)
            -> AnimResult<Vec<u8>>;
}

/*--------------------------------------------------------------*/

impl PayloadFormat {
    /// Chunk id of the bitstream chunk holding this format.
    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            PayloadFormat::Lossy => b"VP8 ",
            PayloadFormat::Lossless => b"VP8L",
        }
    }
}

impl FramePayload {
    pub fn as_ref(&self) -> PayloadRef<'_> {
        PayloadRef {
            format: self.format,
            bitstream: &self.bitstream,
            alpha: self.alpha.as_ref().map(|a| &a[..]),
        }
    }
}

impl<'a> PayloadRef<'a> {
    /// True if the payload carries an alpha channel.
    ///
    /// For VP8L this reads the `alpha_is_used` hint in the header.
    pub fn has_alpha(&self) -> bool {
        match self.format {
            PayloadFormat::Lossy => self.alpha.is_some(),
            PayloadFormat::Lossless => {
                if self.bitstream.len() < 5 || self.bitstream[0] != VP8L_SIGNATURE {
                    return false;
                }
                (self.bitstream[4] >> 4) & 1 != 0
            },
        }
    }

    pub fn to_payload(&self) -> FramePayload {
        FramePayload {
            format: self.format,
            bitstream: self.bitstream.to_vec(),
            alpha: self.alpha.map(|a| a.to_vec()),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            lossless: false,
            quality: 75.0,
            method: 4,
            filter_strength: 60,
            filter_sharpness: 0,
            near_lossless: 100,
            exact: false,
            alpha_quality: 100,
        }
    }
}

impl FrameConfig {
    /// Default lossless configuration.
    pub fn lossless() -> Self {
        FrameConfig {
            lossless: true,
            ..FrameConfig::default()
        }
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_method(mut self, method: u8) -> Self {
        self.method = method;
        self
    }

    pub fn with_lossless(mut self, lossless: bool) -> Self {
        self.lossless = lossless;
        self
    }

    pub fn with_filter(mut self, strength: u8, sharpness: u8) -> Self {
        self.filter_strength = strength;
        self.filter_sharpness = sharpness;
        self
    }

    pub fn with_exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    /// Check every field is in range.
    pub fn validate(&self)
            -> AnimResult<()> {
        if !(self.quality >= 0.0 && self.quality <= 100.0) {
            return Err(AnimError::EncodeFailed(
                    format!("quality {} out of range 0..=100", self.quality)));
        }
        if self.method > 6 {
            return Err(AnimError::EncodeFailed(
                    format!("method {} out of range 0..=6", self.method)));
        }
        if self.filter_strength > 100 || self.filter_sharpness > 7 {
            return Err(AnimError::EncodeFailed(
                    format!("filter {}/{} out of range",
                            self.filter_strength, self.filter_sharpness)));
        }
        if self.near_lossless > 100 || self.alpha_quality > 100 {
            return Err(AnimError::EncodeFailed(
                    "near_lossless and alpha_quality must be 0..=100".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameConfig,FramePayload,PayloadFormat};

    #[test]
    fn test_validate_config() {
        assert!(FrameConfig::default().validate().is_ok());
        assert!(FrameConfig::lossless().with_method(6).validate().is_ok());
        assert!(FrameConfig::default().with_quality(101.0).validate().is_err());
        assert!(FrameConfig::default().with_quality(std::f32::NAN).validate().is_err());
        assert!(FrameConfig::default().with_method(7).validate().is_err());
        assert!(FrameConfig::default().with_filter(60, 8).validate().is_err());
    }

    #[test]
    fn test_lossy_alpha_hint() {
        let payload = FramePayload {
            format: PayloadFormat::Lossy,
            bitstream: vec![0; 10],
            alpha: Some(vec![1, 2, 3]),
        };
        assert!(payload.as_ref().has_alpha());
        assert_eq!(payload.as_ref().to_payload(), payload);
        assert_eq!(PayloadFormat::Lossy.fourcc(), b"VP8 ");
    }
}
