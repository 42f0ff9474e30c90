//! This crate provides routines for encoding and decoding animated
//! WebP files.
//!
//! Frame compression is delegated to a [`FrameCodec`]; the crate
//! itself handles the container, frame timing and compositing.  The
//! built-in [`Vp8lStoreCodec`] stores frames losslessly.

#[macro_use]
extern crate quick_error;

pub use codec::{FrameCodec,FrameConfig,FramePayload,PayloadFormat,PayloadRef,Vp8lStoreCodec};
pub use container::{AnimationParams,BlendMethod,DisposeMethod,Metadata};
pub use decoder::{AnimationDecoder,AnimationInfo,DecodedAnimation,DecodedFrame,DecoderState};
pub use decoder::{decode,decode_with};
pub use encoder::{AnimationEncoder,AnimationOptions};
pub use errcode::AnimError;
pub use errcode::AnimResult;
pub use import::{FrameImporter,PixelLayout,PixelSource,RawImage};
pub use raster::Rect;
pub use remux::rewrite_loop_count;

pub mod codec;
pub mod container;
pub mod decoder;
pub mod encoder;
pub mod errcode;
pub mod ffi;
pub mod import;
pub mod raster;
pub mod remux;
