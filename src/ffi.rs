//! Foreign function interface.
//!
//! Functions return 0 on success, `WEBPANIM_ERR_INVALID_ARGUMENT` for
//! null or out-of-range arguments, or `AnimError::code()`.  Every
//! handle must be passed to its `_delete` function exactly once.

use std::convert::TryFrom;
use std::ptr;
use std::slice;
use libc::{c_int,c_uint,size_t};
use log::error;

use crate::AnimResult;
use crate::codec::FrameConfig;
use crate::decoder::{AnimationDecoder,DecodedFrame};
use crate::encoder::{AnimationEncoder,AnimationOptions};

/// Returned when a pointer argument is null.
pub const WEBPANIM_ERR_INVALID_ARGUMENT: c_int = -1;

/// Dummy opaque structure, equivalent to AnimationEncoder.
pub struct CEncoder;

/// Dummy opaque structure, equivalent to DecoderHandle.
pub struct CDecoder;

/// Animation options.
#[repr(C)]
#[derive(Clone,Copy,Debug)]
pub struct WebpAnimOptions {
    /// Packed ARGB.
    pub background_color: u32,
    pub loop_count: c_uint,
    pub minimize_size: c_int,
    /// Negative to derive from the other frames.
    pub last_frame_duration: c_int,
}

/// Per-frame compression parameters.
#[repr(C)]
#[derive(Clone,Copy,Debug)]
pub struct WebpAnimFrameConfig {
    pub lossless: c_int,
    pub quality: f32,
    pub method: c_int,
    pub filter_strength: c_int,
    pub filter_sharpness: c_int,
    pub near_lossless: c_int,
    pub exact: c_int,
    pub alpha_quality: c_int,
}

/// Global animation properties.
#[repr(C)]
#[derive(Clone,Copy,Debug,Default)]
pub struct WebpAnimInfo {
    pub width: c_uint,
    pub height: c_uint,
    pub loop_count: c_uint,
    pub background_color: u32,
    pub frame_count: c_uint,
    pub has_alpha: c_int,
}

/// Decoder plus the frame most recently handed out.
struct DecoderHandle {
    decoder: AnimationDecoder<'static>,
    last: Option<DecodedFrame>,
}

// Log with "file:line - " prefix, for more informative error messages.
macro_rules! printerrorln {
    ($e:expr) => {
        error!("{}:{} - {}", file!(), line!(), $e);
    };
}

unsafe fn transmute_encoder<'a>(src: *mut CEncoder)
        -> &'a mut AnimationEncoder {
    &mut *(src as *mut AnimationEncoder)
}

unsafe fn transmute_decoder<'a>(src: *mut CDecoder)
        -> &'a mut DecoderHandle {
    &mut *(src as *mut DecoderHandle)
}

fn run<F>(file: &'static str, line: u32, f: F)
        -> c_int
        where F: FnOnce() -> AnimResult<()> {
    match f() {
        Ok(()) => 0,
        Err(e) => {
            error!("{}:{} - {}", file, line, e);
            e.code()
        },
    }
}

fn to_u8(v: c_int) -> u8 {
    // Out-of-range values fail FrameConfig::validate.
    u8::try_from(v).unwrap_or(u8::MAX)
}

impl From<&WebpAnimFrameConfig> for FrameConfig {
    fn from(c: &WebpAnimFrameConfig) -> Self {
        FrameConfig {
            lossless: c.lossless != 0,
            quality: c.quality,
            method: to_u8(c.method),
            filter_strength: to_u8(c.filter_strength),
            filter_sharpness: to_u8(c.filter_sharpness),
            near_lossless: to_u8(c.near_lossless),
            exact: c.exact != 0,
            alpha_quality: to_u8(c.alpha_quality),
        }
    }
}

/*--------------------------------------------------------------*/
/* Encoder                                                      */
/*--------------------------------------------------------------*/

/// Fill in the default animation options.
#[no_mangle]
pub extern "C" fn webpanim_options_default(
        options: *mut WebpAnimOptions)
        -> c_int {
    if options.is_null() {
        printerrorln!("bad input parameters");
        return WEBPANIM_ERR_INVALID_ARGUMENT;
    }

    let d = AnimationOptions::default();
    unsafe{ ptr::write(options, WebpAnimOptions {
        background_color: d.background_color,
        loop_count: d.loop_count as c_uint,
        minimize_size: d.minimize_size as c_int,
        last_frame_duration: -1,
    }) };
    0
}

/// Fill in the default frame configuration.
#[no_mangle]
pub extern "C" fn webpanim_frame_config_default(
        config: *mut WebpAnimFrameConfig)
        -> c_int {
    if config.is_null() {
        printerrorln!("bad input parameters");
        return WEBPANIM_ERR_INVALID_ARGUMENT;
    }

    let d = FrameConfig::default();
    unsafe{ ptr::write(config, WebpAnimFrameConfig {
        lossless: d.lossless as c_int,
        quality: d.quality,
        method: d.method as c_int,
        filter_strength: d.filter_strength as c_int,
        filter_sharpness: d.filter_sharpness as c_int,
        near_lossless: d.near_lossless as c_int,
        exact: d.exact as c_int,
        alpha_quality: d.alpha_quality as c_int,
    }) };
    0
}

/// Start an encode session.  `options` may be null for the defaults.
///
/// Returns null if the arguments are out of range.
#[no_mangle]
pub extern "C" fn webpanim_encoder_new(
        width: c_uint, height: c_uint, options: *const WebpAnimOptions)
        -> *mut CEncoder {
    let opts = if options.is_null() {
        AnimationOptions::default()
    } else {
        let o = unsafe{ &*options };
        let loop_count = match u16::try_from(o.loop_count) {
            Ok(n) => n,
            Err(_) => {
                printerrorln!("loop count out of range");
                return ptr::null_mut();
            },
        };
        AnimationOptions {
            background_color: o.background_color,
            loop_count: loop_count,
            minimize_size: o.minimize_size != 0,
            last_frame_duration: u32::try_from(o.last_frame_duration).ok(),
        }
    };

    match AnimationEncoder::new(width, height, opts) {
        Ok(encoder) => Box::into_raw(Box::new(encoder)) as *mut CEncoder,
        Err(e) => {
            printerrorln!(e);
            ptr::null_mut()
        },
    }
}

/// Add a packed RGBA frame, or repeat the previous frame if `rgba` is
/// null.  `config` may be null for the defaults.
#[no_mangle]
pub extern "C" fn webpanim_encoder_add_frame(
        encoder: *mut CEncoder,
        rgba: *const u8, rgba_len: size_t, timestamp: c_uint,
        config: *const WebpAnimFrameConfig)
        -> c_int {
    if encoder.is_null() {
        printerrorln!("bad input parameters");
        return WEBPANIM_ERR_INVALID_ARGUMENT;
    }

    let enc = unsafe{ transmute_encoder(encoder) };
    let cfg = if config.is_null() {
        FrameConfig::default()
    } else {
        FrameConfig::from(unsafe{ &*config })
    };
    let pixels = if rgba.is_null() {
        None
    } else {
        Some(unsafe{ slice::from_raw_parts(rgba, rgba_len) })
    };

    run(file!(), line!(),
            || enc.add_rgba(pixels, timestamp, &cfg))
}

/// Assemble the animation.  On success `*out_data` receives a buffer
/// to be freed with `webpanim_data_free`.
#[no_mangle]
pub extern "C" fn webpanim_encoder_assemble(
        encoder: *mut CEncoder, out_data: *mut *mut u8, out_len: *mut size_t)
        -> c_int {
    if encoder.is_null() || out_data.is_null() || out_len.is_null() {
        printerrorln!("bad input parameters");
        return WEBPANIM_ERR_INVALID_ARGUMENT;
    }

    let enc = unsafe{ transmute_encoder(encoder) };
    run(file!(), line!(), || {
        let data = enc.finalize()?.into_boxed_slice();
        let len = data.len();
        let buf = Box::into_raw(data) as *mut u8;
        unsafe{
            ptr::write(out_data, buf);
            ptr::write(out_len, len);
        }
        Ok(())
    })
}

/// Destroy an encode session.  Null is ignored.
#[no_mangle]
pub extern "C" fn webpanim_encoder_delete(
        encoder: *mut CEncoder) {
    if encoder.is_null() {
        return;
    }

    let mut enc = unsafe{ Box::from_raw(encoder as *mut AnimationEncoder) };
    enc.release();
}

/// Free a buffer returned by `webpanim_encoder_assemble`.  Null is
/// ignored.
#[no_mangle]
pub extern "C" fn webpanim_data_free(
        data: *mut u8, len: size_t) {
    if data.is_null() {
        return;
    }

    let buf = unsafe{ slice::from_raw_parts_mut(data, len) as *mut [u8] };
    drop(unsafe{ Box::from_raw(buf) });
}

/*--------------------------------------------------------------*/
/* Decoder                                                      */
/*--------------------------------------------------------------*/

/// Open a container.  The data is copied.  On failure returns null and,
/// if `out_error` is not null, stores the error code there.
#[no_mangle]
pub extern "C" fn webpanim_decoder_new(
        data: *const u8, len: size_t, out_error: *mut c_int)
        -> *mut CDecoder {
    let code = if data.is_null() {
        printerrorln!("bad input parameters");
        WEBPANIM_ERR_INVALID_ARGUMENT
    } else {
        let src = unsafe{ slice::from_raw_parts(data, len) };
        match AnimationDecoder::new(src.to_vec()) {
            Ok(decoder) => {
                let handle = Box::new(DecoderHandle {
                    decoder: decoder,
                    last: None,
                });
                return Box::into_raw(handle) as *mut CDecoder;
            },
            Err(e) => {
                printerrorln!(e);
                e.code()
            },
        }
    };

    if !out_error.is_null() {
        unsafe{ ptr::write(out_error, code) };
    }
    ptr::null_mut()
}

/// Read the global animation properties.
#[no_mangle]
pub extern "C" fn webpanim_decoder_get_info(
        decoder: *mut CDecoder, info: *mut WebpAnimInfo)
        -> c_int {
    if decoder.is_null() || info.is_null() {
        printerrorln!("bad input parameters");
        return WEBPANIM_ERR_INVALID_ARGUMENT;
    }

    let handle = unsafe{ transmute_decoder(decoder) };
    run(file!(), line!(), || {
        let i = handle.decoder.get_info()?;
        unsafe{ ptr::write(info, WebpAnimInfo {
            width: i.width,
            height: i.height,
            loop_count: i.loop_count as c_uint,
            background_color: i.background_color,
            frame_count: i.frame_count as c_uint,
            has_alpha: i.has_alpha as c_int,
        }) };
        Ok(())
    })
}

/// Decode the next frame.
///
/// On success `*out_pixels` points to width x height RGBA pixels owned
/// by the decoder, valid until the next call on this handle.  After
/// the last frame `*out_pixels` is set to null.
#[no_mangle]
pub extern "C" fn webpanim_decoder_get_next(
        decoder: *mut CDecoder,
        out_pixels: *mut *const u8, out_timestamp: *mut c_uint)
        -> c_int {
    if decoder.is_null() || out_pixels.is_null() || out_timestamp.is_null() {
        printerrorln!("bad input parameters");
        return WEBPANIM_ERR_INVALID_ARGUMENT;
    }

    let handle = unsafe{ transmute_decoder(decoder) };
    run(file!(), line!(), || {
        handle.last = handle.decoder.get_next()?;
        let (pixels, timestamp) = match handle.last {
            Some(ref frame) => (frame.pixels.as_ptr(), frame.timestamp),
            None => (ptr::null(), 0),
        };
        unsafe{
            ptr::write(out_pixels, pixels);
            ptr::write(out_timestamp, timestamp);
        }
        Ok(())
    })
}

/// Rewind to the first frame.
#[no_mangle]
pub extern "C" fn webpanim_decoder_reset(
        decoder: *mut CDecoder)
        -> c_int {
    if decoder.is_null() {
        printerrorln!("bad input parameters");
        return WEBPANIM_ERR_INVALID_ARGUMENT;
    }

    let handle = unsafe{ transmute_decoder(decoder) };
    handle.last = None;
    run(file!(), line!(), || handle.decoder.reset())
}

/// Destroy a decoder.  Null is ignored.
#[no_mangle]
pub extern "C" fn webpanim_decoder_delete(
        decoder: *mut CDecoder) {
    if decoder.is_null() {
        return;
    }

    let mut handle = unsafe{ Box::from_raw(decoder as *mut DecoderHandle) };
    handle.decoder.release();
}
