//! Animation parameter rewriting.
//!
//! The ANIM chunk has a fixed size, so new parameters are patched over
//! the old ones.  No other byte of the container changes and no frame
//! payload is decoded.

use byteorder::LittleEndian as LE;
use byteorder::WriteBytesExt;
use log::debug;

use crate::{AnimError,AnimResult};
use crate::container::{self,AnimationParams};

/// Return a copy of the container with a new loop count.
///
/// Fails with `ParamsNotFound` if the container has no ANIM chunk, or
/// `RewriteFailed` if it does not parse.
pub fn rewrite_loop_count(data: &[u8], loop_count: u16)
        -> AnimResult<Vec<u8>> {
    let mut out = data.to_vec();
    set_loop_count(&mut out, loop_count)?;
    Ok(out)
}

/// Patch the loop count in place.
pub fn set_loop_count(data: &mut [u8], loop_count: u16)
        -> AnimResult<()> {
    let offset = find_params(data)?;
    (&mut data[(offset + 4)..(offset + 6)]).write_u16::<LE>(loop_count)?;
    debug!("loop count set to {}", loop_count);
    Ok(())
}

/// Return a copy of the container with new background color and loop
/// count.
pub fn rewrite_animation_params(data: &[u8], params: AnimationParams)
        -> AnimResult<Vec<u8>> {
    let mut out = data.to_vec();
    let offset = find_params(&out)?;
    {
        let mut w = &mut out[offset..(offset + 6)];
        w.write_u32::<LE>(params.background_color)?;
        w.write_u16::<LE>(params.loop_count)?;
    }
    debug!("animation params set to {:08X}/{}", params.background_color, params.loop_count);
    Ok(out)
}

/// Offset of the ANIM chunk's payload.
fn find_params(data: &[u8])
        -> AnimResult<usize> {
    let parsed = container::parse(data)
        .map_err(|e| AnimError::RewriteFailed(Box::new(e)))?;
    parsed.params_offset.ok_or(AnimError::ParamsNotFound)
}
