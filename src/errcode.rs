//! Animation error codes.

use std::io;

pub type AnimResult<T> = Result<T, AnimError>;

quick_error! {
    #[derive(Debug)]
    pub enum AnimError {
        /// Pixel source bounds differ from the canvas.
        DimensionMismatch(expected: (u32, u32), actual: (u32, u32)) {
            display("Dimension mismatch: expected {}x{}, got {}x{}",
                    expected.0, expected.1, actual.0, actual.1)
        }
        /// Timestamp is not strictly after the previous frame, or the
        /// gap does not fit the container's duration field.
        InvalidTimestamp(timestamp: u32, previous: u32) {
            display("Invalid timestamp {} (previous frame at {})", timestamp, previous)
        }
        EncodeFailed(reason: String) {
            display("Encode failed: {}", reason)
        }
        EmptyAnimation {
            display("Animation has no frames")
        }
        SessionClosed {
            display("Session closed")
        }
        MalformedContainer(reason: String) {
            display("Malformed container: {}", reason)
            from(err: io::Error) -> (format!("truncated data ({})", err))
        }
        UnsupportedVersion(reason: String) {
            display("Unsupported container: {}", reason)
        }
        ParamsNotFound {
            display("Animation parameters chunk not found")
        }
        /// Loop count rewrite failed on an otherwise malformed container.
        RewriteFailed(err: Box<AnimError>) {
            display("Rewrite failed: {}", err)
        }
        InvalidContainer(reason: String) {
            display("Invalid container: {}", reason)
        }
        InfoUnavailable {
            display("Animation info unavailable")
        }
        DecodeFailed(reason: String) {
            display("Decode failed: {}", reason)
        }
    }
}

impl AnimError {
    /// True for errors the caller can fix by changing its input, as
    /// opposed to corrupt data or codec failures.
    pub fn is_input_error(&self) -> bool {
        use self::AnimError::*;
        match *self {
            DimensionMismatch(..) | InvalidTimestamp(..)
                | EmptyAnimation | SessionClosed => true,
            _ => false,
        }
    }

    /// Stable numeric code, used across the C interface.
    pub fn code(&self) -> i32 {
        use self::AnimError::*;
        match *self {
            DimensionMismatch(..) => 1,
            InvalidTimestamp(..) => 2,
            EncodeFailed(..) => 3,
            EmptyAnimation => 4,
            SessionClosed => 5,
            MalformedContainer(..) => 6,
            UnsupportedVersion(..) => 7,
            ParamsNotFound => 8,
            RewriteFailed(..) => 9,
            InvalidContainer(..) => 10,
            InfoUnavailable => 11,
            DecodeFailed(..) => 12,
        }
    }
}
