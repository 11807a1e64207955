/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Contains the fundamental data structures for decoded frames.

use serde::{Deserialize, Serialize};

/// Borrowed view of one decoded frame, handed to listeners during dispatch.
///
/// The backing storage belongs to the engine and is reused as soon as the
/// callback returns. A consumer that needs the payload beyond the callback
/// must copy it, e.g. via [`FrameRef::to_owned`].
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    /// Raw pixel data (I420 planes for the libvpx engine).
    pub data: &'a [u8],
    /// Number of valid bytes at the start of `data`. Always `<= data.len()`.
    pub size: usize,
    /// Monotonic frame sequence number, starting at 1.
    pub frame_number: u64,
    /// Whether this frame is decodable without reference to earlier frames.
    pub is_keyframe: bool,
    /// Frame width in pixels. 0 while the engine has not locked dimensions.
    pub width: u32,
    /// Frame height in pixels. 0 while the engine has not locked dimensions.
    pub height: u32,
}

impl<'a> FrameRef<'a> {
    /// The valid portion of the payload.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[..self.size]
    }

    /// A frame with no dimensions carries no renderable content.
    pub fn is_blank(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy this frame into an [`OwnedFrame`] that outlives the callback.
    pub fn to_owned(&self) -> OwnedFrame {
        OwnedFrame {
            data: self.payload().to_vec(),
            frame_number: self.frame_number,
            is_keyframe: self.is_keyframe,
            width: self.width,
            height: self.height,
        }
    }
}

/// A decoded frame that owns its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub frame_number: u64,
    pub is_keyframe: bool,
    pub width: u32,
    pub height: u32,
}

impl OwnedFrame {
    /// Borrow this frame in the shape dispatch hands to listeners.
    pub fn as_frame(&self) -> FrameRef<'_> {
        FrameRef {
            data: &self.data,
            size: self.data.len(),
            frame_number: self.frame_number,
            is_keyframe: self.is_keyframe,
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_size_bounded() {
        let storage = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let frame = FrameRef {
            data: &storage,
            size: 4,
            frame_number: 7,
            is_keyframe: false,
            width: 2,
            height: 2,
        };
        assert_eq!(frame.payload(), &[1, 2, 3, 4]);

        let owned = frame.to_owned();
        assert_eq!(owned.data.len(), 4);
        assert_eq!(owned.frame_number, 7);
        assert_eq!(owned.as_frame().size, 4);
    }

    #[test]
    fn blank_frames_have_no_dimensions() {
        let storage = [0u8; 4];
        let mut frame = FrameRef {
            data: &storage,
            size: 4,
            frame_number: 1,
            is_keyframe: true,
            width: 0,
            height: 480,
        };
        assert!(frame.is_blank());
        frame.width = 640;
        assert!(!frame.is_blank());
    }
}
