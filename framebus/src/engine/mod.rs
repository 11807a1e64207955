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

//! The narrow boundary to the native decode/demux library.

use crate::frame::FrameRef;
use crate::Result;
use serde::{Deserialize, Serialize};

/// An enumeration of the supported engine backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// VP8 via libvpx.
    Vp8,
    /// VP9 via libvpx.
    Vp9,
    /// A scripted engine that decodes nothing, for tests and simulation.
    Mock,
}

/// Callback installed into an engine at `init`.
///
/// Invoked once per decoded frame, on the engine's own execution context.
/// The storage behind the [`FrameRef`] reverts to the engine as soon as the
/// callback returns.
pub type FrameSink = Box<dyn Fn(FrameRef<'_>) + Send + Sync>;

/// The operations the bridge needs from a native decode engine.
///
/// `parse` is valid only between a successful `init` and the next `release`.
pub trait DecodeEngine: Send {
    /// Diagnostic/version string. No side effects; valid in any state.
    fn probe(&self) -> String;

    /// (Re-)initialize the decode context and install the frame sink.
    /// On an already initialized engine this tears the old context down
    /// first. After a failed `init` the engine is uninitialized.
    fn init(&mut self, sink: FrameSink) -> Result<()>;

    /// Submit the first `size` bytes of `buf` for decoding. May invoke the
    /// sink zero or more times before returning; returns once every frame
    /// produced by this chunk has been dispatched.
    fn parse(&mut self, buf: &[u8], size: usize) -> Result<()>;

    /// Tear down the decode context. Returns only once no callback is in
    /// flight. Fails on an engine that is not initialized.
    fn release(&mut self) -> Result<()>;
}

mod mock;
mod vpx;

pub use self::mock::{MockControl, MockEngine};
pub use self::vpx::VpxEngine;

/// Construct the engine backing `codec`.
pub fn engine_for(codec: VideoCodec) -> Box<dyn DecodeEngine> {
    match codec {
        VideoCodec::Vp8 | VideoCodec::Vp9 => Box::new(VpxEngine::new(codec)),
        VideoCodec::Mock => Box::new(MockEngine::new().0),
    }
}
