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

//! Native video stream decode bridge with ordered, synchronous frame fan-out.
//!
//! A [`DecoderSession`] owns one native decode engine, accepts raw buffer
//! chunks from a producing thread, and fans every decoded frame out, in
//! registration order, to the listeners attached to the session. The fan-out
//! runs on the engine's own callback thread: a listener that blocks delays
//! every later listener and back-pressures the producer. That contract is
//! deliberate and documented on [`FrameListener`].

pub mod encoder;
pub mod engine;
pub mod error;
pub mod frame;
pub mod listeners;
pub mod session;

pub use error::{BridgeError, Result};
pub use frame::{FrameRef, OwnedFrame};
pub use session::{
    DecoderSession, FrameListener, GateObserver, SessionConfig, SessionStats,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, VideoCodec};
    use std::sync::{Arc, Mutex};

    #[test]
    fn basic_pipeline() {
        let (engine, control) = MockEngine::new();
        let session = DecoderSession::with_engine(
            Box::new(engine),
            SessionConfig {
                codec: VideoCodec::Mock,
                check_for_black_frames: true,
            },
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn FrameListener> =
            Arc::new(move |frame: &FrameRef<'_>| -> anyhow::Result<()> {
                sink.lock().unwrap().push(frame.frame_number);
                Ok(())
            });
        session.add_listener(listener);

        session.init().unwrap();
        control.enqueue_frames(vec![OwnedFrame {
            data: vec![0x80; 32],
            frame_number: 1,
            is_keyframe: true,
            width: 640,
            height: 480,
        }]);
        session.parse(&[0u8; 16], 16).unwrap();
        session.release().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(session.stats().frames_dispatched, 1);
    }
}
