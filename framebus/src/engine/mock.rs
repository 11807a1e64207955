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

//! A scripted engine that decodes nothing, for tests and simulation.
//!
//! Each `parse` call replays the next enqueued batch of frames through the
//! sink, inline on the submitting thread. The paired [`MockControl`] stays
//! with the test after the engine has been boxed into a session.

use super::{DecodeEngine, FrameSink};
use crate::error::BridgeError;
use crate::frame::OwnedFrame;
use crate::Result;
use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct ControlInner {
    /// Frame batches, one popped per `parse` call.
    script: VecDeque<Vec<OwnedFrame>>,
    /// Chunks the engine has accepted, in submission order.
    parsed_chunks: Vec<Vec<u8>>,
    fail_init: bool,
    fail_parse: bool,
    fail_release: bool,
    initialized: bool,
}

/// Shared handle to a [`MockEngine`]'s script and bookkeeping.
#[derive(Clone, Default)]
pub struct MockControl {
    inner: Arc<Mutex<ControlInner>>,
}

impl MockControl {
    /// Enqueue the frames the next `parse` call will emit. An empty batch
    /// makes that call decode nothing.
    pub fn enqueue_frames(&self, frames: Vec<OwnedFrame>) {
        self.lock().script.push_back(frames);
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.lock().fail_init = fail;
    }

    pub fn set_fail_parse(&self, fail: bool) {
        self.lock().fail_parse = fail;
    }

    pub fn set_fail_release(&self, fail: bool) {
        self.lock().fail_release = fail;
    }

    /// Number of chunks the engine accepted.
    pub fn parsed_chunks(&self) -> usize {
        self.lock().parsed_chunks.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlInner> {
        self.inner.lock().expect("mock engine state poisoned")
    }
}

/// A decode engine replaying scripted frames.
pub struct MockEngine {
    control: MockControl,
    sink: Option<FrameSink>,
}

impl MockEngine {
    /// Build an engine together with the control handle that scripts it.
    pub fn new() -> (Self, MockControl) {
        let control = MockControl::default();
        (
            Self {
                control: control.clone(),
                sink: None,
            },
            control,
        )
    }
}

impl DecodeEngine for MockEngine {
    fn probe(&self) -> String {
        "mock decode engine".to_string()
    }

    fn init(&mut self, sink: FrameSink) -> Result<()> {
        let mut inner = self.control.lock();
        if inner.fail_init {
            return Err(BridgeError::Init(
                "mock engine rejected initialization".to_string(),
            ));
        }
        inner.initialized = true;
        drop(inner);
        self.sink = Some(sink);
        debug!("mock engine initialized");
        Ok(())
    }

    fn parse(&mut self, buf: &[u8], size: usize) -> Result<()> {
        let mut inner = self.control.lock();
        if !inner.initialized {
            return Err(BridgeError::Parse("engine is not initialized".to_string()));
        }
        if size > buf.len() {
            return Err(BridgeError::Parse(format!(
                "size {} exceeds buffer length {}",
                size,
                buf.len()
            )));
        }
        if inner.fail_parse {
            return Err(BridgeError::Parse("mock engine rejected chunk".to_string()));
        }
        inner.parsed_chunks.push(buf[..size].to_vec());
        let batch = inner.script.pop_front().unwrap_or_default();
        drop(inner);

        // Unlike the libvpx engine there is no worker thread: frames are
        // replayed inline on the submitting thread.
        if let Some(sink) = &self.sink {
            for frame in &batch {
                sink(frame.as_frame());
            }
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut inner = self.control.lock();
        if !inner.initialized {
            return Err(BridgeError::Release(
                "engine is not initialized".to_string(),
            ));
        }
        if inner.fail_release {
            return Err(BridgeError::Release("mock engine refused to release".to_string()));
        }
        inner.initialized = false;
        drop(inner);
        self.sink = None;
        debug!("mock engine released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn frame(number: u64) -> OwnedFrame {
        OwnedFrame {
            data: vec![0x80; 16],
            frame_number: number,
            is_keyframe: number == 1,
            width: 320,
            height: 240,
        }
    }

    #[test]
    fn replays_one_batch_per_parse() {
        let (mut engine, control) = MockEngine::new();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: FrameSink = Box::new(move |frame| {
            sink_seen.lock().unwrap().push(frame.frame_number);
        });
        engine.init(sink).unwrap();

        control.enqueue_frames(vec![frame(1), frame(2)]);
        control.enqueue_frames(vec![]);
        engine.parse(&[0u8; 8], 8).unwrap();
        engine.parse(&[0u8; 8], 8).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(control.parsed_chunks(), 2);
    }

    #[test]
    fn lifecycle_gating() {
        let (mut engine, control) = MockEngine::new();
        assert!(matches!(
            engine.parse(&[0u8; 1], 1),
            Err(BridgeError::Parse(_))
        ));

        engine.init(Box::new(|_| {})).unwrap();
        assert!(control.is_initialized());
        engine.release().unwrap();
        assert!(!control.is_initialized());
        assert!(matches!(
            engine.release(),
            Err(BridgeError::Release(_))
        ));
    }

    #[test]
    fn injected_failures() {
        let (mut engine, control) = MockEngine::new();
        control.set_fail_init(true);
        assert!(matches!(
            engine.init(Box::new(|_| {})),
            Err(BridgeError::Init(_))
        ));

        control.set_fail_init(false);
        engine.init(Box::new(|_| {})).unwrap();
        control.set_fail_parse(true);
        assert!(matches!(
            engine.parse(&[0u8; 1], 1),
            Err(BridgeError::Parse(_))
        ));
        assert_eq!(control.parsed_chunks(), 0);
    }
}
