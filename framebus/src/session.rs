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

//! The decoder session: engine lifecycle, listener registry, and dispatch.
//!
//! A session is constructed explicitly and owns exactly one engine. There is
//! no global instance; producers and consumers share the session through an
//! `Arc`. Session reset is `release()` followed by `init()` — listeners
//! persist across the cycle.

use crate::engine::{engine_for, DecodeEngine, FrameSink, VideoCodec};
use crate::error::BridgeError;
use crate::frame::FrameRef;
use crate::Result;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A consumer of decoded frames.
///
/// `on_frame` runs on the engine's callback thread, synchronously, in
/// registration order. Time-consuming work here delays every later listener
/// for the same frame and back-pressures the producer through `parse`; a
/// listener that needs to do slow work should copy the frame and hand it to
/// its own thread (see `BoundedFrameQueue`). Listeners must not call back
/// into `parse` or `release` — the engine is busy dispatching.
///
/// A returned error is isolated: it is logged and counted, and dispatch
/// continues with the next listener.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: &FrameRef<'_>) -> anyhow::Result<()>;
}

impl<F> FrameListener for F
where
    F: Fn(&FrameRef<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_frame(&self, frame: &FrameRef<'_>) -> anyhow::Result<()> {
        self(frame)
    }
}

/// Out-of-band sink for the one-shot "frames are flowing" notification.
///
/// Notified at most once per gating cycle, before any listener sees the
/// triggering frame.
pub trait GateObserver: Send + Sync {
    fn on_frames_flowing(&self);
}

/// Session construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Engine backend to construct for the session.
    pub codec: VideoCodec,
    /// Whether the black-frame gate starts armed.
    pub check_for_black_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::Vp9,
            check_for_black_frames: true,
        }
    }
}

/// Counters accumulated over the session's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_dispatched: u64,
    pub listener_faults: u64,
    pub gate_notifications: u64,
}

/// Registry and gate state. Mutated from arbitrary threads, snapshotted by
/// the callback thread; never locked across a listener or observer call.
struct DispatchState {
    listeners: Vec<Arc<dyn FrameListener>>,
    awaiting_first_frame: bool,
    observer: Option<Arc<dyn GateObserver>>,
}

struct SessionShared {
    dispatch: Mutex<DispatchState>,
    frames_dispatched: AtomicU64,
    listener_faults: AtomicU64,
    gate_notifications: AtomicU64,
}

impl SessionShared {
    /// The single dispatch point, invoked from the engine callback.
    fn dispatch(&self, frame: &FrameRef<'_>) {
        let mut notify: Option<Arc<dyn GateObserver>> = None;
        let mut gate_fired = false;
        let snapshot = {
            let mut state = self.dispatch.lock().expect("dispatch state poisoned");
            if state.awaiting_first_frame && frame.width != 0 && frame.height != 0 {
                state.awaiting_first_frame = false;
                gate_fired = true;
                notify = state.observer.clone();
            }
            state.listeners.clone()
        };

        if gate_fired {
            self.gate_notifications.fetch_add(1, Ordering::Relaxed);
            info!(
                "first nonblank frame ({}x{}), frames are flowing",
                frame.width, frame.height
            );
            if let Some(observer) = notify {
                observer.on_frames_flowing();
            }
        }

        for (index, listener) in snapshot.iter().enumerate() {
            if let Err(source) = listener.on_frame(frame) {
                self.listener_faults.fetch_add(1, Ordering::Relaxed);
                error!("{}", BridgeError::ListenerFault { index, source });
            }
        }
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }
}

/// The bridge between a raw-chunk producer and frame listeners.
///
/// One engine per session. The engine lock is held across `init`, `parse`,
/// and `release`, which serializes producers and guarantees that `release`
/// waits for an in-flight `parse` — and therefore for any dispatch it
/// triggered — to finish.
pub struct DecoderSession {
    shared: Arc<SessionShared>,
    engine: Mutex<Box<dyn DecodeEngine>>,
}

impl DecoderSession {
    /// Create a session with the engine backing `config.codec`.
    pub fn new(config: SessionConfig) -> Self {
        let engine = engine_for(config.codec);
        Self::with_engine(engine, config)
    }

    /// Create a session around a caller-supplied engine.
    pub fn with_engine(engine: Box<dyn DecodeEngine>, config: SessionConfig) -> Self {
        DecoderSession {
            shared: Arc::new(SessionShared {
                dispatch: Mutex::new(DispatchState {
                    listeners: Vec::new(),
                    awaiting_first_frame: config.check_for_black_frames,
                    observer: None,
                }),
                frames_dispatched: AtomicU64::new(0),
                listener_faults: AtomicU64::new(0),
                gate_notifications: AtomicU64::new(0),
            }),
            engine: Mutex::new(engine),
        }
    }

    /// (Re-)initialize the engine. Callers must not `parse` after a failure.
    pub fn init(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let sink: FrameSink = Box::new(move |frame| shared.dispatch(&frame));
        self.engine().init(sink)
    }

    /// Submit the first `size` bytes of `buf` for decoding. Blocks until
    /// every frame produced by the chunk has been dispatched.
    pub fn parse(&self, buf: &[u8], size: usize) -> Result<()> {
        if size > buf.len() {
            return Err(BridgeError::Parse(format!(
                "size {} exceeds buffer length {}",
                size,
                buf.len()
            )));
        }
        self.engine().parse(buf, size)
    }

    /// Tear down the engine. Waits for an in-flight dispatch to finish;
    /// afterwards `parse` fails until the next successful `init`.
    pub fn release(&self) -> Result<()> {
        self.engine().release()
    }

    /// Engine diagnostic/version string.
    pub fn probe(&self) -> String {
        self.engine().probe()
    }

    /// Append a listener. Registration order is dispatch order; registering
    /// the same listener twice dispatches it twice.
    pub fn add_listener(&self, listener: Arc<dyn FrameListener>) {
        self.dispatch_state().listeners.push(listener);
    }

    /// Remove the first registry entry backed by the same allocation.
    pub fn remove_listener(&self, listener: &Arc<dyn FrameListener>) -> Result<()> {
        let mut state = self.dispatch_state();
        match state
            .listeners
            .iter()
            .position(|registered| Arc::ptr_eq(registered, listener))
        {
            Some(index) => {
                state.listeners.remove(index);
                Ok(())
            }
            None => Err(BridgeError::ListenerNotRegistered),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.dispatch_state().listeners.len()
    }

    /// Arm or disarm the black-frame gate. Re-enabling after the gate has
    /// been consumed arms a new one-shot cycle.
    pub fn set_check_for_black_frames(&self, enabled: bool) {
        self.dispatch_state().awaiting_first_frame = enabled;
    }

    /// Install the out-of-band observer for the gate notification.
    pub fn set_gate_observer(&self, observer: Arc<dyn GateObserver>) {
        self.dispatch_state().observer = Some(observer);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_dispatched: self.shared.frames_dispatched.load(Ordering::Relaxed),
            listener_faults: self.shared.listener_faults.load(Ordering::Relaxed),
            gate_notifications: self.shared.gate_notifications.load(Ordering::Relaxed),
        }
    }

    fn engine(&self) -> std::sync::MutexGuard<'_, Box<dyn DecodeEngine>> {
        self.engine.lock().expect("engine state poisoned")
    }

    fn dispatch_state(&self) -> std::sync::MutexGuard<'_, DispatchState> {
        self.shared.dispatch.lock().expect("dispatch state poisoned")
    }
}
