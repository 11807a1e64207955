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

//! Built-in frame consumers: black-frame detection, bounded queueing, and
//! stats publication.

use crate::frame::{FrameRef, OwnedFrame};
use crate::session::{FrameListener, GateObserver};
use framebus_diagnostics::{metric, publish, now_ms, DiagEvent};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Average luma at or below this value counts as black.
const BLACK_LUMA_THRESHOLD: u32 = 16;
/// Number of leading luma bytes sampled per frame.
const LUMA_SAMPLE_LEN: usize = 10;

/// Flags frames whose leading luma samples are below the black threshold.
///
/// Starts in the black state; blank frames (no dimensions) keep it there.
pub struct BlackFrameDetector {
    black: AtomicBool,
}

impl BlackFrameDetector {
    pub fn new() -> Self {
        Self {
            black: AtomicBool::new(true),
        }
    }

    /// Whether the most recent frame was black.
    pub fn is_black(&self) -> bool {
        self.black.load(Ordering::Relaxed)
    }

    fn frame_is_black(payload: &[u8], width: u32, height: u32) -> bool {
        let y_size = (width as usize).saturating_mul(height as usize);
        let sample = y_size.min(LUMA_SAMPLE_LEN).min(payload.len());
        if sample == 0 {
            return true;
        }
        let total: u32 = payload[..sample].iter().map(|b| u32::from(*b)).sum();
        total / sample as u32 <= BLACK_LUMA_THRESHOLD
    }
}

impl Default for BlackFrameDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameListener for BlackFrameDetector {
    fn on_frame(&self, frame: &FrameRef<'_>) -> anyhow::Result<()> {
        let black = Self::frame_is_black(frame.payload(), frame.width, frame.height);
        let was = self.black.swap(black, Ordering::Relaxed);
        if was != black {
            debug!(
                "black-frame state changed to {} at frame {}",
                black, frame.frame_number
            );
        }
        Ok(())
    }
}

/// Copies each frame into a bounded queue for a downstream consumer thread.
///
/// Frame payloads are only valid for the duration of the callback, so the
/// queue stores owned copies. When full, the oldest frame is dropped to make
/// room, matching a live pipeline that prefers fresh frames over complete
/// ones.
pub struct BoundedFrameQueue {
    capacity: usize,
    queue: Mutex<VecDeque<OwnedFrame>>,
    dropped: AtomicU64,
}

impl BoundedFrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Dequeue the oldest buffered frame.
    pub fn pop(&self) -> Option<OwnedFrame> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<OwnedFrame>> {
        self.queue.lock().expect("frame queue poisoned")
    }
}

impl FrameListener for BoundedFrameQueue {
    fn on_frame(&self, frame: &FrameRef<'_>) -> anyhow::Result<()> {
        let mut queue = self.lock();
        if queue.len() == self.capacity {
            if let Some(dropped) = queue.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "frame queue full, dropping frame {} for frame {}",
                    dropped.frame_number, frame.frame_number
                );
            }
        }
        queue.push_back(frame.to_owned());
        Ok(())
    }
}

/// How often `FrameStats` publishes on the diagnostics bus.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

struct StatsWindow {
    started: Instant,
    frames: u64,
}

/// Counts frames and keyframes and publishes windowed fps on the
/// diagnostics bus under the `bridge` subsystem.
pub struct FrameStats {
    source_id: String,
    frames: AtomicU64,
    keyframes: AtomicU64,
    window: Mutex<StatsWindow>,
}

impl FrameStats {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            frames: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            window: Mutex::new(StatsWindow {
                started: Instant::now(),
                frames: 0,
            }),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn keyframes(&self) -> u64 {
        self.keyframes.load(Ordering::Relaxed)
    }
}

impl FrameListener for FrameStats {
    fn on_frame(&self, frame: &FrameRef<'_>) -> anyhow::Result<()> {
        let frames_total = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frame.is_keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }

        let mut window = self.window.lock().expect("stats window poisoned");
        window.frames += 1;
        let elapsed = window.started.elapsed();
        if elapsed >= REPORT_INTERVAL {
            let fps = window.frames as f64 / elapsed.as_secs_f64();
            window.started = Instant::now();
            window.frames = 0;
            drop(window);

            publish(DiagEvent {
                subsystem: "bridge",
                source_id: Some(self.source_id.clone()),
                ts_ms: now_ms(),
                metrics: vec![
                    metric!("fps", fps),
                    metric!("frames_total", frames_total),
                    metric!("keyframes_total", self.keyframes()),
                ],
            });
        }
        Ok(())
    }
}

/// Publishes the one-shot "frames are flowing" signal on the diagnostics
/// bus.
pub struct DiagGateObserver {
    source_id: String,
}

impl DiagGateObserver {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
        }
    }
}

impl GateObserver for DiagGateObserver {
    fn on_frames_flowing(&self) {
        publish(DiagEvent {
            subsystem: "bridge",
            source_id: Some(self.source_id.clone()),
            ts_ms: now_ms(),
            metrics: vec![metric!("frames_flowing", 1u64)],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_luma(number: u64, luma: u8) -> OwnedFrame {
        OwnedFrame {
            data: vec![luma; 64],
            frame_number: number,
            is_keyframe: number == 1,
            width: 8,
            height: 8,
        }
    }

    #[test]
    fn detector_tracks_luma_threshold() {
        let detector = BlackFrameDetector::new();
        assert!(detector.is_black());

        detector.on_frame(&frame_with_luma(1, 0x00).as_frame()).unwrap();
        assert!(detector.is_black());

        detector.on_frame(&frame_with_luma(2, 0x80).as_frame()).unwrap();
        assert!(!detector.is_black());

        // Exactly at the threshold still counts as black.
        detector.on_frame(&frame_with_luma(3, 16).as_frame()).unwrap();
        assert!(detector.is_black());
    }

    #[test]
    fn blank_frame_counts_as_black() {
        let detector = BlackFrameDetector::new();
        detector.on_frame(&frame_with_luma(1, 0x80).as_frame()).unwrap();
        assert!(!detector.is_black());

        let mut blank = frame_with_luma(2, 0x80);
        blank.width = 0;
        blank.height = 0;
        detector.on_frame(&blank.as_frame()).unwrap();
        assert!(detector.is_black());
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let queue = BoundedFrameQueue::new(2);
        for number in 1..=4u64 {
            queue
                .on_frame(&frame_with_luma(number, 0x80).as_frame())
                .unwrap();
        }

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.pop().unwrap().frame_number, 3);
        assert_eq!(queue.pop().unwrap().frame_number, 4);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn stats_count_frames_and_keyframes() {
        let stats = FrameStats::new("test");
        for number in 1..=5u64 {
            stats
                .on_frame(&frame_with_luma(number, 0x80).as_frame())
                .unwrap();
        }
        assert_eq!(stats.frames(), 5);
        assert_eq!(stats.keyframes(), 1);
    }
}
