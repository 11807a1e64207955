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

//! Pipeline simulation: drives a scripted engine through the bridge with a
//! synthetic stream and prints what the listeners observed.

use clap::Parser;
use framebus::engine::{MockEngine, VideoCodec};
use framebus::listeners::{BlackFrameDetector, BoundedFrameQueue, FrameStats};
use framebus::{DecoderSession, GateObserver, OwnedFrame, SessionConfig};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "framebus_sim", about = "Drive the decode bridge with a scripted engine")]
struct Args {
    /// Number of frames to push through the bridge.
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Width of the synthetic stream once dimensions lock.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Height of the synthetic stream once dimensions lock.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Keyframe interval of the synthetic stream.
    #[arg(long, default_value_t = 30)]
    keyframe_interval: u32,

    /// Leading frames delivered without dimensions, before the stream
    /// lights up.
    #[arg(long, default_value_t = 5)]
    blank_frames: u32,

    /// Capacity of the bounded frame queue listener.
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
}

struct PrintingGateObserver;

impl GateObserver for PrintingGateObserver {
    fn on_frames_flowing(&self) {
        println!("[SIM] gate consumed: frames are flowing");
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (engine, control) = MockEngine::new();
    let session = DecoderSession::with_engine(
        Box::new(engine),
        SessionConfig {
            codec: VideoCodec::Mock,
            check_for_black_frames: true,
        },
    );

    let detector = Arc::new(BlackFrameDetector::new());
    let queue = Arc::new(BoundedFrameQueue::new(args.queue_capacity));
    let stats = Arc::new(FrameStats::new("sim"));
    session.add_listener(detector.clone());
    session.add_listener(queue.clone());
    session.add_listener(stats.clone());
    session.set_gate_observer(Arc::new(PrintingGateObserver));

    // Mirror everything the pipeline publishes on the diagnostics bus.
    let events = framebus_diagnostics::subscribe();
    std::thread::spawn(move || {
        while let Ok(event) = events.recv() {
            println!("[DIAG] {}", event.to_json());
        }
    });

    session.init()?;
    println!("[SIM] engine: {}", session.probe());

    let chunk = vec![0u8; 256];
    for index in 0..args.frames {
        let blank = index < args.blank_frames;
        let frame = OwnedFrame {
            data: if blank {
                Vec::new()
            } else {
                vec![0x80; (args.width * args.height / 16) as usize]
            },
            frame_number: u64::from(index) + 1,
            is_keyframe: !blank && index % args.keyframe_interval == 0,
            width: if blank { 0 } else { args.width },
            height: if blank { 0 } else { args.height },
        };
        control.enqueue_frames(vec![frame]);
        session.parse(&chunk, chunk.len())?;
    }
    session.release()?;

    let session_stats = session.stats();
    println!(
        "[SIM] dispatched {} frames ({} keyframes), {} buffered, {} dropped, \
         black={}, gate notifications={}",
        session_stats.frames_dispatched,
        stats.keyframes(),
        queue.len(),
        queue.dropped(),
        detector.is_black(),
        session_stats.gate_notifications,
    );
    Ok(())
}
