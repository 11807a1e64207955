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

//! The libvpx-backed engine implementation using `std::thread`.
//!
//! Decoding runs on an engine-owned worker thread; `parse` ships a chunk to
//! the worker and blocks until every frame produced by that chunk has been
//! pushed through the sink. That keeps the callback on the engine's own
//! execution context while propagating listener back-pressure to the
//! producer.

use super::{DecodeEngine, FrameSink, VideoCodec};
use crate::error::BridgeError;
use crate::frame::FrameRef;
use crate::Result;
use log::{debug, warn};
use std::ffi::CStr;
use std::os::raw::c_uint;
use std::ptr;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use vpx_sys::{
    vpx_codec_ctx_t, vpx_codec_dec_init_ver, vpx_codec_decode, vpx_codec_destroy,
    vpx_codec_get_frame, vpx_codec_iface_name, vpx_codec_iface_t, vpx_codec_iter_t,
    vpx_codec_peek_stream_info, vpx_codec_stream_info_t, vpx_codec_version_str, vpx_codec_vp8_dx,
    vpx_codec_vp9_dx, VPX_CODEC_OK, VPX_DECODER_ABI_VERSION,
};

fn dx_iface(codec: VideoCodec) -> *const vpx_codec_iface_t {
    match codec {
        VideoCodec::Vp8 => unsafe { vpx_codec_vp8_dx() },
        _ => unsafe { vpx_codec_vp9_dx() },
    }
}

fn vpx_error_string(ret: vpx_sys::vpx_codec_err_t) -> String {
    unsafe {
        let error_cstr = vpx_sys::vpx_codec_err_to_string(ret);
        if error_cstr.is_null() {
            "unknown codec error".to_string()
        } else {
            CStr::from_ptr(error_cstr).to_string_lossy().into_owned()
        }
    }
}

// --- Decode context, owned by the worker thread after init ---

struct VpxContext {
    context: vpx_codec_ctx_t,
    iface: *const vpx_codec_iface_t,
    /// Monotonic counter over frames pushed through the sink.
    frame_counter: u64,
    /// Reused plane-copy buffer; valid only while a callback is running.
    scratch: Vec<u8>,
}

// The context is only ever touched from the worker thread.
unsafe impl Send for VpxContext {}

impl VpxContext {
    fn new(codec: VideoCodec) -> std::result::Result<Self, String> {
        let iface = dx_iface(codec);
        let mut context = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            vpx_codec_dec_init_ver(
                &mut context,
                iface,
                ptr::null(),
                0,
                VPX_DECODER_ABI_VERSION as i32,
            )
        };
        if ret != VPX_CODEC_OK {
            return Err(format!(
                "vpx_codec_dec_init_ver failed: {}",
                vpx_error_string(ret)
            ));
        }
        Ok(Self {
            context,
            iface,
            frame_counter: 0,
            scratch: Vec::new(),
        })
    }

    /// Whether `chunk` starts a keyframe. libvpx can only peek keyframe
    /// headers, so a failed peek means a delta frame.
    fn peek_keyframe(&self, chunk: &[u8]) -> bool {
        let mut info: vpx_codec_stream_info_t = unsafe { std::mem::zeroed() };
        info.sz = std::mem::size_of::<vpx_codec_stream_info_t>() as c_uint;
        let ret = unsafe {
            vpx_codec_peek_stream_info(
                self.iface,
                chunk.as_ptr(),
                chunk.len() as c_uint,
                &mut info,
            )
        };
        ret == VPX_CODEC_OK && info.is_kf != 0
    }

    /// Decode one chunk and push every resulting frame through the sink.
    fn decode_chunk(
        &mut self,
        chunk: &[u8],
        sink: &FrameSink,
    ) -> std::result::Result<(), String> {
        let is_keyframe = self.peek_keyframe(chunk);

        let ret = unsafe {
            vpx_codec_decode(
                &mut self.context,
                chunk.as_ptr(),
                chunk.len() as u32,
                ptr::null_mut(),
                0,
            )
        };
        if ret != VPX_CODEC_OK {
            return Err(format!("vpx_codec_decode failed: {}", vpx_error_string(ret)));
        }

        let mut iter: vpx_codec_iter_t = ptr::null();
        loop {
            let img = unsafe { vpx_codec_get_frame(&mut self.context, &mut iter) };
            if img.is_null() {
                break;
            }

            let (width, height) = unsafe { ((*img).d_w, (*img).d_h) };
            self.scratch.clear();
            unsafe {
                let w = width as usize;
                let h = height as usize;
                // I420: the U and V planes are half the width and height.
                let uv_w = w / 2;
                let uv_h = h / 2;
                self.scratch.reserve(w * h + 2 * uv_w * uv_h);
                copy_plane((*img).planes[0], (*img).stride[0], w, h, &mut self.scratch);
                copy_plane(
                    (*img).planes[1],
                    (*img).stride[1],
                    uv_w,
                    uv_h,
                    &mut self.scratch,
                );
                copy_plane(
                    (*img).planes[2],
                    (*img).stride[2],
                    uv_w,
                    uv_h,
                    &mut self.scratch,
                );
            }

            self.frame_counter += 1;
            sink(FrameRef {
                data: &self.scratch,
                size: self.scratch.len(),
                frame_number: self.frame_counter,
                is_keyframe,
                width,
                height,
            });
        }
        Ok(())
    }
}

impl Drop for VpxContext {
    fn drop(&mut self) {
        unsafe {
            vpx_codec_destroy(&mut self.context);
        }
    }
}

/// Copy one plane from a `vpx_image_t` into `buffer`, accounting for stride.
unsafe fn copy_plane(
    plane: *const u8,
    stride: i32,
    width: usize,
    height: usize,
    buffer: &mut Vec<u8>,
) {
    let mut current_ptr = plane;
    for _ in 0..height {
        buffer.extend_from_slice(std::slice::from_raw_parts(current_ptr, width));
        current_ptr = current_ptr.offset(stride as isize);
    }
}

// --- Worker plumbing ---

enum Request {
    /// A chunk to decode; the worker replies once dispatch has finished.
    Chunk {
        data: Vec<u8>,
        reply: Sender<std::result::Result<(), String>>,
    },
    /// A signal to shut down the thread.
    Shutdown,
}

struct Worker {
    sender: Sender<Request>,
    handle: JoinHandle<()>,
}

/// A decode engine backed by libvpx (VP8/VP9).
pub struct VpxEngine {
    codec: VideoCodec,
    worker: Option<Worker>,
}

impl VpxEngine {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            worker: None,
        }
    }
}

impl DecodeEngine for VpxEngine {
    fn probe(&self) -> String {
        let version = unsafe { CStr::from_ptr(vpx_codec_version_str()) }.to_string_lossy();
        let iface = unsafe { CStr::from_ptr(vpx_codec_iface_name(dx_iface(self.codec))) }
            .to_string_lossy();
        format!("libvpx {} / {}", version, iface)
    }

    fn init(&mut self, sink: FrameSink) -> Result<()> {
        if self.worker.is_some() {
            debug!("re-initializing engine, releasing previous context");
            self.release()
                .map_err(|e| BridgeError::Init(format!("previous context: {}", e)))?;
        }

        let codec = self.codec;
        let (sender, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("framebus-decode".to_string())
            .spawn(move || {
                let mut context = match VpxContext::new(codec) {
                    Ok(context) => {
                        let _ = ready_tx.send(Ok(()));
                        context
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // This is the decoder thread loop.
                while let Ok(request) = receiver.recv() {
                    match request {
                        Request::Chunk { data, reply } => {
                            let result = context.decode_chunk(&data, &sink);
                            if let Err(ref e) = result {
                                warn!("decode failed: {}", e);
                            }
                            let _ = reply.send(result);
                        }
                        Request::Shutdown => {
                            debug!("decode worker shutting down");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| BridgeError::Init(format!("failed to spawn decode worker: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker { sender, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(BridgeError::Init(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(BridgeError::Init(
                    "decode worker exited before becoming ready".to_string(),
                ))
            }
        }
    }

    fn parse(&mut self, buf: &[u8], size: usize) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| BridgeError::Parse("engine is not initialized".to_string()))?;
        if size > buf.len() {
            return Err(BridgeError::Parse(format!(
                "size {} exceeds buffer length {}",
                size,
                buf.len()
            )));
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        worker
            .sender
            .send(Request::Chunk {
                data: buf[..size].to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| BridgeError::Parse("decode worker is gone".to_string()))?;

        match reply_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::Parse(e)),
            Err(_) => Err(BridgeError::Parse(
                "decode worker died while parsing".to_string(),
            )),
        }
    }

    fn release(&mut self) -> Result<()> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| BridgeError::Release("engine is not initialized".to_string()))?;
        let _ = worker.sender.send(Request::Shutdown);
        worker
            .handle
            .join()
            .map_err(|_| BridgeError::Release("decode worker panicked".to_string()))
    }
}

impl Drop for VpxEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.release() {
                warn!("engine dropped while initialized: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{solid_i420, VpxEncoder};
    use crate::frame::OwnedFrame;
    use std::sync::{Arc, Mutex};

    #[test]
    fn probe_names_the_decoder() {
        let engine = VpxEngine::new(VideoCodec::Vp9);
        let probe = engine.probe();
        assert!(probe.contains("VP9"), "unexpected probe output: {}", probe);
    }

    #[test]
    fn parse_before_init_is_rejected() {
        let mut engine = VpxEngine::new(VideoCodec::Vp9);
        let err = engine.parse(&[0u8; 4], 4).unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
    }

    #[test]
    fn encode_decode_round_trip() {
        let width = 320;
        let height = 240;
        let mut encoder = VpxEncoder::new(width, height, 30, 500).unwrap();

        let decoded: Arc<Mutex<Vec<OwnedFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_frames = decoded.clone();
        let sink: FrameSink = Box::new(move |frame| {
            sink_frames.lock().unwrap().push(frame.to_owned());
        });
        let mut engine = VpxEngine::new(VideoCodec::Vp9);
        engine.init(sink).unwrap();

        let mut chunks = Vec::new();
        for pts in 0..5i64 {
            let luma = 32 + (pts as u8) * 40;
            let image = solid_i420(width, height, luma);
            chunks.extend(encoder.encode(pts, &image).unwrap());
        }
        assert!(!chunks.is_empty());
        assert!(chunks[0].is_keyframe);

        for chunk in &chunks {
            engine.parse(&chunk.data, chunk.data.len()).unwrap();
        }
        engine.release().unwrap();

        let frames = decoded.lock().unwrap();
        assert_eq!(frames.len(), chunks.len());
        assert!(frames[0].is_keyframe);
        assert_eq!(frames[0].width, width);
        assert_eq!(frames[0].height, height);
        assert_eq!(
            frames[0].data.len(),
            (width * height + 2 * (width / 2) * (height / 2)) as usize
        );
        // Sequence numbers are monotonic from 1.
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.frame_number, (i + 1) as u64);
        }
    }
}
