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

//! VP9 test-stream encoder using libvpx.
//!
//! Produces real encoded chunks so the bridge can be exercised end to end
//! without capture hardware. Realtime settings, zero frame lag: every
//! `encode` call yields the chunk for that frame immediately.

use anyhow::{anyhow, Result};
use std::mem::MaybeUninit;
use std::os::raw::{c_int, c_ulong};
use vpx_sys::*;

// ---------------------------------------------------------------------------
// Helper macros
// ---------------------------------------------------------------------------

macro_rules! vpx {
    ($f:expr) => {{
        let res = unsafe { $f };
        let res_int = unsafe { std::mem::transmute::<vpx_sys::vpx_codec_err_t, i32>(res) };
        if res_int != 0 {
            return Err(anyhow!("vpx function error code ({}).", res_int));
        }
        res
    }};
}

macro_rules! vpx_ptr {
    ($f:expr) => {{
        let res = unsafe { $f };
        if res.is_null() {
            return Err(anyhow!("vpx function returned null pointer."));
        }
        res
    }};
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// One compressed chunk produced by the encoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Compressed VP9 data.
    pub data: Vec<u8>,
    /// Whether this chunk starts a keyframe.
    pub is_keyframe: bool,
}

/// A VP9 encoder wrapping libvpx, fixed to realtime one-pass settings.
pub struct VpxEncoder {
    ctx: vpx_codec_ctx_t,
    width: u32,
    height: u32,
}

// SAFETY: the encoder is used from a single thread at a time (send pattern).
unsafe impl Send for VpxEncoder {}

impl VpxEncoder {
    /// Create an encoder. Width and height must be even and non-zero.
    pub fn new(width: u32, height: u32, fps: u32, bitrate_kbps: u32) -> Result<Self> {
        if width % 2 != 0 || width == 0 {
            return Err(anyhow!("width must be even and non-zero"));
        }
        if height % 2 != 0 || height == 0 {
            return Err(anyhow!("height must be even and non-zero"));
        }

        let iface = vpx_ptr!(vpx_codec_vp9_cx());
        let mut cfg = unsafe { MaybeUninit::zeroed().assume_init() };
        vpx!(vpx_codec_enc_config_default(iface, &mut cfg, 0));

        cfg.g_w = width;
        cfg.g_h = height;
        cfg.g_timebase.num = 1;
        cfg.g_timebase.den = fps as c_int;
        cfg.rc_target_bitrate = bitrate_kbps;
        cfg.g_threads = 2;
        cfg.g_lag_in_frames = 0;
        cfg.g_error_resilient = VPX_ERROR_RESILIENT_DEFAULT;
        cfg.g_pass = vpx_enc_pass::VPX_RC_ONE_PASS;
        cfg.rc_end_usage = vpx_rc_mode::VPX_VBR;
        cfg.kf_mode = vpx_kf_mode::VPX_KF_AUTO;
        cfg.kf_max_dist = 150;

        let mut ctx = unsafe { MaybeUninit::zeroed().assume_init() };
        vpx!(vpx_codec_enc_init_ver(
            &mut ctx,
            iface,
            &cfg,
            0,
            VPX_ENCODER_ABI_VERSION as i32
        ));

        unsafe {
            vpx_codec_control_(&mut ctx, vp8e_enc_control_id::VP8E_SET_CPUUSED as c_int, 8);
        }

        Ok(Self { ctx, width, height })
    }

    /// Encode one I420 frame (`width * height * 3 / 2` bytes) and collect
    /// the resulting chunks.
    pub fn encode(&mut self, pts: i64, i420: &[u8]) -> Result<Vec<EncodedChunk>> {
        let expected = (self.width * self.height * 3 / 2) as usize;
        if i420.len() != expected {
            return Err(anyhow!(
                "I420 buffer is {} bytes, expected {}",
                i420.len(),
                expected
            ));
        }

        let mut image = unsafe { MaybeUninit::zeroed().assume_init() };
        vpx_ptr!(vpx_img_wrap(
            &mut image,
            vpx_img_fmt::VPX_IMG_FMT_I420,
            self.width as _,
            self.height as _,
            1,
            i420.as_ptr() as _,
        ));

        vpx!(vpx_codec_encode(
            &mut self.ctx,
            &image,
            pts,
            1, // duration
            0, // flags
            VPX_DL_REALTIME as c_ulong,
        ));

        let mut chunks = Vec::new();
        let mut iter: vpx_codec_iter_t = std::ptr::null();
        loop {
            let pkt = unsafe { vpx_codec_get_cx_data(&mut self.ctx, &mut iter) };
            if pkt.is_null() {
                break;
            }
            unsafe {
                if (*pkt).kind == vpx_codec_cx_pkt_kind::VPX_CODEC_CX_FRAME_PKT {
                    let f = &(*pkt).data.frame;
                    chunks.push(EncodedChunk {
                        data: std::slice::from_raw_parts(f.buf as _, f.sz as usize).to_vec(),
                        is_keyframe: (f.flags & VPX_FRAME_IS_KEY) != 0,
                    });
                }
            }
        }
        Ok(chunks)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for VpxEncoder {
    fn drop(&mut self) {
        unsafe {
            vpx_codec_destroy(&mut self.ctx);
        }
    }
}

/// A flat I420 buffer with the given luma and neutral chroma, for tests and
/// the demo stream.
pub fn solid_i420(width: u32, height: u32, luma: u8) -> Vec<u8> {
    let y_size = (width * height) as usize;
    let uv_size = y_size / 4;
    let mut buf = vec![128u8; y_size + 2 * uv_size];
    buf[..y_size].fill(luma);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_odd_dimensions() {
        assert!(VpxEncoder::new(641, 480, 30, 500).is_err());
        assert!(VpxEncoder::new(640, 0, 30, 500).is_err());
    }

    #[test]
    fn first_chunk_is_a_keyframe() {
        let mut encoder = VpxEncoder::new(64, 64, 30, 200).unwrap();
        let chunks = encoder.encode(0, &solid_i420(64, 64, 0x40)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_keyframe);
        assert!(!chunks[0].data.is_empty());
    }

    #[test]
    fn rejects_wrong_buffer_size() {
        let mut encoder = VpxEncoder::new(64, 64, 30, 200).unwrap();
        assert!(encoder.encode(0, &[0u8; 10]).is_err());
    }
}
