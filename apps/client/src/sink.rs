//! `cpal`-backed audio output, grounded on
//! `examples/s3than-sendspin-rs/src/audio/output/cpal_output.rs`'s stream
//! setup and bounded-queue shape, adapted here to pull from the jitter buffer
//! directly inside the realtime callback rather than write into a queue.
//!
//! The callback always renders `f32`: every native sample width (16-bit, or
//! the 4-byte container used for 24/32-bit) is normalized to `[-1.0, 1.0]`
//! before cpal mixes or resamples it, the same conversion the grounding file
//! performs for its 24-bit source.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use snap_core::constants::SINK_FAILURE_TEARDOWN_SECS;
use snap_core::error::{SnapError, SnapResult};
use snap_core::sample_format::SampleFormat;
use tokio::sync::watch;

use crate::jitter_buffer::JitterBuffer;

/// An audio output backend. `cpal` is the only implementation today; the
/// trait exists so the controller doesn't hardcode it.
pub trait Sink: Send {
    /// Frames per callback period, once the stream has rendered at least one.
    fn period_frames(&self) -> u32;
    fn set_volume(&self, volume: f32);
    fn set_mute(&self, mute: bool);
    /// Becomes `true` once the callback has rendered nothing but silence for
    /// [`SINK_FAILURE_TEARDOWN_SECS`] straight; the controller watches this to
    /// decide when to tear the sink down and reopen it.
    fn failed(&self) -> watch::Receiver<bool>;
}

/// A live `cpal` output stream pulling from a shared [`JitterBuffer`].
pub struct CpalSink {
    _stream: cpal::Stream,
    period_frames: Arc<AtomicU32>,
    volume_bits: Arc<AtomicU32>,
    muted: Arc<AtomicBool>,
    failed_rx: watch::Receiver<bool>,
}

impl CpalSink {
    /// Opens the named output device (or the host default if `None`) and
    /// starts streaming from `jitter`.
    pub fn open(jitter: Arc<Mutex<JitterBuffer>>, format: SampleFormat, device_name: Option<&str>) -> SnapResult<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| SnapError::Sink(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| SnapError::Sink(format!("output device {name:?} not found")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| SnapError::Sink("no default output device".into()))?,
        };

        if let Ok(name) = device.name() {
            log::info!("opening sink on {name} at {format}");
        }

        let config = cpal::StreamConfig {
            channels: format.channels(),
            sample_rate: cpal::SampleRate(format.rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let period_frames = Arc::new(AtomicU32::new(0));
        let volume_bits = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let muted = Arc::new(AtomicBool::new(false));
        let silence_streak_ms = Arc::new(AtomicU64::new(0));
        let (failed_tx, failed_rx) = watch::channel(false);

        let channels = format.channels() as usize;
        let frame_size = format.frame_size() as usize;
        let bits = format.bits();
        let rate = format.rate();

        let cb_jitter = jitter;
        let cb_period = period_frames.clone();
        let cb_volume = volume_bits.clone();
        let cb_muted = muted.clone();
        let cb_streak = silence_streak_ms;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    let frames = (data.len() / channels) as u32;
                    cb_period.store(frames, Ordering::Relaxed);

                    let delay_us = estimate_playout_delay_us(info, frames, rate);

                    let mut raw = vec![0u8; frames as usize * frame_size];
                    cb_jitter.lock().get_player_chunk(&mut raw, delay_us, frames);

                    let silent = raw.iter().all(|&b| b == 0);
                    if silent {
                        let added_ms = u64::from(frames) * 1_000 / u64::from(rate.max(1));
                        let total = cb_streak.fetch_add(added_ms, Ordering::Relaxed) + added_ms;
                        if total >= SINK_FAILURE_TEARDOWN_SECS * 1_000 {
                            let _ = failed_tx.send(true);
                        }
                    } else {
                        cb_streak.store(0, Ordering::Relaxed);
                    }

                    let gain = if cb_muted.load(Ordering::Relaxed) {
                        0.0
                    } else {
                        volume_curve(f32::from_bits(cb_volume.load(Ordering::Relaxed)))
                    };

                    let sample_size = frame_size / channels;
                    for (frame_idx, frame_out) in data.chunks_mut(channels).enumerate() {
                        for (ch, sample_out) in frame_out.iter_mut().enumerate() {
                            let offset = frame_idx * frame_size + ch * sample_size;
                            *sample_out = read_sample_f32(&raw[offset..offset + sample_size], bits) * gain;
                        }
                    }
                },
                move |err| log::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| SnapError::Sink(e.to_string()))?;

        stream.play().map_err(|e| SnapError::Sink(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            period_frames,
            volume_bits,
            muted,
            failed_rx,
        })
    }
}

impl Sink for CpalSink {
    fn period_frames(&self) -> u32 {
        self.period_frames.load(Ordering::Relaxed)
    }

    fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn set_mute(&self, mute: bool) {
        self.muted.store(mute, Ordering::Relaxed);
    }

    fn failed(&self) -> watch::Receiver<bool> {
        self.failed_rx.clone()
    }
}

/// Perceptual volume curve `(10^v - 1) / 9`: `0.0` is silence, `1.0` is unity
/// gain, and the midpoint sits well below half power, matching how loudness
/// is actually perceived.
fn volume_curve(v: f32) -> f32 {
    (10f32.powf(v) - 1.0) / 9.0
}

fn read_sample_f32(bytes: &[u8], bits: u16) -> f32 {
    if bits == 16 {
        i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0
    } else {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
    }
}

fn estimate_playout_delay_us(info: &cpal::OutputCallbackInfo, fallback_frames: u32, rate: u32) -> i64 {
    let ts = info.timestamp();
    ts.playback
        .duration_since(&ts.callback)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_else(|| i64::from(fallback_frames) * 1_000_000 / i64::from(rate.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_curve_endpoints() {
        assert!((volume_curve(0.0) - 0.0).abs() < 1e-6);
        assert!((volume_curve(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn volume_curve_is_below_linear_at_midpoint() {
        // Perceptual curves sit below the linear line for v in (0, 1).
        assert!(volume_curve(0.5) < 0.5);
    }

    #[test]
    fn read_sample_f32_16bit_full_scale() {
        let bytes = i16::MIN.to_le_bytes();
        assert!((read_sample_f32(&bytes, 16) - (-1.0)).abs() < 1e-3);
    }

    #[test]
    fn read_sample_f32_32bit_container_zero_is_silence() {
        let bytes = 0i32.to_le_bytes();
        assert_eq!(read_sample_f32(&bytes, 32), 0.0);
    }

    #[test]
    fn read_sample_f32_24bit_container_uses_upper_bits() {
        // Top 24 bits set to a small positive value, low byte zero.
        let value: i32 = 0x00_01_00_00;
        let bytes = value.to_le_bytes();
        let sample = read_sample_f32(&bytes, 24);
        assert!(sample > 0.0 && sample < 0.01);
    }
}
