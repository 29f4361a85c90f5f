// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Software capture device for development and tests.
//!
//! Holds no real hardware: `open`/`close` just flip a flag, and
//! `read_chunk` synthesizes a fixed-size chunk of filler bytes at a
//! pace dictated by the last-applied video bitrate, so the capture
//! worker's timing and cancellation logic can be exercised without a
//! video4linux device present.

use std::time::{Duration, Instant};

use pvr_core::device::{CaptureDevice, Chunk, DeviceError, DeviceFuture};
use pvr_core::profile::EncoderSettings;

const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

pub struct DummyDevice {
    label: String,
    open: bool,
    channel: Option<String>,
    bitrate_kbps: u32,
    last_read: Option<Instant>,
}

impl DummyDevice {
    pub fn new(label: String) -> Self {
        Self {
            label,
            open: false,
            channel: None,
            bitrate_kbps: 4000,
            last_read: None,
        }
    }

    fn chunk_interval(&self) -> Duration {
        let bytes_per_sec = (self.bitrate_kbps as f64 * 1000.0 / 8.0).max(1.0);
        let secs = DEFAULT_CHUNK_BYTES as f64 / bytes_per_sec;
        Duration::from_secs_f64(secs.max(0.01))
    }
}

impl CaptureDevice for DummyDevice {
    fn open<'a>(&'a mut self) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            self.open = true;
            self.last_read = None;
            Ok(())
        })
    }

    fn close<'a>(&'a mut self) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            self.open = false;
            Ok(())
        })
    }

    fn set_channel<'a>(&'a mut self, channel: &'a str) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            if !self.open {
                return Err(DeviceError::Permanent("device not open".into()));
            }
            self.channel = Some(channel.to_string());
            Ok(())
        })
    }

    fn apply_encoder_settings<'a>(
        &'a mut self,
        settings: &'a EncoderSettings,
    ) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            if !self.open {
                return Err(DeviceError::Permanent("device not open".into()));
            }
            self.bitrate_kbps = settings.video_bitrate_avg_kbps.max(1);
            Ok(())
        })
    }

    fn read_chunk<'a>(&'a mut self, timeout: Duration) -> DeviceFuture<'a, Option<Chunk>> {
        Box::pin(async move {
            if !self.open {
                return Err(DeviceError::Permanent("device not open".into()));
            }
            let interval = self.chunk_interval();
            let now = Instant::now();
            let due = self.last_read.map(|t| t + interval).unwrap_or(now);
            let wait = due.saturating_duration_since(now);

            if wait > timeout {
                tokio::time::sleep(timeout).await;
                return Ok(None);
            }
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            self.last_read = Some(Instant::now());
            Ok(Some(Chunk {
                bytes: vec![0x47u8; DEFAULT_CHUNK_BYTES],
            }))
        })
    }

    fn path(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_before_open_is_an_error() {
        let mut dev = DummyDevice::new("dummy0".into());
        let err = dev.read_chunk(Duration::from_millis(10)).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn open_then_read_yields_chunks() {
        let mut dev = DummyDevice::new("dummy0".into());
        dev.open().await.unwrap();
        dev.set_channel("bbc1").await.unwrap();
        let settings = EncoderSettings {
            video_bitrate_avg_kbps: 8_000_000,
            video_bitrate_peak_kbps: 9_000_000,
            audio_sample_rate_hz: 48_000,
            audio_bitrate_kbps: 192,
            aspect: "16x9".into(),
            frame_size: "full".into(),
        };
        dev.apply_encoder_settings(&settings).await.unwrap();
        let chunk = dev.read_chunk(Duration::from_secs(1)).await.unwrap();
        assert!(chunk.is_some());
    }

    #[tokio::test]
    async fn stalled_device_times_out_with_none() {
        let mut dev = DummyDevice::new("dummy0".into());
        dev.open().await.unwrap();
        let settings = EncoderSettings {
            video_bitrate_avg_kbps: 1,
            video_bitrate_peak_kbps: 1,
            audio_sample_rate_hz: 48_000,
            audio_bitrate_kbps: 128,
            aspect: "4x3".into(),
            frame_size: "full".into(),
        };
        dev.apply_encoder_settings(&settings).await.unwrap();
        let chunk = dev.read_chunk(Duration::from_millis(5)).await.unwrap();
        assert!(chunk.is_none());
    }
}
