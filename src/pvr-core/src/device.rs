// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The capture device abstraction.
//!
//! A [`CaptureDevice`] is one video input the daemon can own for the
//! duration of a single recording. Implementations live in the
//! `pvr-device` crate, behind a small registry keyed by a backend
//! name, so swapping in real V4L2 hardware never touches anything in
//! this crate.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::profile::EncoderSettings;

/// Failure modes a backend can report from any operation.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device is mid-use by another caller; retry after backing off.
    #[error("device is busy")]
    Busy,
    /// A recoverable I/O hiccup (short read, EAGAIN-equivalent, a
    /// momentarily unplugged capture card) — worth retrying.
    #[error("transient device error: {0}")]
    Transient(String),
    /// Not expected to resolve itself: bad channel name, device
    /// missing, parameters rejected by the hardware.
    #[error("device error: {0}")]
    Permanent(String),
}

impl DeviceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeviceError::Busy | DeviceError::Transient(_))
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;
pub type DeviceFuture<'a, T> = Pin<Box<dyn Future<Output = DeviceResult<T>> + Send + 'a>>;

/// One captured chunk, read off the device's encoder output stream.
pub struct Chunk {
    pub bytes: Vec<u8>,
}

/// A video capture input the daemon can open, configure, and read an
/// encoded transport stream from.
///
/// Every operation returns a boxed future rather than being declared
/// `async fn` so the trait stays object-safe — callers hold
/// `Box<dyn CaptureDevice>` behind the device registry.
pub trait CaptureDevice: Send {
    /// Open the device and claim exclusive access. Returns
    /// [`DeviceError::Busy`] if another process or an in-flight
    /// capture already holds it.
    fn open<'a>(&'a mut self) -> DeviceFuture<'a, ()>;

    /// Release the device. Safe to call even if `open` never
    /// succeeded.
    fn close<'a>(&'a mut self) -> DeviceFuture<'a, ()>;

    /// Tune to the given channel name (as resolved from the channel
    /// table configured for this installation).
    fn set_channel<'a>(&'a mut self, channel: &'a str) -> DeviceFuture<'a, ()>;

    /// Push the full encoder parameter set for the capture about to
    /// start.
    fn apply_encoder_settings<'a>(
        &'a mut self,
        settings: &'a EncoderSettings,
    ) -> DeviceFuture<'a, ()>;

    /// Block until at least one chunk of encoded data is ready, or
    /// `timeout` elapses with nothing available (`Ok(None)`).
    fn read_chunk<'a>(
        &'a mut self,
        timeout: std::time::Duration,
    ) -> DeviceFuture<'a, Option<Chunk>>;

    /// A stable, human-readable identity for logging (e.g. `"/dev/video0"`).
    fn path(&self) -> &str;
}
