//! sample.rs
//! Mocap sample decoding and the shared latest-value slot.
//! - one datagram = one marker position = three native-endian f32 (12 bytes)
//! - the single-marker feed reports the same point as body and foot
//! - only the newest sample is kept; readers always get a copy

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TelemetryError;

/// Exact payload size of a single-marker datagram.
pub const WIRE_SIZE: usize = 12;

/// One decoded position reading (body and foot, metres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub body_x: f32,
    pub body_y: f32,
    pub body_z: f32,
    pub foot_x: f32,
    pub foot_y: f32,
    pub foot_z: f32,
}

impl TelemetrySample {
    /// Builds a single-marker sample: foot mirrors body.
    pub fn from_marker(x: f32, y: f32, z: f32) -> Self {
        Self {
            body_x: x,
            body_y: y,
            body_z: z,
            foot_x: x,
            foot_y: y,
            foot_z: z,
        }
    }

    /// Decodes exactly [`WIRE_SIZE`] bytes; anything else is malformed.
    pub fn decode(payload: &[u8]) -> Result<Self, TelemetryError> {
        if payload.len() != WIRE_SIZE {
            return Err(TelemetryError::Malformed { len: payload.len() });
        }
        let field = |i: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&payload[i * 4..i * 4 + 4]);
            f32::from_ne_bytes(raw)
        };
        Ok(Self::from_marker(field(0), field(1), field(2)))
    }

    /// Packs the body position in wire format.
    pub fn to_bytes(&self) -> [u8; WIRE_SIZE] {
        let mut out = [0u8; WIRE_SIZE];
        out[0..4].copy_from_slice(&self.body_x.to_ne_bytes());
        out[4..8].copy_from_slice(&self.body_y.to_ne_bytes());
        out[8..12].copy_from_slice(&self.body_z.to_ne_bytes());
        out
    }
}

/// Single-item, overwrite-on-write slot shared by the receive loop (writer)
/// and any number of readers (render, recorder).
///
/// The lock covers only the copy in or out, never any I/O.
#[derive(Debug, Default)]
pub struct LatestSlot {
    latest: Mutex<Option<TelemetrySample>>,
    has_data: AtomicBool,
}

impl LatestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored sample.
    pub fn publish(&self, sample: TelemetrySample) {
        *self.latest.lock() = Some(sample);
        self.has_data.store(true, Ordering::Release);
    }

    /// Decodes and publishes a raw datagram. A malformed payload leaves the
    /// stored sample untouched.
    pub fn publish_datagram(&self, payload: &[u8]) -> Result<TelemetrySample, TelemetryError> {
        let sample = TelemetrySample::decode(payload)?;
        self.publish(sample);
        Ok(sample)
    }

    #[inline]
    pub fn has_data(&self) -> bool {
        self.has_data.load(Ordering::Acquire)
    }

    /// Snapshot copy of the newest sample.
    #[inline]
    pub fn latest(&self) -> Option<TelemetrySample> {
        *self.latest.lock()
    }
}
