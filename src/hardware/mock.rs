//! Mock Hardware Implementations
//!
//! Simulated collaborators for running without a physical stage or instrument.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `RecordingTransport` - accepts every absolute move, records it, can fail on demand
//! - `SimulatedCapture` - synthesizes a point-source field from the transport's positions

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::trace;

use crate::geometry::{Axis, Vec3};
use crate::hardware::capabilities::{CaptureDevice, MotorTransport, Reading};

// =============================================================================
// RecordingTransport - Simulated Motor Transport
// =============================================================================

/// Motor transport that remembers every command it was given.
///
/// ```rust,ignore
/// let transport = Arc::new(RecordingTransport::new());
/// transport.move_absolute(Axis::X, 0.1).await?;
/// assert_eq!(transport.commands().await, vec![(Axis::X, 0.1)]);
/// ```
#[derive(Debug, Default)]
pub struct RecordingTransport {
    commands: RwLock<Vec<(Axis, f64)>>,
    positions: RwLock<Vec3>,
    fail_after: Option<usize>,
    latency: Duration,
}

impl RecordingTransport {
    /// Transport that accepts every command immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command after the first `accepted` ones.
    pub fn fail_after(mut self, accepted: usize) -> Self {
        self.fail_after = Some(accepted);
        self
    }

    /// Sleep this long per command.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// All accepted commands, in order.
    pub async fn commands(&self) -> Vec<(Axis, f64)> {
        self.commands.read().await.clone()
    }

    /// Last commanded local position per axis.
    pub async fn positions(&self) -> Vec3 {
        *self.positions.read().await
    }
}

#[async_trait]
impl MotorTransport for RecordingTransport {
    async fn move_absolute(&self, axis: Axis, position: f64) -> Result<()> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let mut commands = self.commands.write().await;
        if let Some(limit) = self.fail_after {
            if commands.len() >= limit {
                return Err(anyhow!("simulated transport fault on axis {axis}"));
            }
        }
        commands.push((axis, position));
        self.positions.write().await[axis.index()] = position;
        trace!(axis = %axis, position, "transport accepted move");
        Ok(())
    }
}

// =============================================================================
// SimulatedCapture - Simulated Instrument
// =============================================================================

const WAVELENGTH: f64 = 0.005;
const DECAY_LENGTH: f64 = 0.05;

/// Capture device reading a synthetic field at the transport's current position.
///
/// The field is a decaying point source: magnitude `exp(-r / 0.05)` and a phase
/// wrapping every 5 mm of distance. Readings depend only on position (plus optional
/// noise), so a resumed scan reproduces an uninterrupted one.
pub struct SimulatedCapture {
    transport: Arc<RecordingTransport>,
    source: Vec3,
    noise_amplitude: f64,
    latency: Duration,
    fail_after: Option<usize>,
    calls: AtomicUsize,
}

impl SimulatedCapture {
    /// Capture reading the positions last sent through `transport`.
    pub fn new(transport: Arc<RecordingTransport>) -> Self {
        Self {
            transport,
            source: [0.0; 3],
            noise_amplitude: 0.0,
            latency: Duration::ZERO,
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Put the field source at `source` (motor local frame).
    pub fn with_source(mut self, source: Vec3) -> Self {
        self.source = source;
        self
    }

    /// Add uniform noise in `[-amplitude, amplitude]` to the magnitude.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude.abs();
        self
    }

    /// Sleep this long per capture.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every capture after the first `accepted` ones.
    pub fn fail_after(mut self, accepted: usize) -> Self {
        self.fail_after = Some(accepted);
        self
    }

    /// Number of captures attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn field_at(&self, position: Vec3) -> Reading {
        let r = position
            .iter()
            .zip(self.source.iter())
            .map(|(p, s)| (p - s).powi(2))
            .sum::<f64>()
            .sqrt();
        let magnitude = (-r / DECAY_LENGTH).exp();
        let phase = (r / WAVELENGTH).fract() * 2.0 * PI - PI;
        Reading::new(magnitude, phase)
    }
}

#[async_trait]
impl CaptureDevice for SimulatedCapture {
    async fn capture(&self) -> Result<Reading> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if call >= limit {
                return Err(anyhow!("simulated capture timeout (call {call})"));
            }
        }

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let mut reading = self.field_at(self.transport.positions().await);
        if self.noise_amplitude > 0.0 {
            let noise = rand::thread_rng().gen_range(-self.noise_amplitude..=self.noise_amplitude);
            reading.magnitude += noise;
        }
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_records_commands_and_positions() {
        let transport = RecordingTransport::new();
        transport.move_absolute(Axis::Z, 0.3).await.unwrap();
        transport.move_absolute(Axis::X, 0.1).await.unwrap();
        assert_eq!(
            transport.commands().await,
            vec![(Axis::Z, 0.3), (Axis::X, 0.1)]
        );
        assert_eq!(transport.positions().await, [0.1, 0.0, 0.3]);
    }

    #[tokio::test]
    async fn transport_failure_injection() {
        let transport = RecordingTransport::new().fail_after(1);
        transport.move_absolute(Axis::X, 0.1).await.unwrap();
        let err = transport.move_absolute(Axis::X, 0.2).await.unwrap_err();
        assert!(err.to_string().contains("axis x"));
        assert_eq!(transport.commands().await.len(), 1);
    }

    #[tokio::test]
    async fn capture_follows_position() {
        let transport = Arc::new(RecordingTransport::new());
        let capture = SimulatedCapture::new(transport.clone());

        let at_source = capture.capture().await.unwrap();
        assert!((at_source.magnitude - 1.0).abs() < 1e-12);

        transport.move_absolute(Axis::X, 0.05).await.unwrap();
        let away = capture.capture().await.unwrap();
        assert!(away.magnitude < at_source.magnitude);
        assert!(away.phase >= -PI && away.phase < PI);
        assert_eq!(capture.calls(), 2);
    }

    #[tokio::test]
    async fn capture_without_noise_is_repeatable() {
        let transport = Arc::new(RecordingTransport::new());
        transport.move_absolute(Axis::Y, 0.02).await.unwrap();
        let capture = SimulatedCapture::new(transport).with_source([0.01, 0.01, 0.0]);
        assert_eq!(capture.capture().await.unwrap(), capture.capture().await.unwrap());
    }

    #[tokio::test]
    async fn noise_stays_within_amplitude() {
        let transport = Arc::new(RecordingTransport::new());
        let capture = SimulatedCapture::new(transport).with_noise(0.01);
        for _ in 0..20 {
            let reading = capture.capture().await.unwrap();
            assert!((reading.magnitude - 1.0).abs() <= 0.01 + 1e-12);
        }
    }

    #[tokio::test]
    async fn capture_failure_injection() {
        let transport = Arc::new(RecordingTransport::new());
        let capture = SimulatedCapture::new(transport).fail_after(2);
        assert!(capture.capture().await.is_ok());
        assert!(capture.capture().await.is_ok());
        assert!(capture.capture().await.is_err());
    }
}
