//! Synthetic telemetry generation.
//!
//! Each call produces one (temperature, humidity) sample. After the first
//! call a sample is the previous baseline plus a tenth of a fresh normal
//! draw, rounded: a damped random walk. Temperature is then scaled by a
//! 24-step diurnal factor `1 + 0.2 * sin(2π * hour / 24)`.
//!
//! The baseline, not the scaled value, carries over between calls.

use crate::error::StoreError;
use crate::storage::{Record, RecordStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::f64::consts::PI;
use std::fmt;
use tracing::trace;

pub const TEMPERATURE_MEAN: f64 = 20.0;
pub const TEMPERATURE_STD_DEV: f64 = 5.0;
pub const HUMIDITY_MEAN: f64 = 50.0;
pub const HUMIDITY_STD_DEV: f64 = 10.0;

/// Fraction of a fresh draw added to the previous baseline.
pub const DAMPING: f64 = 0.1;

/// Amplitude of the diurnal temperature modulation.
pub const DIURNAL_AMPLITUDE: f64 = 0.2;

pub const HOURS_PER_DAY: u32 = 24;

/// Source of raw (temperature, humidity) draws.
pub trait NoiseSource: Send {
    fn draw(&mut self) -> (f64, f64);
}

impl NoiseSource for Box<dyn NoiseSource> {
    fn draw(&mut self) -> (f64, f64) {
        (**self).draw()
    }
}

/// Normal draws centered on the nominal sensor values.
pub struct NormalNoise<R = StdRng> {
    rng: R,
}

impl NormalNoise<StdRng> {
    /// Seeded when `seed` is set, otherwise from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl<R: Rng + Send> NoiseSource for NormalNoise<R> {
    fn draw(&mut self) -> (f64, f64) {
        let t: f64 = self.rng.sample(StandardNormal);
        let h: f64 = self.rng.sample(StandardNormal);
        (
            TEMPERATURE_MEAN + TEMPERATURE_STD_DEV * t,
            HUMIDITY_MEAN + HUMIDITY_STD_DEV * h,
        )
    }
}

/// Running state carried between generator calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeneratorState {
    /// Unscaled baseline of the previous sample
    pub last: Option<(f64, f64)>,
    pub hour: u32,
}

/// One generated sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature before diurnal scaling.
    pub baseline_temperature: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub hour: u32,
}

impl Reading {
    pub fn record(&self) -> Record {
        Record::new(self.temperature, self.humidity)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Temperature: {:.2} C", self.temperature)?;
        writeln!(f, "Humidity: {:.2} %", self.humidity)
    }
}

/// Diurnal scaling factor for an hour of the day.
pub fn diurnal_factor(hour: u32) -> f64 {
    1.0 + DIURNAL_AMPLITUDE * (2.0 * PI * f64::from(hour) / f64::from(HOURS_PER_DAY)).sin()
}

pub struct TelemetryGenerator<N = NormalNoise> {
    noise: N,
    state: GeneratorState,
}

impl TelemetryGenerator<NormalNoise> {
    pub fn seeded(seed: Option<u64>) -> Self {
        Self::new(NormalNoise::new(seed))
    }
}

impl<N: NoiseSource> TelemetryGenerator<N> {
    pub fn new(noise: N) -> Self {
        Self {
            noise,
            state: GeneratorState::default(),
        }
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    pub fn generate(&mut self) -> Reading {
        let (reading, next) = self.sample();
        self.state = next;
        reading
    }

    /// Generate a sample and append it to `store` before returning it.
    ///
    /// The walk only advances once the record is stored; after a failed
    /// append the next call starts from the same baseline and hour.
    pub fn generate_into(&mut self, store: &dyn RecordStore) -> Result<Reading, StoreError> {
        let (reading, next) = self.sample();
        store.append(reading.record())?;
        self.state = next;
        Ok(reading)
    }

    fn sample(&mut self) -> (Reading, GeneratorState) {
        let (t, h) = self.noise.draw();

        let (base_t, base_h) = match self.state.last {
            None => (t, h),
            Some((last_t, last_h)) => (
                last_t + (t * DAMPING).round(),
                last_h + (h * DAMPING).round(),
            ),
        };
        let next = GeneratorState {
            last: Some((base_t, base_h)),
            hour: (self.state.hour + 1) % HOURS_PER_DAY,
        };

        let reading = Reading {
            baseline_temperature: base_t,
            temperature: base_t * diurnal_factor(next.hour),
            humidity: base_h,
            hour: next.hour,
        };
        trace!(?reading, "Generated telemetry");
        (reading, next)
    }
}
