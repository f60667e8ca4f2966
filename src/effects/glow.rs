use std::f64::consts::TAU;
use std::time::Duration;

use crate::color::LedColor;
use crate::config::GlowConfig;
use crate::effects::{cycle_position, phase_offsets, LightingEffect};
use crate::error::Result;
use crate::ledstate::LedState;

/// Brightness breathing between two levels. Only the brightness channel is
/// written, so a colour effect can run on the same LEDs.
pub struct Glow {
    name: String,
    leds: Vec<usize>,
    offsets: Vec<Duration>,
    base: f64,
    amplitude: f64,
    period: Duration,
    interval: Duration,
}

impl Glow {
    pub fn new(name: String, leds: Vec<usize>, config: &GlowConfig) -> Glow {
        let offsets = phase_offsets(leds.len(), config.offset(), config.randomise_offset);
        let min = config.min_brightness as f64;
        let max = config.max_brightness as f64;

        Glow {
            name,
            leds,
            offsets,
            base: (min + max) / 2.0,
            amplitude: (max - min) / 2.0,
            period: config.period(),
            interval: config.step(),
        }
    }

    /// Raised cosine: lowest at the start of each period, highest halfway.
    pub fn level_at(&self, t: Duration) -> f32 {
        let phase = cycle_position(t, self.period);
        (self.base - self.amplitude * (TAU * phase).cos()) as f32
    }
}

impl LightingEffect for Glow {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn step(&mut self, leds: &LedState, elapsed: Duration) -> Result<()> {
        for (position, &index) in self.leds.iter().enumerate() {
            let level = self.level_at(elapsed + self.offsets[position]);
            let brightness = LedColor::unit_to_channel(level);
            leds.update(index, |led| led.with_brightness(brightness))?;
        }

        Ok(())
    }
}
