pub(crate) mod colorcycle;
pub(crate) mod glow;
pub(crate) mod hue;
pub(crate) mod staticcolor;

use std::time::Duration;

use rand::Rng;

use crate::config::EffectConfig;
use crate::error::Result;
use crate::ledstate::LedState;

use colorcycle::ColorCycle;
use glow::Glow;
use hue::HueRotation;
use staticcolor::StaticColor;

/// A visual effect driven by its own effect task.
///
/// All timing state (phase, hue angle, ...) belongs to the effect itself.
/// The only thing it shares is the strip it writes into.
pub trait LightingEffect: Send {
    fn name(&self) -> &str;

    /// How long to wait between two steps.
    fn interval(&self) -> Duration;

    /// Writes the colours for `elapsed` time since the task started.
    fn step(&mut self, leds: &LedState, elapsed: Duration) -> Result<()>;
}

impl EffectConfig {
    pub fn build(&self, strip_len: usize) -> Result<Box<dyn LightingEffect>> {
        self.validate()?;

        let leds = self.leds(strip_len);
        let effect: Box<dyn LightingEffect> = match self {
            EffectConfig::Glow(config) => Box::new(Glow::new(self.name(), leds, config)),
            EffectConfig::Hue(config) => Box::new(HueRotation::new(self.name(), leds, config)),
            EffectConfig::Cycle(config) => Box::new(ColorCycle::new(self.name(), leds, config)),
            EffectConfig::Static(config) => Box::new(StaticColor::new(self.name(), leds, config)),
        };

        Ok(effect)
    }
}

/// Per-LED time offsets: either `offset * position` or, when randomised, a
/// random value in `[0, offset)` for each LED.
pub(crate) fn phase_offsets(count: usize, offset: Duration, randomise: bool) -> Vec<Duration> {
    if offset.is_zero() {
        return vec![Duration::ZERO; count];
    }

    if randomise {
        let mut rng = rand::thread_rng();
        return (0..count)
            .map(|_| offset.mul_f64(rng.gen_range(0.0..1.0)))
            .collect();
    }

    (0..count)
        .map(|position| {
            let position = u32::try_from(position).unwrap_or(u32::MAX);
            offset.saturating_mul(position)
        })
        .collect()
}

/// Position inside a repeating period, in `[0, 1)`.
pub(crate) fn cycle_position(t: Duration, period: Duration) -> f64 {
    if period.is_zero() {
        return 0.0;
    }
    (t.as_secs_f64() / period.as_secs_f64()).fract()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_stepped_or_bounded() {
        let stepped = phase_offsets(4, Duration::from_millis(250), false);
        assert_eq!(
            stepped,
            vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(750)
            ]
        );

        let random = phase_offsets(100, Duration::from_millis(250), true);
        assert_eq!(random.len(), 100);
        assert!(random.iter().all(|o| *o < Duration::from_millis(250)));

        assert!(phase_offsets(3, Duration::ZERO, true)
            .iter()
            .all(Duration::is_zero));
    }

    #[test]
    fn huge_offsets_saturate() {
        let offsets = phase_offsets(3, Duration::MAX, false);
        assert_eq!(offsets, vec![Duration::ZERO, Duration::MAX, Duration::MAX]);
    }

    #[test]
    fn cycle_position_wraps() {
        let period = Duration::from_secs(2);
        assert_eq!(cycle_position(Duration::ZERO, period), 0.0);
        assert_eq!(cycle_position(Duration::from_millis(500), period), 0.25);
        assert_eq!(cycle_position(Duration::from_millis(4_500), period), 0.25);
    }
}
