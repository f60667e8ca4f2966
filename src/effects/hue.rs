use std::time::Duration;

use crate::color::LedColor;
use crate::config::HueConfig;
use crate::effects::LightingEffect;
use crate::error::Result;
use crate::ledstate::LedState;

/// Rotates the hue at a fixed angular speed. `spread` fans the hue out along
/// the strip so neighbouring LEDs show neighbouring colours.
pub struct HueRotation {
    name: String,
    leds: Vec<usize>,
    start_hue: f64,
    degrees_per_second: f64,
    spread: f64,
    saturation: f32,
    value: f32,
    interval: Duration,
}

impl HueRotation {
    pub fn new(name: String, leds: Vec<usize>, config: &HueConfig) -> HueRotation {
        HueRotation {
            name,
            leds,
            start_hue: config.start_hue as f64,
            degrees_per_second: config.degrees_per_second as f64,
            spread: config.spread as f64,
            saturation: config.saturation,
            value: config.value,
            interval: config.step(),
        }
    }

    pub fn hue_at(&self, t: Duration, position: usize) -> f32 {
        let hue = self.start_hue
            + self.degrees_per_second * t.as_secs_f64()
            + self.spread * position as f64;
        hue.rem_euclid(360.0) as f32
    }
}

impl LightingEffect for HueRotation {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn step(&mut self, leds: &LedState, elapsed: Duration) -> Result<()> {
        for (position, &index) in self.leds.iter().enumerate() {
            let hue = self.hue_at(elapsed, position);
            let color = LedColor::from_hue(hue, self.saturation, self.value);
            leds.update(index, |led| led.with_rgb_of(color))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(degrees_per_second: f32, spread: f32) -> HueRotation {
        let config = HueConfig {
            degrees_per_second,
            spread,
            ..HueConfig::default()
        };
        HueRotation::new("hue".to_string(), vec![0, 1, 2], &config)
    }

    #[test]
    fn advances_and_wraps() {
        let hue = rotation(90.0, 0.0);
        assert_eq!(hue.hue_at(Duration::ZERO, 0), 0.0);
        assert_eq!(hue.hue_at(Duration::from_secs(1), 0), 90.0);
        assert_eq!(hue.hue_at(Duration::from_secs(4), 0), 0.0);
        assert_eq!(hue.hue_at(Duration::from_secs(5), 0), 90.0);

        for ms in (0..20_000).step_by(37) {
            let angle = hue.hue_at(Duration::from_millis(ms), 0);
            assert!((0.0..360.0).contains(&angle));
        }
    }

    #[test]
    fn spread_offsets_positions() {
        let hue = rotation(0.0, 120.0);
        assert_eq!(hue.hue_at(Duration::ZERO, 1), 120.0);
        assert_eq!(hue.hue_at(Duration::ZERO, 3), 0.0);
    }

    #[test]
    fn keeps_brightness_of_leds() {
        let state = LedState::new(3).unwrap();
        state.fill(LedColor::OFF.with_brightness(42));

        let mut hue = rotation(0.0, 120.0);
        hue.step(&state, Duration::ZERO).unwrap();

        let snapshot = state.get_all();
        assert_eq!(snapshot[0], LedColor::rgb(255, 0, 0).with_brightness(42));
        assert_eq!(snapshot[1], LedColor::rgb(0, 255, 0).with_brightness(42));
        assert_eq!(snapshot[2], LedColor::rgb(0, 0, 255).with_brightness(42));
    }
}
