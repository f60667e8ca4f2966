use std::time::Duration;

use crate::color::LedColor;
use crate::config::CycleConfig;
use crate::effects::{phase_offsets, LightingEffect};
use crate::error::Result;
use crate::ledstate::LedState;

/// Walks through a list of colours, holding each one for a while. With
/// `fade` the colour blends linearly into the next one during the hold.
pub struct ColorCycle {
    name: String,
    leds: Vec<usize>,
    offsets: Vec<Duration>,
    colors: Vec<LedColor>,
    hold: Duration,
    fade: bool,
    interval: Duration,
}

impl ColorCycle {
    pub fn new(name: String, leds: Vec<usize>, config: &CycleConfig) -> ColorCycle {
        let offsets = phase_offsets(leds.len(), config.offset(), config.randomise_offset);

        ColorCycle {
            name,
            leds,
            offsets,
            colors: config.colors.clone(),
            hold: config.hold(),
            fade: config.fade,
            interval: config.step(),
        }
    }

    pub fn color_at(&self, t: Duration) -> LedColor {
        if self.colors.is_empty() {
            return LedColor::OFF;
        }

        let count = self.colors.len();
        let position = t.as_secs_f64() / self.hold.as_secs_f64().max(f64::EPSILON);
        let current = position.floor() as usize % count;
        let color = self.colors[current];

        if !self.fade {
            return color;
        }

        let next = self.colors[(current + 1) % count];
        color.mix(next, position.fract() as f32)
    }
}

impl LightingEffect for ColorCycle {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn step(&mut self, leds: &LedState, elapsed: Duration) -> Result<()> {
        for (position, &index) in self.leds.iter().enumerate() {
            let color = self.color_at(elapsed + self.offsets[position]);
            leds.update(index, |led| led.with_rgb_of(color))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: LedColor = LedColor::rgb(255, 0, 0);
    const GREEN: LedColor = LedColor::rgb(0, 255, 0);
    const BLUE: LedColor = LedColor::rgb(0, 0, 255);

    fn cycle(fade: bool) -> ColorCycle {
        let config = CycleConfig {
            colors: vec![RED, GREEN, BLUE],
            hold: 3.0,
            fade,
            ..CycleConfig::default()
        };
        ColorCycle::new("cycle".to_string(), vec![0], &config)
    }

    #[test]
    fn holds_each_colour() {
        let cycle = cycle(false);
        assert_eq!(cycle.color_at(Duration::ZERO), RED);
        assert_eq!(cycle.color_at(Duration::from_millis(2_999)), RED);
        assert_eq!(cycle.color_at(Duration::from_secs(3)), GREEN);
        assert_eq!(cycle.color_at(Duration::from_secs(7)), BLUE);
        assert_eq!(cycle.color_at(Duration::from_secs(9)), RED);
    }

    #[test]
    fn fades_into_the_next_colour() {
        let cycle = cycle(true);
        assert_eq!(cycle.color_at(Duration::from_millis(1_500)), LedColor::rgb(128, 128, 0));
        assert_eq!(cycle.color_at(Duration::from_millis(7_500)), LedColor::rgb(128, 0, 128));
    }

    #[test]
    fn step_keeps_brightness() {
        let state = LedState::new(1).unwrap();
        state.set(0, LedColor::OFF.with_brightness(9)).unwrap();

        let mut cycle = cycle(false);
        cycle.step(&state, Duration::from_secs(4)).unwrap();
        assert_eq!(state.get(0).unwrap(), GREEN.with_brightness(9));
    }
}
