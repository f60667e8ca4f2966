use std::time::Duration;

use crate::color::LedColor;
use crate::config::StaticConfig;
use crate::effects::LightingEffect;
use crate::error::Result;
use crate::ledstate::LedState;

pub struct StaticColor {
    name: String,
    leds: Vec<usize>,
    color: LedColor,
    brightness: Option<u8>,
    interval: Duration,
}

impl StaticColor {
    pub fn new(name: String, leds: Vec<usize>, config: &StaticConfig) -> StaticColor {
        StaticColor {
            name,
            leds,
            color: config.color,
            brightness: config.brightness.map(LedColor::unit_to_channel),
            interval: config.step(),
        }
    }
}

impl LightingEffect for StaticColor {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn step(&mut self, leds: &LedState, _: Duration) -> Result<()> {
        for &index in &self.leds {
            match self.brightness {
                Some(brightness) => leds.set(index, self.color.with_brightness(brightness))?,
                None => leds.update(index, |led| led.with_rgb_of(self.color))?,
            }
        }

        Ok(())
    }
}
