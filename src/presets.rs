use clap::ValueEnum;

use crate::color::LedColor;
use crate::config::{CycleConfig, EffectConfig, GlowConfig, HueConfig, StripConfig};
use crate::error::Result;

/// Ready-made effect sets for the tree, used when the config lists no effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Warm glowing star, the rest of the tree dark.
    Basic,
    Disco,
    /// Whole tree jumps between red, green and blue.
    Rgb,
    RgbFade,
    RgbGlow,
    Rainbow,
}

impl Preset {
    pub fn effects(self, strip: &StripConfig) -> Result<Vec<EffectConfig>> {
        let star = strip.star;

        let effects = match self {
            Preset::Basic => vec![
                star_glow(star, 0.1, 0.5, 3.0),
                star_cycle(star, &["gold", "orange"], 4.0)?,
            ],
            Preset::Disco => vec![
                EffectConfig::Glow(GlowConfig {
                    name: Some("branches glow".to_string()),
                    exclude: vec![star],
                    min_brightness: 0.2,
                    max_brightness: 0.45,
                    period: 1.0,
                    offset_ms: 250,
                    randomise_offset: true,
                    ..GlowConfig::default()
                }),
                EffectConfig::Cycle(CycleConfig {
                    name: Some("branches colours".to_string()),
                    exclude: vec![star],
                    colors: colors(&["indigo", "hotpink", "red"])?,
                    hold: 1.1,
                    offset_ms: 275,
                    randomise_offset: true,
                    ..CycleConfig::default()
                }),
                star_cycle(star, &["pink", "fuchsia", "midnightblue"], 4.0)?,
                star_glow(star, 0.1, 0.6, 0.4),
            ],
            Preset::Rgb => vec![EffectConfig::Cycle(CycleConfig {
                name: Some("rgb".to_string()),
                colors: colors(&["red", "green", "blue"])?,
                hold: 3.0,
                ..CycleConfig::default()
            })],
            Preset::RgbFade => vec![EffectConfig::Cycle(CycleConfig {
                name: Some("rgb fade".to_string()),
                colors: colors(&["red", "green", "blue"])?,
                hold: 10.0,
                fade: true,
                step_ms: 100,
                ..CycleConfig::default()
            })],
            Preset::RgbGlow => vec![
                EffectConfig::Glow(GlowConfig {
                    name: Some("branches glow".to_string()),
                    exclude: vec![star],
                    min_brightness: 0.15,
                    max_brightness: 0.2,
                    period: 7.5,
                    offset_ms: 350,
                    randomise_offset: true,
                    ..GlowConfig::default()
                }),
                EffectConfig::Cycle(CycleConfig {
                    name: Some("branches colours".to_string()),
                    exclude: vec![star],
                    colors: colors(&["green", "blue", "red"])?,
                    hold: 6.5,
                    offset_ms: 200,
                    randomise_offset: true,
                    ..CycleConfig::default()
                }),
                star_glow(star, 0.2, 0.5, 6.0),
                star_cycle(star, &["gold", "orange"], 4.0)?,
            ],
            Preset::Rainbow => vec![EffectConfig::Hue(HueConfig {
                name: Some("rainbow".to_string()),
                degrees_per_second: 30.0,
                spread: 360.0 / strip.length as f32,
                ..HueConfig::default()
            })],
        };

        Ok(effects)
    }
}

fn colors(names: &[&str]) -> Result<Vec<LedColor>> {
    names.iter().map(|name| name.parse()).collect()
}

fn star_glow(star: usize, min_brightness: f32, max_brightness: f32, period: f32) -> EffectConfig {
    EffectConfig::Glow(GlowConfig {
        name: Some("star glow".to_string()),
        leds: Some(vec![star]),
        min_brightness,
        max_brightness,
        period,
        ..GlowConfig::default()
    })
}

fn star_cycle(star: usize, names: &[&str], hold: f32) -> Result<EffectConfig> {
    Ok(EffectConfig::Cycle(CycleConfig {
        name: Some("star colours".to_string()),
        leds: Some(vec![star]),
        colors: colors(names)?,
        hold,
        ..CycleConfig::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_is_valid() {
        let strip = StripConfig::default();
        for preset in Preset::value_variants() {
            let effects = preset.effects(&strip).unwrap();
            assert!(!effects.is_empty(), "{preset:?}");
            for effect in &effects {
                effect.validate().unwrap();
                assert!(effect.leds(strip.length).iter().all(|i| *i < strip.length));
            }
        }
    }

    #[test]
    fn star_is_driven_apart_from_the_branches() {
        let strip = StripConfig::default();
        let effects = Preset::Disco.effects(&strip).unwrap();

        let (star, branches): (Vec<_>, Vec<_>) = effects
            .iter()
            .partition(|effect| effect.leds(strip.length) == vec![strip.star]);
        assert_eq!(star.len(), 2);
        for effect in branches {
            let leds = effect.leds(strip.length);
            assert_eq!(leds.len(), strip.length - 1);
            assert!(!leds.contains(&strip.star));
        }
    }

    #[test]
    fn names_parse_from_the_command_line() {
        assert_eq!(Preset::from_str("rgb-fade", true).unwrap(), Preset::RgbFade);
        assert_eq!(Preset::from_str("rainbow", true).unwrap(), Preset::Rainbow);
        assert!(Preset::from_str("strobe", true).is_err());
    }
}
