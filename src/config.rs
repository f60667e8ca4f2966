use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use config_file::FromConfigFile;
use serde::Deserialize;

use crate::color::{ColorOrder, LedColor};
use crate::error::{Error, Result};
use crate::snapshotter::{OverrunPolicy, SnapshotterOptions};

const MAX_PERIOD_SECS: f32 = 86_400.0;
const MAX_OFFSET_MS: u64 = 3_600_000;
const MAX_STEP_MS: u64 = 3_600_000;
const MIN_FREQUENCY_HZ: f32 = 0.1;
const MAX_FREQUENCY_HZ: f32 = 10_000.0;

/// Everything a run needs, read once at startup and never changed afterwards.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub strip: StripConfig,
    pub sampler: SamplerConfig,
    pub transport: TransportConfig,
    pub supervision: SupervisionConfig,
    pub shutdown: ShutdownConfig,
    pub effects: Vec<EffectConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StripConfig {
    pub length: usize,
    /// Index of the star on top of the tree, used by the presets.
    pub star: usize,
}

impl Default for StripConfig {
    fn default() -> Self {
        StripConfig {
            length: 25,
            star: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    pub frequency_hz: f32,
    pub overrun: OverrunPolicy,
    /// Consecutive failed writes after which the run is aborted.
    pub failure_threshold: Option<u32>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            frequency_hz: 120.0,
            overrun: OverrunPolicy::default(),
            failure_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Apa102,
    Ola,
    Log,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// SPI device for `apa102`.
    pub device: PathBuf,
    /// OLA OSC endpoint for `ola`.
    pub address: String,
    pub universe: u16,
    pub color_order: ColorOrder,
    pub master_brightness: f32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            kind: TransportKind::Apa102,
            device: PathBuf::from("/dev/spidev0.0"),
            address: "127.0.0.1:7770".to_string(),
            universe: 0,
            color_order: ColorOrder::default(),
            master_brightness: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartKind {
    Restart,
    Never,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisionConfig {
    pub policy: RestartKind,
    pub max_restarts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        SupervisionConfig {
            policy: RestartKind::Restart,
            max_restarts: 5,
            backoff_ms: 250,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub grace_ms: u64,
    /// Send one last all-black frame before exiting.
    pub blackout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            grace_ms: 500,
            blackout: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EffectConfig {
    Glow(GlowConfig),
    Hue(HueConfig),
    Cycle(CycleConfig),
    Static(StaticConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlowConfig {
    pub name: Option<String>,
    pub leds: Option<Vec<usize>>,
    pub exclude: Vec<usize>,
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Seconds for one full dim-bright-dim cycle.
    pub period: f32,
    pub offset_ms: u64,
    pub randomise_offset: bool,
    pub step_ms: u64,
}

impl Default for GlowConfig {
    fn default() -> Self {
        GlowConfig {
            name: None,
            leds: None,
            exclude: Vec::new(),
            min_brightness: 0.2,
            max_brightness: 1.0,
            period: 1.0,
            offset_ms: 0,
            randomise_offset: false,
            step_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HueConfig {
    pub name: Option<String>,
    pub leds: Option<Vec<usize>>,
    pub exclude: Vec<usize>,
    pub start_hue: f32,
    pub degrees_per_second: f32,
    /// Hue difference in degrees between neighbouring LEDs.
    pub spread: f32,
    pub saturation: f32,
    pub value: f32,
    pub step_ms: u64,
}

impl Default for HueConfig {
    fn default() -> Self {
        HueConfig {
            name: None,
            leds: None,
            exclude: Vec::new(),
            start_hue: 0.0,
            degrees_per_second: 30.0,
            spread: 0.0,
            saturation: 1.0,
            value: 1.0,
            step_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub name: Option<String>,
    pub leds: Option<Vec<usize>>,
    pub exclude: Vec<usize>,
    pub colors: Vec<LedColor>,
    /// Seconds each colour is shown.
    pub hold: f32,
    pub fade: bool,
    pub offset_ms: u64,
    pub randomise_offset: bool,
    pub step_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        CycleConfig {
            name: None,
            leds: None,
            exclude: Vec::new(),
            colors: Vec::new(),
            hold: 1.0,
            fade: false,
            offset_ms: 0,
            randomise_offset: false,
            step_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub name: Option<String>,
    pub leds: Option<Vec<usize>>,
    pub exclude: Vec<usize>,
    pub color: LedColor,
    pub brightness: Option<f32>,
    pub step_ms: u64,
}

impl Default for StaticConfig {
    fn default() -> Self {
        StaticConfig {
            name: None,
            leds: None,
            exclude: Vec::new(),
            color: LedColor::OFF,
            brightness: None,
            step_ms: 1_000,
        }
    }
}

impl GlowConfig {
    pub fn period(&self) -> Duration {
        seconds(self.period)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

impl HueConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

impl CycleConfig {
    pub fn hold(&self) -> Duration {
        seconds(self.hold)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

impl StaticConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

impl EffectConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            EffectConfig::Glow(_) => "glow",
            EffectConfig::Hue(_) => "hue",
            EffectConfig::Cycle(_) => "cycle",
            EffectConfig::Static(_) => "static",
        }
    }

    pub fn name(&self) -> String {
        let name = match self {
            EffectConfig::Glow(config) => &config.name,
            EffectConfig::Hue(config) => &config.name,
            EffectConfig::Cycle(config) => &config.name,
            EffectConfig::Static(config) => &config.name,
        };
        name.clone().unwrap_or_else(|| self.kind().to_string())
    }

    /// LED indices this effect writes. Indices beyond the strip are kept on
    /// purpose: the effect fails with `IndexOutOfRange` when it touches them.
    pub fn leds(&self, strip_len: usize) -> Vec<usize> {
        let (leds, exclude) = match self {
            EffectConfig::Glow(config) => (&config.leds, &config.exclude),
            EffectConfig::Hue(config) => (&config.leds, &config.exclude),
            EffectConfig::Cycle(config) => (&config.leds, &config.exclude),
            EffectConfig::Static(config) => (&config.leds, &config.exclude),
        };

        let selected = match leds {
            Some(leds) => leds.clone(),
            None => (0..strip_len).collect(),
        };
        selected
            .into_iter()
            .filter(|index| !exclude.contains(index))
            .collect()
    }

    fn step_ms(&self) -> u64 {
        match self {
            EffectConfig::Glow(config) => config.step_ms,
            EffectConfig::Hue(config) => config.step_ms,
            EffectConfig::Cycle(config) => config.step_ms,
            EffectConfig::Static(config) => config.step_ms,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        let invalid = |what: &str| Err(Error::Config(format!("effect '{name}': {what}")));

        if !(1..=MAX_STEP_MS).contains(&self.step_ms()) {
            return invalid("step_ms must be within 1..=3600000");
        }

        match self {
            EffectConfig::Glow(config) => {
                if !unit_range(config.min_brightness) || !unit_range(config.max_brightness) {
                    return invalid("brightness must be within 0.0..=1.0");
                }
                if config.min_brightness > config.max_brightness {
                    return invalid("min_brightness is above max_brightness");
                }
                if !duration_range(config.period) {
                    return invalid("period must be within 0..=86400 seconds");
                }
                if config.offset_ms > MAX_OFFSET_MS {
                    return invalid("offset_ms must be at most one hour");
                }
            }
            EffectConfig::Hue(config) => {
                if !unit_range(config.saturation) || !unit_range(config.value) {
                    return invalid("saturation and value must be within 0.0..=1.0");
                }
                if !config.degrees_per_second.is_finite() || !config.spread.is_finite() {
                    return invalid("hue speed and spread must be finite");
                }
            }
            EffectConfig::Cycle(config) => {
                if config.colors.is_empty() {
                    return invalid("needs at least one colour");
                }
                if !duration_range(config.hold) {
                    return invalid("hold must be within 0..=86400 seconds");
                }
                if config.offset_ms > MAX_OFFSET_MS {
                    return invalid("offset_ms must be at most one hour");
                }
            }
            EffectConfig::Static(config) => {
                if let Some(brightness) = config.brightness {
                    if !unit_range(brightness) {
                        return invalid("brightness must be within 0.0..=1.0");
                    }
                }
            }
        }

        Ok(())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let config = Config::from_config_file(path)
            .map_err(|err| Error::Config(format!("cannot read {}: {}", path.display(), err)))?;
        config.validate()?;

        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strip.length == 0 {
            return Err(Error::Config("strip.length must be at least 1".to_string()));
        }
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&self.sampler.frequency_hz) {
            return Err(Error::Config(format!(
                "sampler.frequency_hz must be within {MIN_FREQUENCY_HZ}..={MAX_FREQUENCY_HZ}"
            )));
        }
        if self.sampler.failure_threshold == Some(0) {
            return Err(Error::Config(
                "sampler.failure_threshold must be at least 1".to_string(),
            ));
        }
        if !unit_range(self.transport.master_brightness) {
            return Err(Error::Config(
                "transport.master_brightness must be within 0.0..=1.0".to_string(),
            ));
        }

        for effect in &self.effects {
            effect.validate()?;
        }

        Ok(())
    }

    /// Falls back to the default rate for a frequency `validate` rejects.
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.sampler.frequency_hz as f64)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| SnapshotterOptions::default().interval)
    }
}

fn unit_range(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

fn duration_range(secs: f32) -> bool {
    positive(secs) && secs <= MAX_PERIOD_SECS
}

// Out of range values were already refused by `validate`.
fn seconds(secs: f32) -> Duration {
    Duration::try_from_secs_f32(secs).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "treelight-{}-{}.toml",
            name,
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_match_the_tree() {
        let config = Config::default();
        assert_eq!(config.strip.length, 25);
        assert_eq!(config.sampler.frequency_hz, 120.0);
        assert_eq!(config.sampler.overrun, OverrunPolicy::Latest);
        assert_eq!(config.transport.color_order, ColorOrder::Bgr);
        assert!(config.effects.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_toml_file() {
        let path = write_config(
            "load",
            r##"
            [strip]
            length = 12

            [sampler]
            frequency_hz = 60.0
            overrun = "skip"
            failure_threshold = 10

            [transport]
            kind = "log"

            [supervision]
            policy = "never"

            [[effects]]
            type = "glow"
            min_brightness = 0.1
            max_brightness = 0.5
            period = 3.0
            leds = [3]

            [[effects]]
            type = "cycle"
            name = "star colours"
            colors = ["gold", "#ffa500"]
            hold = 4.0
            exclude = [3]
            "##,
        );

        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.strip.length, 12);
        assert_eq!(config.sampler.overrun, OverrunPolicy::Skip);
        assert_eq!(config.sampler.failure_threshold, Some(10));
        assert_eq!(config.transport.kind, TransportKind::Log);
        assert_eq!(config.supervision.policy, RestartKind::Never);
        assert_eq!(config.effects.len(), 2);

        assert_eq!(config.effects[0].name(), "glow");
        assert_eq!(config.effects[0].leds(12), vec![3]);

        let cycle = &config.effects[1];
        assert_eq!(cycle.name(), "star colours");
        assert_eq!(cycle.leds(5), vec![0, 1, 2, 4]);
        match cycle {
            EffectConfig::Cycle(cycle) => {
                assert_eq!(cycle.colors, vec![LedColor::rgb(255, 215, 0), LedColor::rgb(255, 165, 0)]);
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        let path = write_config(
            "invalid",
            r#"
            [sampler]
            frequency_hz = 0.0
            "#,
        );
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
        fs::remove_file(&path).unwrap();

        let glow = EffectConfig::Glow(GlowConfig {
            min_brightness: 0.8,
            max_brightness: 0.2,
            ..GlowConfig::default()
        });
        assert!(glow.validate().is_err());

        let cycle = EffectConfig::Cycle(CycleConfig::default());
        assert!(cycle.validate().is_err());
    }

    #[test]
    fn extreme_values_are_config_errors() {
        let effects = [
            EffectConfig::Glow(GlowConfig {
                period: 1e20,
                ..GlowConfig::default()
            }),
            EffectConfig::Glow(GlowConfig {
                offset_ms: u64::MAX,
                ..GlowConfig::default()
            }),
            EffectConfig::Glow(GlowConfig {
                period: f32::NAN,
                ..GlowConfig::default()
            }),
            EffectConfig::Cycle(CycleConfig {
                colors: vec![LedColor::OFF],
                hold: f32::MAX,
                ..CycleConfig::default()
            }),
            EffectConfig::Hue(HueConfig {
                step_ms: u64::MAX,
                ..HueConfig::default()
            }),
        ];
        for effect in &effects {
            assert!(matches!(effect.validate(), Err(Error::Config(_))), "{effect:?}");
            assert!(matches!(effect.build(25), Err(Error::Config(_))), "{effect:?}");
        }

        for frequency_hz in [1e-30, 1e30, f32::INFINITY] {
            let mut config = Config::default();
            config.sampler.frequency_hz = frequency_hz;
            assert!(matches!(config.validate(), Err(Error::Config(_))));
            assert!(!config.frame_interval().is_zero());
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        let path = write_config(
            "unknown",
            r#"
            [strip]
            lenght = 12
            "#,
        );
        assert!(Config::load(&path).is_err());
        fs::remove_file(&path).unwrap();
    }
}
