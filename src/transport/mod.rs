pub(crate) mod apa102;
pub(crate) mod console;
pub(crate) mod olaoutput;

use std::net::SocketAddr;

use crate::color::LedColor;
use crate::config::{TransportConfig, TransportKind};
use crate::error::{Error, Result, TransportError};

use apa102::Apa102;
use console::ConsoleOutput;
use olaoutput::OlaOutput;

/// The hardware facing end: takes one full frame and pushes it to the strip.
/// Writes may be slow or fail, the caller never holds any lock meanwhile.
pub trait Transport: Send {
    fn write(&mut self, leds: &[LedColor]) -> Result<(), TransportError>;
}

pub fn from_config(config: &TransportConfig, strip_len: usize) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match config.kind {
        TransportKind::Apa102 => Box::new(Apa102::open(
            &config.device,
            strip_len,
            config.color_order,
            config.master_brightness,
        )?),
        TransportKind::Ola => {
            let target_addr: SocketAddr = config.address.parse().map_err(|err| {
                Error::Config(format!("bad OLA address '{}': {}", config.address, err))
            })?;
            Box::new(OlaOutput::new(
                target_addr,
                config.universe,
                strip_len,
                config.color_order,
                config.master_brightness,
            )?)
        }
        TransportKind::Log => Box::new(ConsoleOutput::new(strip_len)),
    };

    log::info!("Using {:?} transport for {} LEDs", config.kind, strip_len);
    Ok(transport)
}

pub(crate) fn check_len(expected: usize, leds: &[LedColor]) -> Result<(), TransportError> {
    if leds.len() != expected {
        return Err(TransportError::LengthMismatch {
            expected,
            got: leds.len(),
        });
    }
    Ok(())
}
