use crate::color::LedColor;
use crate::error::TransportError;
use crate::transport::{check_len, Transport};

/// Dry-run transport: logs every frame instead of talking to hardware.
pub struct ConsoleOutput {
    strip_len: usize,
    frames: u64,
}

impl ConsoleOutput {
    pub fn new(strip_len: usize) -> ConsoleOutput {
        ConsoleOutput {
            strip_len,
            frames: 0,
        }
    }
}

impl Transport for ConsoleOutput {
    fn write(&mut self, leds: &[LedColor]) -> Result<(), TransportError> {
        check_len(self.strip_len, leds)?;

        self.frames += 1;
        if log::log_enabled!(log::Level::Trace) {
            let line: Vec<String> = leds.iter().map(LedColor::to_string).collect();
            log::trace!("frame {}: {}", self.frames, line.join(" "));
        }

        Ok(())
    }
}
