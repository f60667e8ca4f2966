use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::color::{ColorOrder, LedColor};
use crate::error::TransportError;
use crate::transport::{check_len, Transport};

const START_FRAME_LEN: usize = 4;
const MIN_END_FRAME_LEN: usize = 5;
// 3 marker bits followed by 5 bits of global current.
const LED_FRAME_MARKER: u8 = 0b1110_0000;
const MAX_CURRENT: f32 = 31.0;

/// APA102 (DotStar) strip behind a SPI device node such as `/dev/spidev0.0`.
///
/// Frame layout: four zero bytes, then per LED one marker/brightness byte and
/// the three colour bytes, then a run of zero bytes to clock the data through.
pub struct Apa102<W: Write + Send> {
    writer: W,
    strip_len: usize,
    order: ColorOrder,
    master_brightness: f32,
    buffer: Vec<u8>,
}

impl Apa102<File> {
    pub fn open(
        device: &Path,
        strip_len: usize,
        order: ColorOrder,
        master_brightness: f32,
    ) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    TransportError::Unavailable(format!("{}: {}", device.display(), err))
                }
                _ => TransportError::Io(err),
            })?;

        log::info!("Opened SPI device {}", device.display());
        Ok(Apa102::new(file, strip_len, order, master_brightness))
    }
}

impl<W: Write + Send> Apa102<W> {
    pub fn new(writer: W, strip_len: usize, order: ColorOrder, master_brightness: f32) -> Self {
        let end_frame_len = MIN_END_FRAME_LEN.max((strip_len + 15) / 16);

        Apa102 {
            writer,
            strip_len,
            order,
            master_brightness: master_brightness.clamp(0.0, 1.0),
            buffer: Vec::with_capacity(START_FRAME_LEN + 4 * strip_len + end_frame_len),
        }
    }

    pub fn encode(&mut self, leds: &[LedColor]) -> &[u8] {
        self.buffer.clear();
        self.buffer.extend_from_slice(&[0; START_FRAME_LEN]);

        for led in leds {
            let level = led.brightness as f32 / 255.0 * self.master_brightness;
            let current = (level * MAX_CURRENT) as u8;
            self.buffer.push(LED_FRAME_MARKER | current.min(MAX_CURRENT as u8));
            self.buffer
                .extend_from_slice(&self.order.arrange([led.red, led.green, led.blue]));
        }

        let end_frame_len = MIN_END_FRAME_LEN.max((leds.len() + 15) / 16);
        self.buffer.resize(self.buffer.len() + end_frame_len, 0);
        &self.buffer
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Transport for Apa102<W> {
    fn write(&mut self, leds: &[LedColor]) -> Result<(), TransportError> {
        check_len(self.strip_len, leds)?;

        self.encode(leds);
        let result = self
            .writer
            .write_all(&self.buffer)
            .and_then(|_| self.writer.flush());

        result.map_err(|err| match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            _ => TransportError::Io(err),
        })
    }
}
