use std::{
    net::{SocketAddr, UdpSocket},
    str::FromStr,
};

use rosc::{encoder, OscMessage, OscPacket, OscType};

use crate::color::{ColorOrder, LedColor};
use crate::error::{Error, TransportError};
use crate::transport::{check_len, Transport};

const UNIVERSE_SIZE: usize = 512;
const CHANNELS_PER_LED: usize = 3;

/// Sends frames as a DMX universe to OLA through its OSC plugin.
pub struct OlaOutput {
    sock: UdpSocket,
    target_addr: SocketAddr,
    addr: String,
    strip_len: usize,
    order: ColorOrder,
    master_brightness: f32,
    buffer: Vec<u8>,
}

impl OlaOutput {
    pub fn new(
        target_addr: SocketAddr,
        universe: u16,
        strip_len: usize,
        order: ColorOrder,
        master_brightness: f32,
    ) -> Result<Self, Error> {
        if strip_len * CHANNELS_PER_LED > UNIVERSE_SIZE {
            return Err(Error::Config(format!(
                "{} LEDs do not fit into one DMX universe",
                strip_len
            )));
        }

        let our_addr = if target_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let our_addr = SocketAddr::from_str(our_addr)
            .map_err(|err| Error::Config(err.to_string()))?;
        let sock = UdpSocket::bind(our_addr)?;

        Ok(OlaOutput {
            sock,
            target_addr,
            addr: format!("/dmx/universe/{universe}"),
            strip_len,
            order,
            master_brightness,
            buffer: vec![0; UNIVERSE_SIZE],
        })
    }

    pub fn set_rgb(&mut self, start_channel: usize, values: [u8; 3]) {
        self.buffer[start_channel..start_channel + CHANNELS_PER_LED].copy_from_slice(&values);
    }

    pub fn flush(&mut self) -> Result<(), TransportError> {
        let msg_buf = encoder::encode(&OscPacket::Message(OscMessage {
            addr: self.addr.clone(),
            args: vec![OscType::Blob(self.buffer.clone())],
        }))
        .map_err(|err| TransportError::Encode(format!("{:?}", err)))?;

        self.sock.send_to(&msg_buf, self.target_addr)?;
        Ok(())
    }

    pub fn blackout(&mut self) {
        self.buffer.fill(0);
    }
}

impl Transport for OlaOutput {
    fn write(&mut self, leds: &[LedColor]) -> Result<(), TransportError> {
        check_len(self.strip_len, leds)?;

        self.blackout();
        for (i, led) in leds.iter().enumerate() {
            let rgb = self.order.arrange(led.premultiplied(self.master_brightness));
            self.set_rgb(i * CHANNELS_PER_LED, rgb);
        }

        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rosc::decoder;

    use super::*;

    #[test]
    fn sends_universe_blob() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let target = receiver.local_addr().unwrap();

        let mut ola = OlaOutput::new(target, 2, 2, ColorOrder::Rgb, 1.0).unwrap();
        ola.write(&[LedColor::rgb(1, 2, 3), LedColor::rgb(200, 0, 0)])
            .unwrap();

        let mut buf = [0u8; decoder::MTU];
        let (size, _) = receiver.recv_from(&mut buf).unwrap();
        match decoder::decode(&buf[..size]).unwrap() {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/dmx/universe/2");
                match &msg.args[0] {
                    OscType::Blob(blob) => {
                        assert_eq!(blob.len(), UNIVERSE_SIZE);
                        assert_eq!(&blob[..7], &[1, 2, 3, 200, 0, 0, 0]);
                    }
                    other => panic!("unexpected argument {:?}", other),
                }
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn refuses_strips_beyond_one_universe() {
        let target = SocketAddr::from_str("127.0.0.1:7770").unwrap();
        assert!(OlaOutput::new(target, 0, 171, ColorOrder::Rgb, 1.0).is_err());
    }
}
