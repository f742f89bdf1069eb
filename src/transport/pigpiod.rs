//! pigpio daemon socket backend
//!
//! Requests are four little-endian u32 words `cmd, p1, p2, p3` followed by
//! `p3` extension bytes. Every request gets a 16-byte reply whose last word
//! is the signed result; negative results are pigpio error codes.

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::{debug, info, warn};

use crate::constants::pigpiod::{
    ADDR_ENV, CMD_SPIC, CMD_SPIO, CMD_SPIW, DEFAULT_ADDR, DEFAULT_PORT, HEADER_SIZE, PORT_ENV,
};

use super::Transport;

/// Open daemon connection plus the SPI handle it granted
struct Link {
    stream: TcpStream,
    handle: u32,
}

pub struct PigpiodSpi {
    addr: String,
    port: u16,
    channel: u32,
    baud: u32,
    verbose: bool,
    link: Option<Link>,
}

impl PigpiodSpi {
    pub fn new(addr: impl Into<String>, port: u16, channel: u32) -> Self {
        Self {
            addr: addr.into(),
            port,
            channel,
            baud: crate::constants::bus::DEFAULT_BAUD_RATE,
            verbose: false,
            link: None,
        }
    }

    /// Daemon address from `PIGPIO_ADDR`/`PIGPIO_PORT`, as the pigpio client does
    pub fn from_env(channel: u32) -> Self {
        let addr = std::env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let port = match std::env::var(PORT_ENV) {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(var = PORT_ENV, value = %raw, default = DEFAULT_PORT, "Invalid pigpiod port, using default");
                DEFAULT_PORT
            }),
            Err(_) => DEFAULT_PORT,
        };
        Self::new(addr, port, channel)
    }

    fn connect(&mut self) -> Result<&mut Link> {
        if self.link.is_none() {
            let mut stream = TcpStream::connect((self.addr.as_str(), self.port))
                .context(format!("Failed to connect to pigpiod at {}:{}", self.addr, self.port))?;
            stream
                .set_nodelay(true)
                .context("Failed to disable Nagle on pigpiod socket")?;

            // Extension word carries the spiOpen flags; 0 = mode 0, CE active low
            let flags: u32 = 0;
            let handle = command(&mut stream, CMD_SPIO, self.channel, self.baud, &flags.to_le_bytes())
                .context(format!("pigpiod refused to open SPI channel {}", self.channel))?;

            info!(addr = %self.addr, port = self.port, channel = self.channel, baud = self.baud, handle = handle, "Opened SPI via pigpiod");
            self.link = Some(Link {
                stream,
                handle: handle as u32,
            });
        }
        self.link
            .as_mut()
            .context("pigpiod link missing after connect")
    }
}

impl Transport for PigpiodSpi {
    fn name(&self) -> &str {
        "pigpiod"
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn set_baud_rate(&mut self, baud: u32) {
        self.baud = baud;
    }

    fn transfer(&mut self, frame: &[u8]) -> Result<()> {
        let verbose = self.verbose;
        let link = self.connect()?;
        if verbose {
            debug!(handle = link.handle, bytes = ?frame, "spiWrite");
        }

        let result = command(&mut link.stream, CMD_SPIW, link.handle, 0, frame);
        match result {
            Ok(written) if written as usize == frame.len() => Ok(()),
            Ok(written) => {
                self.link = None;
                bail!("pigpiod wrote {} of {} bytes", written, frame.len())
            }
            Err(e) => {
                self.link = None;
                Err(e.context("spiWrite via pigpiod failed"))
            }
        }
    }
}

impl Drop for PigpiodSpi {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = command(&mut link.stream, CMD_SPIC, link.handle, 0, &[]) {
                warn!(handle = link.handle, error = %e, "Failed to close pigpiod SPI handle");
            }
        }
    }
}

fn encode_request(cmd: u32, p1: u32, p2: u32, ext: &[u8]) -> Vec<u8> {
    let mut request = Vec::with_capacity(HEADER_SIZE + ext.len());
    for word in [cmd, p1, p2, ext.len() as u32] {
        request.extend_from_slice(&word.to_le_bytes());
    }
    request.extend_from_slice(ext);
    request
}

fn decode_result(reply: &[u8; HEADER_SIZE]) -> i32 {
    i32::from_le_bytes([reply[12], reply[13], reply[14], reply[15]])
}

/// Run one request/reply exchange; returns the non-negative result
fn command(stream: &mut TcpStream, cmd: u32, p1: u32, p2: u32, ext: &[u8]) -> Result<i32> {
    stream
        .write_all(&encode_request(cmd, p1, p2, ext))
        .context(format!("Failed to send pigpiod command {cmd}"))?;

    let mut reply = [0u8; HEADER_SIZE];
    stream
        .read_exact(&mut reply)
        .context(format!("Failed to read pigpiod reply to command {cmd}"))?;

    let result = decode_result(&reply);
    if result < 0 {
        bail!("pigpiod command {} failed with error {}", cmd, result);
    }
    Ok(result)
}
