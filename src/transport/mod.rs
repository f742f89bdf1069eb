//! SPI transports
//!
//! A transport moves raw frames to the chain. Backends connect lazily on the
//! first transfer, so a run that has nothing to send never opens the bus.

use anyhow::Result;
use tracing::info;

use crate::config::{BusSettings, TransportKind};
use crate::constants::bus::DEFAULT_DEVICES;

mod pigpiod;
mod device_file;

pub use pigpiod::PigpiodSpi;
pub use device_file::SpidevSpi;

/// Byte pipe to a daisy chain of SPI devices
pub trait Transport {
    /// Short backend name for diagnostics
    fn name(&self) -> &str;

    fn set_verbose(&mut self, verbose: bool);

    /// Takes effect on the next connection
    fn set_baud_rate(&mut self, baud: u32);

    /// Chain length to assume when the config does not say
    fn default_devices(&self) -> usize {
        DEFAULT_DEVICES
    }

    /// Send one frame as a single chip-select assertion
    fn transfer(&mut self, frame: &[u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn set_verbose(&mut self, verbose: bool) {
        (**self).set_verbose(verbose)
    }

    fn set_baud_rate(&mut self, baud: u32) {
        (**self).set_baud_rate(baud)
    }

    fn default_devices(&self) -> usize {
        (**self).default_devices()
    }

    fn transfer(&mut self, frame: &[u8]) -> Result<()> {
        (**self).transfer(frame)
    }
}

/// Build the backend named by the bus settings
pub fn from_settings(settings: &BusSettings, verbose: bool) -> Box<dyn Transport> {
    let mut transport: Box<dyn Transport> = match settings.transport {
        TransportKind::Pigpiod => Box::new(PigpiodSpi::from_env(settings.channel)),
        TransportKind::Spidev => Box::new(SpidevSpi::new(settings.device.clone())),
    };
    transport.set_verbose(verbose);
    transport.set_baud_rate(settings.baud_rate);
    info!(transport = transport.name(), baud_rate = settings.baud_rate, "Selected SPI transport");
    transport
}
