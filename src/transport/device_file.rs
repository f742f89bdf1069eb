//! Kernel spidev backend (`/dev/spidevB.C`)

use anyhow::Result;
use std::path::PathBuf;

use super::Transport;

pub struct SpidevSpi {
    path: PathBuf,
    baud: u32,
    verbose: bool,
    #[cfg(target_os = "linux")]
    device: Option<::spidev::Spidev>,
}

impl SpidevSpi {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            baud: crate::constants::bus::DEFAULT_BAUD_RATE,
            verbose: false,
            #[cfg(target_os = "linux")]
            device: None,
        }
    }
}

#[cfg(target_os = "linux")]
impl SpidevSpi {
    fn open(&mut self) -> Result<&mut ::spidev::Spidev> {
        use anyhow::Context;
        use spidev::{SpiModeFlags, Spidev, SpidevOptions};

        if self.device.is_none() {
            let mut device = Spidev::open(&self.path)
                .context(format!("Failed to open SPI device {}", self.path.display()))?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(self.baud)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            device
                .configure(&options)
                .context(format!("Failed to configure SPI device {}", self.path.display()))?;
            tracing::info!(path = %self.path.display(), baud = self.baud, "Opened SPI device");
            self.device = Some(device);
        }
        self.device
            .as_mut()
            .context("SPI device missing after open")
    }
}

impl Transport for SpidevSpi {
    fn name(&self) -> &str {
        "spidev"
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn set_baud_rate(&mut self, baud: u32) {
        self.baud = baud;
    }

    #[cfg(target_os = "linux")]
    fn transfer(&mut self, frame: &[u8]) -> Result<()> {
        use anyhow::Context;
        use std::io::Write;

        if self.verbose {
            tracing::debug!(path = %self.path.display(), bytes = ?frame, "spidev write");
        }
        let path = self.path.clone();
        let device = self.open()?;
        let written = device.write_all(frame);
        if written.is_err() {
            self.device = None;
        }
        written.context(format!("Failed to write to SPI device {}", path.display()))
    }

    #[cfg(not(target_os = "linux"))]
    fn transfer(&mut self, _frame: &[u8]) -> Result<()> {
        anyhow::bail!(
            "spidev transport is only available on Linux ({})",
            self.path.display()
        )
    }
}
