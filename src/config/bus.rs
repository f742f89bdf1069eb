//! Bus-level settings from the `interface:<bus>` section

use std::path::PathBuf;
use tracing::warn;

use crate::constants::bus::{DEFAULT_BAUD_RATE, DEFAULT_SPIDEV_PATH};
use crate::constants::bus_keys;
use crate::constants::config::INTERFACE_SECTION_PREFIX;
use crate::constants::module::MAX_MODULES;

use super::module_state::parse_bool;
use super::store::ConfigStore;

/// Which backend carries frames to the chips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// pigpio daemon over its TCP socket
    Pigpiod,
    /// Kernel `/dev/spidevB.C` device
    Spidev,
}

impl TransportKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pigpiod" | "pigpio" => Some(TransportKind::Pigpiod),
            "spidev" => Some(TransportKind::Spidev),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub section: String,
    /// `None` when the file does not give a usable count
    pub modules: Option<usize>,
    pub transport: TransportKind,
    pub baud_rate: u32,
    pub channel: u32,
    pub device: PathBuf,
    pub immediate_write: bool,
}

impl BusSettings {
    pub fn section_name(bus: &str) -> String {
        format!("{INTERFACE_SECTION_PREFIX}{bus}")
    }

    /// Read the bus section, falling back to defaults key by key
    pub fn from_store(store: &ConfigStore, bus: &str) -> Self {
        let section = Self::section_name(bus);
        let get = |key: &str| store.get(&section, key);

        let modules = get(bus_keys::MODULES).and_then(|raw| {
            match raw.trim().parse::<usize>() {
                Ok(count) if (1..=MAX_MODULES).contains(&count) => Some(count),
                _ => {
                    warn!(section = %section, modules = %raw, max = MAX_MODULES, "Invalid module count, using transport default");
                    None
                }
            }
        });

        let transport = get(bus_keys::TRANSPORT)
            .map(|raw| {
                TransportKind::parse(raw).unwrap_or_else(|| {
                    warn!(section = %section, transport = %raw, "Unknown transport, using pigpiod");
                    TransportKind::Pigpiod
                })
            })
            .unwrap_or(TransportKind::Pigpiod);

        let baud_rate = get(bus_keys::BAUD_RATE)
            .and_then(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|&baud| baud > 0)
                    .or_else(|| {
                        warn!(section = %section, baud_rate = %raw, "Invalid baud rate, using default");
                        None
                    })
            })
            .unwrap_or(DEFAULT_BAUD_RATE);

        let channel = get(bus_keys::CHANNEL)
            .and_then(|raw| {
                raw.trim().parse::<u32>().ok().or_else(|| {
                    warn!(section = %section, channel = %raw, "Invalid SPI channel, using 0");
                    None
                })
            })
            .unwrap_or(0);

        let device = get(bus_keys::DEVICE)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SPIDEV_PATH));

        let immediate_write = get(bus_keys::IMMEDIATE_WRITE)
            .and_then(|raw| {
                parse_bool(raw).or_else(|| {
                    warn!(section = %section, immediate_write = %raw, "Invalid immediateWrite flag, using false");
                    None
                })
            })
            .unwrap_or(false);

        Self {
            section,
            modules,
            transport,
            baud_rate,
            channel,
            device,
            immediate_write,
        }
    }
}
