//! Application-wide constants
//!
//! Register addresses, protocol numbers, config key names and defaults,
//! grouped by the part of the program that uses them.

/// State file location
pub mod config {
    /// Directory under the user's config dir
    pub const APP_DIR: &str = "max7219-ctl";

    /// State file name
    pub const FILENAME: &str = "state.toml";

    /// Appended to an unreadable state file before it is replaced
    pub const BACKUP_SUFFIX: &str = ".bak";

    /// Prefix for per-module sections (`display:1`, `display:2`, ...)
    pub const DISPLAY_SECTION_PREFIX: &str = "display:";

    /// Prefix for bus-level sections
    pub const INTERFACE_SECTION_PREFIX: &str = "interface:";

    /// Name of the bus this tool drives
    pub const BUS_NAME: &str = "spi-0";
}

/// Keys inside a `display:<n>` section
pub mod module_keys {
    pub const VALUE: &str = "value";
    pub const HAS_VALUE: &str = "hasValue";
    pub const BRIGHTNESS: &str = "brightness";
    pub const ENABLED: &str = "enabled";
}

/// Keys inside an `interface:<bus>` section
pub mod bus_keys {
    pub const MODULES: &str = "modules";
    pub const TRANSPORT: &str = "transport";
    pub const BAUD_RATE: &str = "baudRate";
    pub const CHANNEL: &str = "channel";
    pub const DEVICE: &str = "device";
    pub const IMMEDIATE_WRITE: &str = "immediateWrite";
}

/// Module defaults and limits
pub mod module {
    /// Brightness used when nothing is persisted
    pub const DEFAULT_BRIGHTNESS: u8 = 7;

    /// Highest intensity the chip accepts
    pub const MAX_BRIGHTNESS: u8 = 15;

    /// Longest chain the state file may describe
    pub const MAX_MODULES: usize = 255;
}

/// Bus defaults
pub mod bus {
    /// SPI clock when the config does not set one
    pub const DEFAULT_BAUD_RATE: u32 = 500_000;

    /// Kernel SPI device used by the spidev backend
    pub const DEFAULT_SPIDEV_PATH: &str = "/dev/spidev0.0";

    /// Module count assumed when the config has no usable value
    pub const DEFAULT_DEVICES: usize = 1;
}

/// pigpio daemon socket protocol
pub mod pigpiod {
    /// Environment variable naming the daemon host
    pub const ADDR_ENV: &str = "PIGPIO_ADDR";

    /// Environment variable naming the daemon port
    pub const PORT_ENV: &str = "PIGPIO_PORT";

    pub const DEFAULT_ADDR: &str = "localhost";
    pub const DEFAULT_PORT: u16 = 8888;

    /// Request and response header size (four little-endian u32 words)
    pub const HEADER_SIZE: usize = 16;

    /// spiOpen
    pub const CMD_SPIO: u32 = 71;
    /// spiClose
    pub const CMD_SPIC: u32 = 72;
    /// spiWrite
    pub const CMD_SPIW: u32 = 74;
}

/// MAX7219 register map
pub mod register {
    pub const NOOP: u8 = 0x00;
    /// DIG0 (rightmost digit); DIG1..DIG7 follow at 0x02..0x08
    pub const DIGIT0: u8 = 0x01;
    pub const DECODE_MODE: u8 = 0x09;
    pub const INTENSITY: u8 = 0x0A;
    pub const SCAN_LIMIT: u8 = 0x0B;
    pub const SHUTDOWN: u8 = 0x0C;
    pub const DISPLAY_TEST: u8 = 0x0F;
}

/// Code B font values (decode mode on)
pub mod code_b {
    pub const DASH: u8 = 0x0A;
    pub const BLANK: u8 = 0x0F;

    /// Digits per chip
    pub const DIGITS: usize = 8;
}

/// Process exit codes
pub mod exit {
    /// Matches `return -1` from a C main: 255 as seen by the shell
    pub const FAILURE: u8 = 255;
}
