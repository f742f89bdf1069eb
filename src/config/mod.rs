//! Persisted state for max7219-ctl
//!
//! - **store**: sectioned key/value file with dirty tracking
//! - **module_state**: one module's state <-> its `display:<n>` section
//! - **bus**: typed view of the `interface:<bus>` section

pub mod bus;
pub mod module_state;
pub mod store;

use std::path::PathBuf;

pub use bus::{BusSettings, TransportKind};
pub use store::{ConfigError, ConfigStore};

/// Default state file location
pub fn default_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(crate::constants::config::APP_DIR);
    path.push(crate::constants::config::FILENAME);
    path
}
