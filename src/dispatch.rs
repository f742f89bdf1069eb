//! One command per run against the chain and the state file
//!
//! A mutating command validates first, then changes one module, persists
//! that module's section and finally flushes. Validation failures return
//! before anything is written, to the file or to the bus.

use std::fmt;
use tracing::{debug, warn};

use crate::chain::{ChainError, DisplayChain};
use crate::config::module_state::{self, section_name};
use crate::config::{BusSettings, ConfigStore};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reset,
    Sync,
    /// Module numbers are 1-based as typed by the user
    Set { module: i64, value: i64 },
    Clear { module: i64 },
    Brightness { module: i64, level: i64 },
    On { module: i64 },
    Off { module: i64 },
    Unknown(String),
}

#[derive(Debug)]
pub enum DispatchError {
    /// Bad module number, brightness level, etc. Nothing was written.
    Validation(String),
    /// State file or bus failure
    Fatal(anyhow::Error),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Validation(message) => f.write_str(message),
            DispatchError::Fatal(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<ChainError> for DispatchError {
    fn from(e: ChainError) -> Self {
        if e.is_validation() {
            DispatchError::Validation(e.to_string())
        } else {
            DispatchError::Fatal(anyhow::Error::new(e))
        }
    }
}

/// Size the chain and restore each module from its section
///
/// The chain comes back clean: loading persisted state alone never causes a
/// hardware write.
pub fn build_chain<T: Transport>(
    transport: T,
    store: &ConfigStore,
    settings: &BusSettings,
) -> DisplayChain<T> {
    store.log("Checking for number of modules.");
    let mut chain = DisplayChain::new(transport, settings.modules);

    store.log("Telling the chain whether to write immediately.");
    chain.set_immediate_write(settings.immediate_write);

    store.log("Loading device-specific state.");
    for index in 0..chain.num_devices() {
        let name = section_name(index);
        if let Some(section) = store.section(&name) {
            store.log(&format!("Loading state for '{name}'"));
            let state = module_state::decode(section);
            if let Err(e) = chain.load_state(index, state) {
                warn!(section = %name, error = %e, "Could not restore module state");
            }
        }
    }

    store.log("Cleaning displays.");
    chain.set_clean();
    chain
}

/// 1-based module number to chain index
fn module_index(number: i64, count: usize) -> Result<usize, DispatchError> {
    usize::try_from(number)
        .ok()
        .and_then(|n| n.checked_sub(1))
        .filter(|&index| index < count)
        .ok_or_else(|| DispatchError::Validation(format!("Invalid module number: {number}")))
}

/// Write one module's section and save the file
fn persist<T: Transport>(
    chain: &DisplayChain<T>,
    store: &mut ConfigStore,
    index: usize,
) -> Result<(), DispatchError> {
    let name = section_name(index);
    store.log(&format!("Saving state for '{name}'"));
    if let Some(state) = chain.module(index) {
        store.log(&format!(
            "Value is now {:?}, brightness {}, enabled {}",
            state.displayed(),
            state.brightness,
            state.enabled
        ));
        module_state::encode(state, &mut store.section_mut(&name));
    }
    store.mark_dirty();
    store
        .save()
        .map_err(|e| DispatchError::Fatal(anyhow::Error::new(e).context(format!("Failed to save state for '{name}'"))))?;
    Ok(())
}

/// Validate, mutate one module, persist it
///
/// A bus failure in immediate mode still persists the attempted state
/// before the error is returned.
fn mutate_module<T: Transport>(
    chain: &mut DisplayChain<T>,
    store: &mut ConfigStore,
    number: i64,
    change: impl FnOnce(&mut DisplayChain<T>, usize) -> Result<(), ChainError>,
) -> Result<(), DispatchError> {
    let index = module_index(number, chain.num_devices())?;
    let outcome = change(chain, index);
    if let Err(e) = &outcome
        && e.is_validation()
    {
        return Err(DispatchError::Validation(e.to_string()));
    }

    persist(chain, store, index)?;
    outcome.map_err(DispatchError::from)
}

/// Run `command` (or nothing) and flush; returns how many modules were written
pub fn run<T: Transport>(
    command: Option<&Command>,
    chain: &mut DisplayChain<T>,
    store: &mut ConfigStore,
) -> Result<usize, DispatchError> {
    store.log("Checking what we need to do.");
    match command {
        None => debug!("No command given"),
        Some(Command::Reset) => chain.reset()?,
        Some(Command::Sync) => chain.set_dirty(),
        Some(Command::Set { module, value }) => {
            store.log(&format!("Setting value for module {module} to {value}"));
            mutate_module(chain, store, *module, |chain, index| chain.set_number(index, *value))?;
        }
        Some(Command::Clear { module }) => {
            store.log(&format!("Clearing module {module}"));
            mutate_module(chain, store, *module, |chain, index| chain.clear(index))?;
        }
        Some(Command::Brightness { module, level }) => {
            store.log(&format!("Setting brightness for module {module} to {level}"));
            mutate_module(chain, store, *module, |chain, index| chain.set_brightness(index, *level))?;
        }
        Some(Command::On { module }) => {
            store.log(&format!("Switching module {module} on"));
            mutate_module(chain, store, *module, |chain, index| chain.set_enabled(index, true))?;
        }
        Some(Command::Off { module }) => {
            store.log(&format!("Switching module {module} off"));
            mutate_module(chain, store, *module, |chain, index| chain.set_enabled(index, false))?;
        }
        Some(Command::Unknown(name)) => warn!("Unknown command '{name}'"),
    }

    store.log("Sending data to device.");
    let written = chain.send_data()?;
    store.log("Done.");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::backup_path;
    use crate::transport::testing::RecordingTransport;
    use std::fs;
    use tempfile::TempDir;

    const SCENARIO: &str = r#"
["interface:spi-0"]
modules = "4"

["display:2"]
value = "7"
hasValue = "true"
brightness = "3"
"#;

    struct Fixture {
        _dir: TempDir,
        store: ConfigStore,
        chain: DisplayChain<RecordingTransport>,
    }

    fn fixture(contents: Option<&str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        if let Some(contents) = contents {
            fs::write(&path, contents).unwrap();
        }
        let mut store = ConfigStore::new(&path);
        store.load().unwrap();
        let settings = BusSettings::from_store(&store, "spi-0");
        let chain = build_chain(RecordingTransport::new(), &store, &settings);
        Fixture { _dir: dir, store, chain }
    }

    fn file_contents(store: &ConfigStore) -> Option<String> {
        fs::read_to_string(store.path()).ok()
    }

    #[test]
    fn test_build_chain_restores_state_clean() {
        let f = fixture(Some(SCENARIO));
        assert_eq!(f.chain.num_devices(), 4);
        assert!(!f.chain.is_dirty());

        let module = f.chain.module(1).unwrap();
        assert_eq!(module.displayed(), Some(7));
        assert_eq!(module.brightness, 3);
        assert_eq!(f.chain.module(0).unwrap().displayed(), None);
    }

    #[test]
    fn test_absent_config_gives_default_chain() {
        let mut f = fixture(None);
        assert_eq!(f.chain.num_devices(), 1);
        assert!(f.chain.modules().iter().all(|m| !m.has_value));

        assert_eq!(run(None, &mut f.chain, &mut f.store).unwrap(), 0);
        assert!(f.chain.transport().frames.is_empty());
        assert!(file_contents(&f.store).is_none());
    }

    #[test]
    fn test_set_preserves_brightness_and_sends_one_module() {
        let mut f = fixture(Some(SCENARIO));
        let command = Command::Set { module: 2, value: 9 };

        assert_eq!(run(Some(&command), &mut f.chain, &mut f.store).unwrap(), 1);

        let module = f.chain.module(1).unwrap();
        assert_eq!(module.displayed(), Some(9));
        assert_eq!(module.brightness, 3);
        assert_eq!(f.chain.transport().modules_written(), vec![1]);

        assert!(!f.store.is_dirty());
        let mut reloaded = ConfigStore::new(f.store.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("display:2", "value"), Some("9"));
        assert_eq!(reloaded.get("display:2", "hasValue"), Some("true"));
        assert_eq!(reloaded.get("display:2", "brightness"), Some("3"));
        assert_eq!(reloaded.get("interface:spi-0", "modules"), Some("4"));
    }

    #[test]
    fn test_invalid_module_changes_nothing() {
        let commands = [
            Command::Set { module: 0, value: 1 },
            Command::Set { module: 5, value: 1 },
            Command::Clear { module: -1 },
            Command::Brightness { module: 9, level: 3 },
            Command::On { module: 0 },
            Command::Off { module: i64::MAX },
        ];
        for command in commands {
            let mut f = fixture(Some(SCENARIO));
            let before = file_contents(&f.store);

            let err = run(Some(&command), &mut f.chain, &mut f.store).unwrap_err();
            assert!(matches!(err, DispatchError::Validation(_)), "{command:?}");
            assert!(err.to_string().starts_with("Invalid module number"));

            assert!(!f.store.is_dirty());
            assert_eq!(file_contents(&f.store), before);
            assert!(f.chain.transport().frames.is_empty());
        }
    }

    #[test]
    fn test_brightness_out_of_range_changes_nothing() {
        for level in [-1, 16] {
            let mut f = fixture(Some(SCENARIO));
            let before = file_contents(&f.store);
            let command = Command::Brightness { module: 2, level };

            let err = run(Some(&command), &mut f.chain, &mut f.store).unwrap_err();
            assert!(matches!(err, DispatchError::Validation(_)));
            assert_eq!(f.chain.module(1).unwrap().brightness, 3);
            assert_eq!(file_contents(&f.store), before);
            assert!(f.chain.transport().frames.is_empty());
        }
    }

    #[test]
    fn test_brightness_edges_are_persisted() {
        for level in [0, 15] {
            let mut f = fixture(Some(SCENARIO));
            let command = Command::Brightness { module: 4, level };
            run(Some(&command), &mut f.chain, &mut f.store).unwrap();

            let mut reloaded = ConfigStore::new(f.store.path());
            reloaded.load().unwrap();
            assert_eq!(reloaded.get("display:4", "brightness"), Some(level.to_string().as_str()));
            assert_eq!(f.chain.transport().modules_written(), vec![3]);
        }
    }

    #[test]
    fn test_clear_and_off_persist() {
        let mut f = fixture(Some(SCENARIO));
        run(Some(&Command::Clear { module: 2 }), &mut f.chain, &mut f.store).unwrap();
        run(Some(&Command::Off { module: 2 }), &mut f.chain, &mut f.store).unwrap();

        let mut reloaded = ConfigStore::new(f.store.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("display:2", "hasValue"), Some("false"));
        assert_eq!(reloaded.get("display:2", "enabled"), Some("false"));
        assert_eq!(reloaded.get("display:2", "brightness"), Some("3"));
    }

    #[test]
    fn test_reset_sends_all_and_leaves_file_alone() {
        let mut f = fixture(Some(SCENARIO));
        let before = file_contents(&f.store);

        assert_eq!(run(Some(&Command::Reset), &mut f.chain, &mut f.store).unwrap(), 4);
        assert_eq!(f.chain.transport().modules_written(), vec![0, 1, 2, 3]);
        assert_eq!(f.chain.module(1).unwrap().displayed(), None);
        assert_eq!(file_contents(&f.store), before);
    }

    #[test]
    fn test_sync_resends_loaded_state() {
        let mut f = fixture(Some(SCENARIO));
        assert_eq!(run(Some(&Command::Sync), &mut f.chain, &mut f.store).unwrap(), 4);
        assert_eq!(f.chain.module(1).unwrap().displayed(), Some(7));
        assert_eq!(f.chain.transport().modules_written(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unknown_command_still_flushes() {
        let mut f = fixture(Some(SCENARIO));
        let unknown = Command::Unknown("blink".to_string());
        assert_eq!(run(Some(&unknown), &mut f.chain, &mut f.store).unwrap(), 0);

        f.chain.set_dirty();
        assert_eq!(run(Some(&unknown), &mut f.chain, &mut f.store).unwrap(), 4);
        assert!(!f.store.is_dirty());
    }

    #[test]
    fn test_save_failure_is_fatal_and_skips_flush() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let mut store = ConfigStore::new(blocker.join("state.toml"));
        let settings = BusSettings::from_store(&store, "spi-0");
        let mut chain = build_chain(RecordingTransport::new(), &store, &settings);

        let err = run(Some(&Command::Set { module: 1, value: 3 }), &mut chain, &mut store).unwrap_err();
        assert!(matches!(err, DispatchError::Fatal(_)));
        assert!(chain.transport().frames.is_empty());
    }

    #[test]
    fn test_immediate_mode_persists_even_when_bus_fails() {
        let mut f = fixture(Some(SCENARIO));
        let mut transport = RecordingTransport::new();
        transport.fail_after = Some(0);
        let mut settings = BusSettings::from_store(&f.store, "spi-0");
        settings.immediate_write = true;
        let mut chain = build_chain(transport, &f.store, &settings);

        let err = run(Some(&Command::Set { module: 3, value: 12 }), &mut chain, &mut f.store).unwrap_err();
        assert!(matches!(err, DispatchError::Fatal(_)));

        let mut reloaded = ConfigStore::new(f.store.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("display:3", "value"), Some("12"));
    }

    #[test]
    fn test_set_after_malformed_file_keeps_original_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        let original = format!("{SCENARIO}value = = 7\n");
        fs::write(&path, &original).unwrap();

        let mut store = ConfigStore::new(&path);
        assert!(store.load().is_err());
        let settings = BusSettings::from_store(&store, "spi-0");
        let mut chain = build_chain(RecordingTransport::new(), &store, &settings);
        assert_eq!(chain.num_devices(), 1);

        let command = Command::Set { module: 1, value: 5 };
        assert_eq!(run(Some(&command), &mut chain, &mut store).unwrap(), 1);

        let backup = fs::read_to_string(backup_path(&path)).unwrap();
        assert_eq!(backup, original);

        let mut reloaded = ConfigStore::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("display:1", "value"), Some("5"));
    }

    #[test]
    fn test_module_index_conversion() {
        assert_eq!(module_index(1, 4).unwrap(), 0);
        assert_eq!(module_index(4, 4).unwrap(), 3);
        assert!(module_index(5, 4).is_err());
        assert!(module_index(0, 4).is_err());
        assert!(module_index(-3, 4).is_err());
    }
}
