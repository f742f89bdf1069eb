//! Sectioned key/value store persisted as TOML
//!
//! Every value is kept as a string. Hand-written integer, float or boolean
//! literals are accepted on load and converted to their textual form.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::config::BACKUP_SUFFIX;

/// Keys of one section, sorted so the saved file is stable
pub type Section = BTreeMap<String, String>;

#[derive(Debug)]
pub enum ConfigError {
    /// File exists but could not be read, or could not be written
    Io { path: PathBuf, source: io::Error },
    /// File was read but is not a valid state file
    Parse { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, message } => {
                write!(f, "failed to parse {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { .. } => None,
        }
    }
}

/// Scalar as it may appear in a hand-edited file
#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl RawValue {
    fn into_string(self) -> String {
        match self {
            RawValue::Str(s) => s,
            RawValue::Int(i) => i.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigStore {
    path: PathBuf,
    sections: BTreeMap<String, Section>,
    dirty: bool,
    verbose: bool,
    /// File exists but its contents were not loaded; saving moves it aside first
    unreadable: bool,
}

/// `<path>.bak`, where an unreadable state file is kept
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Replace the in-memory mapping with the file contents
    ///
    /// A missing file leaves the store empty and is not an error. On a parse
    /// or read failure the store is also left empty so the caller can carry
    /// on with defaults. The unreadable file is then moved to
    /// [`backup_path`] by the next [`save`](Self::save) instead of being
    /// overwritten.
    pub fn load(&mut self) -> Result<(), ConfigError> {
        self.sections.clear();
        self.dirty = false;
        self.unreadable = false;

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file, starting empty");
                return Ok(());
            }
            Err(source) => {
                self.unreadable = true;
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let raw: BTreeMap<String, BTreeMap<String, RawValue>> = match toml::from_str(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                self.unreadable = true;
                return Err(ConfigError::Parse {
                    path: self.path.clone(),
                    message: e.to_string(),
                });
            }
        };

        self.sections = raw
            .into_iter()
            .map(|(name, keys)| {
                let keys = keys
                    .into_iter()
                    .map(|(key, value)| (key, value.into_string()))
                    .collect();
                (name, keys)
            })
            .collect();

        debug!(path = %self.path.display(), sections = self.sections.len(), "Loaded state file");
        Ok(())
    }

    pub fn has(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.sections
            .get(section)
            .is_some_and(|keys| keys.contains_key(key))
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|keys| keys.get(key))
            .map(String::as_str)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Writable view of a section, created on first access
    pub fn section_mut(&mut self, name: &str) -> SectionMut<'_> {
        let keys = self.sections.entry(name.to_string()).or_default();
        SectionMut {
            keys,
            dirty: &mut self.dirty,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the file if anything changed since the last load or save
    ///
    /// Returns `true` when the file was written.
    pub fn save(&mut self) -> Result<bool, ConfigError> {
        if !self.dirty {
            debug!(path = %self.path.display(), "State unchanged, not saving");
            return Ok(false);
        }

        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = toml::to_string_pretty(&self.sections).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        if self.unreadable && self.path.exists() {
            let backup = backup_path(&self.path);
            fs::rename(&self.path, &backup).map_err(io_err)?;
            warn!(
                path = %self.path.display(),
                backup = %backup.display(),
                "Moved unreadable state file aside"
            );
        }
        fs::write(&self.path, contents).map_err(io_err)?;

        self.unreadable = false;
        self.dirty = false;
        debug!(path = %self.path.display(), "Saved state file");
        Ok(true)
    }

    /// Verbose-mode progress message; silent otherwise
    pub fn log(&self, message: &str) {
        if self.verbose {
            info!("{message}");
        }
    }
}

/// Mutable borrow of one section that keeps the store's dirty flag honest
pub struct SectionMut<'a> {
    keys: &'a mut Section,
    dirty: &'a mut bool,
}

impl SectionMut<'_> {
    /// Store `value` under `key`; only a real change marks the store dirty
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if self.keys.get(key) != Some(&value) {
            self.keys.insert(key.to_string(), value);
            *self.dirty = true;
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.keys.remove(key);
        if removed.is_some() {
            *self.dirty = true;
        }
        removed
    }
}
