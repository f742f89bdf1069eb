//! Per-module state <-> `display:<n>` section
//!
//! Decoding never fails: a missing or unreadable key falls back to the
//! module default for that key alone, so partial sections are fine.

use std::str::FromStr;
use tracing::warn;

use crate::chain::ModuleState;
use crate::constants::config::DISPLAY_SECTION_PREFIX;
use crate::constants::module::MAX_BRIGHTNESS;
use crate::constants::module_keys;

use super::store::{Section, SectionMut};

/// Section name for a 0-based chain position
pub fn section_name(index: usize) -> String {
    format!("{DISPLAY_SECTION_PREFIX}{}", index + 1)
}

/// Lenient boolean used for hand-edited files
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_key<T: FromStr>(section: &Section, key: &str) -> Option<T> {
    let raw = section.get(key)?;
    let parsed = raw.trim().parse::<T>().ok();
    if parsed.is_none() {
        warn!(key = key, value = %raw, "Unparseable value in state file, using default");
    }
    parsed
}

fn parse_bool_key(section: &Section, key: &str) -> Option<bool> {
    let raw = section.get(key)?;
    let parsed = parse_bool(raw);
    if parsed.is_none() {
        warn!(key = key, value = %raw, "Unparseable boolean in state file, using default");
    }
    parsed
}

pub fn decode(section: &Section) -> ModuleState {
    let mut state = ModuleState::default();

    if let Some(value) = parse_key::<i64>(section, module_keys::VALUE) {
        state.value = value;
    }
    if let Some(has_value) = parse_bool_key(section, module_keys::HAS_VALUE) {
        state.has_value = has_value;
    }
    if let Some(brightness) = parse_key::<u8>(section, module_keys::BRIGHTNESS) {
        if brightness <= MAX_BRIGHTNESS {
            state.brightness = brightness;
        } else {
            warn!(brightness = brightness, max = MAX_BRIGHTNESS, "Brightness out of range in state file, using default");
        }
    }
    if let Some(enabled) = parse_bool_key(section, module_keys::ENABLED) {
        state.enabled = enabled;
    }

    state
}

pub fn encode(state: &ModuleState, section: &mut SectionMut<'_>) {
    section.set(module_keys::VALUE, state.value.to_string());
    section.set(module_keys::HAS_VALUE, state.has_value.to_string());
    section.set(module_keys::BRIGHTNESS, state.brightness.to_string());
    section.set(module_keys::ENABLED, state.enabled.to_string());
}
