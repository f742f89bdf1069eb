//! In-memory model of a MAX7219 daisy chain
//!
//! Each module carries its own dirty bit. In batched mode nothing reaches the
//! bus until [`DisplayChain::send_data`], which writes dirty modules in chain
//! order and clears their bits. In immediate mode every mutation writes its
//! own module right away.

use std::fmt;
use tracing::{debug, info};

use crate::constants::module::{DEFAULT_BRIGHTNESS, MAX_BRIGHTNESS};
use crate::max7219;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleState {
    pub value: i64,
    /// `false` means cleared, which is not the same as showing 0
    pub has_value: bool,
    pub brightness: u8,
    /// `false` puts the chip in shutdown mode
    pub enabled: bool,
    pub dirty: bool,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self {
            value: 0,
            has_value: false,
            brightness: DEFAULT_BRIGHTNESS,
            enabled: true,
            dirty: false,
        }
    }
}

impl ModuleState {
    /// Value on the display, if any
    pub fn displayed(&self) -> Option<i64> {
        self.has_value.then_some(self.value)
    }
}

#[derive(Debug)]
pub enum ChainError {
    IndexOutOfRange { index: usize, count: usize },
    BrightnessOutOfRange(i64),
    Transport { index: usize, source: anyhow::Error },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::IndexOutOfRange { index, count } => {
                write!(f, "module index {index} out of range (chain has {count} modules)")
            }
            ChainError::BrightnessOutOfRange(level) => {
                write!(f, "brightness {level} out of range (0-{MAX_BRIGHTNESS})")
            }
            ChainError::Transport { index, source } => {
                write!(f, "failed to write module {index}: {source:#}")
            }
        }
    }
}

impl std::error::Error for ChainError {}

impl ChainError {
    /// Bad input as opposed to a bus failure
    pub fn is_validation(&self) -> bool {
        !matches!(self, ChainError::Transport { .. })
    }
}

pub struct DisplayChain<T: Transport> {
    transport: T,
    modules: Vec<ModuleState>,
    immediate_write: bool,
}

impl<T: Transport> DisplayChain<T> {
    /// Chain of `count` default modules; `None` asks the transport
    pub fn new(transport: T, count: Option<usize>) -> Self {
        let count = count.unwrap_or_else(|| transport.default_devices());
        info!(transport = transport.name(), modules = count, "Sized display chain");
        Self {
            transport,
            modules: vec![ModuleState::default(); count],
            immediate_write: false,
        }
    }

    pub fn num_devices(&self) -> usize {
        self.modules.len()
    }

    pub fn set_immediate_write(&mut self, immediate: bool) {
        self.immediate_write = immediate;
    }

    pub fn module(&self, index: usize) -> Option<&ModuleState> {
        self.modules.get(index)
    }

    #[cfg(test)]
    pub fn modules(&self) -> &[ModuleState] {
        &self.modules
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Install persisted state for one module without writing anything
    pub fn load_state(&mut self, index: usize, state: ModuleState) -> Result<(), ChainError> {
        let slot = self.slot(index)?;
        *slot = ModuleState { dirty: true, ..state };
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), ChainError> {
        if index < self.modules.len() {
            Ok(())
        } else {
            Err(ChainError::IndexOutOfRange {
                index,
                count: self.modules.len(),
            })
        }
    }

    fn slot(&mut self, index: usize) -> Result<&mut ModuleState, ChainError> {
        self.check_index(index)?;
        Ok(&mut self.modules[index])
    }

    /// Apply `change` to one module, mark it dirty and write it through if immediate
    fn mutate(
        &mut self,
        index: usize,
        change: impl FnOnce(&mut ModuleState),
    ) -> Result<(), ChainError> {
        let slot = self.slot(index)?;
        change(slot);
        slot.dirty = true;
        if self.immediate_write {
            self.write_module(index)?;
        }
        Ok(())
    }

    pub fn set_number(&mut self, index: usize, value: i64) -> Result<(), ChainError> {
        debug!(index = index, value = value, "set_number");
        self.mutate(index, |module| {
            module.value = value;
            module.has_value = true;
        })
    }

    pub fn clear(&mut self, index: usize) -> Result<(), ChainError> {
        debug!(index = index, "clear");
        self.mutate(index, |module| {
            module.value = 0;
            module.has_value = false;
        })
    }

    pub fn set_brightness(&mut self, index: usize, level: i64) -> Result<(), ChainError> {
        self.check_index(index)?;
        let level = u8::try_from(level)
            .ok()
            .filter(|&level| level <= MAX_BRIGHTNESS)
            .ok_or(ChainError::BrightnessOutOfRange(level))?;
        debug!(index = index, level = level, "set_brightness");
        self.mutate(index, |module| module.brightness = level)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<(), ChainError> {
        debug!(index = index, enabled = enabled, "set_enabled");
        self.mutate(index, |module| module.enabled = enabled)
    }

    /// Every module back to defaults and marked for re-send
    pub fn reset(&mut self) -> Result<(), ChainError> {
        info!(modules = self.modules.len(), "Resetting display chain");
        for module in &mut self.modules {
            *module = ModuleState {
                dirty: true,
                ..ModuleState::default()
            };
        }
        if self.immediate_write {
            self.flush()?;
        }
        Ok(())
    }

    pub fn set_dirty(&mut self) {
        self.modules.iter_mut().for_each(|module| module.dirty = true);
    }

    pub fn set_clean(&mut self) {
        self.modules.iter_mut().for_each(|module| module.dirty = false);
    }

    pub fn is_dirty(&self) -> bool {
        self.modules.iter().any(|module| module.dirty)
    }

    /// Push pending state to the hardware; returns how many modules were written
    pub fn send_data(&mut self) -> Result<usize, ChainError> {
        if self.immediate_write && !self.is_dirty() {
            debug!("Immediate mode, nothing left to send");
            return Ok(0);
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<usize, ChainError> {
        let mut written = 0;
        for index in 0..self.modules.len() {
            if self.modules[index].dirty {
                self.write_module(index)?;
                written += 1;
            }
        }
        debug!(written = written, "Flushed display chain");
        Ok(written)
    }

    /// Every register of one module, one frame per register
    fn write_module(&mut self, index: usize) -> Result<(), ChainError> {
        let count = self.modules.len();
        for write in max7219::module_writes(&self.modules[index]) {
            let frame = max7219::frame(count, index, write);
            self.transport
                .transfer(&frame)
                .map_err(|source| ChainError::Transport { index, source })?;
        }
        self.modules[index].dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingTransport;

    /// Frames sent per module flush
    const FRAMES_PER_MODULE: usize = 13;

    fn chain(count: usize) -> DisplayChain<RecordingTransport> {
        DisplayChain::new(RecordingTransport::new(), Some(count))
    }

    #[test]
    fn test_size_defaults_to_transport() {
        let chain = DisplayChain::new(RecordingTransport::new(), None);
        assert_eq!(chain.num_devices(), 1);
    }

    #[test]
    fn test_new_chain_is_default_and_clean() {
        let chain = chain(3);
        assert_eq!(chain.num_devices(), 3);
        assert!(!chain.is_dirty());
        assert!(chain.modules().iter().all(|m| m.displayed().is_none()));
    }

    #[test]
    fn test_set_number_marks_only_that_module() {
        let mut chain = chain(4);
        chain.set_number(2, 1234).unwrap();

        let module = chain.module(2).unwrap();
        assert_eq!(module.displayed(), Some(1234));
        assert!(module.dirty);
        assert!(!chain.module(0).unwrap().dirty);
        assert!(chain.transport().frames.is_empty());
    }

    #[test]
    fn test_clear_distinguishes_from_zero() {
        let mut chain = chain(2);
        chain.set_number(0, 0).unwrap();
        assert_eq!(chain.module(0).unwrap().displayed(), Some(0));

        chain.clear(0).unwrap();
        let module = chain.module(0).unwrap();
        assert!(!module.has_value);
        assert_eq!(module.displayed(), None);
    }

    #[test]
    fn test_out_of_range_index_fails_without_mutation() {
        let mut chain = chain(2);
        let before = chain.modules().to_vec();

        for result in [
            chain.set_number(2, 5),
            chain.clear(7),
            chain.set_brightness(2, 3),
            chain.set_enabled(usize::MAX, false),
        ] {
            assert!(matches!(result, Err(ChainError::IndexOutOfRange { count: 2, .. })));
        }
        assert_eq!(chain.modules(), &before[..]);
    }

    #[test]
    fn test_brightness_bounds() {
        let mut chain = chain(1);
        chain.set_brightness(0, 0).unwrap();
        assert_eq!(chain.module(0).unwrap().brightness, 0);
        chain.set_brightness(0, 15).unwrap();
        assert_eq!(chain.module(0).unwrap().brightness, 15);

        chain.set_clean();
        for level in [-1, 16, 255, 256] {
            let err = chain.set_brightness(0, level).unwrap_err();
            assert!(matches!(err, ChainError::BrightnessOutOfRange(l) if l == level));
            assert!(err.is_validation());
        }
        assert_eq!(chain.module(0).unwrap().brightness, 15);
        assert!(!chain.is_dirty());
    }

    #[test]
    fn test_clean_then_send_writes_nothing() {
        let mut chain = chain(4);
        chain
            .load_state(1, ModuleState { value: 7, has_value: true, ..ModuleState::default() })
            .unwrap();
        assert!(chain.is_dirty());

        chain.set_clean();
        assert_eq!(chain.send_data().unwrap(), 0);
        assert!(chain.transport().frames.is_empty());
    }

    #[test]
    fn test_load_state_out_of_range_is_rejected() {
        let mut chain = chain(2);
        let err = chain.load_state(2, ModuleState::default()).unwrap_err();
        assert!(matches!(err, ChainError::IndexOutOfRange { index: 2, count: 2 }));
        assert!(!chain.is_dirty());
    }

    #[test]
    fn test_single_mutation_sends_one_module_at_its_position() {
        for count in [1, 2, 5, 8] {
            let target = count - 1;
            let mut chain = chain(count);
            chain.set_number(target, 42).unwrap();

            assert_eq!(chain.send_data().unwrap(), 1);
            let transport = chain.transport();
            assert_eq!(transport.frames.len(), FRAMES_PER_MODULE);
            assert!(transport.frames.iter().all(|f| f.len() == count * 2));
            assert_eq!(transport.modules_written(), vec![target]);
            assert!(!chain.is_dirty());
        }
    }

    #[test]
    fn test_reset_sends_every_module_in_order() {
        let mut chain = chain(4);
        chain.set_number(3, 9).unwrap();
        chain.set_brightness(1, 2).unwrap();
        chain.set_clean();

        chain.reset().unwrap();
        assert!(chain.modules().iter().all(|m| m.dirty));
        assert!(chain.modules().iter().all(|m| m.brightness == DEFAULT_BRIGHTNESS && !m.has_value));

        assert_eq!(chain.send_data().unwrap(), 4);
        let transport = chain.transport();
        assert_eq!(transport.frames.len(), 4 * FRAMES_PER_MODULE);
        assert_eq!(transport.modules_written(), vec![0, 1, 2, 3]);

        let positions = transport.positions();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_set_dirty_resends_current_state() {
        let mut chain = chain(3);
        chain.set_dirty();
        assert_eq!(chain.send_data().unwrap(), 3);
        assert_eq!(chain.send_data().unwrap(), 0);
        assert_eq!(chain.transport().frames.len(), 3 * FRAMES_PER_MODULE);
    }

    #[test]
    fn test_immediate_mode_writes_on_mutation() {
        let mut chain = chain(3);
        chain.set_immediate_write(true);

        chain.set_number(1, 5).unwrap();
        assert_eq!(chain.transport().frames.len(), FRAMES_PER_MODULE);
        assert!(!chain.is_dirty());

        assert_eq!(chain.send_data().unwrap(), 0);
        assert_eq!(chain.transport().frames.len(), FRAMES_PER_MODULE);
        assert_eq!(chain.transport().modules_written(), vec![1]);
    }

    #[test]
    fn test_immediate_reset_writes_everything() {
        let mut chain = chain(2);
        chain.set_immediate_write(true);
        chain.reset().unwrap();
        assert_eq!(chain.transport().modules_written(), vec![0, 1]);
        assert!(!chain.is_dirty());
    }

    #[test]
    fn test_transport_failure_keeps_module_dirty() {
        let mut transport = RecordingTransport::new();
        transport.fail_after = Some(FRAMES_PER_MODULE + 2);
        let mut chain = DisplayChain::new(transport, Some(3));
        chain.set_dirty();

        let err = chain.send_data().unwrap_err();
        assert!(matches!(err, ChainError::Transport { index: 1, .. }));
        assert!(!err.is_validation());
        assert!(!chain.module(0).unwrap().dirty);
        assert!(chain.module(1).unwrap().dirty);
        assert!(chain.module(2).unwrap().dirty);
    }

    #[test]
    fn test_brightness_and_shutdown_reach_the_frames() {
        let mut chain = chain(2);
        chain.set_brightness(0, 11).unwrap();
        chain.set_enabled(0, false).unwrap();
        chain.send_data().unwrap();

        let frames = &chain.transport().frames;
        assert!(frames.contains(&vec![0, 0, 0x0A, 11]));
        assert!(frames.contains(&vec![0, 0, 0x0C, 0]));
    }
}
