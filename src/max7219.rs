//! MAX7219 register encoding
//!
//! Chips are daisy-chained: DOUT of position 0 feeds DIN of position 1 and
//! so on. One frame is a single shift-register pass of two bytes per chip.
//! The first pair shifted in ends up in the chip furthest from the host, so
//! position `p` sits at byte offset `2 * (count - 1 - p)`.

use crate::chain::ModuleState;
use crate::constants::code_b::{BLANK, DASH, DIGITS};
use crate::constants::register;

/// One register write for one chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub register: u8,
    pub data: u8,
}

impl RegisterWrite {
    const fn new(register: u8, data: u8) -> Self {
        Self { register, data }
    }
}

/// Code B digits for a module, index 0 being DIG0 (rightmost)
pub fn render_digits(state: &ModuleState) -> [u8; DIGITS] {
    let mut digits = [BLANK; DIGITS];
    if !state.has_value {
        return digits;
    }

    let value = state.value;
    let magnitude = value.unsigned_abs();
    let text = magnitude.to_string();
    let width = text.len() + usize::from(value < 0);
    if width > DIGITS {
        return [DASH; DIGITS];
    }

    for (slot, ch) in digits.iter_mut().zip(text.bytes().rev()) {
        *slot = ch - b'0';
    }
    if value < 0 {
        digits[text.len()] = DASH;
    }
    digits
}

/// Full register sequence that puts one chip into the state described
pub fn module_writes(state: &ModuleState) -> Vec<RegisterWrite> {
    let mut writes = vec![
        RegisterWrite::new(register::DECODE_MODE, 0xFF),
        RegisterWrite::new(register::SCAN_LIMIT, (DIGITS - 1) as u8),
        RegisterWrite::new(register::DISPLAY_TEST, 0x00),
        RegisterWrite::new(register::INTENSITY, state.brightness),
    ];
    writes.extend(
        render_digits(state)
            .iter()
            .enumerate()
            .map(|(i, &code)| RegisterWrite::new(register::DIGIT0 + i as u8, code)),
    );
    writes.push(RegisterWrite::new(register::SHUTDOWN, u8::from(state.enabled)));
    writes
}

/// Frame addressing `position` in a chain of `count`; every other chip gets a no-op
pub fn frame(count: usize, position: usize, write: RegisterWrite) -> Vec<u8> {
    debug_assert!(position < count);
    let mut bytes = vec![register::NOOP; count * 2];
    let offset = (count - 1 - position) * 2;
    bytes[offset] = write.register;
    bytes[offset + 1] = write.data;
    bytes
}

#[cfg(test)]
/// Inverse of [`frame`]: positions carrying something other than a no-op
pub fn addressed_positions(frame: &[u8]) -> Vec<usize> {
    let count = frame.len() / 2;
    frame
        .chunks_exact(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] != register::NOOP)
        .map(|(slot, _)| count - 1 - slot)
        .collect()
}
