//! The 6-button pad's TH-multiplexed read protocol on the single modeled controller port.
//!
//! A game toggles the port's TH output pin to step through four read phases; the first two
//! are compatible with a 3-button pad (direction + B/C, then A/Start), and a 6-button pad adds
//! two more phases (X/Y/Z/Mode) distinguished by counting consecutive TH low-to-high flips.
//! The flip counter resets if ~1.5ms (`FLIP_RESET_CYCLES` 68000 cycles) pass without one.

use bincode::{Decode, Encode};
use retro_common::num::GetBit;

const TH_BIT: u8 = 6;
const FLIP_RESET_CYCLES: u32 = 10_000;

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct Controller {
    buttons: u8,
    last_ctrl_write: u8,
    last_data_write: u8,
    th_level: bool,
    flip_count: u8,
    flip_reset_counter: u32,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            buttons: 0,
            last_ctrl_write: 0,
            last_data_write: 0,
            th_level: true,
            flip_count: 0,
            flip_reset_counter: 0,
        }
    }

    /// Button bits: 0=Up, 1=Down, 2=Left, 3=Right, 4=A, 5=B, 6=C, 7=Start (the 6-button extras
    /// X/Y/Z/Mode are out of scope for the 8-bit mask `set_input` accepts).
    pub fn set_buttons(&mut self, mask: u8) {
        self.buttons = mask;
    }

    pub fn write_data(&mut self, value: u8) {
        self.last_data_write = value;
        self.maybe_flip_th();
    }

    pub fn write_ctrl(&mut self, value: u8) {
        self.last_ctrl_write = value;
        self.maybe_flip_th();
    }

    fn maybe_flip_th(&mut self) {
        if !self.last_ctrl_write.bit(TH_BIT) {
            return;
        }
        let th = self.last_data_write.bit(TH_BIT);
        if !self.th_level && th {
            self.flip_count = (self.flip_count + 1) % 4;
            self.flip_reset_counter = FLIP_RESET_CYCLES;
        }
        self.th_level = th;
    }

    pub fn tick(&mut self, m68k_cycles: u32) {
        self.flip_reset_counter = self.flip_reset_counter.saturating_sub(m68k_cycles);
        if self.flip_reset_counter == 0 {
            self.flip_count = 0;
        }
    }

    pub fn read_data(&self) -> u8 {
        let up = u8::from(!self.buttons.bit(0));
        let down = u8::from(!self.buttons.bit(1));
        let left = u8::from(!self.buttons.bit(2));
        let right = u8::from(!self.buttons.bit(3));
        let a = u8::from(!self.buttons.bit(4));
        let b = u8::from(!self.buttons.bit(5));
        let c = u8::from(!self.buttons.bit(6));
        let start = u8::from(!self.buttons.bit(7));

        let mut byte = match (self.flip_count, self.th_level) {
            (0..=2, true) => (c << 5) | (b << 4) | (right << 3) | (left << 2) | (down << 1) | up,
            (0..=1, false) => (start << 5) | (a << 4) | (down << 1) | up,
            (3, true) => (c << 5) | (b << 4) | 0x0F,
            (2, false) => (start << 5) | (a << 4),
            (3, false) => (start << 5) | (a << 4) | 0x0F,
            _ => unreachable!("flip_count is always 0..=3"),
        };
        byte |= u8::from(self.th_level) << TH_BIT;
        byte &= !self.last_ctrl_write;
        byte | (self.last_data_write & (self.last_ctrl_write | 0x80))
    }

    pub fn read_ctrl(&self) -> u8 {
        self.last_ctrl_write
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn th_high_with_no_buttons_reads_directions_and_b_c_as_released() {
        let mut controller = Controller::new();
        controller.write_ctrl(0x00); // all pins input
        controller.write_data(0x40); // TH high
        let data = controller.read_data();
        assert_eq!(data & 0x0F, 0x0F);
    }

    #[test]
    fn flip_count_advances_on_rising_th_edge() {
        let mut controller = Controller::new();
        controller.write_ctrl(0x00);
        controller.write_data(0x00); // TH low
        controller.write_data(0x40); // TH rising edge
        assert_eq!(controller.flip_count, 1);
    }

    #[test]
    fn flip_count_resets_after_the_timeout_elapses() {
        let mut controller = Controller::new();
        controller.write_ctrl(0x00);
        controller.write_data(0x00);
        controller.write_data(0x40);
        assert_eq!(controller.flip_count, 1);
        controller.tick(FLIP_RESET_CYCLES);
        assert_eq!(controller.flip_count, 0);
    }
}
