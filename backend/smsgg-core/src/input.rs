//! Controller I/O ports ($DC/$DD): a direct active-low scan of the joypad state, no shift
//! register or strobe latch (unlike the NES).
//!
//! Button bits (matching the mask accepted by [`crate::SmsGg::set_input`]):
//! 0=Up, 1=Down, 2=Left, 3=Right, 4=Button1, 5=Button2.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct Joypad {
    buttons: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_buttons(&mut self, mask: u8) {
        self.buttons = mask;
    }

    /// Port $DC: player 1 up/down/left/right/button1/button2, low 2 bits of player 2
    /// up/down (tied high here since only one controller is modeled).
    pub fn port_dc(&self) -> u8 {
        0xC0 | !self.buttons
    }

    /// Port $DD: remaining player 2 bits plus the reset button, all tied inactive (high).
    pub fn port_dd(&self) -> u8 {
        0xFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_buttons_pressed_reads_all_ones() {
        let joypad = Joypad::new();
        assert_eq!(joypad.port_dc(), 0xFF);
    }

    #[test]
    fn pressing_up_clears_bit_zero_on_port_dc() {
        let mut joypad = Joypad::new();
        joypad.set_buttons(0b0000_0001);
        assert_eq!(joypad.port_dc() & 0x01, 0);
    }
}
