//! Z80 address space and I/O port decode.
//!
//! Memory map: $0000-$BFFF cartridge ROM/RAM through the mapper, $C000-$DFFF 8 KiB system RAM,
//! $E000-$FFFF a mirror of that same RAM. I/O ports are decoded the way real SMS hardware does
//! it, off address bits 7/6/0 rather than a full 8-bit port match.

use crate::cartridge::Cartridge;
use crate::input::Joypad;
use crate::psg::Psg;
use crate::vdp::Vdp;
use bincode::{Decode, Encode};
use retro_common::num::GetBit;
use z80_emu::traits::{BusInterface, InterruptLine};

const RAM_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Encode, Decode)]
pub struct SmsBus {
    pub cartridge: Cartridge,
    pub vdp: Vdp,
    pub psg: Psg,
    pub joypad: Joypad,
    ram: Box<[u8]>,
}

impl SmsBus {
    pub fn new(cartridge: Cartridge, native_clock_hz: u32) -> Self {
        Self {
            cartridge,
            vdp: Vdp::new(),
            psg: Psg::new(native_clock_hz),
            joypad: Joypad::new(),
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
        }
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn tick_peripherals(&mut self, z80_cycles: u32) -> bool {
        self.psg.tick(z80_cycles);
        self.vdp.tick(z80_cycles).int_line_asserted
    }
}

impl BusInterface for SmsBus {
    fn read_memory(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0xBFFF => self.cartridge.read(address),
            0xC000..=0xFFFF => self.ram[usize::from(address & 0x1FFF)],
        }
    }

    fn write_memory(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0xBFFF => self.cartridge.write(address, value),
            0xC000..=0xFFFF => self.ram[usize::from(address & 0x1FFF)] = value,
        }
    }

    fn read_io(&mut self, address: u16) -> u8 {
        let address = address & 0xFF;
        match (address.bit(7), address.bit(6), address.bit(0)) {
            (false, false, _) => 0xFF,
            (false, true, false) => 0xFF, // V counter: approximated, not latched from the VDP
            (false, true, true) => 0xFF,  // H counter: approximated
            (true, false, false) => self.vdp.read_data(),
            (true, false, true) => self.vdp.read_control(),
            (true, true, false) => self.joypad.port_dc(),
            (true, true, true) => self.joypad.port_dd(),
        }
    }

    fn write_io(&mut self, address: u16, value: u8) {
        let address = address & 0xFF;
        match (address.bit(7), address.bit(6), address.bit(0)) {
            (false, false, false) => {} // memory control, not modeled
            (false, false, true) => {}  // I/O port direction control, not modeled
            (false, true, _) => self.psg.write(value),
            (true, false, false) => self.vdp.write_data(value),
            (true, false, true) => self.vdp.write_control(value),
            (true, true, _) => {}
        }
    }

    fn nmi(&self) -> InterruptLine {
        InterruptLine::High
    }

    fn int(&self) -> InterruptLine {
        if self.vdp_interrupt_pending() { InterruptLine::Low } else { InterruptLine::High }
    }

    fn busreq(&self) -> bool {
        false
    }

    fn reset(&self) -> bool {
        false
    }
}

impl SmsBus {
    fn vdp_interrupt_pending(&self) -> bool {
        // Recomputed rather than cached: the Z80 core polls `int()` every instruction, and the
        // VDP's own status flags are the single source of truth for interrupt state.
        self.vdp.interrupt_line_asserted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_blank_cartridge() -> SmsBus {
        SmsBus::new(Cartridge::load(&vec![0u8; 32 * 1024]), 3_579_545)
    }

    #[test]
    fn ram_is_mirrored_between_c000_and_e000() {
        let mut bus = bus_with_blank_cartridge();
        bus.write_memory(0xC010, 0x42);
        assert_eq!(bus.read_memory(0xE010), 0x42);
    }

    #[test]
    fn psg_port_accepts_writes_without_panicking() {
        let mut bus = bus_with_blank_cartridge();
        bus.write_io(0x7F, 0x9F);
    }
}
