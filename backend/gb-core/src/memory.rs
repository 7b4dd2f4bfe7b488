//! Full address-space decode, wiring the CPU's [`crate::sm83::BusInterface`] to every peripheral.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::dma::OamDma;
use crate::inputs::Joypad;
use crate::ppu::Ppu;
use crate::sm83::{self, BusInterface};
use crate::timer::Timer;
use bincode::{Decode, Encode};

const WRAM_SIZE: usize = 8 * 1024;
const HRAM_SIZE: usize = 127;

#[derive(Debug, Clone, Encode, Decode)]
pub struct GbBus {
    pub cartridge: Cartridge,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub joypad: Joypad,
    wram: Box<[u8]>,
    hram: Box<[u8]>,
    interrupt_enable: u8,
    interrupt_flag: u8,
    dma: OamDma,
    previous_p1: u8,
    serial_data: u8,
}

impl GbBus {
    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            cartridge,
            ppu: Ppu::new(),
            apu: Apu::new(),
            timer: Timer::new(),
            joypad: Joypad::new(),
            wram: vec![0; WRAM_SIZE].into_boxed_slice(),
            hram: vec![0; HRAM_SIZE].into_boxed_slice(),
            interrupt_enable: 0,
            interrupt_flag: 0,
            dma: OamDma::new(),
            previous_p1: 0xFF,
            serial_data: 0,
        }
    }

    pub fn set_buttons(&mut self, mask: u8) {
        self.joypad.set_buttons(mask);
    }

    pub fn wram(&self) -> &[u8] {
        &self.wram
    }

    pub fn request_interrupt(&mut self, interrupt: sm83::InterruptType) {
        self.interrupt_flag |= interrupt.flag_mask();
    }

    /// Advances every cycle-driven peripheral by the T-cycles the CPU just consumed, raising
    /// interrupts into IF as the peripherals' own state machines cross their trigger points.
    pub fn tick_peripherals(&mut self, cycles: u32) {
        if self.timer.tick(cycles) {
            self.request_interrupt(sm83::InterruptType::Timer);
        }

        let ppu_interrupts = self.ppu.tick(cycles);
        if ppu_interrupts.vblank {
            self.request_interrupt(sm83::InterruptType::VBlank);
        }
        if ppu_interrupts.stat {
            self.request_interrupt(sm83::InterruptType::LcdStatus);
        }

        self.apu.tick(cycles);
        self.cartridge.tick_rtc(cycles);

        let current_p1 = self.joypad.read_p1();
        if self.joypad.poll_interrupt(self.previous_p1) {
            self.request_interrupt(sm83::InterruptType::Joypad);
        }
        self.previous_p1 = current_p1;
    }

    fn start_oam_dma(&mut self, source_page: u8) {
        self.dma.source_page = source_page;
        let base = u16::from(source_page) << 8;
        for offset in 0..0xA0u16 {
            let byte = self.read_physical(base + offset);
            self.ppu.write_oam_byte(offset as u8, byte);
        }
    }

    fn read_physical(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x7FFF => self.cartridge.read_rom(address),
            0x8000..=0x9FFF => self.ppu.read_vram(address - 0x8000),
            0xA000..=0xBFFF => self.cartridge.read_ram(address - 0xA000),
            0xC000..=0xDFFF => self.wram[usize::from(address - 0xC000)],
            0xE000..=0xFDFF => self.wram[usize::from(address - 0xE000)],
            0xFE00..=0xFE9F => self.ppu.read_oam(address - 0xFE00),
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read_p1(),
            0xFF01 => self.serial_data,
            0xFF02 => 0x7E,
            0xFF04 => self.timer.read_div(),
            0xFF05 => self.timer.read_tima(),
            0xFF06 => self.timer.read_tma(),
            0xFF07 => self.timer.read_tac(),
            0xFF0F => 0xE0 | self.interrupt_flag,
            0xFF10..=0xFF26 | 0xFF30..=0xFF3F => self.apu.read_register(address),
            0xFF40..=0xFF4B => self.ppu.read_register(address),
            0xFF80..=0xFFFE => self.hram[usize::from(address - 0xFF80)],
            0xFFFF => self.interrupt_enable,
            _ => 0xFF,
        }
    }
}

impl BusInterface for GbBus {
    fn read(&mut self, address: u16) -> u8 {
        self.read_physical(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x7FFF => self.cartridge.write_rom(address, value),
            0x8000..=0x9FFF => self.ppu.write_vram(address - 0x8000, value),
            0xA000..=0xBFFF => self.cartridge.write_ram(address - 0xA000, value),
            0xC000..=0xDFFF => self.wram[usize::from(address - 0xC000)] = value,
            0xE000..=0xFDFF => self.wram[usize::from(address - 0xE000)] = value,
            0xFE00..=0xFE9F => self.ppu.write_oam(address - 0xFE00, value),
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.joypad.write_p1(value),
            0xFF01 => self.serial_data = value,
            0xFF02 => {}
            0xFF04 => self.timer.write_div(),
            0xFF05 => self.timer.write_tima(value),
            0xFF06 => self.timer.write_tma(value),
            0xFF07 => self.timer.write_tac(value),
            0xFF0F => self.interrupt_flag = value & 0x1F,
            0xFF10..=0xFF26 | 0xFF30..=0xFF3F => self.apu.write_register(address, value),
            0xFF40..=0xFF45 | 0xFF47..=0xFF4B => self.ppu.write_register(address, value),
            0xFF46 => self.start_oam_dma(value),
            0xFF80..=0xFFFE => self.hram[usize::from(address - 0xFF80)] = value,
            0xFFFF => self.interrupt_enable = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_blank_cartridge() -> GbBus {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00;
        rom[0x0149] = 0x00;
        GbBus::new(Cartridge::load(rom, None).unwrap())
    }

    #[test]
    fn wram_echo_region_mirrors_wram() {
        let mut bus = bus_with_blank_cartridge();
        bus.write(0xC010, 0x5A);
        assert_eq!(bus.read(0xE010), 0x5A);
    }

    #[test]
    fn interrupt_flag_upper_bits_always_read_as_set() {
        let mut bus = bus_with_blank_cartridge();
        bus.write(0xFF0F, 0x00);
        assert_eq!(bus.read(0xFF0F), 0xE0);
    }

    #[test]
    fn requesting_a_timer_interrupt_sets_the_if_bit() {
        let mut bus = bus_with_blank_cartridge();
        bus.request_interrupt(sm83::InterruptType::Timer);
        assert_eq!(bus.read(0xFF0F) & 0x04, 0x04);
    }

    #[test]
    fn oam_dma_copies_160_bytes_from_the_source_page() {
        let mut bus = bus_with_blank_cartridge();
        for offset in 0..0xA0u16 {
            bus.write(0xC000 + offset, offset as u8);
        }
        bus.write(0xFF46, 0xC0);
        for offset in 0..0xA0u16 {
            assert_eq!(bus.ppu.read_oam(offset), offset as u8);
        }
    }
}
