//! CPU address-space decode: 2 KiB of mirrored internal RAM, PPU/APU registers, controller ports,
//! and the cartridge's PRG space.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::input::Controller;
use crate::ppu::{Ppu, PpuInterrupts};
use bincode::{Decode, Encode};
use mos6502_emu::bus::BusInterface;

const RAM_SIZE: usize = 2 * 1024;

#[derive(Debug, Clone, Encode, Decode)]
pub struct NesBus {
    pub cartridge: Cartridge,
    pub ppu: Ppu,
    pub apu: Apu,
    pub controller: Controller,
    ram: Box<[u8]>,
    pending_oam_dma: Option<u8>,
    /// True for exactly the one CPU step between the PPU raising NMI and the core observing it,
    /// so the 6502 core's falling-edge latch (armed by a true-then-false read sequence) fires on
    /// schedule. See [`NesBus::consume_nmi_pulse`].
    nmi_pulse: bool,
}

impl NesBus {
    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            cartridge,
            ppu: Ppu::new(),
            apu: Apu::new(),
            controller: Controller::new(),
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
            pending_oam_dma: None,
            nmi_pulse: false,
        }
    }

    pub fn set_buttons(&mut self, mask: u8) {
        self.controller.set_buttons(mask);
    }

    pub fn take_pending_oam_dma(&mut self) -> Option<u8> {
        self.pending_oam_dma.take()
    }

    pub fn perform_oam_dma(&mut self, page: u8) {
        let base = u16::from(page) << 8;
        for offset in 0..=0xFFu16 {
            let byte = self.read(base + offset);
            self.ppu.write_oam_byte(offset as u8, byte);
        }
    }

    /// Advance PPU (3 dots/cycle) and APU by the CPU cycles just consumed; wires interrupt lines.
    pub fn tick_peripherals(&mut self, cpu_cycles: u32) {
        let PpuInterrupts { nmi } = self.ppu.tick(cpu_cycles, &mut self.cartridge);
        if nmi {
            self.nmi_pulse = true;
        }
        self.apu.tick(cpu_cycles);
    }

    /// Must be called once per CPU step, immediately after the instruction has had a chance to
    /// observe the NMI line, so the pulse doesn't stay visible for more than one step.
    pub fn consume_nmi_pulse(&mut self) {
        self.nmi_pulse = false;
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }
}

impl BusInterface for NesBus {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.ram[usize::from(address & 0x07FF)],
            0x2000..=0x3FFF => self.ppu.read_register(address & 0x2007, &self.cartridge),
            0x4015 => self.apu.read_status(),
            0x4016 => self.controller.read(),
            0x4017 => 0,
            0x4020..=0xFFFF => self.cartridge.read_prg(address),
            _ => 0,
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[usize::from(address & 0x07FF)] = value,
            0x2000..=0x3FFF => {
                self.ppu.write_register(address & 0x2007, value, &mut self.cartridge)
            }
            0x4014 => self.pending_oam_dma = Some(value),
            0x4016 => self.controller.write_strobe(value),
            0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.write_register(address, value),
            0x4020..=0xFFFF => self.cartridge.write_prg(address, value),
            _ => {}
        }
    }

    fn nmi(&self) -> bool {
        self.nmi_pulse
    }

    fn irq(&self) -> bool {
        self.apu.irq_pending() || self.cartridge.irq_pending()
    }
}

impl NesBus {
    pub fn acknowledge_mapper_irq(&mut self) {
        self.cartridge.acknowledge_irq();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_blank_cartridge() -> NesBus {
        let mut rom = vec![0x4E, 0x45, 0x53, 0x1A, 1, 1, 0, 0];
        rom.resize(16, 0);
        rom.extend(vec![0u8; 16 * 1024]);
        rom.extend(vec![0u8; 8 * 1024]);
        NesBus::new(Cartridge::load(&rom).unwrap())
    }

    #[test]
    fn ram_is_mirrored_every_2kb() {
        let mut bus = bus_with_blank_cartridge();
        bus.write(0x0010, 0x42);
        assert_eq!(bus.read(0x0810), 0x42);
        assert_eq!(bus.read(0x1810), 0x42);
    }

    #[test]
    fn ppu_registers_mirror_every_8_bytes() {
        let mut bus = bus_with_blank_cartridge();
        bus.write(0x2000, 0x80);
        bus.write(0x2001, 0x1E);
        // Reading PPUSTATUS through any of its mirrors should clear the write latch consistently.
        let _ = bus.read(0x2002);
        let _ = bus.read(0x200A);
    }

    #[test]
    fn writing_4014_queues_oam_dma_request() {
        let mut bus = bus_with_blank_cartridge();
        bus.write(0x4014, 0x02);
        assert_eq!(bus.take_pending_oam_dma(), Some(0x02));
        assert_eq!(bus.take_pending_oam_dma(), None);
    }
}
