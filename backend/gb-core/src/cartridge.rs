//! Cartridge ROM/RAM mapping. Supports the two bank controllers actually named for this system:
//! plain ROM-only carts, MBC1, and MBC3 (with its battery-backed real-time clock).

use crate::GbLoadError;
use bincode::{Decode, Encode};
use retro_common::num::{GetBit, U16Ext};

const HEADER_CARTRIDGE_TYPE: usize = 0x0147;
const HEADER_RAM_SIZE: usize = 0x0149;

/// MBC3's RTC is driven by accumulated CPU cycles rather than wall-clock time so that a fresh
/// `frame()` run and a save-state-resumed run produce byte-identical results, per the
/// determinism invariant this core is built around; the real chip ticks off its own 32.768 kHz
/// crystal, which is wall-clock time on hardware but would break that invariant here.
const CYCLES_PER_RTC_SECOND: u64 = 4_194_304;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct RtcTime {
    seconds: u8,
    minutes: u8,
    hours: u8,
    days: u16,
    day_overflow: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Mbc3Rtc {
    current: RtcTime,
    latched: RtcTime,
    last_latch_write: u8,
    halted: bool,
    cycles_accrued: u64,
}

impl Mbc3Rtc {
    fn new() -> Self {
        Self {
            current: RtcTime::default(),
            latched: RtcTime::default(),
            last_latch_write: 0xFF,
            halted: false,
            cycles_accrued: 0,
        }
    }

    fn read_register(&self, register: u8) -> u8 {
        match register {
            0x08 => self.latched.seconds,
            0x09 => self.latched.minutes,
            0x0A => self.latched.hours,
            0x0B => self.latched.days.lsb(),
            0x0C => {
                (self.latched.days.msb() & 0x01)
                    | (u8::from(self.halted) << 6)
                    | (u8::from(self.latched.day_overflow) << 7)
            }
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, register: u8, value: u8) {
        match register {
            0x08 => self.current.seconds = value % 60,
            0x09 => self.current.minutes = value % 60,
            0x0A => self.current.hours = value % 24,
            0x0B => self.current.days.set_lsb(value),
            0x0C => {
                self.current.days.set_msb(value & 0x01);
                self.halted = value.bit(6);
                self.current.day_overflow = value.bit(7);
            }
            _ => {}
        }
    }

    fn write_latch(&mut self, value: u8) {
        if self.last_latch_write == 0x00 && value == 0x01 {
            self.latched = self.current;
        }
        self.last_latch_write = value;
    }

    fn tick(&mut self, cycles: u32) {
        if self.halted {
            return;
        }

        self.cycles_accrued += u64::from(cycles);
        while self.cycles_accrued >= CYCLES_PER_RTC_SECOND {
            self.cycles_accrued -= CYCLES_PER_RTC_SECOND;
            self.advance_one_second();
        }
    }

    fn advance_one_second(&mut self) {
        self.current.seconds += 1;
        if self.current.seconds < 60 {
            return;
        }
        self.current.seconds = 0;

        self.current.minutes += 1;
        if self.current.minutes < 60 {
            return;
        }
        self.current.minutes = 0;

        self.current.hours += 1;
        if self.current.hours < 24 {
            return;
        }
        self.current.hours = 0;

        self.current.days += 1;
        if self.current.days >= 512 {
            self.current.days %= 512;
            self.current.day_overflow = true;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum BankingMode {
    Simple,
    Advanced,
}

#[derive(Debug, Clone, Encode, Decode)]
struct Mbc1 {
    rom_bank: u8,
    ram_bank: u8,
    ram_enabled: bool,
    banking_mode: BankingMode,
}

impl Mbc1 {
    fn new() -> Self {
        Self { rom_bank: 0, ram_bank: 0, ram_enabled: false, banking_mode: BankingMode::Simple }
    }

    fn map_rom_address(&self, address: u16, rom_mask: u32) -> u32 {
        if !address.bit(14) {
            match self.banking_mode {
                BankingMode::Simple => u32::from(address & 0x3FFF),
                BankingMode::Advanced => {
                    let high_bits = u32::from(self.rom_bank & 0x60);
                    ((high_bits << 14) | u32::from(address & 0x3FFF)) & rom_mask
                }
            }
        } else {
            let bank = if self.rom_bank & 0x1F == 0 { 1 } else { self.rom_bank };
            ((u32::from(bank) << 14) | u32::from(address & 0x3FFF)) & rom_mask
        }
    }

    fn map_ram_address(&self, address: u16, ram_mask: u32) -> Option<u32> {
        if !self.ram_enabled {
            return None;
        }
        let address = match self.banking_mode {
            BankingMode::Simple => u32::from(address & 0x1FFF),
            BankingMode::Advanced => {
                ((u32::from(self.ram_bank) << 13) | u32::from(address & 0x1FFF)) & ram_mask
            }
        };
        Some(address)
    }

    fn write_register(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram_enabled = value & 0x0F == 0x0A,
            0x2000..=0x3FFF => self.rom_bank = (self.rom_bank & 0x60) | (value & 0x1F),
            0x4000..=0x5FFF => {
                self.rom_bank = (self.rom_bank & 0x1F) | ((value & 0x03) << 5);
                self.ram_bank = value & 0x03;
            }
            0x6000..=0x7FFF => {
                self.banking_mode =
                    if value.bit(0) { BankingMode::Advanced } else { BankingMode::Simple };
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct Mbc3 {
    rom_bank: u8,
    ram_bank_or_rtc_select: u8,
    ram_enabled: bool,
    rtc: Mbc3Rtc,
}

impl Mbc3 {
    fn new() -> Self {
        Self { rom_bank: 0, ram_bank_or_rtc_select: 0, ram_enabled: false, rtc: Mbc3Rtc::new() }
    }

    fn map_rom_address(&self, address: u16, rom_mask: u32) -> u32 {
        if address < 0x4000 {
            return u32::from(address);
        }
        let bank = if self.rom_bank == 0 { 1 } else { self.rom_bank };
        ((u32::from(bank) << 14) | u32::from(address & 0x3FFF)) & rom_mask
    }

    fn write_register(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram_enabled = value & 0x0F == 0x0A,
            0x2000..=0x3FFF => self.rom_bank = value & 0x7F,
            0x4000..=0x5FFF => self.ram_bank_or_rtc_select = value & 0x0F,
            0x6000..=0x7FFF => self.rtc.write_latch(value),
            _ => {}
        }
    }

    fn read_ram(&self, address: u16, ram_mask: u32, sram: &[u8]) -> u8 {
        match self.ram_bank_or_rtc_select {
            0x00..=0x03 if self.ram_enabled => {
                let addr = ((u32::from(self.ram_bank_or_rtc_select) << 13)
                    | u32::from(address & 0x1FFF))
                    & ram_mask;
                sram.get(addr as usize).copied().unwrap_or(0xFF)
            }
            0x08..=0x0C if self.ram_enabled => self.rtc.read_register(self.ram_bank_or_rtc_select),
            _ => 0xFF,
        }
    }

    fn write_ram(&mut self, address: u16, value: u8, ram_mask: u32, sram: &mut [u8]) {
        match self.ram_bank_or_rtc_select {
            0x00..=0x03 if self.ram_enabled => {
                let addr = ((u32::from(self.ram_bank_or_rtc_select) << 13)
                    | u32::from(address & 0x1FFF))
                    & ram_mask;
                if let Some(slot) = sram.get_mut(addr as usize) {
                    *slot = value;
                }
            }
            0x08..=0x0C if self.ram_enabled => {
                self.rtc.write_register(self.ram_bank_or_rtc_select, value);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
enum Mapper {
    None,
    Mbc1(Mbc1),
    Mbc3(Mbc3),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Cartridge {
    rom: Box<[u8]>,
    sram: Box<[u8]>,
    rom_mask: u32,
    ram_mask: u32,
    mapper: Mapper,
}

impl Cartridge {
    pub fn load(mut rom: Vec<u8>, initial_sram: Option<Vec<u8>>) -> Result<Self, GbLoadError> {
        if rom.len() <= HEADER_RAM_SIZE {
            return Err(GbLoadError::RomTooShort);
        }
        retro_common::rom::mirror_to_next_power_of_two(&mut rom);

        let ram_size_byte = rom[HEADER_RAM_SIZE];
        let ram_len = match ram_size_byte {
            0x00 => 0,
            0x02 => 8 * 1024,
            0x03 => 32 * 1024,
            0x04 => 128 * 1024,
            0x05 => 64 * 1024,
            other => return Err(GbLoadError::UnsupportedSramSize(other)),
        };

        let cartridge_type = rom[HEADER_CARTRIDGE_TYPE];
        let mapper = match cartridge_type {
            0x00 => Mapper::None,
            0x01..=0x03 => Mapper::Mbc1(Mbc1::new()),
            0x0F..=0x13 => Mapper::Mbc3(Mbc3::new()),
            other => return Err(GbLoadError::UnsupportedMapper(other)),
        };

        let sram = match initial_sram {
            Some(sram) if sram.len() == ram_len => sram,
            _ => vec![0; ram_len],
        };

        Ok(Self {
            rom_mask: (rom.len() as u32).saturating_sub(1),
            ram_mask: (ram_len as u32).saturating_sub(1),
            rom: rom.into_boxed_slice(),
            sram: sram.into_boxed_slice(),
            mapper,
        })
    }

    pub fn read_rom(&self, address: u16) -> u8 {
        let rom_addr = match &self.mapper {
            Mapper::None => u32::from(address),
            Mapper::Mbc1(mbc1) => mbc1.map_rom_address(address, self.rom_mask),
            Mapper::Mbc3(mbc3) => mbc3.map_rom_address(address, self.rom_mask),
        };
        self.rom.get(rom_addr as usize).copied().unwrap_or(0xFF)
    }

    pub fn write_rom(&mut self, address: u16, value: u8) {
        match &mut self.mapper {
            Mapper::None => {}
            Mapper::Mbc1(mbc1) => mbc1.write_register(address, value),
            Mapper::Mbc3(mbc3) => mbc3.write_register(address, value),
        }
    }

    pub fn read_ram(&self, address: u16) -> u8 {
        match &self.mapper {
            Mapper::None => self.sram.get(usize::from(address & 0x1FFF)).copied().unwrap_or(0xFF),
            Mapper::Mbc1(mbc1) => mbc1
                .map_ram_address(address, self.ram_mask)
                .and_then(|addr| self.sram.get(addr as usize))
                .copied()
                .unwrap_or(0xFF),
            Mapper::Mbc3(mbc3) => mbc3.read_ram(address, self.ram_mask, &self.sram),
        }
    }

    pub fn write_ram(&mut self, address: u16, value: u8) {
        match &mut self.mapper {
            Mapper::None => {
                if let Some(slot) = self.sram.get_mut(usize::from(address & 0x1FFF)) {
                    *slot = value;
                }
            }
            Mapper::Mbc1(mbc1) => {
                if let Some(addr) = mbc1.map_ram_address(address, self.ram_mask) {
                    if let Some(slot) = self.sram.get_mut(addr as usize) {
                        *slot = value;
                    }
                }
            }
            Mapper::Mbc3(mbc3) => mbc3.write_ram(address, value, self.ram_mask, &mut self.sram),
        }
    }

    pub fn tick_rtc(&mut self, cycles: u32) {
        if let Mapper::Mbc3(mbc3) = &mut self.mapper {
            mbc3.rtc.tick(cycles);
        }
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn load_sram(&mut self, bytes: &[u8]) {
        if bytes.len() == self.sram.len() {
            self.sram.copy_from_slice(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_banks(cartridge_type: u8, ram_byte: u8, bank_count: usize) -> Vec<u8> {
        let mut rom = vec![0u8; bank_count * 0x4000];
        rom[HEADER_CARTRIDGE_TYPE] = cartridge_type;
        rom[HEADER_RAM_SIZE] = ram_byte;
        for (bank, chunk) in rom.chunks_mut(0x4000).enumerate() {
            if let Some(first) = chunk.first_mut() {
                *first = bank as u8;
            }
        }
        rom
    }

    #[test]
    fn rom_only_cartridge_reads_directly() {
        let rom = rom_with_banks(0x00, 0x00, 2);
        let cart = Cartridge::load(rom, None).unwrap();
        assert_eq!(cart.read_rom(0x0000), 0);
        assert_eq!(cart.read_rom(0x4000), 1);
    }

    #[test]
    fn mbc1_switches_rom_bank_via_2000_register() {
        let rom = rom_with_banks(0x01, 0x00, 8);
        let mut cart = Cartridge::load(rom, None).unwrap();
        cart.write_rom(0x2000, 0x05);
        assert_eq!(cart.read_rom(0x4000), 5);
    }

    #[test]
    fn mbc1_remaps_bank_zero_selection_to_bank_one() {
        let rom = rom_with_banks(0x01, 0x00, 8);
        let mut cart = Cartridge::load(rom, None).unwrap();
        cart.write_rom(0x2000, 0x00);
        assert_eq!(cart.read_rom(0x4000), 1);
    }

    #[test]
    fn mbc3_ram_must_be_enabled_before_writes_stick() {
        let rom = rom_with_banks(0x10, 0x02, 2); // MBC3+RTC+RAM
        let mut cart = Cartridge::load(rom, None).unwrap();
        cart.write_ram(0xA000, 0x42);
        assert_eq!(cart.read_ram(0xA000), 0xFF, "disabled RAM reads open bus");

        cart.write_rom(0x0000, 0x0A); // enable RAM
        cart.write_ram(0xA000, 0x42);
        assert_eq!(cart.read_ram(0xA000), 0x42);
    }

    #[test]
    fn mbc3_rtc_seconds_advance_from_emulated_cycles_not_wall_clock() {
        let rom = rom_with_banks(0x0F, 0x00, 2);
        let mut cart = Cartridge::load(rom, None).unwrap();
        cart.write_rom(0x0000, 0x0A); // enable RAM/RTC access
        cart.write_rom(0x4000, 0x08); // select RTC seconds register

        cart.tick_rtc(CYCLES_PER_RTC_SECOND as u32 * 3);

        cart.write_rom(0x6000, 0x00);
        cart.write_rom(0x6000, 0x01); // latch
        assert_eq!(cart.read_ram(0xA000), 3);
    }

    #[test]
    fn rejects_unknown_cartridge_type() {
        let rom = rom_with_banks(0xFE, 0x00, 2);
        assert!(matches!(Cartridge::load(rom, None), Err(GbLoadError::UnsupportedMapper(0xFE))));
    }
}
