//! iNES cartridge loading and the bank controllers actually named for this system: NROM (no
//! mapper), MMC1, UxROM, AxROM, and MMC3. Mapper numbers outside {0, 1, 2, 4, 7} are rejected at
//! load time.

use bincode::{Decode, Encode};
use retro_common::num::GetBit;

const INES_MAGIC: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];
const PRG_BANK_SIZE: usize = 16 * 1024;
const CHR_BANK_SIZE: usize = 8 * 1024;
const PRG_RAM_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum NametableMirroring {
    Horizontal,
    Vertical,
    SingleScreenLow,
    SingleScreenHigh,
}

impl NametableMirroring {
    /// Map a $2000-$3EFF PPU address onto an offset into the 2 KiB of internal nametable RAM.
    pub fn map(self, address: u16) -> u16 {
        let relative = address & 0x0FFF;
        match self {
            Self::Horizontal => ((relative & 0x0800) >> 1) | (relative & 0x03FF),
            Self::Vertical => relative & 0x07FF,
            Self::SingleScreenLow => relative & 0x03FF,
            Self::SingleScreenHigh => 0x0400 | (relative & 0x03FF),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct Mmc1 {
    shift_register: u8,
    shift_count: u8,
    control: u8,
    chr_bank_0: u8,
    chr_bank_1: u8,
    prg_bank: u8,
}

impl Mmc1 {
    fn new() -> Self {
        Self { shift_register: 0, shift_count: 0, control: 0x0C, chr_bank_0: 0, chr_bank_1: 0, prg_bank: 0 }
    }

    fn mirroring(&self) -> NametableMirroring {
        match self.control & 0x03 {
            0 => NametableMirroring::SingleScreenLow,
            1 => NametableMirroring::SingleScreenHigh,
            2 => NametableMirroring::Vertical,
            _ => NametableMirroring::Horizontal,
        }
    }

    fn write_register(&mut self, address: u16, value: u8, prg_banks: usize) {
        if value.bit(7) {
            self.shift_register = 0;
            self.shift_count = 0;
            self.control |= 0x0C;
            return;
        }

        self.shift_register = (self.shift_register >> 1) | ((value & 0x01) << 4);
        self.shift_count += 1;
        if self.shift_count < 5 {
            return;
        }

        let payload = self.shift_register;
        self.shift_register = 0;
        self.shift_count = 0;

        match address {
            0x8000..=0x9FFF => self.control = payload,
            0xA000..=0xBFFF => self.chr_bank_0 = payload,
            0xC000..=0xDFFF => self.chr_bank_1 = payload,
            0xE000..=0xFFFF => self.prg_bank = payload & 0x0F,
            _ => unreachable!(),
        }
        let _ = prg_banks;
    }

    fn prg_bank_indices(&self, prg_banks: usize) -> (usize, usize) {
        let bank = usize::from(self.prg_bank & 0x0F);
        match (self.control >> 2) & 0x03 {
            0 | 1 => {
                let pair = (bank & !1).min(prg_banks.saturating_sub(2));
                (pair, pair + 1)
            }
            2 => (0, bank.min(prg_banks - 1)),
            _ => (bank.min(prg_banks - 1), prg_banks - 1),
        }
    }

    fn chr_bank_offset(&self, address: u16) -> usize {
        if self.control.bit(4) {
            let bank = if address < 0x1000 { self.chr_bank_0 } else { self.chr_bank_1 };
            usize::from(bank) * 4 * 1024 + usize::from(address & 0x0FFF)
        } else {
            let bank = self.chr_bank_0 >> 1;
            usize::from(bank) * 8 * 1024 + usize::from(address & 0x1FFF)
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct Mmc3 {
    bank_select: u8,
    bank_registers: [u8; 8],
    mirroring: NametableMirroring,
    prg_ram_enabled: bool,
    irq_reload_value: u8,
    irq_counter: u8,
    irq_reload_pending: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

impl Mmc3 {
    fn new() -> Self {
        Self {
            bank_select: 0,
            bank_registers: [0; 8],
            mirroring: NametableMirroring::Vertical,
            prg_ram_enabled: true,
            irq_reload_value: 0,
            irq_counter: 0,
            irq_reload_pending: false,
            irq_enabled: false,
            irq_pending: false,
        }
    }

    fn write_register(&mut self, address: u16, value: u8) {
        let even = address % 2 == 0;
        match (address, even) {
            (0x8000..=0x9FFF, true) => self.bank_select = value,
            (0x8000..=0x9FFF, false) => {
                let slot = usize::from(self.bank_select & 0x07);
                self.bank_registers[slot] = value;
            }
            (0xA000..=0xBFFF, true) => {
                self.mirroring = if value.bit(0) {
                    NametableMirroring::Horizontal
                } else {
                    NametableMirroring::Vertical
                };
            }
            (0xA000..=0xBFFF, false) => self.prg_ram_enabled = value.bit(7),
            (0xC000..=0xDFFF, true) => self.irq_reload_value = value,
            (0xC000..=0xDFFF, false) => self.irq_reload_pending = true,
            (0xE000..=0xFFFF, true) => {
                self.irq_enabled = false;
                self.irq_pending = false;
            }
            (0xE000..=0xFFFF, false) => self.irq_enabled = true,
            _ => unreachable!(),
        }
    }

    /// Clocked once per visible scanline rather than on PPU A12 bus transitions: a
    /// scanline-granularity approximation of the real hardware's per-dot filter, close enough for
    /// games whose IRQ targets land on scanline boundaries (the common case).
    fn clock_scanline_irq(&mut self) {
        if self.irq_counter == 0 || self.irq_reload_pending {
            self.irq_counter = self.irq_reload_value;
            self.irq_reload_pending = false;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }

    fn prg_bank_indices(&self, prg_banks_8k: usize) -> [usize; 4] {
        let r6 = usize::from(self.bank_registers[6]) % prg_banks_8k;
        let r7 = usize::from(self.bank_registers[7]) % prg_banks_8k;
        let second_last = prg_banks_8k - 2;
        let last = prg_banks_8k - 1;
        if self.bank_select.bit(6) {
            [second_last, r7, r6, last]
        } else {
            [r6, r7, second_last, last]
        }
    }

    fn chr_bank_offset(&self, address: u16) -> usize {
        let inverted = self.bank_select.bit(7);
        let regions: [(u16, usize, usize); 6] = if inverted {
            [
                (0x1000, 0, 1024),
                (0x1400, 1, 1024),
                (0x1800, 2, 1024),
                (0x1C00, 3, 1024),
                (0x0000, 4, 2048),
                (0x0800, 5, 2048),
            ]
        } else {
            [
                (0x0000, 0, 1024),
                (0x0400, 1, 1024),
                (0x0800, 2, 1024),
                (0x0C00, 3, 1024),
                (0x1000, 4, 2048),
                (0x1800, 5, 2048),
            ]
        };

        for (base, register_index, region_size) in regions {
            if address >= base && usize::from(address - base) < region_size {
                let bank = usize::from(self.bank_registers[register_index]);
                let bank = if region_size == 2048 { bank & !1 } else { bank };
                return bank * 1024 + usize::from(address - base);
            }
        }
        unreachable!("CHR address 0x{address:04X} not covered by any 8 KiB region")
    }
}

#[derive(Debug, Clone, Encode, Decode)]
enum Mapper {
    Nrom,
    Mmc1(Mmc1),
    UxRom { bank: u8 },
    AxRom { bank: u8, mirroring: NametableMirroring },
    Mmc3(Mmc3),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NesLoadError {
    #[error("ROM is too short to contain an iNES header")]
    TooShort,
    #[error("missing iNES magic bytes (NES\\x1A)")]
    BadMagic,
    #[error("ROM length does not match the PRG/CHR bank counts declared in the header")]
    TruncatedBanks,
    #[error("unsupported mapper number: {0}")]
    UnsupportedMapper(u8),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Cartridge {
    prg_rom: Box<[u8]>,
    chr_rom: Box<[u8]>,
    chr_is_ram: bool,
    prg_ram: Box<[u8]>,
    header_mirroring: NametableMirroring,
    mapper: Mapper,
}

impl Cartridge {
    pub fn load(rom: &[u8]) -> Result<Self, NesLoadError> {
        if rom.len() < 16 {
            return Err(NesLoadError::TooShort);
        }
        if rom[0..4] != INES_MAGIC {
            return Err(NesLoadError::BadMagic);
        }

        let prg_banks = usize::from(rom[4]);
        let chr_banks = usize::from(rom[5]);
        let flags6 = rom[6];
        let flags7 = rom[7];

        let has_trainer = flags6.bit(2);
        let mut offset = 16 + if has_trainer { 512 } else { 0 };

        let prg_len = prg_banks * PRG_BANK_SIZE;
        if rom.len() < offset + prg_len {
            return Err(NesLoadError::TruncatedBanks);
        }
        let prg_rom = rom[offset..offset + prg_len].to_vec().into_boxed_slice();
        offset += prg_len;

        let chr_len = chr_banks * CHR_BANK_SIZE;
        let chr_is_ram = chr_banks == 0;
        let chr_rom = if chr_is_ram {
            vec![0u8; CHR_BANK_SIZE].into_boxed_slice()
        } else {
            if rom.len() < offset + chr_len {
                return Err(NesLoadError::TruncatedBanks);
            }
            rom[offset..offset + chr_len].to_vec().into_boxed_slice()
        };

        let header_mirroring = if flags6.bit(0) {
            NametableMirroring::Vertical
        } else {
            NametableMirroring::Horizontal
        };

        let mapper_number = (flags7 & 0xF0) | (flags6 >> 4);
        let mapper = match mapper_number {
            0 => Mapper::Nrom,
            1 => Mapper::Mmc1(Mmc1::new()),
            2 => Mapper::UxRom { bank: 0 },
            7 => Mapper::AxRom { bank: 0, mirroring: NametableMirroring::SingleScreenLow },
            4 => Mapper::Mmc3(Mmc3::new()),
            other => return Err(NesLoadError::UnsupportedMapper(other)),
        };

        Ok(Self {
            prg_rom,
            chr_rom,
            chr_is_ram,
            prg_ram: vec![0u8; PRG_RAM_SIZE].into_boxed_slice(),
            header_mirroring,
            mapper,
        })
    }

    fn prg_bank_count_16k(&self) -> usize {
        self.prg_rom.len() / PRG_BANK_SIZE
    }

    pub fn read_prg(&self, address: u16) -> u8 {
        match address {
            0x6000..=0x7FFF => self.prg_ram[usize::from(address - 0x6000)],
            0x8000..=0xFFFF => {
                let offset = self.prg_rom_offset(address);
                self.prg_rom[offset % self.prg_rom.len()]
            }
            _ => 0xFF,
        }
    }

    fn prg_rom_offset(&self, address: u16) -> usize {
        let banks = self.prg_bank_count_16k();
        match &self.mapper {
            Mapper::Nrom => usize::from(address & 0x7FFF) % self.prg_rom.len(),
            Mapper::Mmc1(mmc1) => {
                let (low, high) = mmc1.prg_bank_indices(banks);
                if address < 0xC000 {
                    low * PRG_BANK_SIZE + usize::from(address & 0x3FFF)
                } else {
                    high * PRG_BANK_SIZE + usize::from(address & 0x3FFF)
                }
            }
            Mapper::UxRom { bank } => {
                if address < 0xC000 {
                    usize::from(*bank) % banks * PRG_BANK_SIZE + usize::from(address & 0x3FFF)
                } else {
                    (banks - 1) * PRG_BANK_SIZE + usize::from(address & 0x3FFF)
                }
            }
            Mapper::AxRom { bank, .. } => {
                usize::from(*bank) % banks.max(1) * (32 * 1024) + usize::from(address & 0x7FFF)
            }
            Mapper::Mmc3(mmc3) => {
                let banks_8k = self.prg_rom.len() / (8 * 1024);
                let indices = mmc3.prg_bank_indices(banks_8k);
                let slot = usize::from((address - 0x8000) / 0x2000);
                indices[slot] * (8 * 1024) + usize::from(address & 0x1FFF)
            }
        }
    }

    pub fn write_prg(&mut self, address: u16, value: u8) {
        match address {
            0x6000..=0x7FFF => self.prg_ram[usize::from(address - 0x6000)] = value,
            0x8000..=0xFFFF => match &mut self.mapper {
                Mapper::Nrom => {}
                Mapper::Mmc1(mmc1) => {
                    let banks = self.prg_rom.len() / PRG_BANK_SIZE;
                    mmc1.write_register(address, value, banks);
                }
                Mapper::UxRom { bank } => *bank = value,
                Mapper::AxRom { bank, mirroring } => {
                    *bank = value & 0x07;
                    *mirroring = if value.bit(4) {
                        NametableMirroring::SingleScreenHigh
                    } else {
                        NametableMirroring::SingleScreenLow
                    };
                }
                Mapper::Mmc3(mmc3) => mmc3.write_register(address, value),
            },
            _ => {}
        }
    }

    pub fn read_chr(&self, address: u16) -> u8 {
        let offset = self.chr_offset(address);
        self.chr_rom[offset % self.chr_rom.len()]
    }

    pub fn write_chr(&mut self, address: u16, value: u8) {
        if !self.chr_is_ram {
            return;
        }
        let offset = self.chr_offset(address) % self.chr_rom.len();
        self.chr_rom[offset] = value;
    }

    fn chr_offset(&self, address: u16) -> usize {
        match &self.mapper {
            Mapper::Nrom | Mapper::UxRom { .. } | Mapper::AxRom { .. } => usize::from(address),
            Mapper::Mmc1(mmc1) => mmc1.chr_bank_offset(address),
            Mapper::Mmc3(mmc3) => mmc3.chr_bank_offset(address),
        }
    }

    pub fn nametable_mirroring(&self) -> NametableMirroring {
        match &self.mapper {
            Mapper::Nrom | Mapper::UxRom { .. } => self.header_mirroring,
            Mapper::Mmc1(mmc1) => mmc1.mirroring(),
            Mapper::AxRom { mirroring, .. } => *mirroring,
            Mapper::Mmc3(mmc3) => mmc3.mirroring,
        }
    }

    /// Called once per visible scanline by the PPU; only MMC3 acts on it.
    pub fn notify_scanline(&mut self) {
        if let Mapper::Mmc3(mmc3) = &mut self.mapper {
            mmc3.clock_scanline_irq();
        }
    }

    pub fn irq_pending(&self) -> bool {
        matches!(&self.mapper, Mapper::Mmc3(mmc3) if mmc3.irq_pending)
    }

    pub fn acknowledge_irq(&mut self) {
        if let Mapper::Mmc3(mmc3) = &mut self.mapper {
            mmc3.irq_pending = false;
        }
    }

    pub fn prg_ram(&self) -> &[u8] {
        &self.prg_ram
    }

    pub fn load_prg_ram(&mut self, bytes: &[u8]) {
        let len = self.prg_ram.len().min(bytes.len());
        self.prg_ram[..len].copy_from_slice(&bytes[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_header(mapper: u8, prg_banks: u8, chr_banks: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 16 + usize::from(prg_banks) * PRG_BANK_SIZE + usize::from(chr_banks) * CHR_BANK_SIZE];
        rom[0..4].copy_from_slice(&INES_MAGIC);
        rom[4] = prg_banks;
        rom[5] = chr_banks;
        rom[6] = (mapper & 0x0F) << 4;
        rom[7] = mapper & 0xF0;
        for bank in 0..prg_banks {
            let start = 16 + usize::from(bank) * PRG_BANK_SIZE;
            rom[start] = bank;
        }
        rom
    }

    #[test]
    fn nrom_16k_mirrors_into_both_halves() {
        let rom = rom_with_header(0, 1, 1);
        let cart = Cartridge::load(&rom).unwrap();
        assert_eq!(cart.read_prg(0x8000), 0);
        assert_eq!(cart.read_prg(0xC000), 0);
    }

    #[test]
    fn uxrom_switches_low_bank_fixes_high_bank() {
        let rom = rom_with_header(2, 4, 0);
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.write_prg(0x8000, 2);
        assert_eq!(cart.read_prg(0x8000), 2);
        assert_eq!(cart.read_prg(0xC000), 3);
    }

    #[test]
    fn mmc1_five_writes_set_prg_bank_register() {
        let rom = rom_with_header(1, 4, 1);
        let mut cart = Cartridge::load(&rom).unwrap();
        // Switch to 16 KiB-fixed-low-bank mode, select PRG bank 2 at $C000.
        for write in [0x02, 0x01, 0x01, 0x01, 0x01] {
            cart.write_prg(0x8000, write);
        }
        for write in [0x02, 0x01, 0x00, 0x00, 0x00] {
            cart.write_prg(0xE000, write);
        }
        assert_eq!(cart.read_prg(0xC000), 2);
    }

    #[test]
    fn mmc3_bank_select_then_data_sets_r6() {
        let rom = rom_with_header(4, 8, 8);
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.write_prg(0x8000, 6); // select R6
        cart.write_prg(0x8001, 3); // R6 = bank 3
        assert_eq!(cart.read_prg(0x8000), 3);
    }

    #[test]
    fn mmc3_irq_fires_when_counter_reaches_zero_and_enabled() {
        let rom = rom_with_header(4, 2, 2);
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.write_prg(0xC000, 1); // reload value = 1
        cart.write_prg(0xC001, 0); // request reload
        cart.write_prg(0xE001, 0); // enable IRQ
        cart.notify_scanline(); // counter reloads to 1
        assert!(!cart.irq_pending());
        cart.notify_scanline(); // counter 1 -> 0
        assert!(cart.irq_pending());
        cart.acknowledge_irq();
        assert!(!cart.irq_pending());
    }

    #[test]
    fn rejects_unsupported_mapper() {
        let rom = rom_with_header(5, 1, 1);
        assert!(matches!(Cartridge::load(&rom), Err(NesLoadError::UnsupportedMapper(5))));
    }
}
