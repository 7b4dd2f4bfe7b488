//! Genesis cartridges map linearly into the 68000's address space starting at $000000, unlike
//! the bank-switched 8-bit carts. SRAM presence is detected from the `"RA"` signature the
//! header convention places at offset $1B0, the same way real boot ROMs probe for it.

use bincode::{Decode, Encode};

const SRAM_SIGNATURE_OFFSET: usize = 0x1B0;
const SRAM_SIZE: usize = 64 * 1024;
/// Most SRAM-equipped cartridges map their save RAM starting here, one of the conventional
/// addresses named in the header's RAM-range fields.
const SRAM_BASE: u32 = 0x200000;
const SRAM_END: u32 = SRAM_BASE + SRAM_SIZE as u32 - 1;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Cartridge {
    rom: Vec<u8>,
    sram: Vec<u8>,
    has_sram: bool,
}

impl Cartridge {
    pub fn load(rom: &[u8]) -> Self {
        let has_sram = rom.len() > SRAM_SIGNATURE_OFFSET + 1
            && &rom[SRAM_SIGNATURE_OFFSET..SRAM_SIGNATURE_OFFSET + 2] == b"RA";

        Self { rom: rom.to_vec(), sram: vec![0; SRAM_SIZE], has_sram }
    }

    pub fn load_sram(&mut self, bytes: &[u8]) {
        let len = self.sram.len();
        self.sram.clear();
        self.sram.extend_from_slice(bytes);
        self.sram.resize(len, 0);
    }

    pub fn sram(&self) -> Option<&[u8]> {
        self.has_sram.then_some(self.sram.as_slice())
    }

    pub fn read_byte(&self, address: u32) -> u8 {
        if self.has_sram && (SRAM_BASE..=SRAM_END).contains(&address) {
            return self.sram[(address - SRAM_BASE) as usize];
        }
        self.rom.get(address as usize).copied().unwrap_or(0xFF)
    }

    pub fn read_word(&self, address: u32) -> u16 {
        let high = self.read_byte(address);
        let low = self.read_byte(address.wrapping_add(1));
        u16::from_be_bytes([high, low])
    }

    /// Writes within the cartridge's address window only take effect in the SRAM range; ROM is
    /// read-only from the 68000's perspective.
    pub fn write_sram_byte(&mut self, address: u32, value: u8) {
        if self.has_sram && (SRAM_BASE..=SRAM_END).contains(&address) {
            self.sram[(address - SRAM_BASE) as usize] = value;
        }
    }

    pub fn has_sram(&self) -> bool {
        self.has_sram
    }

    pub fn rom_for_dma(&self) -> &[u8] {
        &self.rom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sram_signature_at_the_documented_offset() {
        let mut rom = vec![0u8; 0x200];
        rom[SRAM_SIGNATURE_OFFSET] = b'R';
        rom[SRAM_SIGNATURE_OFFSET + 1] = b'A';
        let cart = Cartridge::load(&rom);
        assert!(cart.has_sram());
    }

    #[test]
    fn no_signature_means_no_sram() {
        let cart = Cartridge::load(&vec![0u8; 0x200]);
        assert!(!cart.has_sram());
        assert!(cart.sram().is_none());
    }

    #[test]
    fn reads_past_the_end_of_rom_return_open_bus_like_0xff() {
        let cart = Cartridge::load(&[0u8; 4]);
        assert_eq!(cart.read_byte(1000), 0xFF);
    }
}
