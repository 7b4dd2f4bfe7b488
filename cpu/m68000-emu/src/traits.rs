/// The bus capability the 68000 core requires of its host. Genesis supplies the only
/// implementation in this workspace, arbitrating 68000/Z80/VDP access to the same physical bus.
pub trait BusInterface {
    /// The 68000 only decodes a 24-bit address bus; the host is responsible for masking if it
    /// cares, but the core always presents the full requested address.
    const ADDRESS_MASK: u32 = 0x00FF_FFFF;

    fn read_byte(&mut self, address: u32) -> u8;

    fn read_word(&mut self, address: u32) -> u16;

    fn write_byte(&mut self, address: u32, value: u8);

    fn write_word(&mut self, address: u32, value: u16);

    fn read_long_word(&mut self, address: u32) -> u32 {
        let high = self.read_word(address);
        let low = self.read_word(address.wrapping_add(2));
        (u32::from(high) << 16) | u32::from(low)
    }

    fn write_long_word(&mut self, address: u32, value: u32) {
        self.write_word(address, (value >> 16) as u16);
        self.write_word(address.wrapping_add(2), value as u16);
    }

    /// Autovectored interrupt level currently asserted, 0-7; 0 means no interrupt pending.
    fn interrupt_level(&self) -> u8;

    fn acknowledge_interrupt(&mut self);
}
