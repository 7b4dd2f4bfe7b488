//! Top-level Genesis emulator: wires the 68000 and its Z80 audio coprocessor to the shared bus
//! and exposes the workspace's uniform [`EmulatedSystem`] contract.

use crate::cartridge::Cartridge;
use crate::memory::GenesisBus;
use bincode::{Decode, Encode};
use m68000_emu::M68000;
use m68000_emu::traits::BusInterface as M68kBusInterface;
use retro_common::frontend::EmulatedSystem;
use z80_emu::Z80;

/// NTSC master clock; the 68000 runs at a seventh of it.
pub const NTSC_MASTER_CLOCK_HZ: u32 = 53_693_175;
pub const M68K_CLOCK_HZ: u32 = NTSC_MASTER_CLOCK_HZ / 7;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenesisConfig;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Genesis {
    m68000: M68000,
    z80: Z80,
    bus: GenesisBus,
    cycle_counter: u64,
    /// 68000-cycle budget owed to the Z80, which runs at half the 68000's rate; spent down by
    /// `z80_cycles * 2` every time the Z80 executes an instruction.
    z80_cycle_debt: u32,
}

impl Genesis {
    pub fn new(rom: &[u8], cartridge_sram: Option<Vec<u8>>, _config: GenesisConfig) -> Self {
        let mut cartridge = Cartridge::load(rom);
        if let Some(bytes) = cartridge_sram {
            cartridge.load_sram(&bytes);
        }

        let mut bus = GenesisBus::new(cartridge, M68K_CLOCK_HZ);
        let m68000 = M68000::new(&mut bus);

        Self { m68000, z80: Z80::new(), bus, cycle_counter: 0, z80_cycle_debt: 0 }
    }

    fn run_z80(&mut self, m68k_cycles: u32) {
        if !self.bus.z80_runnable() {
            self.z80_cycle_debt = 0;
            return;
        }

        self.z80_cycle_debt += m68k_cycles;
        while self.z80_cycle_debt >= 2 {
            let z80_cycles = self.z80.execute_instruction(&mut self.bus);
            self.z80_cycle_debt = self.z80_cycle_debt.saturating_sub(z80_cycles * 2);
        }
    }
}

impl EmulatedSystem for Genesis {
    fn step(&mut self) -> u32 {
        let cycles = self.m68000.execute_instruction(&mut self.bus);
        self.bus.tick_peripherals(cycles);
        self.run_z80(cycles);
        self.cycle_counter += u64::from(cycles);
        cycles
    }

    fn frame_counter(&self) -> u64 {
        self.bus.vdp.frame_counter()
    }

    fn cycle_counter(&self) -> u64 {
        self.cycle_counter
    }

    fn set_input(&mut self, mask: u8) {
        self.bus.controller.set_buttons(mask);
    }

    fn frame_buffer(&self) -> &[u8] {
        self.bus.vdp.frame_buffer()
    }

    fn get_audio_samples(&mut self, out: &mut [i16]) -> usize {
        self.bus.audio.get_audio_samples(out)
    }

    fn read(&mut self, addr: u32) -> u8 {
        self.bus.read_byte(addr)
    }

    fn write(&mut self, addr: u32, value: u8) {
        self.bus.write_byte(addr, value);
    }

    fn get_ram(&self) -> &[u8] {
        self.bus.ram()
    }

    fn save_state(&self) -> Vec<u8> {
        bincode::encode_to_vec(self, retro_common::bincode_config())
            .expect("in-memory save state encoding is infallible")
    }

    fn load_state(&mut self, blob: &[u8]) {
        let render_graphics = self.bus.vdp.render_enabled();
        let render_audio = self.bus.audio.render_enabled();

        let (state, _): (Self, usize) =
            bincode::decode_from_slice(blob, retro_common::bincode_config())
                .expect("save state blob did not match the expected layout");
        *self = state;

        // The runtime render-enable toggles are skipped by the save-state encoding, so they
        // reset to their `Default` values on decode; carry the pre-load settings forward instead.
        self.bus.vdp.set_render_enabled(render_graphics);
        self.bus.audio.set_render_enabled(render_audio);
    }

    fn get_save_data(&self) -> Option<&[u8]> {
        self.bus.cartridge.sram()
    }

    fn load_save_data(&mut self, bytes: &[u8]) {
        self.bus.cartridge.load_sram(bytes);
    }

    fn set_render_graphics(&mut self, enabled: bool) {
        self.bus.vdp.set_render_enabled(enabled);
    }

    fn set_render_audio(&mut self, enabled: bool) {
        self.bus.audio.set_render_enabled(enabled);
    }
}

impl Genesis {
    // Mirrors of the trait methods above so a consumer linking only against this backend doesn't
    // need to `use retro_common::frontend::EmulatedSystem`.
    pub fn step(&mut self) -> u32 {
        EmulatedSystem::step(self)
    }

    pub fn frame(&mut self) {
        EmulatedSystem::frame(self)
    }

    pub fn frame_counter(&self) -> u64 {
        EmulatedSystem::frame_counter(self)
    }

    pub fn cycle_counter(&self) -> u64 {
        EmulatedSystem::cycle_counter(self)
    }

    pub fn set_input(&mut self, mask: u8) {
        EmulatedSystem::set_input(self, mask);
    }

    pub fn frame_buffer(&self) -> &[u8] {
        EmulatedSystem::frame_buffer(self)
    }

    pub fn get_audio_samples(&mut self, out: &mut [i16]) -> usize {
        EmulatedSystem::get_audio_samples(self, out)
    }

    pub fn get_ram(&self) -> &[u8] {
        EmulatedSystem::get_ram(self)
    }

    pub fn save_state(&self) -> Vec<u8> {
        EmulatedSystem::save_state(self)
    }

    pub fn load_state(&mut self, blob: &[u8]) {
        EmulatedSystem::load_state(self, blob);
    }

    pub fn get_save_data(&self) -> Option<&[u8]> {
        EmulatedSystem::get_save_data(self)
    }

    pub fn load_save_data(&mut self, bytes: &[u8]) {
        EmulatedSystem::load_save_data(self, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_rom() -> Vec<u8> {
        vec![0u8; 0x400]
    }

    #[test]
    fn supervisor_bit_and_interrupt_mask_are_set_on_reset() {
        let genesis = Genesis::new(&blank_rom(), None, GenesisConfig::default());
        let registers = genesis.m68000.registers();
        assert_eq!(registers.interrupt_priority_mask, 7);
    }

    #[test]
    fn steps_without_panicking() {
        let mut genesis = Genesis::new(&blank_rom(), None, GenesisConfig::default());
        let cycles = genesis.step();
        assert!(cycles > 0);
    }

    #[test]
    fn save_state_round_trips_cycle_counter() {
        let mut genesis = Genesis::new(&blank_rom(), None, GenesisConfig::default());
        genesis.step();
        let blob = genesis.save_state();

        let mut restored = Genesis::new(&blank_rom(), None, GenesisConfig::default());
        restored.load_state(&blob);
        assert_eq!(restored.cycle_counter(), genesis.cycle_counter());
    }

    #[test]
    fn input_mask_is_reflected_on_the_controller_port() {
        let mut genesis = Genesis::new(&blank_rom(), None, GenesisConfig::default());
        genesis.set_input(0b0000_0001); // Up pressed
        genesis.bus.controller.write_ctrl(0x00);
        genesis.bus.controller.write_data(0x40); // TH high, direction-read phase
        assert_eq!(genesis.bus.controller.read_data() & 0x01, 0);
    }
}
