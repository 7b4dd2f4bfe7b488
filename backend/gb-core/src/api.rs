//! Top-level Game Boy emulator: wires the SM83 CPU to the memory bus and exposes the workspace's
//! uniform [`EmulatedSystem`] contract.

use crate::GbLoadError;
use crate::cartridge::Cartridge;
use crate::memory::GbBus;
use crate::sm83::{BusInterface, Sm83};
use bincode::{Decode, Encode};
use retro_common::frontend::EmulatedSystem;

/// Per-instance configuration that the boot sequence and input handling need but that has no
/// natural home on the bus itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct GbConfig {
    pub skip_boot_rom: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct GameBoy {
    cpu: Sm83,
    bus: GbBus,
    cycle_counter: u64,
}

impl GameBoy {
    pub fn new(rom: Vec<u8>, sram: Option<Vec<u8>>, config: GbConfig) -> Result<Self, GbLoadError> {
        let cartridge = Cartridge::load(rom, sram)?;
        let mut cpu = Sm83::new();
        if config.skip_boot_rom {
            cpu.skip_boot();
        }

        Ok(Self { cpu, bus: GbBus::new(cartridge), cycle_counter: 0 })
    }
}

impl EmulatedSystem for GameBoy {
    fn step(&mut self) -> u32 {
        let cycles = self.cpu.execute_instruction(&mut self.bus);
        self.bus.tick_peripherals(cycles);
        self.cycle_counter += u64::from(cycles);
        cycles
    }

    fn frame_counter(&self) -> u64 {
        self.bus.ppu.frame_counter()
    }

    fn cycle_counter(&self) -> u64 {
        self.cycle_counter
    }

    fn set_input(&mut self, mask: u8) {
        self.bus.set_buttons(mask);
    }

    fn frame_buffer(&self) -> &[u8] {
        self.bus.ppu.frame_buffer()
    }

    fn get_audio_samples(&mut self, out: &mut [i16]) -> usize {
        self.bus.apu.get_audio_samples(out)
    }

    fn read(&mut self, addr: u32) -> u8 {
        self.bus.read(addr as u16)
    }

    fn write(&mut self, addr: u32, value: u8) {
        self.bus.write(addr as u16, value);
    }

    fn get_ram(&self) -> &[u8] {
        self.bus.wram()
    }

    fn save_state(&self) -> Vec<u8> {
        bincode::encode_to_vec(self, retro_common::bincode_config())
            .expect("in-memory save state encoding is infallible")
    }

    fn load_state(&mut self, blob: &[u8]) {
        let render_graphics = self.bus.ppu.render_enabled();
        let render_audio = self.bus.apu.render_enabled();

        let (state, _): (Self, usize) =
            bincode::decode_from_slice(blob, retro_common::bincode_config())
                .expect("save state blob did not match the expected layout");
        *self = state;

        // The runtime render-enable toggles are skipped by the save-state encoding, so they
        // reset to their `Default` values on decode; carry the pre-load settings forward instead.
        self.bus.ppu.set_render_enabled(render_graphics);
        self.bus.apu.set_render_enabled(render_audio);
    }

    fn get_save_data(&self) -> Option<&[u8]> {
        let sram = self.bus.cartridge.sram();
        if sram.is_empty() { None } else { Some(sram) }
    }

    fn load_save_data(&mut self, bytes: &[u8]) {
        self.bus.cartridge.load_sram(bytes);
    }

    fn set_render_graphics(&mut self, enabled: bool) {
        self.bus.ppu.set_render_enabled(enabled);
    }

    fn set_render_audio(&mut self, enabled: bool) {
        self.bus.apu.set_render_enabled(enabled);
    }
}

impl GameBoy {
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
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00; // ROM only
        rom[0x0149] = 0x00; // no RAM
        rom
    }

    #[test]
    fn loads_a_rom_only_cartridge_and_steps() {
        let mut gb = GameBoy::new(blank_rom(), None, GbConfig::default()).unwrap();
        let cycles = gb.step();
        assert!(cycles > 0);
    }

    #[test]
    fn save_state_round_trips_cpu_registers() {
        let mut gb = GameBoy::new(blank_rom(), None, GbConfig::default()).unwrap();
        gb.step();
        let blob = gb.save_state();

        let mut restored = GameBoy::new(blank_rom(), None, GbConfig::default()).unwrap();
        restored.load_state(&blob);
        assert_eq!(restored.cycle_counter(), gb.cycle_counter());
    }

    #[test]
    fn load_state_preserves_the_caller_s_render_enable_settings() {
        let mut gb = GameBoy::new(blank_rom(), None, GbConfig::default()).unwrap();
        let blob = gb.save_state();

        gb.set_render_graphics(false);
        gb.set_render_audio(false);
        gb.load_state(&blob);

        assert!(!gb.bus.ppu.render_enabled());
        assert!(!gb.bus.apu.render_enabled());
    }

    #[test]
    fn rejects_unsupported_mapper_byte() {
        let mut rom = blank_rom();
        rom[0x0147] = 0xFF;
        assert!(GameBoy::new(rom, None, GbConfig::default()).is_err());
    }
}
