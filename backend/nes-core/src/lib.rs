//! NES (2A03/2C02) emulation core: a 6502 CPU, scanline PPU, five-channel APU, and cartridge
//! mappers, wired together behind the workspace's uniform [`retro_common::frontend::EmulatedSystem`]
//! contract.

mod apu;
mod cartridge;
mod input;
mod memory;
mod ppu;

mod api;

pub use api::{Nes, NesConfig};
pub use cartridge::NesLoadError;
