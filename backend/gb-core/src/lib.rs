//! Game Boy (DMG) emulation core: SM83 CPU, scanline PPU, four-channel APU, and cartridge
//! mappers, wired together behind the workspace's uniform [`retro_common::frontend::EmulatedSystem`]
//! contract.

mod apu;
mod cartridge;
mod dma;
mod inputs;
mod memory;
mod ppu;
mod sm83;
mod timer;

mod api;

pub use api::{GameBoy, GbConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GbLoadError {
    #[error("ROM is too short to contain a valid cartridge header")]
    RomTooShort,
    #[error("unsupported cartridge type byte at $0147: {0:02X}")]
    UnsupportedMapper(u8),
    #[error("unsupported cartridge RAM size byte at $0149: {0:02X}")]
    UnsupportedSramSize(u8),
}
