//! Sega Genesis (68000 + Z80 + VDP + PSG/YM2612-stub) emulation core, wired together behind the
//! workspace's uniform [`retro_common::frontend::EmulatedSystem`] contract.

mod audio;
mod cartridge;
mod input;
mod memory;
mod psg;
mod vdp;
mod ym2612;

mod api;

pub use api::{Genesis, GenesisConfig};
