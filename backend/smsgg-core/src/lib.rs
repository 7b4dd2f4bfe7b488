//! Sega Master System (Z80 + SN76489 + mode-4 VDP) emulation core, wired together behind the
//! workspace's uniform [`retro_common::frontend::EmulatedSystem`] contract.

mod cartridge;
mod input;
mod memory;
mod psg;
mod vdp;

mod api;

pub use api::{SmsConfig, SmsGg};
