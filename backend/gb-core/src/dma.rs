//! OAM DMA: writing $FF46 triggers a 160-byte copy from `value * 0x100` into OAM.
//!
//! Real hardware takes 160 M-cycles to perform the transfer, during which the CPU can only
//! access HRAM; this core performs the copy instantaneously on the triggering write and does not
//! model that CPU-side restriction, a simplification noted alongside the other timing
//! approximations in this crate.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct OamDma {
    pub source_page: u8,
}

impl OamDma {
    pub fn new() -> Self {
        Self::default()
    }
}
