//! The uniform observation/control contract that every backend (`gb-core`, `nes-core`,
//! `smsgg-core`, `genesis-core`) implements, plus the pixel/color types the renderers share.

use bincode::{Decode, Encode};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable, Encode, Decode)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Implemented by every system's top-level emulator struct. Mirrors the headless library
/// contract: frame-granular stepping, raw byte-address observation, and explicit save-state /
/// save-RAM boundaries with no core-initiated I/O.
///
/// Backends also expose every one of these as an inherent method (so a consumer linking against
/// a single backend doesn't need to import this trait), but the trait lets harness code - CPU
/// conformance tests, RL step loops - stay generic over all four systems.
pub trait EmulatedSystem {
    /// Execute a single CPU instruction. Returns the number of CPU cycles it consumed, which is
    /// always strictly positive.
    fn step(&mut self) -> u32;

    /// Run until the video frame counter advances by exactly one frame.
    fn frame(&mut self) {
        let start = self.frame_counter();
        while self.frame_counter() == start {
            self.step();
        }
    }

    /// Monotonic count of completed video frames since the system was created.
    fn frame_counter(&self) -> u64;

    /// Running total of CPU cycles executed since the system was created.
    fn cycle_counter(&self) -> u64;

    /// Overwrite the controller input mask. Bit layout is documented per-backend.
    fn set_input(&mut self, mask: u8);

    /// Borrow the most recently rendered frame buffer. Layout (bytes-per-pixel, dimensions) is
    /// documented per-backend.
    fn frame_buffer(&self) -> &[u8];

    /// Drain up to `out.len() / 2` interleaved stereo i16 samples from the internal ring buffer,
    /// returning the number of stereo frames written.
    fn get_audio_samples(&mut self, out: &mut [i16]) -> usize;

    /// Read a byte from CPU address space, exactly as the CPU would observe it.
    fn read(&mut self, addr: u32) -> u8;

    /// Write a byte to CPU address space, exactly as the CPU would perform it.
    fn write(&mut self, addr: u32, value: u8);

    /// Borrow the system's internal working RAM in bulk.
    fn get_ram(&self) -> &[u8];

    /// Serialize the full deterministic system state to a byte blob.
    fn save_state(&self) -> Vec<u8>;

    /// Restore a state blob produced by `save_state` on a build with the same layout.
    fn load_state(&mut self, blob: &[u8]);

    /// Borrow the persistent battery-backed save RAM, if the loaded cartridge has any.
    fn get_save_data(&self) -> Option<&[u8]>;

    /// Overwrite persistent battery-backed save RAM from a previously exported blob.
    fn load_save_data(&mut self, bytes: &[u8]);

    /// Headless toggle: when disabled, the video tick still advances counters and raises
    /// interrupts but skips pixel generation.
    fn set_render_graphics(&mut self, enabled: bool);

    /// Headless toggle: when disabled, the audio tick still advances channel timers but skips
    /// sample generation.
    fn set_render_audio(&mut self, enabled: bool);
}
