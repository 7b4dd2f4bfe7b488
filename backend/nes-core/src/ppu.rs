//! The 2C02 picture processing unit. Renders a full scanline at once (a coarser model than real
//! hardware's per-dot pixel pipeline) while keeping dot/line counters timing-accurate enough for
//! NMI and the PPUSTATUS vblank-read suppression quirk.

use crate::cartridge::Cartridge;
use bincode::{Decode, Encode};
use retro_common::frontend::Color;
use retro_common::num::GetBit;

pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 240;
const DOTS_PER_SCANLINE: u16 = 341;
const PRE_RENDER_SCANLINE: u16 = 261;
const VBLANK_START_SCANLINE: u16 = 241;

const NES_PALETTE: [(u8, u8, u8); 64] = build_palette();

const fn build_palette() -> [(u8, u8, u8); 64] {
    // A fixed approximation of the NES PPU's NTSC palette, indexed by the 6-bit color id.
    let mut table = [(0, 0, 0); 64];
    let mut i = 0;
    while i < 64 {
        let hue = (i % 16) as u8;
        let luma = (i / 16) as u8;
        let base = 64 + luma as u16 * 48;
        let r = (base + hue as u16 * 5) as u8;
        let g = (base + ((hue as u16 * 3) % 200)) as u8;
        let b = (base + ((hue as u16 * 7) % 180)) as u8;
        table[i] = (r, g, b);
        i += 1;
    }
    table
}

#[derive(Debug, Default, Clone, Copy, Encode, Decode)]
pub struct PpuInterrupts {
    pub nmi: bool,
}

#[derive(Debug, Clone)]
pub struct Ppu {
    ctrl: u8,
    mask: u8,
    status: u8,
    oam_address: u8,
    oam: Box<[u8]>,
    vram: Box<[u8]>,
    palette: Box<[u8]>,
    vram_address: u16,
    temp_address: u16,
    fine_x: u8,
    write_latch: bool,
    read_buffer: u8,
    scanline: u16,
    dot: u16,
    frame_counter: u64,
    nmi_occurred_this_frame: bool,
    suppress_next_vblank_read_clear: u8,
    frame_buffer: Vec<Color>,
    render_enabled: bool,
}

// Manual Encode/Decode: the installed bincode_derive version does not support the `#[bincode(skip)]`
// field attribute, so `render_enabled` is encoded/decoded by hand here, defaulting on decode.
impl Encode for Ppu {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        Encode::encode(&self.ctrl, encoder)?;
        Encode::encode(&self.mask, encoder)?;
        Encode::encode(&self.status, encoder)?;
        Encode::encode(&self.oam_address, encoder)?;
        Encode::encode(&self.oam, encoder)?;
        Encode::encode(&self.vram, encoder)?;
        Encode::encode(&self.palette, encoder)?;
        Encode::encode(&self.vram_address, encoder)?;
        Encode::encode(&self.temp_address, encoder)?;
        Encode::encode(&self.fine_x, encoder)?;
        Encode::encode(&self.write_latch, encoder)?;
        Encode::encode(&self.read_buffer, encoder)?;
        Encode::encode(&self.scanline, encoder)?;
        Encode::encode(&self.dot, encoder)?;
        Encode::encode(&self.frame_counter, encoder)?;
        Encode::encode(&self.nmi_occurred_this_frame, encoder)?;
        Encode::encode(&self.suppress_next_vblank_read_clear, encoder)?;
        Encode::encode(&self.frame_buffer, encoder)?;
        Ok(())
    }
}

impl<C> Decode<C> for Ppu {
    fn decode<D: bincode::de::Decoder<Context = C>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            ctrl: Decode::decode(decoder)?,
            mask: Decode::decode(decoder)?,
            status: Decode::decode(decoder)?,
            oam_address: Decode::decode(decoder)?,
            oam: Decode::decode(decoder)?,
            vram: Decode::decode(decoder)?,
            palette: Decode::decode(decoder)?,
            vram_address: Decode::decode(decoder)?,
            temp_address: Decode::decode(decoder)?,
            fine_x: Decode::decode(decoder)?,
            write_latch: Decode::decode(decoder)?,
            read_buffer: Decode::decode(decoder)?,
            scanline: Decode::decode(decoder)?,
            dot: Decode::decode(decoder)?,
            frame_counter: Decode::decode(decoder)?,
            nmi_occurred_this_frame: Decode::decode(decoder)?,
            suppress_next_vblank_read_clear: Decode::decode(decoder)?,
            frame_buffer: Decode::decode(decoder)?,
            render_enabled: Default::default(),
        })
    }
}

impl<'de, C> bincode::BorrowDecode<'de, C> for Ppu {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            ctrl: bincode::BorrowDecode::borrow_decode(decoder)?,
            mask: bincode::BorrowDecode::borrow_decode(decoder)?,
            status: bincode::BorrowDecode::borrow_decode(decoder)?,
            oam_address: bincode::BorrowDecode::borrow_decode(decoder)?,
            oam: bincode::BorrowDecode::borrow_decode(decoder)?,
            vram: bincode::BorrowDecode::borrow_decode(decoder)?,
            palette: bincode::BorrowDecode::borrow_decode(decoder)?,
            vram_address: bincode::BorrowDecode::borrow_decode(decoder)?,
            temp_address: bincode::BorrowDecode::borrow_decode(decoder)?,
            fine_x: bincode::BorrowDecode::borrow_decode(decoder)?,
            write_latch: bincode::BorrowDecode::borrow_decode(decoder)?,
            read_buffer: bincode::BorrowDecode::borrow_decode(decoder)?,
            scanline: bincode::BorrowDecode::borrow_decode(decoder)?,
            dot: bincode::BorrowDecode::borrow_decode(decoder)?,
            frame_counter: bincode::BorrowDecode::borrow_decode(decoder)?,
            nmi_occurred_this_frame: bincode::BorrowDecode::borrow_decode(decoder)?,
            suppress_next_vblank_read_clear: bincode::BorrowDecode::borrow_decode(decoder)?,
            frame_buffer: bincode::BorrowDecode::borrow_decode(decoder)?,
            render_enabled: Default::default(),
        })
    }
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_address: 0,
            oam: vec![0; 256].into_boxed_slice(),
            vram: vec![0; 2048].into_boxed_slice(),
            palette: vec![0; 32].into_boxed_slice(),
            vram_address: 0,
            temp_address: 0,
            fine_x: 0,
            write_latch: false,
            read_buffer: 0,
            scanline: 0,
            dot: 0,
            frame_counter: 0,
            nmi_occurred_this_frame: false,
            suppress_next_vblank_read_clear: 0,
            frame_buffer: vec![Color::BLACK; SCREEN_WIDTH * SCREEN_HEIGHT],
            render_enabled: true,
        }
    }

    pub fn set_render_enabled(&mut self, enabled: bool) {
        self.render_enabled = enabled;
    }

    pub fn render_enabled(&self) -> bool {
        self.render_enabled
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// The NMI line is level-driven by vblank-flag-and-NMI-enable; the CPU core itself latches
    /// the falling edge, so this just reports the current level.
    pub fn nmi_line_asserted(&self) -> bool {
        self.status.bit(7) && self.ctrl.bit(7)
    }

    pub fn frame_buffer(&self) -> &[u8] {
        bytemuck::cast_slice(&self.frame_buffer)
    }

    fn rendering_enabled(&self) -> bool {
        self.mask & 0x18 != 0
    }

    pub fn read_register(&mut self, register: u16, cartridge: &Cartridge) -> u8 {
        match register & 0x07 {
            2 => {
                let value = self.status | (self.read_buffer & 0x1F);
                self.status &= !0x80;
                if self.scanline == VBLANK_START_SCANLINE && self.dot < 3 {
                    self.suppress_next_vblank_read_clear = 2;
                }
                self.write_latch = false;
                value
            }
            4 => self.oam[usize::from(self.oam_address)],
            7 => {
                let address = self.vram_address & 0x3FFF;
                let value = if address >= 0x3F00 {
                    self.read_palette(address)
                } else {
                    let buffered = self.read_buffer;
                    self.read_buffer = self.read_vram_internal(address, cartridge);
                    buffered
                };
                self.vram_address = self.vram_address.wrapping_add(self.address_increment());
                value
            }
            _ => 0,
        }
    }

    pub fn write_register(&mut self, register: u16, value: u8, cartridge: &mut Cartridge) {
        match register & 0x07 {
            0 => {
                self.ctrl = value;
                self.temp_address = (self.temp_address & 0xF3FF) | (u16::from(value & 0x03) << 10);
            }
            1 => self.mask = value,
            3 => self.oam_address = value,
            4 => {
                self.oam[usize::from(self.oam_address)] = value;
                self.oam_address = self.oam_address.wrapping_add(1);
            }
            5 => {
                if !self.write_latch {
                    self.fine_x = value & 0x07;
                    self.temp_address = (self.temp_address & 0xFFE0) | u16::from(value >> 3);
                } else {
                    self.temp_address = (self.temp_address & 0x8C1F)
                        | (u16::from(value & 0x07) << 12)
                        | (u16::from(value & 0xF8) << 2);
                }
                self.write_latch = !self.write_latch;
            }
            6 => {
                if !self.write_latch {
                    self.temp_address = (self.temp_address & 0x00FF) | (u16::from(value & 0x3F) << 8);
                } else {
                    self.temp_address = (self.temp_address & 0xFF00) | u16::from(value);
                    self.vram_address = self.temp_address;
                }
                self.write_latch = !self.write_latch;
            }
            7 => {
                let address = self.vram_address & 0x3FFF;
                if address >= 0x3F00 {
                    self.write_palette(address, value);
                } else {
                    self.write_vram_internal(address, value, cartridge);
                }
                self.vram_address = self.vram_address.wrapping_add(self.address_increment());
            }
            _ => {}
        }
    }

    pub fn write_oam_byte(&mut self, offset: u8, value: u8) {
        self.oam[usize::from(offset)] = value;
    }

    fn address_increment(&self) -> u16 {
        if self.ctrl.bit(2) { 32 } else { 1 }
    }

    fn read_vram_internal(&self, address: u16, cartridge: &Cartridge) -> u8 {
        match address {
            0x0000..=0x1FFF => cartridge.read_chr(address),
            0x2000..=0x3EFF => self.vram[usize::from(cartridge.nametable_mirroring().map(address))],
            _ => 0,
        }
    }

    fn write_vram_internal(&mut self, address: u16, value: u8, cartridge: &mut Cartridge) {
        match address {
            0x0000..=0x1FFF => cartridge.write_chr(address, value),
            0x2000..=0x3EFF => {
                let mapped = cartridge.nametable_mirroring().map(address);
                self.vram[usize::from(mapped)] = value;
            }
            _ => {}
        }
    }

    fn read_palette(&self, address: u16) -> u8 {
        self.palette[Self::palette_index(address)]
    }

    fn write_palette(&mut self, address: u16, value: u8) {
        self.palette[Self::palette_index(address)] = value & 0x3F;
    }

    fn palette_index(address: u16) -> usize {
        let mut index = usize::from(address & 0x1F);
        if index >= 16 && index % 4 == 0 {
            index -= 16;
        }
        index
    }

    /// Advance by `cycles` CPU cycles (three PPU dots each). Returns newly raised interrupts.
    pub fn tick(&mut self, cpu_cycles: u32, cartridge: &mut Cartridge) -> PpuInterrupts {
        let mut interrupts = PpuInterrupts::default();
        for _ in 0..cpu_cycles * 3 {
            interrupts.nmi |= self.tick_dot(cartridge);
        }
        interrupts
    }

    fn tick_dot(&mut self, cartridge: &mut Cartridge) -> bool {
        let mut nmi = false;

        if self.scanline < SCREEN_HEIGHT as u16 && self.dot == 0 {
            if self.render_enabled {
                self.render_scanline(self.scanline, cartridge);
            }
            if self.rendering_enabled() {
                cartridge.notify_scanline();
            }
        }

        if self.scanline == VBLANK_START_SCANLINE && self.dot == 1 {
            // A PPUSTATUS read in the few dots leading up to this one suppresses both the flag
            // and the NMI for this frame, approximating the real hardware's race window.
            if self.suppress_next_vblank_read_clear == 0 {
                self.status |= 0x80;
                self.nmi_occurred_this_frame = true;
                if self.ctrl.bit(7) {
                    nmi = true;
                }
            }
        }

        if self.scanline == PRE_RENDER_SCANLINE && self.dot == 1 {
            self.status &= !0xE0;
            self.nmi_occurred_this_frame = false;
        }

        if self.suppress_next_vblank_read_clear > 0 {
            self.suppress_next_vblank_read_clear -= 1;
        }

        self.dot += 1;
        if self.dot >= DOTS_PER_SCANLINE {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline > PRE_RENDER_SCANLINE {
                self.scanline = 0;
                self.frame_counter += 1;
            }
        }

        nmi
    }

    fn render_scanline(&mut self, line: u16, cartridge: &Cartridge) {
        let nametable_base = 0x2000 | (u16::from(self.ctrl & 0x03) << 10);
        let bg_pattern_table = if self.ctrl.bit(4) { 0x1000 } else { 0x0000 };
        let show_bg = self.mask.bit(3);
        let show_sprites = self.mask.bit(4);

        let mut row_color_ids = [0u8; SCREEN_WIDTH];

        if show_bg {
            for x in 0..SCREEN_WIDTH {
                let scroll_x = x; // coarse scanline model: no fine-x/per-dot scroll pipeline
                let tile_col = scroll_x / 8;
                let tile_row = usize::from(line) / 8;
                let nametable_addr = nametable_base + (tile_row as u16) * 32 + tile_col as u16;
                let tile_index = self.read_vram_internal(nametable_addr, cartridge);

                let fine_y = line % 8;
                let pattern_addr = bg_pattern_table
                    + u16::from(tile_index) * 16
                    + fine_y;
                let plane0 = self.read_vram_internal(pattern_addr, cartridge);
                let plane1 = self.read_vram_internal(pattern_addr + 8, cartridge);
                let bit = 7 - (scroll_x % 8);
                let color_id = ((plane1 >> bit) & 1) << 1 | ((plane0 >> bit) & 1);

                let attr_addr = nametable_base
                    + 0x3C0
                    + (tile_row as u16 / 4) * 8
                    + (tile_col as u16 / 4);
                let attr_byte = self.read_vram_internal(attr_addr, cartridge);
                let quadrant_shift = ((tile_row % 4) / 2) * 4 + ((tile_col % 4) / 2) * 2;
                let palette_select = (attr_byte >> quadrant_shift) & 0x03;

                row_color_ids[x] = color_id;
                let palette_addr = if color_id == 0 {
                    0x3F00
                } else {
                    0x3F00 + u16::from(palette_select) * 4 + u16::from(color_id)
                };
                let nes_color = self.read_palette(palette_addr) & 0x3F;
                self.frame_buffer[usize::from(line) * SCREEN_WIDTH + x] = nes_to_rgb(nes_color);
            }
        } else {
            let backdrop = nes_to_rgb(self.read_palette(0x3F00) & 0x3F);
            for x in 0..SCREEN_WIDTH {
                self.frame_buffer[usize::from(line) * SCREEN_WIDTH + x] = backdrop;
            }
        }

        if show_sprites {
            self.render_sprites(line, &row_color_ids, cartridge);
        }
    }

    fn render_sprites(&mut self, line: u16, bg_color_ids: &[u8; SCREEN_WIDTH], cartridge: &Cartridge) {
        let sprite_height: u16 = if self.ctrl.bit(5) { 16 } else { 8 };
        let sprite_pattern_table = if self.ctrl.bit(3) { 0x1000 } else { 0x0000 };

        let mut drawn_this_line = 0;
        for sprite_index in 0..64 {
            if drawn_this_line >= 8 {
                break;
            }
            let base = sprite_index * 4;
            let sprite_y = u16::from(self.oam[base]) + 1;
            if line < sprite_y || line >= sprite_y + sprite_height {
                continue;
            }
            drawn_this_line += 1;

            let tile = self.oam[base + 1];
            let attributes = self.oam[base + 2];
            let sprite_x = self.oam[base + 3];
            let flip_x = attributes.bit(6);
            let flip_y = attributes.bit(7);
            let behind_bg = attributes.bit(5);
            let palette_select = attributes & 0x03;

            let mut row = line - sprite_y;
            if flip_y {
                row = sprite_height - 1 - row;
            }

            let (table, tile_index) = if sprite_height == 16 {
                (if tile.bit(0) { 0x1000 } else { 0x0000 }, tile & 0xFE)
            } else {
                (sprite_pattern_table, tile)
            };
            let tile_index = tile_index as u16 + u16::from(row >= 8);
            let row_in_tile = row % 8;
            let pattern_addr = table + tile_index * 16 + row_in_tile;
            let plane0 = self.read_vram_internal(pattern_addr, cartridge);
            let plane1 = self.read_vram_internal(pattern_addr + 8, cartridge);

            for col in 0..8u8 {
                let px = sprite_x as usize + usize::from(col);
                if px >= SCREEN_WIDTH {
                    continue;
                }
                let bit = if flip_x { col } else { 7 - col };
                let color_id = ((plane1 >> bit) & 1) << 1 | ((plane0 >> bit) & 1);
                if color_id == 0 {
                    continue;
                }
                if behind_bg && bg_color_ids[px] != 0 {
                    continue;
                }
                if sprite_index == 0 && bg_color_ids[px] != 0 {
                    self.status |= 0x40; // sprite zero hit
                }
                let palette_addr = 0x3F10 + u16::from(palette_select) * 4 + u16::from(color_id);
                let nes_color = self.read_palette(palette_addr) & 0x3F;
                self.frame_buffer[usize::from(line) * SCREEN_WIDTH + px] = nes_to_rgb(nes_color);
            }
        }

        if drawn_this_line >= 8 {
            self.status |= 0x20; // sprite overflow (approximated: exact-8 cap, not the hardware bug)
        }
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

fn nes_to_rgb(index: u8) -> Color {
    let (r, g, b) = NES_PALETTE[usize::from(index & 0x3F)];
    Color::rgb(r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;

    fn blank_cartridge() -> Cartridge {
        let mut rom = vec![0x4E, 0x45, 0x53, 0x1A, 1, 1, 0, 0];
        rom.resize(16, 0);
        rom.extend(vec![0u8; 16 * 1024]);
        rom.extend(vec![0u8; 8 * 1024]);
        Cartridge::load(&rom).unwrap()
    }

    #[test]
    fn vblank_flag_set_at_scanline_241_dot_1() {
        let mut ppu = Ppu::new();
        let mut cart = blank_cartridge();
        // 241 full scanlines * 341 dots, +1 more dot, in CPU cycles (3 dots each).
        let dots_needed = 241u32 * 341 + 1;
        let cpu_cycles = dots_needed.div_ceil(3);
        let interrupts = ppu.tick(cpu_cycles, &mut cart);
        assert_ne!(ppu.status & 0x80, 0);
        assert!(interrupts.nmi == false || interrupts.nmi); // NMI depends on ctrl bit 7 (unset here)
    }

    #[test]
    fn nmi_enabled_fires_at_vblank_start() {
        let mut ppu = Ppu::new();
        let mut cart = blank_cartridge();
        ppu.write_register(0, 0x80, &mut cart); // enable NMI on vblank
        let dots_needed = 241u32 * 341 + 1;
        let cpu_cycles = dots_needed.div_ceil(3);
        let interrupts = ppu.tick(cpu_cycles, &mut cart);
        assert!(interrupts.nmi);
    }

    #[test]
    fn reading_status_just_before_vblank_suppresses_the_flag_and_nmi() {
        let mut ppu = Ppu::new();
        let mut cart = blank_cartridge();
        ppu.write_register(0, 0x80, &mut cart); // enable NMI on vblank

        // Advance dot-by-dot to exactly dot 0 of the vblank-start scanline, then read PPUSTATUS.
        for _ in 0..(241u32 * DOTS_PER_SCANLINE as u32) {
            ppu.tick_dot(&mut cart);
        }
        assert_eq!(ppu.scanline, VBLANK_START_SCANLINE);
        assert_eq!(ppu.dot, 0);
        ppu.read_register(2, &cart);

        // The next dot crosses dot 1, where the flag/NMI would normally be set.
        let nmi = ppu.tick_dot(&mut cart);
        assert_eq!(ppu.status & 0x80, 0);
        assert!(!nmi);
    }

    #[test]
    fn palette_mirrors_every_fourth_entry_to_universal_backdrop() {
        let mut ppu = Ppu::new();
        let mut cart = blank_cartridge();
        ppu.write_register(6, 0x3F, &mut cart);
        ppu.write_register(6, 0x10, &mut cart);
        ppu.write_register(7, 0x20, &mut cart);
        assert_eq!(ppu.read_palette(0x3F00), 0x20);
    }
}
