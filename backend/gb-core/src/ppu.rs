//! Picture Processing Unit.
//!
//! Renders a full scanline at a time when the PPU enters mode 3, rather than emulating the real
//! pixel FIFO fetcher cycle-by-cycle. This loses pixel-level mid-scanline register writes
//! (`rendering glitch` effects some demos rely on) but matches every other timing boundary real
//! software depends on: mode lengths, STAT/LYC interrupts, and VBlank timing.

use bincode::{Decode, Encode};
use retro_common::num::GetBit;
use std::array;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

const DOTS_PER_LINE: u32 = 456;
const OAM_SCAN_DOTS: u32 = 80;
const DRAWING_DOTS: u32 = OAM_SCAN_DOTS + 172;
const LINES_PER_FRAME: u8 = 154;
const VBLANK_START_LINE: u8 = 144;

const TILE_MAP_AREA_0: u16 = 0x1800;
const TILE_MAP_AREA_1: u16 = 0x1C00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum PpuMode {
    HBlank,
    VBlank,
    OamScan,
    Drawing,
}

impl PpuMode {
    fn to_bits(self) -> u8 {
        match self {
            Self::HBlank => 0,
            Self::VBlank => 1,
            Self::OamScan => 2,
            Self::Drawing => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum TileDataArea {
    #[default]
    Signed,
    Unsigned,
}

impl TileDataArea {
    fn tile_address(self, tile_number: u8) -> u16 {
        match self {
            Self::Signed => 0x1000_u16.wrapping_add((tile_number as i8 as u16) << 4),
            Self::Unsigned => u16::from(tile_number) << 4,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct Registers {
    ppu_enabled: bool,
    bg_enabled: bool,
    window_enabled: bool,
    sprites_enabled: bool,
    bg_tile_map_addr: u16,
    window_tile_map_addr: u16,
    bg_tile_data_area: TileDataArea,
    double_height_sprites: bool,
    lyc_interrupt_enabled: bool,
    mode_2_interrupt_enabled: bool,
    mode_1_interrupt_enabled: bool,
    mode_0_interrupt_enabled: bool,
    ly_compare: u8,
    scx: u8,
    scy: u8,
    window_x: u8,
    window_y: u8,
    bg_palette: [u8; 4],
    sprite_palettes: [[u8; 4]; 2],
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            ppu_enabled: true,
            bg_enabled: true,
            window_enabled: false,
            sprites_enabled: false,
            bg_tile_map_addr: TILE_MAP_AREA_0,
            window_tile_map_addr: TILE_MAP_AREA_0,
            bg_tile_data_area: TileDataArea::Unsigned,
            double_height_sprites: false,
            lyc_interrupt_enabled: false,
            mode_2_interrupt_enabled: false,
            mode_1_interrupt_enabled: false,
            mode_0_interrupt_enabled: false,
            ly_compare: 0,
            scx: 0,
            scy: 0,
            window_x: 0,
            window_y: 0,
            bg_palette: [0, 3, 3, 3],
            sprite_palettes: [[0; 4]; 2],
        }
    }
}

impl Registers {
    fn write_lcdc(&mut self, value: u8) {
        self.ppu_enabled = value.bit(7);
        self.window_tile_map_addr = if value.bit(6) { TILE_MAP_AREA_1 } else { TILE_MAP_AREA_0 };
        self.window_enabled = value.bit(5);
        self.bg_tile_data_area =
            if value.bit(4) { TileDataArea::Unsigned } else { TileDataArea::Signed };
        self.bg_tile_map_addr = if value.bit(3) { TILE_MAP_AREA_1 } else { TILE_MAP_AREA_0 };
        self.double_height_sprites = value.bit(2);
        self.sprites_enabled = value.bit(1);
        self.bg_enabled = value.bit(0);
    }

    fn read_lcdc(&self) -> u8 {
        (u8::from(self.ppu_enabled) << 7)
            | (u8::from(self.window_tile_map_addr == TILE_MAP_AREA_1) << 6)
            | (u8::from(self.window_enabled) << 5)
            | (u8::from(self.bg_tile_data_area == TileDataArea::Unsigned) << 4)
            | (u8::from(self.bg_tile_map_addr == TILE_MAP_AREA_1) << 3)
            | (u8::from(self.double_height_sprites) << 2)
            | (u8::from(self.sprites_enabled) << 1)
            | u8::from(self.bg_enabled)
    }

    fn write_stat(&mut self, value: u8) {
        self.lyc_interrupt_enabled = value.bit(6);
        self.mode_2_interrupt_enabled = value.bit(5);
        self.mode_1_interrupt_enabled = value.bit(4);
        self.mode_0_interrupt_enabled = value.bit(3);
    }

    fn read_stat(&self, line: u8, mode: PpuMode) -> u8 {
        0x80 | (u8::from(self.lyc_interrupt_enabled) << 6)
            | (u8::from(self.mode_2_interrupt_enabled) << 5)
            | (u8::from(self.mode_1_interrupt_enabled) << 4)
            | (u8::from(self.mode_0_interrupt_enabled) << 3)
            | (u8::from(line == self.ly_compare) << 2)
            | mode.to_bits()
    }

    fn stat_interrupt_sources_active(&self, line: u8, mode: PpuMode) -> bool {
        (self.lyc_interrupt_enabled && line == self.ly_compare)
            || (self.mode_0_interrupt_enabled && mode == PpuMode::HBlank)
            || (self.mode_1_interrupt_enabled && mode == PpuMode::VBlank)
            || (self.mode_2_interrupt_enabled && mode == PpuMode::OamScan)
    }
}

fn parse_palette(value: u8) -> [u8; 4] {
    array::from_fn(|i| (value >> (2 * i)) & 0x3)
}

fn encode_palette(palette: [u8; 4]) -> u8 {
    palette.iter().enumerate().fold(0, |acc, (i, &shade)| acc | (shade << (2 * i)))
}

#[derive(Debug, Clone, Copy)]
struct Sprite {
    y: u8,
    x: u8,
    tile: u8,
    palette: u8,
    priority_behind_bg: bool,
    flip_x: bool,
    flip_y: bool,
}

#[derive(Debug, Clone)]
pub struct Ppu {
    registers: Registers,
    vram: Box<[u8]>,
    oam: Box<[u8]>,
    line: u8,
    dot: u32,
    mode: PpuMode,
    stat_line_was_high: bool,
    frame_buffer: Vec<u8>,
    frame_counter: u64,
    render_enabled: bool,
}

// Manual Encode/Decode: the installed bincode_derive version does not support the `#[bincode(skip)]`
// field attribute, so `render_enabled` is encoded/decoded by hand here, defaulting on decode.
impl Encode for Ppu {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        Encode::encode(&self.registers, encoder)?;
        Encode::encode(&self.vram, encoder)?;
        Encode::encode(&self.oam, encoder)?;
        Encode::encode(&self.line, encoder)?;
        Encode::encode(&self.dot, encoder)?;
        Encode::encode(&self.mode, encoder)?;
        Encode::encode(&self.stat_line_was_high, encoder)?;
        Encode::encode(&self.frame_buffer, encoder)?;
        Encode::encode(&self.frame_counter, encoder)?;
        Ok(())
    }
}

impl<C> Decode<C> for Ppu {
    fn decode<D: bincode::de::Decoder<Context = C>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            registers: Decode::decode(decoder)?,
            vram: Decode::decode(decoder)?,
            oam: Decode::decode(decoder)?,
            line: Decode::decode(decoder)?,
            dot: Decode::decode(decoder)?,
            mode: Decode::decode(decoder)?,
            stat_line_was_high: Decode::decode(decoder)?,
            frame_buffer: Decode::decode(decoder)?,
            frame_counter: Decode::decode(decoder)?,
            render_enabled: Default::default(),
        })
    }
}

impl<'de, C> bincode::BorrowDecode<'de, C> for Ppu {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            registers: bincode::BorrowDecode::borrow_decode(decoder)?,
            vram: bincode::BorrowDecode::borrow_decode(decoder)?,
            oam: bincode::BorrowDecode::borrow_decode(decoder)?,
            line: bincode::BorrowDecode::borrow_decode(decoder)?,
            dot: bincode::BorrowDecode::borrow_decode(decoder)?,
            mode: bincode::BorrowDecode::borrow_decode(decoder)?,
            stat_line_was_high: bincode::BorrowDecode::borrow_decode(decoder)?,
            frame_buffer: bincode::BorrowDecode::borrow_decode(decoder)?,
            frame_counter: bincode::BorrowDecode::borrow_decode(decoder)?,
            render_enabled: Default::default(),
        })
    }
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            registers: Registers::default(),
            vram: vec![0; 0x2000].into_boxed_slice(),
            oam: vec![0; 0xA0].into_boxed_slice(),
            line: 0,
            dot: 0,
            mode: PpuMode::OamScan,
            stat_line_was_high: false,
            frame_buffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            frame_counter: 0,
            render_enabled: true,
        }
    }

    pub fn set_render_enabled(&mut self, enabled: bool) {
        self.render_enabled = enabled;
    }

    pub fn render_enabled(&self) -> bool {
        self.render_enabled
    }

    pub fn read_vram(&self, address: u16) -> u8 {
        self.vram[usize::from(address & 0x1FFF)]
    }

    pub fn write_vram(&mut self, address: u16, value: u8) {
        self.vram[usize::from(address & 0x1FFF)] = value;
    }

    pub fn read_oam(&self, address: u16) -> u8 {
        self.oam.get(usize::from(address) & 0xFF).copied().unwrap_or(0xFF)
    }

    pub fn write_oam(&mut self, address: u16, value: u8) {
        if let Some(slot) = self.oam.get_mut(usize::from(address) & 0xFF) {
            *slot = value;
        }
    }

    pub fn write_oam_byte(&mut self, index: u8, value: u8) {
        self.oam[usize::from(index)] = value;
    }

    pub fn read_register(&self, address: u16) -> u8 {
        match address {
            0xFF40 => self.registers.read_lcdc(),
            0xFF41 => self.registers.read_stat(self.line, self.mode),
            0xFF42 => self.registers.scy,
            0xFF43 => self.registers.scx,
            0xFF44 => self.line,
            0xFF45 => self.registers.ly_compare,
            0xFF47 => encode_palette(self.registers.bg_palette),
            0xFF48 => encode_palette(self.registers.sprite_palettes[0]),
            0xFF49 => encode_palette(self.registers.sprite_palettes[1]),
            0xFF4A => self.registers.window_y,
            0xFF4B => self.registers.window_x,
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, address: u16, value: u8) {
        match address {
            0xFF40 => self.registers.write_lcdc(value),
            0xFF41 => self.registers.write_stat(value),
            0xFF42 => self.registers.scy = value,
            0xFF43 => self.registers.scx = value,
            0xFF45 => self.registers.ly_compare = value,
            0xFF47 => self.registers.bg_palette = parse_palette(value),
            0xFF48 => self.registers.sprite_palettes[0] = parse_palette(value),
            0xFF49 => self.registers.sprite_palettes[1] = parse_palette(value),
            0xFF4A => self.registers.window_y = value,
            0xFF4B => self.registers.window_x = value,
            _ => {}
        }
    }

    pub fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Advances the PPU by `cycles` T-cycles. Returns which interrupts newly became pending.
    pub fn tick(&mut self, cycles: u32) -> PpuInterrupts {
        let mut interrupts = PpuInterrupts::default();
        if !self.registers.ppu_enabled {
            return interrupts;
        }

        for _ in 0..cycles {
            self.dot += 1;

            let new_mode = if self.line >= VBLANK_START_LINE {
                PpuMode::VBlank
            } else if self.dot <= OAM_SCAN_DOTS {
                PpuMode::OamScan
            } else if self.dot <= DRAWING_DOTS {
                PpuMode::Drawing
            } else {
                PpuMode::HBlank
            };

            if new_mode == PpuMode::Drawing && self.mode != PpuMode::Drawing && self.render_enabled {
                self.render_scanline();
            }
            self.mode = new_mode;

            if self.dot >= DOTS_PER_LINE {
                self.dot = 0;
                let entering_vblank = self.line + 1 == VBLANK_START_LINE;
                self.line = (self.line + 1) % LINES_PER_FRAME;
                if self.line == 0 {
                    self.frame_counter += 1;
                }
                if entering_vblank {
                    interrupts.vblank = true;
                    self.mode = PpuMode::VBlank;
                } else if self.line < VBLANK_START_LINE {
                    self.mode = PpuMode::OamScan;
                }
            }

            let stat_line_high = self.registers.stat_interrupt_sources_active(self.line, self.mode);
            if stat_line_high && !self.stat_line_was_high {
                interrupts.stat = true;
            }
            self.stat_line_was_high = stat_line_high;
        }

        interrupts
    }

    fn render_scanline(&mut self) {
        let line = self.line;
        if line as usize >= SCREEN_HEIGHT {
            return;
        }

        let mut bg_color_ids = [0u8; SCREEN_WIDTH];

        if self.registers.bg_enabled {
            let y = line.wrapping_add(self.registers.scy);
            for x in 0..SCREEN_WIDTH as u8 {
                let screen_x = u16::from(x);
                let in_window = self.registers.window_enabled
                    && line >= self.registers.window_y
                    && screen_x + 7 >= u16::from(self.registers.window_x);

                let (map_addr, tile_x, tile_y) = if in_window {
                    let wx = (screen_x + 7).wrapping_sub(u16::from(self.registers.window_x));
                    let wy = line.wrapping_sub(self.registers.window_y);
                    (self.registers.window_tile_map_addr, wx as u8, wy)
                } else {
                    let bx = x.wrapping_add(self.registers.scx);
                    (self.registers.bg_tile_map_addr, bx, y)
                };

                let color_id = self.tile_pixel(map_addr, tile_x, tile_y);
                bg_color_ids[x as usize] = color_id;
                let shade = self.registers.bg_palette[color_id as usize];
                self.frame_buffer[line as usize * SCREEN_WIDTH + x as usize] = shade;
            }
        } else {
            let blank_row = &mut self.frame_buffer
                [line as usize * SCREEN_WIDTH..(line as usize + 1) * SCREEN_WIDTH];
            blank_row.fill(0);
        }

        if self.registers.sprites_enabled {
            self.render_sprites(line, &bg_color_ids);
        }
    }

    fn tile_pixel(&self, map_addr: u16, tile_x: u8, tile_y: u8) -> u8 {
        let map_index = u16::from(tile_y / 8) * 32 + u16::from(tile_x / 8);
        let tile_number = self.vram[usize::from(map_addr + map_index)];
        let tile_addr = self.registers.bg_tile_data_area.tile_address(tile_number);

        let row_in_tile = tile_y % 8;
        let low = self.vram[usize::from(tile_addr + u16::from(row_in_tile) * 2)];
        let high = self.vram[usize::from(tile_addr + u16::from(row_in_tile) * 2 + 1)];

        let bit = 7 - (tile_x % 8);
        (u8::from(high.bit(bit)) << 1) | u8::from(low.bit(bit))
    }

    fn sprite_tile_pixel(&self, tile_number: u8, row_in_tile: u8, col_in_tile: u8) -> u8 {
        let tile_addr = u16::from(tile_number) << 4;
        let low = self.vram[usize::from(tile_addr + u16::from(row_in_tile) * 2)];
        let high = self.vram[usize::from(tile_addr + u16::from(row_in_tile) * 2 + 1)];
        let bit = 7 - col_in_tile;
        (u8::from(high.bit(bit)) << 1) | u8::from(low.bit(bit))
    }

    fn render_sprites(&mut self, line: u8, bg_color_ids: &[u8; SCREEN_WIDTH]) {
        let sprite_height: u8 = if self.registers.double_height_sprites { 16 } else { 8 };

        let mut sprites_on_line: Vec<Sprite> = (0..40)
            .map(|i| {
                let base = i * 4;
                Sprite {
                    y: self.oam[base].wrapping_sub(16),
                    x: self.oam[base + 1].wrapping_sub(8),
                    tile: self.oam[base + 2],
                    priority_behind_bg: self.oam[base + 3].bit(7),
                    flip_y: self.oam[base + 3].bit(6),
                    flip_x: self.oam[base + 3].bit(5),
                    palette: u8::from(self.oam[base + 3].bit(4)),
                }
            })
            .filter(|sprite| {
                let rel = line.wrapping_sub(sprite.y);
                rel < sprite_height
            })
            .take(10)
            .collect();

        // Lower OAM index wins ties; reverse so the final pass draws index 0 last (on top).
        sprites_on_line.reverse();

        for sprite in sprites_on_line {
            let mut row_in_tile = line.wrapping_sub(sprite.y);
            if sprite.flip_y {
                row_in_tile = sprite_height - 1 - row_in_tile;
            }

            let tile = if sprite_height == 16 {
                if row_in_tile < 8 { sprite.tile & 0xFE } else { sprite.tile | 0x01 }
            } else {
                sprite.tile
            };
            let row_in_tile = row_in_tile % 8;

            for col in 0..8u8 {
                let screen_x = i16::from(sprite.x) + i16::from(col);
                if !(0..SCREEN_WIDTH as i16).contains(&screen_x) {
                    continue;
                }

                let sample_col = if sprite.flip_x { 7 - col } else { col };
                let color_id = self.sprite_tile_pixel(tile, row_in_tile, sample_col);
                if color_id == 0 {
                    continue;
                }

                if sprite.priority_behind_bg && bg_color_ids[screen_x as usize] != 0 {
                    continue;
                }

                let shade = self.registers.sprite_palettes[usize::from(sprite.palette)]
                    [usize::from(color_id)];
                self.frame_buffer[usize::from(line) * SCREEN_WIDTH + screen_x as usize] = shade;
            }
        }
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PpuInterrupts {
    pub vblank: bool,
    pub stat: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_line_advances_ly() {
        let mut ppu = Ppu::new();
        ppu.write_register(0xFF40, 0x80); // PPU enable only
        ppu.tick(DOTS_PER_LINE);
        assert_eq!(ppu.line, 1);
    }

    #[test]
    fn entering_vblank_raises_interrupt_at_line_144() {
        let mut ppu = Ppu::new();
        ppu.write_register(0xFF40, 0x80);
        let mut saw_vblank = false;
        for _ in 0..VBLANK_START_LINE {
            let interrupts = ppu.tick(DOTS_PER_LINE);
            saw_vblank |= interrupts.vblank;
        }
        assert!(saw_vblank);
        assert_eq!(ppu.mode, PpuMode::VBlank);
    }

    #[test]
    fn background_tile_decodes_two_bit_color_id() {
        let mut ppu = Ppu::new();
        ppu.write_vram(0x0000, 0b1111_0000); // low plane
        ppu.write_vram(0x0001, 0b0000_0000); // high plane
        assert_eq!(ppu.tile_pixel(0, 0, 0), 1);
        assert_eq!(ppu.tile_pixel(0, 4, 0), 0);
    }
}
