//! SN76489 programmable sound generator: three tone channels plus one noise channel, each with
//! a 4-bit volume/attenuation register and no separate envelope unit (attenuation is set
//! directly by register writes, unlike the GB/NES envelope-driven channels).

use bincode::{Decode, Encode};
use retro_common::audio::AudioRingBuffer;

const VOLUME_TABLE: [i16; 16] = [
    8000, 6355, 5048, 4011, 3185, 2530, 2010, 1597, 1268, 1007, 800, 636, 505, 401, 318, 0,
];

const NATIVE_CLOCK_DIVIDER: u32 = 16;
const SAMPLE_RATE_HZ: u32 = 48_000;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct ToneChannel {
    reload: u16,
    counter: u16,
    output_high: bool,
    volume: u8,
}

impl ToneChannel {
    fn clock(&mut self) {
        if self.reload == 0 {
            return;
        }
        if self.counter == 0 {
            self.counter = self.reload;
            self.output_high = !self.output_high;
        } else {
            self.counter -= 1;
        }
    }

    fn sample(&self) -> i16 {
        let amplitude = VOLUME_TABLE[usize::from(self.volume & 0x0F)];
        if self.output_high { amplitude } else { -amplitude }
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
struct NoiseChannel {
    control: u8,
    lfsr: u16,
    reload: u16,
    counter: u16,
    output: bool,
    volume: u8,
}

impl NoiseChannel {
    fn new() -> Self {
        Self { control: 0, lfsr: 0x8000, reload: 0x10, counter: 0x10, output: false, volume: 0x0F }
    }

    fn set_control(&mut self, value: u8, tone2_reload: u16) {
        self.control = value & 0x07;
        self.reload = match value & 0x03 {
            0 => 0x10,
            1 => 0x20,
            2 => 0x40,
            _ => tone2_reload,
        };
        self.lfsr = 0x8000;
    }

    fn clock(&mut self) {
        if self.counter == 0 {
            self.counter = self.reload.max(1);
            self.output = !self.output;
            if self.output {
                let feedback = if self.control & 0x04 != 0 {
                    (self.lfsr & 0x01) ^ ((self.lfsr >> 3) & 0x01)
                } else {
                    self.lfsr & 0x01
                };
                self.lfsr = (self.lfsr >> 1) | (feedback << 15);
            }
        } else {
            self.counter -= 1;
        }
    }

    fn sample(&self) -> i16 {
        let amplitude = VOLUME_TABLE[usize::from(self.volume & 0x0F)];
        if self.lfsr & 0x01 != 0 { amplitude } else { -amplitude }
    }
}

#[derive(Debug, Clone)]
pub struct Psg {
    tones: [ToneChannel; 3],
    noise: NoiseChannel,
    latched_channel: u8,
    latched_is_volume: bool,
    clock_divider: u32,
    cycles_per_sample: u32,
    sample_accumulator: u32,
    output: AudioRingBuffer,
    render_enabled: bool,
}

// Manual Encode/Decode: the installed bincode_derive version does not support the `#[bincode(skip)]`
// field attribute, so `output` and `render_enabled` are encoded/decoded by hand here, defaulting on decode.
impl Encode for Psg {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        Encode::encode(&self.tones, encoder)?;
        Encode::encode(&self.noise, encoder)?;
        Encode::encode(&self.latched_channel, encoder)?;
        Encode::encode(&self.latched_is_volume, encoder)?;
        Encode::encode(&self.clock_divider, encoder)?;
        Encode::encode(&self.cycles_per_sample, encoder)?;
        Encode::encode(&self.sample_accumulator, encoder)?;
        Ok(())
    }
}

impl<C> Decode<C> for Psg {
    fn decode<D: bincode::de::Decoder<Context = C>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            tones: Decode::decode(decoder)?,
            noise: Decode::decode(decoder)?,
            latched_channel: Decode::decode(decoder)?,
            latched_is_volume: Decode::decode(decoder)?,
            clock_divider: Decode::decode(decoder)?,
            cycles_per_sample: Decode::decode(decoder)?,
            sample_accumulator: Decode::decode(decoder)?,
            output: Default::default(),
            render_enabled: Default::default(),
        })
    }
}

impl<'de, C> bincode::BorrowDecode<'de, C> for Psg {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            tones: bincode::BorrowDecode::borrow_decode(decoder)?,
            noise: bincode::BorrowDecode::borrow_decode(decoder)?,
            latched_channel: bincode::BorrowDecode::borrow_decode(decoder)?,
            latched_is_volume: bincode::BorrowDecode::borrow_decode(decoder)?,
            clock_divider: bincode::BorrowDecode::borrow_decode(decoder)?,
            cycles_per_sample: bincode::BorrowDecode::borrow_decode(decoder)?,
            sample_accumulator: bincode::BorrowDecode::borrow_decode(decoder)?,
            output: Default::default(),
            render_enabled: Default::default(),
        })
    }
}

impl Psg {
    pub fn new(native_clock_hz: u32) -> Self {
        Self {
            tones: [ToneChannel::default(); 3],
            noise: NoiseChannel::new(),
            latched_channel: 0,
            latched_is_volume: false,
            clock_divider: 0,
            cycles_per_sample: native_clock_hz / NATIVE_CLOCK_DIVIDER / SAMPLE_RATE_HZ,
            sample_accumulator: 0,
            output: AudioRingBuffer::default(),
            render_enabled: true,
        }
    }

    pub fn set_render_enabled(&mut self, enabled: bool) {
        self.render_enabled = enabled;
    }

    pub fn render_enabled(&self) -> bool {
        self.render_enabled
    }

    pub fn write(&mut self, value: u8) {
        if value & 0x80 != 0 {
            self.latched_channel = (value >> 5) & 0x03;
            self.latched_is_volume = value & 0x10 != 0;
            self.apply_data(value & 0x0F, true);
        } else {
            self.apply_data(value & 0x3F, false);
        }
    }

    fn apply_data(&mut self, data: u8, is_first_byte: bool) {
        let channel = self.latched_channel;
        if self.latched_is_volume {
            let volume = data & 0x0F;
            if channel == 3 {
                self.noise.volume = volume;
            } else {
                self.tones[channel as usize].volume = volume;
            }
            return;
        }

        if channel == 3 {
            let tone2_reload = self.tones[2].reload;
            self.noise.set_control(data, tone2_reload);
            return;
        }

        let tone = &mut self.tones[channel as usize];
        if is_first_byte {
            tone.reload = (tone.reload & 0x3F0) | u16::from(data & 0x0F);
        } else {
            tone.reload = (tone.reload & 0x0F) | (u16::from(data & 0x3F) << 4);
        }
    }

    pub fn tick(&mut self, native_cycles: u32) {
        for _ in 0..native_cycles {
            self.clock_divider += 1;
            if self.clock_divider >= NATIVE_CLOCK_DIVIDER {
                self.clock_divider = 0;
                for tone in &mut self.tones {
                    tone.clock();
                }
                self.noise.clock();
            }

            self.sample_accumulator += 1;
            if self.cycles_per_sample != 0 && self.sample_accumulator >= self.cycles_per_sample {
                self.sample_accumulator -= self.cycles_per_sample;
                if self.render_enabled {
                    let mixed: i32 = self.tones.iter().map(|t| i32::from(t.sample())).sum::<i32>()
                        + i32::from(self.noise.sample());
                    let sample = (mixed / 4).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                    self.output.push_sample(sample, sample);
                }
            }
        }
    }

    pub fn get_audio_samples(&mut self, out: &mut [i16]) -> usize {
        self.output.drain_into(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_then_data_byte_sets_a_tone_channels_full_period() {
        let mut psg = Psg::new(3_579_545);
        psg.write(0b1000_0101); // latch channel 0 tone, low nibble 0x5
        psg.write(0b0010_1010); // data byte, high 6 bits 0x2A
        assert_eq!(psg.tones[0].reload, (0x2A << 4) | 0x5);
    }

    #[test]
    fn volume_latch_sets_channel_volume() {
        let mut psg = Psg::new(3_579_545);
        psg.write(0b1001_0011); // channel 0, volume register, value 3
        assert_eq!(psg.tones[0].volume, 3);
    }

    #[test]
    fn noise_channel_volume_is_independent_of_tone_channels() {
        let mut psg = Psg::new(3_579_545);
        psg.write(0b1111_0111); // channel 3 (noise), volume register, value 7
        assert_eq!(psg.noise.volume, 7);
    }
}
