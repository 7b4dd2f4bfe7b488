//! Four-channel APU: two pulse channels (one with frequency sweep), a programmable wave channel,
//! and an LFSR noise channel, mixed down through NR50/NR51/NR52 into a stereo sample stream.

use bincode::{Decode, Encode};
use retro_common::audio::AudioRingBuffer;
use retro_common::num::GetBit;

const CPU_CLOCK_HZ: u32 = 4_194_304;
const SAMPLE_RATE_HZ: u32 = 48_000;
const FRAME_SEQUENCER_PERIOD: u32 = 8192; // 512 Hz at the CPU clock

const DUTY_PATTERNS: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

#[derive(Debug, Clone, Default, Encode, Decode)]
struct LengthCounter {
    enabled: bool,
    value: u16,
}

impl LengthCounter {
    fn load(&mut self, value: u16, max: u16) {
        self.value = if value == 0 { max } else { max - value };
    }

    fn clock(&mut self) -> bool {
        if self.enabled && self.value > 0 {
            self.value -= 1;
        }
        !self.enabled || self.value > 0
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Envelope {
    initial_volume: u8,
    increasing: bool,
    period: u8,
    timer: u8,
    volume: u8,
}

impl Envelope {
    fn trigger(&mut self) {
        self.volume = self.initial_volume;
        self.timer = self.period;
    }

    fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period;
            if self.increasing && self.volume < 15 {
                self.volume += 1;
            } else if !self.increasing && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct PulseChannel {
    duty: u8,
    duty_step: u8,
    length: LengthCounter,
    envelope: Envelope,
    frequency: u16,
    timer: u32,
    enabled: bool,
    sweep_enabled: bool,
    sweep_period: u8,
    sweep_timer: u8,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_shadow_frequency: u16,
}

impl PulseChannel {
    fn trigger(&mut self) {
        self.enabled = true;
        self.timer = u32::from(2048u16 - self.frequency) * 4;
        self.envelope.trigger();
        if self.length.value == 0 {
            self.length.load(0, 64);
        }
        self.sweep_shadow_frequency = self.frequency;
        self.sweep_timer = if self.sweep_period == 0 { 8 } else { self.sweep_period };
    }

    fn clock_timer(&mut self, cycles: u32) {
        let mut remaining = cycles;
        while remaining > 0 {
            if u32::from(self.timer) > remaining {
                self.timer -= remaining;
                break;
            }
            remaining -= u32::from(self.timer);
            self.timer = u32::from(2048u16 - self.frequency) * 4;
            self.duty_step = (self.duty_step + 1) % 8;
        }
    }

    fn clock_sweep(&mut self) {
        if !self.sweep_enabled {
            return;
        }
        if self.sweep_timer > 0 {
            self.sweep_timer -= 1;
        }
        if self.sweep_timer == 0 {
            self.sweep_timer = if self.sweep_period == 0 { 8 } else { self.sweep_period };
            if self.sweep_period > 0 {
                let new_freq = self.sweep_target_frequency();
                if new_freq <= 2047 && self.sweep_shift > 0 {
                    self.frequency = new_freq;
                    self.sweep_shadow_frequency = new_freq;
                }
                if self.sweep_target_frequency() > 2047 {
                    self.enabled = false;
                }
            }
        }
    }

    fn sweep_target_frequency(&self) -> u16 {
        let delta = self.sweep_shadow_frequency >> self.sweep_shift;
        if self.sweep_negate {
            self.sweep_shadow_frequency.saturating_sub(delta)
        } else {
            self.sweep_shadow_frequency + delta
        }
    }

    fn amplitude(&self) -> i16 {
        if !self.enabled {
            return 0;
        }
        let bit = DUTY_PATTERNS[usize::from(self.duty)][usize::from(self.duty_step)];
        i16::from(bit) * i16::from(self.envelope.volume)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct WaveChannel {
    dac_enabled: bool,
    length: LengthCounter,
    volume_shift: u8,
    frequency: u16,
    timer: u32,
    enabled: bool,
    position: u8,
    samples: [u8; 16],
}

impl Default for WaveChannel {
    fn default() -> Self {
        Self {
            dac_enabled: false,
            length: LengthCounter::default(),
            volume_shift: 0,
            frequency: 0,
            timer: 0,
            enabled: false,
            position: 0,
            samples: [0; 16],
        }
    }
}

impl WaveChannel {
    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        self.timer = u32::from(2048u16 - self.frequency) * 2;
        self.position = 0;
        if self.length.value == 0 {
            self.length.load(0, 256);
        }
    }

    fn clock_timer(&mut self, cycles: u32) {
        let mut remaining = cycles;
        while remaining > 0 {
            if u32::from(self.timer) > remaining {
                self.timer -= remaining;
                break;
            }
            remaining -= u32::from(self.timer);
            self.timer = u32::from(2048u16 - self.frequency) * 2;
            self.position = (self.position + 1) % 32;
        }
    }

    fn amplitude(&self) -> i16 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        let byte = self.samples[usize::from(self.position / 2)];
        let nibble = if self.position % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        let shifted = match self.volume_shift {
            0 => 0,
            1 => nibble,
            2 => nibble >> 1,
            _ => nibble >> 2,
        };
        i16::from(shifted)
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct NoiseChannel {
    length: LengthCounter,
    envelope: Envelope,
    clock_shift: u8,
    width_mode_7bit: bool,
    divisor_code: u8,
    lfsr: u16,
    timer: u32,
    enabled: bool,
}

fn noise_divisor(code: u8) -> u32 {
    match code {
        0 => 8,
        n => u32::from(n) * 16,
    }
}

impl NoiseChannel {
    fn trigger(&mut self) {
        self.enabled = true;
        self.lfsr = 0x7FFF;
        self.envelope.trigger();
        if self.length.value == 0 {
            self.length.load(0, 64);
        }
        self.timer = noise_divisor(self.divisor_code) << self.clock_shift;
    }

    fn clock_timer(&mut self, cycles: u32) {
        let mut remaining = cycles;
        while remaining > 0 {
            if u32::from(self.timer) > remaining {
                self.timer -= remaining;
                break;
            }
            remaining -= u32::from(self.timer);
            self.timer = noise_divisor(self.divisor_code) << self.clock_shift;

            let bit = (self.lfsr ^ (self.lfsr >> 1)) & 1;
            self.lfsr = (self.lfsr >> 1) | (bit << 14);
            if self.width_mode_7bit {
                self.lfsr = (self.lfsr & !(1 << 6)) | (bit << 6);
            }
        }
    }

    fn amplitude(&self) -> i16 {
        if !self.enabled {
            return 0;
        }
        let bit = u16::from(!self.lfsr.bit(0));
        bit as i16 * i16::from(self.envelope.volume)
    }
}

#[derive(Debug, Clone)]
pub struct Apu {
    enabled: bool,
    pulse1: PulseChannel,
    pulse2: PulseChannel,
    wave: WaveChannel,
    noise: NoiseChannel,
    left_volume: u8,
    right_volume: u8,
    panning: u8,
    frame_sequencer_step: u8,
    cycles_until_next_sequencer_step: u32,
    cycles_until_next_sample: u32,
    output: AudioRingBuffer,
    render_enabled: bool,
}

// Manual Encode/Decode: the installed bincode_derive version does not support the `#[bincode(skip)]`
// field attribute, so `output` and `render_enabled` are encoded/decoded by hand here, defaulting on decode.
impl Encode for Apu {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        Encode::encode(&self.enabled, encoder)?;
        Encode::encode(&self.pulse1, encoder)?;
        Encode::encode(&self.pulse2, encoder)?;
        Encode::encode(&self.wave, encoder)?;
        Encode::encode(&self.noise, encoder)?;
        Encode::encode(&self.left_volume, encoder)?;
        Encode::encode(&self.right_volume, encoder)?;
        Encode::encode(&self.panning, encoder)?;
        Encode::encode(&self.frame_sequencer_step, encoder)?;
        Encode::encode(&self.cycles_until_next_sequencer_step, encoder)?;
        Encode::encode(&self.cycles_until_next_sample, encoder)?;
        Ok(())
    }
}

impl<C> Decode<C> for Apu {
    fn decode<D: bincode::de::Decoder<Context = C>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            enabled: Decode::decode(decoder)?,
            pulse1: Decode::decode(decoder)?,
            pulse2: Decode::decode(decoder)?,
            wave: Decode::decode(decoder)?,
            noise: Decode::decode(decoder)?,
            left_volume: Decode::decode(decoder)?,
            right_volume: Decode::decode(decoder)?,
            panning: Decode::decode(decoder)?,
            frame_sequencer_step: Decode::decode(decoder)?,
            cycles_until_next_sequencer_step: Decode::decode(decoder)?,
            cycles_until_next_sample: Decode::decode(decoder)?,
            output: Default::default(),
            render_enabled: Default::default(),
        })
    }
}

impl<'de, C> bincode::BorrowDecode<'de, C> for Apu {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            enabled: bincode::BorrowDecode::borrow_decode(decoder)?,
            pulse1: bincode::BorrowDecode::borrow_decode(decoder)?,
            pulse2: bincode::BorrowDecode::borrow_decode(decoder)?,
            wave: bincode::BorrowDecode::borrow_decode(decoder)?,
            noise: bincode::BorrowDecode::borrow_decode(decoder)?,
            left_volume: bincode::BorrowDecode::borrow_decode(decoder)?,
            right_volume: bincode::BorrowDecode::borrow_decode(decoder)?,
            panning: bincode::BorrowDecode::borrow_decode(decoder)?,
            frame_sequencer_step: bincode::BorrowDecode::borrow_decode(decoder)?,
            cycles_until_next_sequencer_step: bincode::BorrowDecode::borrow_decode(decoder)?,
            cycles_until_next_sample: bincode::BorrowDecode::borrow_decode(decoder)?,
            output: Default::default(),
            render_enabled: Default::default(),
        })
    }
}

impl Apu {
    pub fn new() -> Self {
        Self {
            enabled: true,
            pulse1: PulseChannel::default(),
            pulse2: PulseChannel::default(),
            wave: WaveChannel::default(),
            noise: NoiseChannel::default(),
            left_volume: 7,
            right_volume: 7,
            panning: 0xFF,
            frame_sequencer_step: 0,
            cycles_until_next_sequencer_step: FRAME_SEQUENCER_PERIOD,
            cycles_until_next_sample: CPU_CLOCK_HZ / SAMPLE_RATE_HZ,
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

    pub fn read_register(&self, address: u16) -> u8 {
        match address {
            0xFF10 => {
                0x80 | (self.pulse1.sweep_period << 4)
                    | (u8::from(self.pulse1.sweep_negate) << 3)
                    | self.pulse1.sweep_shift
            }
            0xFF11 | 0xFF16 => {
                let channel = if address == 0xFF11 { &self.pulse1 } else { &self.pulse2 };
                (channel.duty << 6) | 0x3F
            }
            0xFF12 | 0xFF17 => {
                let channel = if address == 0xFF12 { &self.pulse1 } else { &self.pulse2 };
                (channel.envelope.initial_volume << 4)
                    | (u8::from(channel.envelope.increasing) << 3)
                    | channel.envelope.period
            }
            0xFF1A => (u8::from(self.wave.dac_enabled) << 7) | 0x7F,
            0xFF1C => 0x80 | (self.wave.volume_shift << 5) | 0x1F,
            0xFF21 => {
                (self.noise.envelope.initial_volume << 4)
                    | (u8::from(self.noise.envelope.increasing) << 3)
                    | self.noise.envelope.period
            }
            0xFF22 => {
                (self.noise.clock_shift << 4)
                    | (u8::from(self.noise.width_mode_7bit) << 3)
                    | self.noise.divisor_code
            }
            0xFF24 => (self.left_volume << 4) | self.right_volume,
            0xFF25 => self.panning,
            0xFF26 => {
                (u8::from(self.enabled) << 7)
                    | 0x70
                    | (u8::from(self.noise.enabled) << 3)
                    | (u8::from(self.wave.enabled) << 2)
                    | (u8::from(self.pulse2.enabled) << 1)
                    | u8::from(self.pulse1.enabled)
            }
            0xFF30..=0xFF3F => self.wave.samples[usize::from(address - 0xFF30)],
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, address: u16, value: u8) {
        if !self.enabled && address != 0xFF26 && !(0xFF30..=0xFF3F).contains(&address) {
            return;
        }

        match address {
            0xFF10 => {
                self.pulse1.sweep_period = (value >> 4) & 0x07;
                self.pulse1.sweep_negate = value.bit(3);
                self.pulse1.sweep_shift = value & 0x07;
                self.pulse1.sweep_enabled = self.pulse1.sweep_period > 0 || self.pulse1.sweep_shift > 0;
            }
            0xFF11 | 0xFF16 => {
                let channel = if address == 0xFF11 { &mut self.pulse1 } else { &mut self.pulse2 };
                channel.duty = value >> 6;
                channel.length.load(u16::from(value & 0x3F), 64);
            }
            0xFF12 | 0xFF17 => {
                let channel = if address == 0xFF12 { &mut self.pulse1 } else { &mut self.pulse2 };
                channel.envelope.initial_volume = value >> 4;
                channel.envelope.increasing = value.bit(3);
                channel.envelope.period = value & 0x07;
            }
            0xFF13 | 0xFF18 => {
                let channel = if address == 0xFF13 { &mut self.pulse1 } else { &mut self.pulse2 };
                channel.frequency = (channel.frequency & 0x0700) | u16::from(value);
            }
            0xFF14 | 0xFF19 => {
                let channel = if address == 0xFF14 { &mut self.pulse1 } else { &mut self.pulse2 };
                channel.frequency = (channel.frequency & 0x00FF) | (u16::from(value & 0x07) << 8);
                channel.length.enabled = value.bit(6);
                if value.bit(7) {
                    channel.trigger();
                }
            }
            0xFF1A => {
                self.wave.dac_enabled = value.bit(7);
                if !self.wave.dac_enabled {
                    self.wave.enabled = false;
                }
            }
            0xFF1B => self.wave.length.load(u16::from(value), 256),
            0xFF1C => self.wave.volume_shift = (value >> 5) & 0x03,
            0xFF1D => self.wave.frequency = (self.wave.frequency & 0x0700) | u16::from(value),
            0xFF1E => {
                self.wave.frequency = (self.wave.frequency & 0x00FF) | (u16::from(value & 0x07) << 8);
                self.wave.length.enabled = value.bit(6);
                if value.bit(7) {
                    self.wave.trigger();
                }
            }
            0xFF20 => self.noise.length.load(u16::from(value & 0x3F), 64),
            0xFF21 => {
                self.noise.envelope.initial_volume = value >> 4;
                self.noise.envelope.increasing = value.bit(3);
                self.noise.envelope.period = value & 0x07;
            }
            0xFF22 => {
                self.noise.clock_shift = value >> 4;
                self.noise.width_mode_7bit = value.bit(3);
                self.noise.divisor_code = value & 0x07;
            }
            0xFF23 => {
                self.noise.length.enabled = value.bit(6);
                if value.bit(7) {
                    self.noise.trigger();
                }
            }
            0xFF24 => {
                self.left_volume = (value >> 4) & 0x07;
                self.right_volume = value & 0x07;
            }
            0xFF25 => self.panning = value,
            0xFF26 => {
                self.enabled = value.bit(7);
                if !self.enabled {
                    // Powering off clears every register except wave RAM.
                    let wave_samples = self.wave.samples;
                    self.pulse1 = PulseChannel::default();
                    self.pulse2 = PulseChannel::default();
                    self.wave = WaveChannel { samples: wave_samples, ..WaveChannel::default() };
                    self.noise = NoiseChannel::default();
                    self.left_volume = 0;
                    self.right_volume = 0;
                    self.panning = 0;
                }
            }
            0xFF30..=0xFF3F => self.wave.samples[usize::from(address - 0xFF30)] = value,
            _ => {}
        }
    }

    pub fn tick(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }

        self.pulse1.clock_timer(cycles);
        self.pulse2.clock_timer(cycles);
        self.wave.clock_timer(cycles);
        self.noise.clock_timer(cycles);

        let mut remaining_sequencer = cycles;
        while self.cycles_until_next_sequencer_step <= remaining_sequencer {
            remaining_sequencer -= self.cycles_until_next_sequencer_step;
            self.cycles_until_next_sequencer_step = FRAME_SEQUENCER_PERIOD;
            self.clock_frame_sequencer();
        }
        self.cycles_until_next_sequencer_step -= remaining_sequencer;

        let mut remaining_sample = cycles;
        while self.cycles_until_next_sample <= remaining_sample {
            remaining_sample -= self.cycles_until_next_sample;
            self.cycles_until_next_sample = CPU_CLOCK_HZ / SAMPLE_RATE_HZ;
            if self.render_enabled {
                self.mix_and_push_sample();
            }
        }
        self.cycles_until_next_sample -= remaining_sample;
    }

    fn clock_frame_sequencer(&mut self) {
        self.frame_sequencer_step = (self.frame_sequencer_step + 1) % 8;
        match self.frame_sequencer_step {
            0 | 4 => self.clock_length_counters(),
            2 | 6 => {
                self.clock_length_counters();
                self.pulse1.clock_sweep();
            }
            7 => self.clock_envelopes(),
            _ => {}
        }
    }

    fn clock_length_counters(&mut self) {
        self.pulse1.enabled &= self.pulse1.length.clock();
        self.pulse2.enabled &= self.pulse2.length.clock();
        self.wave.enabled &= self.wave.length.clock();
        self.noise.enabled &= self.noise.length.clock();
    }

    fn clock_envelopes(&mut self) {
        self.pulse1.envelope.clock();
        self.pulse2.envelope.clock();
        self.noise.envelope.clock();
    }

    fn mix_and_push_sample(&mut self) {
        let channels = [
            (self.pulse1.amplitude(), 0),
            (self.pulse2.amplitude(), 1),
            (self.wave.amplitude(), 2),
            (self.noise.amplitude(), 3),
        ];

        let mut left = 0i32;
        let mut right = 0i32;
        for (amplitude, index) in channels {
            if self.panning.bit(4 + index) {
                left += i32::from(amplitude);
            }
            if self.panning.bit(index) {
                right += i32::from(amplitude);
            }
        }

        // Each DAC outputs 0-15; scale into i16 range and apply master volume (0-7, so +1).
        let left = (left * 512 * i32::from(self.left_volume + 1)) / 8;
        let right = (right * 512 * i32::from(self.right_volume + 1)) / 8;

        self.output.push_sample(left.clamp(-32768, 32767) as i16, right.clamp(-32768, 32767) as i16);
    }

    pub fn get_audio_samples(&mut self, out: &mut [i16]) -> usize {
        self.output.drain_into(out)
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggering_pulse1_loads_the_period_timer_from_frequency() {
        let mut apu = Apu::new();
        apu.write_register(0xFF13, 0x00); // frequency low byte
        apu.write_register(0xFF14, 0x80); // trigger bit set, frequency high bits 0
        assert_eq!(apu.pulse1.timer, 2048 * 4);
        assert!(apu.pulse1.enabled);
    }

    #[test]
    fn length_counter_disables_the_channel_once_it_reaches_zero() {
        let mut apu = Apu::new();
        apu.write_register(0xFF11, 1); // length load = 1, so it counts down to zero on one clock
        apu.write_register(0xFF14, 0xC0); // length enable, trigger
        assert!(apu.pulse1.enabled);

        apu.pulse1.length.clock();
        assert!(!apu.pulse1.length.clock());
    }

    #[test]
    fn envelope_decreases_volume_toward_zero_and_stops() {
        let mut envelope = Envelope { initial_volume: 2, increasing: false, period: 1, ..Envelope::default() };
        envelope.trigger();
        envelope.clock();
        assert_eq!(envelope.volume, 1);
        envelope.clock();
        assert_eq!(envelope.volume, 0);
        envelope.clock();
        assert_eq!(envelope.volume, 0);
    }

    #[test]
    fn wave_channel_reads_back_the_nibble_at_the_current_position() {
        let mut apu = Apu::new();
        apu.write_register(0xFF1A, 0x80); // DAC on
        apu.write_register(0xFF1C, 0x20); // volume shift 1 (full)
        apu.write_register(0xFF30, 0xA5); // sample byte at index 0
        apu.write_register(0xFF1E, 0x80); // trigger, frequency bits untouched
        assert_eq!(apu.wave.position, 0);
        assert_eq!(apu.wave.amplitude(), 0xA);
    }

    #[test]
    fn noise_channel_silences_when_lfsr_bit_zero_is_set() {
        let mut noise = NoiseChannel { envelope: Envelope { volume: 15, ..Envelope::default() }, ..NoiseChannel::default() };
        noise.enabled = true;
        noise.lfsr = 0x0001;
        assert_eq!(noise.amplitude(), 0);
        noise.lfsr = 0x0000;
        assert_eq!(noise.amplitude(), 15);
    }

    #[test]
    fn powering_off_clears_registers_but_preserves_wave_ram() {
        let mut apu = Apu::new();
        apu.write_register(0xFF30, 0x42);
        apu.write_register(0xFF24, 0x77); // master volume, left/right 7
        apu.write_register(0xFF26, 0x00); // power off
        assert_eq!(apu.left_volume, 0);
        assert_eq!(apu.read_register(0xFF30), 0x42);
    }

    #[test]
    fn register_writes_are_ignored_while_powered_off_except_wave_ram_and_nr52() {
        let mut apu = Apu::new();
        apu.write_register(0xFF26, 0x00);
        apu.write_register(0xFF24, 0x77);
        assert_eq!(apu.left_volume, 0);

        apu.write_register(0xFF30, 0x99);
        assert_eq!(apu.read_register(0xFF30), 0x99);
    }

    #[test]
    fn ticking_past_the_sample_period_pushes_a_stereo_sample() {
        let mut apu = Apu::new();
        apu.write_register(0xFF12, 0xF0); // pulse1 initial volume 15
        apu.write_register(0xFF14, 0xC7); // trigger, length enable
        apu.write_register(0xFF25, 0xFF); // pan both channels to both sides

        apu.tick(CPU_CLOCK_HZ / SAMPLE_RATE_HZ);
        let mut out = [0i16; 2];
        assert_eq!(apu.get_audio_samples(&mut out), 1);
    }
}
