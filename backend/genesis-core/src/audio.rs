//! Mixes the PSG's attenuated square/noise output with the YM2612 stub's (always silent) output
//! into one shared ring buffer, resampled down from the 68000 clock to the host sample rate.

use crate::psg::Psg;
use crate::ym2612::Ym2612;
use bincode::{Decode, Encode};
use retro_common::audio::AudioRingBuffer;

const SAMPLE_RATE_HZ: u32 = 48_000;

#[derive(Debug, Clone)]
pub struct AudioMixer {
    cycles_per_sample: u32,
    sample_accumulator: u32,
    output: AudioRingBuffer,
    render_enabled: bool,
}

// Manual Encode/Decode: the installed bincode_derive version does not support the `#[bincode(skip)]`
// field attribute, so `output` and `render_enabled` are encoded/decoded by hand here, defaulting on decode.
impl Encode for AudioMixer {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        Encode::encode(&self.cycles_per_sample, encoder)?;
        Encode::encode(&self.sample_accumulator, encoder)?;
        Ok(())
    }
}

impl<C> Decode<C> for AudioMixer {
    fn decode<D: bincode::de::Decoder<Context = C>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            cycles_per_sample: Decode::decode(decoder)?,
            sample_accumulator: Decode::decode(decoder)?,
            output: Default::default(),
            render_enabled: Default::default(),
        })
    }
}

impl<'de, C> bincode::BorrowDecode<'de, C> for AudioMixer {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            cycles_per_sample: bincode::BorrowDecode::borrow_decode(decoder)?,
            sample_accumulator: bincode::BorrowDecode::borrow_decode(decoder)?,
            output: Default::default(),
            render_enabled: Default::default(),
        })
    }
}

impl AudioMixer {
    pub fn new(m68k_clock_hz: u32) -> Self {
        Self {
            cycles_per_sample: m68k_clock_hz / SAMPLE_RATE_HZ,
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

    /// Called once per 68000 cycle; mixes and pushes a sample whenever the accumulator rolls
    /// over, independent of how often the PSG/YM2612 themselves were ticked this step.
    pub fn tick(&mut self, m68k_cycles: u32, psg: &Psg, ym2612: &Ym2612) {
        self.sample_accumulator += m68k_cycles;
        if self.cycles_per_sample == 0 {
            return;
        }
        while self.sample_accumulator >= self.cycles_per_sample {
            self.sample_accumulator -= self.cycles_per_sample;
            if self.render_enabled {
                let (ym_l, ym_r) = ym2612.sample();
                let psg_sample = psg.sample();
                let left = (i32::from(ym_l) + i32::from(psg_sample) / 2)
                    .clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                let right = (i32::from(ym_r) + i32::from(psg_sample) / 2)
                    .clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                self.output.push_sample(left, right);
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
    fn silent_inputs_mix_to_a_silent_sample() {
        let mut mixer = AudioMixer::new(48_000);
        let psg = Psg::new();
        let ym2612 = Ym2612::new();
        mixer.tick(1, &psg, &ym2612);
        let mut out = [1, 1];
        let n = mixer.get_audio_samples(&mut out);
        assert_eq!(n, 1);
        assert_eq!(out[0], 0);
    }
}
