// ============================================================================
// src/io/audio/format.rs - Stream Formats & Negotiation
// ============================================================================
//!
//! # フォーマット交渉
//!
//! ハードウェアの能力は固定:
//! チャネル 1-2、8/16 bit、44100/22050/11025/7350 Hz。
//! 全二重時は両方向で1つのサンプルクロックを共有する。

use crate::error::{AudioError, AudioResult};

use super::regs::SampleRate;

/// Linear PCM format tag.
pub const WAVE_FORMAT_PCM: u16 = 0x0001;

pub const MAX_CHANNELS: u16 = 2;
pub const MAX_BITS_PER_SAMPLE: u16 = 16;

/// Concrete stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub const fn pcm(channels: u16, samples_per_sec: u32, bits_per_sample: u16) -> Self {
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            samples_per_sec,
            bits_per_sample,
        }
    }

    pub const fn block_align(&self) -> u16 {
        self.bits_per_sample * self.channels / 8
    }

    pub const fn avg_bytes_per_sec(&self) -> u32 {
        self.samples_per_sec * self.block_align() as u32
    }

    pub const fn is_16bit(&self) -> bool {
        self.bits_per_sample == 16
    }

    pub const fn is_stereo(&self) -> bool {
        self.channels == 2
    }

    /// Reject anything the hardware cannot play verbatim.
    pub fn validate(&self) -> AudioResult<SampleRate> {
        if self.format_tag != WAVE_FORMAT_PCM {
            return Err(AudioError::InvalidParameter);
        }
        if !matches!(self.channels, 1 | 2) || !matches!(self.bits_per_sample, 8 | 16) {
            return Err(AudioError::InvalidParameter);
        }
        SampleRate::from_hz(self.samples_per_sec).ok_or(AudioError::InvalidParameter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFormat {
    Pcm,
    /// Any other encoding (compressed, float, analog bridge...)
    Other,
}

/// A client's acceptable range of formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub sub_format: SubFormat,
    pub max_channels: u16,
    pub min_bits_per_sample: u16,
    pub max_bits_per_sample: u16,
    pub min_frequency: u32,
    pub max_frequency: u32,
}

impl DataRange {
    pub const fn pcm(max_channels: u16, bits: (u16, u16), frequency: (u32, u32)) -> Self {
        Self {
            sub_format: SubFormat::Pcm,
            max_channels,
            min_bits_per_sample: bits.0,
            max_bits_per_sample: bits.1,
            min_frequency: frequency.0,
            max_frequency: frequency.1,
        }
    }

    pub const fn contains_frequency(&self, hz: u32) -> bool {
        self.min_frequency <= hz && hz <= self.max_frequency
    }
}

/// Pick the best hardware format inside `range`.
///
/// `pinned_rate` is the sample rate of a stream that is already open in
/// either direction; the result must use it.
pub fn intersect(range: &DataRange, pinned_rate: Option<u32>) -> AudioResult<WaveFormat> {
    if range.sub_format != SubFormat::Pcm {
        return Err(AudioError::InvalidParameter);
    }

    let channels = MAX_CHANNELS.min(range.max_channels);
    if channels == 0 {
        return Err(AudioError::NoMatch);
    }

    let rate = match pinned_rate {
        Some(hz) if range.contains_frequency(hz) => hz,
        Some(_) => return Err(AudioError::NoMatch),
        None => SampleRate::ALL
            .iter()
            .map(|rate| rate.hz())
            .find(|hz| range.contains_frequency(*hz))
            .ok_or(AudioError::NoMatch)?,
    };

    let bits = match MAX_BITS_PER_SAMPLE.min(range.max_bits_per_sample) {
        16.. => 16,
        8..=15 => 8,
        _ => return Err(AudioError::NoMatch),
    };
    if bits < range.min_bits_per_sample {
        return Err(AudioError::NoMatch);
    }

    Ok(WaveFormat::pcm(channels, rate, bits))
}
