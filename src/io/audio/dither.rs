// ============================================================================
// src/io/audio/dither.rs - Dither Unit
// ============================================================================
//!
//! # 12-bit 量子化用ディザ
//!
//! MMA の DAC は 12-bit 分解能しかないため、16-bit サンプルは下位4ビットを
//! 切り捨てる前に三角分布ノイズ (TPDF) を加える。乱数源は16ビット LFSR。

/// Generator seed. Any non-zero value works; zero locks the register.
pub const LFSR_SEED: u16 = 0xACE1;

/// Bits dropped by the hardware.
const QUANT_MASK: u16 = 0xFFF0;

/// Half a 12-bit step plus the generator's mean offset of -1, so the
/// truncating quantizer has no long-run bias.
const ROUNDING_OFFSET: i32 = 9;

/// 16-bit Fibonacci LFSR, taps 16/14/13/11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lfsr {
    state: u16,
}

impl Lfsr {
    pub const fn new(seed: u16) -> Self {
        let state = if seed == 0 { LFSR_SEED } else { seed };
        Self { state }
    }

    pub const fn state(&self) -> u16 {
        self.state
    }

    pub fn step(&mut self) -> u16 {
        let s = self.state;
        let bit = (s ^ (s >> 2) ^ (s >> 3) ^ (s >> 5)) & 1;
        self.state = (s >> 1) | (bit << 15);
        self.state
    }

    /// Uniform value in -8..=7 from the low nibble, then advance.
    fn draw(&mut self) -> i32 {
        let value = (self.state & 0x0F) as i32 - 8;
        self.step();
        value
    }
}

impl Default for Lfsr {
    fn default() -> Self {
        Self::new(LFSR_SEED)
    }
}

/// Per-stream triangular-dither quantizer.
#[derive(Debug, Clone, Default)]
pub struct Dither {
    lfsr: Lfsr,
}

impl Dither {
    pub const fn new() -> Self {
        Self {
            lfsr: Lfsr::new(LFSR_SEED),
        }
    }

    /// Quantize one sample to 12 bits, keeping 16-bit sample spacing.
    pub fn quantize(&mut self, sample: i16) -> i16 {
        let noise = self.lfsr.draw() + self.lfsr.draw();
        let dithered = (sample as i32 + noise + ROUNDING_OFFSET)
            .clamp(i16::MIN as i32, i16::MAX as i32);
        ((dithered as i16 as u16) & QUANT_MASK) as i16
    }
}
