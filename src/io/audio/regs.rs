// ============================================================================
// src/io/audio/regs.rs - Ad Lib Gold Register Definitions
// ============================================================================
//!
//! # Ad Lib Gold レジスタ定義
//!
//! ポートウィンドウ (ベース + 0..7):
//! - +0/+1: OPL3 バンク0 (アドレス/データ)
//! - +2/+3: OPL3 バンク1 と制御チップをバンク切り替えで共有
//! - +4/+5: MMA チャネル0 (デジタルオーディオ/MIDI コプロセッサ)
//! - +6/+7: MMA チャネル1
//!
//! 複数フィールドを持つレジスタは構造体として表現し、
//! `encode`/`decode` で強制ビットや予約ビットの不変条件を保証する。

use bitflags::bitflags;

// ============================================================================
// Port Window
// ============================================================================

/// Factory default base address.
pub const DEFAULT_IO_BASE: u16 = 0x388;

/// Size of the card's port window.
pub const IO_PORT_COUNT: u16 = 8;

pub const PORT_FM0_ADDRESS: u16 = 0;
pub const PORT_FM0_DATA: u16 = 1;
/// Shared: control-chip index / FM bank-1 address. Reads return control status.
pub const PORT_CONTROL_ADDRESS: u16 = 2;
/// Shared: control-chip data / FM bank-1 data.
pub const PORT_CONTROL_DATA: u16 = 3;
/// Reads return the auto-clearing MMA status.
pub const PORT_MMA0_ADDRESS: u16 = 4;
pub const PORT_MMA0_DATA: u16 = 5;
pub const PORT_MMA1_ADDRESS: u16 = 6;
pub const PORT_MMA1_DATA: u16 = 7;

/// Value written to the shared address port to select a register space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bank {
    /// 制御チップ (ミキサー/ID/IRQ ルーティング)
    Control = 0xFF,
    /// OPL3 バンク1
    Fm1 = 0xFE,
}

impl Bank {
    pub const fn select_value(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Status Bytes
// ============================================================================

bitflags! {
    /// 制御チップのステータス (制御バンク選択中に +2 を読む)
    ///
    /// ビジービットはアクティブハイ、割り込みビットはアクティブロー。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlStatus: u8 {
        /// Register busy
        const RB = 0x80;
        /// Status busy
        const SB = 0x40;
        const SCSI_IRQ = 0x08;
        const TEL_IRQ = 0x04;
        /// MMA (sampling/MIDI) interrupt, active-low
        const SMP_IRQ = 0x02;
        /// FM timer interrupt, active-low
        const FM_IRQ = 0x01;
    }
}

impl ControlStatus {
    pub const BUSY: Self = Self::RB.union(Self::SB);
    pub const IRQ_MASK: Self = Self::SCSI_IRQ
        .union(Self::TEL_IRQ)
        .union(Self::SMP_IRQ)
        .union(Self::FM_IRQ);

    pub fn is_busy(self) -> bool {
        self.intersects(Self::BUSY)
    }

    /// A source is pending when its bit reads 0.
    pub fn is_pending(self, source: ControlStatus) -> bool {
        !self.contains(source)
    }

    /// True when every interrupt bit reads 1 (none of ours asserted).
    pub fn no_source_pending(self) -> bool {
        self.contains(Self::IRQ_MASK)
    }
}

bitflags! {
    /// MMA の割り込み要因 (読み出しでクリアされる)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MmaStatus: u8 {
        /// Timer request
        const TRQ = 0x01;
        /// PCM FIFO request
        const PRQ = 0x02;
        /// MIDI receive request
        const RRQ = 0x04;
    }
}

// ============================================================================
// Control Chip Registers (0x00 - 0x18)
// ============================================================================

pub const CTRL_CONTROL_ID: u8 = 0x00;
pub const CTRL_TELEPHONE: u8 = 0x01;
pub const CTRL_GAIN_LEFT: u8 = 0x02;
pub const CTRL_GAIN_RIGHT: u8 = 0x03;
pub const CTRL_MASTER_VOL_LEFT: u8 = 0x04;
pub const CTRL_MASTER_VOL_RIGHT: u8 = 0x05;
pub const CTRL_BASS: u8 = 0x06;
pub const CTRL_TREBLE: u8 = 0x07;
pub const CTRL_OUTPUT_MODE: u8 = 0x08;
pub const CTRL_FM_VOL_LEFT: u8 = 0x09;
pub const CTRL_FM_VOL_RIGHT: u8 = 0x0A;
pub const CTRL_SAMP_VOL_LEFT: u8 = 0x0B;
pub const CTRL_SAMP_VOL_RIGHT: u8 = 0x0C;
pub const CTRL_AUX_VOL_LEFT: u8 = 0x0D;
pub const CTRL_AUX_VOL_RIGHT: u8 = 0x0E;
pub const CTRL_MIC_VOL: u8 = 0x0F;
pub const CTRL_TEL_VOL: u8 = 0x10;
pub const CTRL_AUDIO_SELECT: u8 = 0x11;
/// Must be written as zero.
pub const CTRL_RESERVED: u8 = 0x12;
pub const CTRL_IRQ_DMA0: u8 = 0x13;
pub const CTRL_DMA1: u8 = 0x14;
pub const CTRL_AUDIO_RELOCATION: u8 = 0x15;
pub const CTRL_SCSI_IRQ_DMA: u8 = 0x16;
pub const CTRL_SCSI_RELOCATION: u8 = 0x17;
pub const CTRL_SURROUND: u8 = 0x18;

/// Number of shadowed control registers.
pub const CTRL_REG_COUNT: usize = 0x19;

/// Mixer sub-range replayed on power-up.
pub const MIXER_FIRST: u8 = CTRL_MASTER_VOL_LEFT;
pub const MIXER_LAST: u8 = CTRL_MIC_VOL;

pub const RESERVED_VALUE: u8 = 0x00;

/// Settling requirement after a control-register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Analog path registers: poll until the chip is ready again.
    PollReady,
    /// Short fixed stall, in microseconds.
    Stall(u32),
    None,
}

pub const SETTLE_STALL_US: u32 = 5;

pub const fn settle_for(index: u8) -> Settle {
    match index {
        CTRL_MASTER_VOL_LEFT..=CTRL_OUTPUT_MODE => Settle::PollReady,
        CTRL_FM_VOL_LEFT..=CTRL_SCSI_IRQ_DMA => Settle::Stall(SETTLE_STALL_US),
        _ => Settle::None,
    }
}

bitflags! {
    /// 制御ID レジスタへの書き込みコマンド (カード上の EEPROM)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EepromCommand: u8 {
        const RESTORE = 0x01;
        const SAVE = 0x02;
    }
}

/// Card model reported in the low nibble of the ID register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardModel {
    Gold1000,
    Gold2000,
    Gold2000Mc,
}

impl CardModel {
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Gold1000),
            1 => Some(Self::Gold2000),
            2 => Some(Self::Gold2000Mc),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Gold1000 => 0,
            Self::Gold2000 => 1,
            Self::Gold2000Mc => 2,
        }
    }
}

/// Decoded identity register. Option bits are active-low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardId {
    pub model_code: u8,
    pub telephone: bool,
    pub surround: bool,
    pub scsi: bool,
}

impl CardId {
    const MODEL_MASK: u8 = 0x0F;
    const OPT_TELEPHONE: u8 = 0x20;
    const OPT_SURROUND: u8 = 0x40;
    const OPT_SCSI: u8 = 0x80;

    pub const fn decode(raw: u8) -> Self {
        Self {
            model_code: raw & Self::MODEL_MASK,
            telephone: raw & Self::OPT_TELEPHONE == 0,
            surround: raw & Self::OPT_SURROUND == 0,
            scsi: raw & Self::OPT_SCSI == 0,
        }
    }

    pub const fn model(&self) -> Option<CardModel> {
        CardModel::from_code(self.model_code)
    }
}

/// Bass/treble register: 4-bit level, upper nibble forced high.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneControl {
    level: u8,
}

impl ToneControl {
    const FORCED: u8 = 0xF0;
    const LEVEL_MASK: u8 = 0x0F;

    pub const fn new(level: u8) -> Option<Self> {
        if level > Self::LEVEL_MASK {
            return None;
        }
        Some(Self { level })
    }

    pub const fn level(&self) -> u8 {
        self.level
    }

    pub const fn encode(&self) -> u8 {
        Self::FORCED | self.level
    }

    pub const fn decode(raw: u8) -> Self {
        Self {
            level: raw & Self::LEVEL_MASK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StereoMode {
    Mono = 0,
    Linear = 1,
    Pseudo = 2,
    Spatial = 3,
}

/// Output mode register (0x08).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub mute: bool,
    pub stereo: StereoMode,
    /// Source selector, 0..=3
    source: u8,
}

impl OutputMode {
    const FORCED: u8 = 0xC0;
    const MUTE: u8 = 0x20;
    const STEREO_SHIFT: u8 = 2;
    const STEREO_MASK: u8 = 0x0C;
    const SOURCE_MASK: u8 = 0x03;

    pub const fn new(mute: bool, stereo: StereoMode, source: u8) -> Option<Self> {
        if source > Self::SOURCE_MASK {
            return None;
        }
        Some(Self {
            mute,
            stereo,
            source,
        })
    }

    pub const fn source(&self) -> u8 {
        self.source
    }

    pub const fn encode(&self) -> u8 {
        let mut raw = Self::FORCED | ((self.stereo as u8) << Self::STEREO_SHIFT) | self.source;
        if self.mute {
            raw |= Self::MUTE;
        }
        raw
    }

    pub const fn decode(raw: u8) -> Self {
        let stereo = match (raw & Self::STEREO_MASK) >> Self::STEREO_SHIFT {
            0 => StereoMode::Mono,
            1 => StereoMode::Linear,
            2 => StereoMode::Pseudo,
            _ => StereoMode::Spatial,
        };
        Self {
            mute: raw & Self::MUTE != 0,
            stereo,
            source: raw & Self::SOURCE_MASK,
        }
    }
}

bitflags! {
    /// オーディオ選択レジスタ (0x11)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AudioSelect: u8 {
        const SPEAKER = 0x20;
        const MFB = 0x08;
        const XMO = 0x04;
        const FILTER1 = 0x02;
        const FILTER0 = 0x01;
    }
}

/// IRQ/DMA channel 0 routing register (0x13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqDmaSelect {
    pub dma_enable: bool,
    dma_channel: u8,
    pub irq_enable: bool,
    irq_select: u8,
}

impl IrqDmaSelect {
    const DMA_ENABLE: u8 = 0x80;
    const DMA_SHIFT: u8 = 5;
    const DMA_MASK: u8 = 0x03;
    const IRQ_ENABLE: u8 = 0x10;
    const IRQ_MASK: u8 = 0x07;

    /// Routing for an ISA DMA channel and IRQ line, both enabled.
    pub const fn for_resources(dma_channel: u8, irq_line: u8) -> Self {
        Self {
            dma_enable: true,
            dma_channel: dma_channel & Self::DMA_MASK,
            irq_enable: true,
            irq_select: irq_select_for_line(irq_line),
        }
    }

    pub const fn dma_channel(&self) -> u8 {
        self.dma_channel
    }

    pub const fn irq_select(&self) -> u8 {
        self.irq_select
    }

    pub const fn encode(&self) -> u8 {
        let mut raw = (self.dma_channel << Self::DMA_SHIFT) | self.irq_select;
        if self.dma_enable {
            raw |= Self::DMA_ENABLE;
        }
        if self.irq_enable {
            raw |= Self::IRQ_ENABLE;
        }
        raw
    }

    pub const fn decode(raw: u8) -> Self {
        Self {
            dma_enable: raw & Self::DMA_ENABLE != 0,
            dma_channel: (raw >> Self::DMA_SHIFT) & Self::DMA_MASK,
            irq_enable: raw & Self::IRQ_ENABLE != 0,
            irq_select: raw & Self::IRQ_MASK,
        }
    }
}

/// Three-bit IRQ selector for a system IRQ line. Unknown lines select 15.
pub const fn irq_select_for_line(irq_line: u8) -> u8 {
    match irq_line {
        3 => 0,
        4 => 1,
        5 => 2,
        7 => 3,
        10 => 4,
        11 => 5,
        12 => 6,
        _ => 7,
    }
}

// ============================================================================
// MMA Registers
// ============================================================================

pub const MMA_STATUS: u8 = 0x00;
pub const MMA_PLAYBACK: u8 = 0x09;
pub const MMA_VOLUME: u8 = 0x0A;
pub const MMA_PCM_DATA: u8 = 0x0B;
pub const MMA_FORMAT: u8 = 0x0C;
pub const MMA_MIDI_CONTROL: u8 = 0x0D;
pub const MMA_MIDI_DATA: u8 = 0x0E;

/// Depth of the PCM FIFO in bytes.
pub const PCM_FIFO_SIZE: usize = 128;

/// Depth of the MIDI receive FIFO in bytes.
pub const MIDI_FIFO_SIZE: usize = 16;

/// Hardware sample clocks, in descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Hz44100 = 0,
    Hz22050 = 1,
    Hz11025 = 2,
    Hz7350 = 3,
}

impl SampleRate {
    pub const ALL: [SampleRate; 4] = [
        SampleRate::Hz44100,
        SampleRate::Hz22050,
        SampleRate::Hz11025,
        SampleRate::Hz7350,
    ];

    pub const fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            44100 => Some(Self::Hz44100),
            22050 => Some(Self::Hz22050),
            11025 => Some(Self::Hz11025),
            7350 => Some(Self::Hz7350),
            _ => None,
        }
    }

    pub const fn hz(self) -> u32 {
        match self {
            Self::Hz44100 => 44100,
            Self::Hz22050 => 22050,
            Self::Hz11025 => 11025,
            Self::Hz7350 => 7350,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Playback/record control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackControl {
    pub reset: bool,
    pub right: bool,
    pub left: bool,
    pub rate: SampleRate,
    pub pcm: bool,
    /// true = render (playback), false = capture
    pub playback: bool,
    pub go: bool,
}

impl PlaybackControl {
    const RST: u8 = 0x80;
    const RIGHT: u8 = 0x40;
    const LEFT: u8 = 0x20;
    const FREQ_SHIFT: u8 = 3;
    const FREQ_MASK: u8 = 0x18;
    const PCM: u8 = 0x04;
    const PLAYBACK: u8 = 0x02;
    const GO: u8 = 0x01;

    /// Engine reset pulse value.
    pub const RESET: u8 = Self::RST;
    pub const IDLE: u8 = 0x00;

    /// Both channels enabled, PCM mode, go asserted.
    pub const fn start(rate: SampleRate, playback: bool) -> Self {
        Self {
            reset: false,
            right: true,
            left: true,
            rate,
            pcm: true,
            playback,
            go: true,
        }
    }

    pub const fn encode(&self) -> u8 {
        let mut raw = self.rate.code() << Self::FREQ_SHIFT;
        if self.reset {
            raw |= Self::RST;
        }
        if self.right {
            raw |= Self::RIGHT;
        }
        if self.left {
            raw |= Self::LEFT;
        }
        if self.pcm {
            raw |= Self::PCM;
        }
        if self.playback {
            raw |= Self::PLAYBACK;
        }
        if self.go {
            raw |= Self::GO;
        }
        raw
    }

    pub const fn decode(raw: u8) -> Self {
        let rate = match (raw & Self::FREQ_MASK) >> Self::FREQ_SHIFT {
            0 => SampleRate::Hz44100,
            1 => SampleRate::Hz22050,
            2 => SampleRate::Hz11025,
            _ => SampleRate::Hz7350,
        };
        Self {
            reset: raw & Self::RST != 0,
            right: raw & Self::RIGHT != 0,
            left: raw & Self::LEFT != 0,
            rate,
            pcm: raw & Self::PCM != 0,
            playback: raw & Self::PLAYBACK != 0,
            go: raw & Self::GO != 0,
        }
    }
}

/// Sample packing on the FIFO data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Bits8 = 0,
    Bits12Packed1 = 1,
    /// 12-bit samples sent as two bytes, low byte first
    Bits12Packed2 = 2,
}

/// FIFO fill level (bytes) at which the FIFO interrupt fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoThreshold {
    B112 = 0,
    B96 = 1,
    B80 = 2,
    B64 = 3,
    B48 = 4,
    B32 = 5,
    B16 = 6,
}

pub const DEFAULT_FIFO_THRESHOLD: FifoThreshold = FifoThreshold::B32;

/// Format / FIFO-threshold / transfer-mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatControl {
    pub interleave: bool,
    pub data_format: DataFormat,
    pub threshold: FifoThreshold,
    /// Mask the FIFO interrupt
    pub mask_fifo_irq: bool,
    /// Hardware block transfer (DMA) enable
    pub dma_enable: bool,
}

impl FormatControl {
    const ILV: u8 = 0x80;
    const DATA_SHIFT: u8 = 5;
    const THRESHOLD_SHIFT: u8 = 2;
    const MSK: u8 = 0x02;
    const ENB: u8 = 0x01;

    /// 8-bit path: hardware block transfer, FIFO interrupt masked.
    pub const fn block_transfer(threshold: FifoThreshold) -> Self {
        Self {
            interleave: false,
            data_format: DataFormat::Bits8,
            threshold,
            mask_fifo_irq: true,
            dma_enable: true,
        }
    }

    /// 16-bit path: software-fed, FIFO interrupt drives the service routine.
    pub const fn software_fed(threshold: FifoThreshold) -> Self {
        Self {
            interleave: false,
            data_format: DataFormat::Bits12Packed2,
            threshold,
            mask_fifo_irq: false,
            dma_enable: false,
        }
    }

    /// Paused: transfer mode cleared, FIFO interrupt masked.
    pub const fn paused(data_format: DataFormat, threshold: FifoThreshold) -> Self {
        Self {
            interleave: false,
            data_format,
            threshold,
            mask_fifo_irq: true,
            dma_enable: false,
        }
    }

    /// Stopped: only the FIFO interrupt mask.
    pub const fn stopped() -> Self {
        Self {
            interleave: false,
            data_format: DataFormat::Bits8,
            threshold: FifoThreshold::B112,
            mask_fifo_irq: true,
            dma_enable: false,
        }
    }

    pub const fn encode(&self) -> u8 {
        let mut raw = ((self.data_format as u8) << Self::DATA_SHIFT)
            | ((self.threshold as u8) << Self::THRESHOLD_SHIFT);
        if self.interleave {
            raw |= Self::ILV;
        }
        if self.mask_fifo_irq {
            raw |= Self::MSK;
        }
        if self.dma_enable {
            raw |= Self::ENB;
        }
        raw
    }
}

bitflags! {
    /// MIDI 制御レジスタ
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MidiControl: u8 {
        /// Mask receive-overrun interrupt
        const MSK_POV = 0x80;
        /// Mask MIDI-overrun interrupt
        const MSK_MOV = 0x40;
        const TRS_RST = 0x20;
        /// Mask transmit-FIFO interrupt
        const MSK_TRQ = 0x10;
        const RCV_RST = 0x08;
        /// Mask receive-FIFO interrupt
        const MSK_RRQ = 0x04;
    }
}

impl MidiControl {
    /// Operating configuration: only the receive-FIFO interrupt unmasked.
    pub const OPERATING: Self = Self::MSK_POV.union(Self::MSK_MOV).union(Self::MSK_TRQ);
    /// Transmit and receive held in reset with the operating mask.
    pub const RESET: Self = Self::OPERATING.union(Self::TRS_RST).union(Self::RCV_RST);
    /// Every MIDI interrupt masked.
    pub const MASK_ALL: Self = Self::OPERATING.union(Self::MSK_RRQ);
    /// Reset with every interrupt masked (teardown).
    pub const RESET_MASKED: Self = Self::RESET.union(Self::MSK_RRQ);
}
