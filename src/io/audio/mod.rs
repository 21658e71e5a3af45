// ============================================================================
// src/io/audio/mod.rs - Audio Subsystem Module
// ============================================================================
//!
//! # オーディオサブシステム
//!
//! Ad Lib Gold カードのドライバ。
//!
//! ## モジュール
//! - `regs`: ポート/レジスタ定義とビットパックされたレジスタ
//! - `bank`: 制御チップのバンク切り替え
//! - `adapter`: 共有ハードウェアファサードと割り込みディスパッチ
//! - `persist`: ミキサー設定の永続化
//! - `format`, `dither`, `dma`, `wave`: デジタルオーディオ
//! - `midi`: MIDI 送受信
//! - `device`: 起動と電源遷移

pub mod adapter;
pub mod bank;
pub mod device;
pub mod dither;
pub mod dma;
pub mod format;
pub mod midi;
pub mod persist;
pub mod regs;
pub mod wave;

// Re-export main types
pub use adapter::{
    AdapterCommon, AdapterHardware, DevicePowerState, InterruptOutcome, MidiInterruptSink,
    MmaAccess, ResourceList, WaveInterruptSink,
};
pub use device::{install_adapter, Subdevices};
pub use dma::{DmaChannel, IsaDmaChannel, IsaDmaRegion};
pub use format::{DataRange, SubFormat, WaveFormat};
pub use midi::{MidiMiniport, MidiRingBuffer, MidiStream};
pub use persist::{MemoryStore, MixerStore, StoreOpen};
pub use wave::{Direction, KsState, RunState, WaveMiniport, WaveStream};
