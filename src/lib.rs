// ============================================================================
// src/lib.rs - Ad Lib Gold Driver Core
// ============================================================================
//!
//! # Ad Lib Gold ドライバコア
//!
//! バンク切り替え式の制御チップ、MMA (デジタルオーディオ/MIDI コプロセッサ)、
//! OPL3 FM シンセサイザを1本の共有IRQで扱うサウンドカードのドライバ。
//!
//! ## 構成
//! - `io::audio::adapter`: 共有ハードウェアファサード + 割り込みディスパッチャ
//! - `io::audio::wave`: 8-bit DMA / 16-bit PIO ストリーミングエンジン
//! - `io::audio::midi`: 割り込み駆動のMIDIトランスポート
//! - `io::audio::device`: 起動フローと電源遷移の順序
//! - `sim`: テスト用のレジスタレベルのカードモデル (`sim` フィーチャー)

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod io;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod sync;

pub use error::{AudioError, AudioResult};
pub use io::audio::{
    install_adapter, AdapterCommon, DevicePowerState, MidiMiniport, ResourceList, Subdevices,
    WaveMiniport,
};
pub use io::port::PortIo;
