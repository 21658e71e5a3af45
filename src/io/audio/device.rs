// ============================================================================
// src/io/audio/device.rs - Device Install & Power Orchestration
// ============================================================================
//!
//! # デバイス起動
//!
//! 1. [`AdapterCommon::init`] でカードを検出する (失敗は致命的)
//! 2. ウェーブ/MIDI サブデバイスを順に起動する (失敗しても残りは動作する)
//!
//! 電源遷移は、低電力へはエンジン → ファサード、フル電力へはファサード →
//! エンジンの順に通知する。

use alloc::boxed::Box;

use crate::error::AudioResult;
use crate::io::port::PortIo;

use super::adapter::{AdapterCommon, DevicePowerState, ResourceList};
use super::dma::DmaChannel;
use super::midi::MidiMiniport;
use super::persist::MixerStore;
use super::wave::WaveMiniport;

/// Probe the card and bring up the shared facade.
pub fn install_adapter<P: PortIo>(
    io: P,
    resources: &ResourceList,
    store: Option<Box<dyn MixerStore>>,
) -> AudioResult<AdapterCommon<P>> {
    AdapterCommon::init(io, resources, store).inspect_err(|e| {
        log::error!("[ALG] adapter install failed: {}", e);
    })
}

/// The engines installed on one card.
pub struct Subdevices<'a, P: PortIo> {
    adapter: &'a AdapterCommon<P>,
    pub wave: Option<WaveMiniport<'a, P>>,
    pub midi: Option<MidiMiniport<'a, P>>,
}

impl<'a, P: PortIo> Subdevices<'a, P> {
    /// Install the wave and MIDI engines. Either may end up absent.
    pub fn start(
        adapter: &'a AdapterCommon<P>,
        resources: &ResourceList,
        dma: Option<Box<dyn DmaChannel>>,
    ) -> Self {
        let wave = match dma {
            Some(dma) => WaveMiniport::new(adapter, resources, dma)
                .inspect_err(|e| log::warn!("[ALG] wave subdevice not installed: {}", e))
                .ok(),
            None => {
                log::warn!("[ALG] no DMA channel, wave subdevice not installed");
                None
            }
        };
        let midi = MidiMiniport::new(adapter)
            .inspect_err(|e| log::warn!("[ALG] MIDI subdevice not installed: {}", e))
            .ok();

        log::info!(
            "[ALG] device started (wave: {}, MIDI: {})",
            wave.is_some(),
            midi.is_some()
        );
        Self { adapter, wave, midi }
    }

    pub fn adapter(&self) -> &'a AdapterCommon<P> {
        self.adapter
    }

    pub fn power_state(&self) -> DevicePowerState {
        self.adapter.power_state()
    }

    /// Device-wide power transition.
    pub fn set_power_state(&self, state: DevicePowerState) {
        let current = self.adapter.power_state();
        if state == current {
            return;
        }
        log::info!("[ALG] power {:?} -> {:?}", current, state);

        if state == DevicePowerState::FullPower {
            self.adapter.set_power_state(state);
            self.notify_engines(state);
        } else {
            self.notify_engines(state);
            self.adapter.set_power_state(state);
        }
    }

    fn notify_engines(&self, state: DevicePowerState) {
        if let Some(wave) = &self.wave {
            wave.power_change_state(state);
        }
        if let Some(midi) = &self.midi {
            midi.power_change_state(state);
        }
    }

    /// Run whichever deferred services the ISR has requested.
    pub fn service(&self) {
        if let Some(wave) = &self.wave {
            if wave.service_group().is_pending() {
                wave.service();
            }
        }
        if let Some(midi) = &self.midi {
            if midi.service_group().is_pending() {
                midi.service();
            }
        }
    }
}
