// ============================================================================
// src/io/audio/adapter.rs - Hardware Access Facade & Interrupt Dispatcher
// ============================================================================
//!
//! # アダプタ共通部
//!
//! カードのポートウィンドウ、25 エントリのミキサーシャドウキャッシュ、
//! カード識別情報、電源状態、割り込み同期ドメインを一括して所有する。
//! ウェーブ/MIDI エンジンはすべてのハードウェアアクセスをここ経由で行う。
//!
//! ## 割り込み
//! 1本の共有IRQを [`AdapterCommon::service_interrupt`] が受け、
//! ステータスのアクティブロービットで各サブシステムへ振り分ける。
//! エンジンは登録スロットを通じて通知を受けるだけで、所有関係はない。

use alloc::boxed::Box;
use alloc::sync::Arc;
#[cfg(feature = "stats")]
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::error::{AudioError, AudioResult};
use crate::io::port::PortIo;
use crate::sync::IrqMutex;

use super::bank::BankMux;
use super::persist::{self, MixerStore, MIXER_DEFAULTS};
use super::regs::*;

/// OPL3 address/data write recovery time.
pub const FM_WRITE_STALL_US: u32 = 23;

/// MMA address/data write recovery time.
pub const MMA_WRITE_STALL_US: u32 = 1;

/// On-card EEPROM restore has no completion flag.
pub const EEPROM_RESTORE_STALL_US: u32 = 2500;

// ============================================================================
// Resources / Power
// ============================================================================

/// Hardware resources assigned to the card at install time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceList {
    pub io_base: Option<u16>,
    pub irq: Option<u8>,
    pub dma: Option<u8>,
}

impl ResourceList {
    pub const fn new(io_base: u16, irq: u8, dma: u8) -> Self {
        Self {
            io_base: Some(io_base),
            irq: Some(irq),
            dma: Some(dma),
        }
    }

    pub fn port_range_count(&self) -> usize {
        self.io_base.is_some() as usize
    }

    pub fn interrupt_count(&self) -> usize {
        self.irq.is_some() as usize
    }

    pub fn dma_count(&self) -> usize {
        self.dma.is_some() as usize
    }
}

/// Four-level device power ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DevicePowerState {
    /// D0
    FullPower,
    /// D1
    Standby1,
    /// D2
    Standby2,
    /// D3
    Off,
}

impl DevicePowerState {
    /// Hardware writes are only issued at D1 or above.
    pub fn allows_hardware_access(self) -> bool {
        self <= DevicePowerState::Standby1
    }
}

// ============================================================================
// Subsystem Registration
// ============================================================================

/// Gated access to the MMA register file.
pub trait MmaAccess {
    /// Returns 0 while the device is powered down.
    fn read_mma(&mut self, register: u8) -> u8;

    /// Returns whether the write reached hardware.
    fn write_mma(&mut self, register: u8, value: u8) -> bool;
}

/// Wave engine hook invoked from interrupt context. Must only signal.
pub trait WaveInterruptSink: Send + Sync {
    fn on_sample_interrupt(&self);
}

/// MIDI engine hook invoked from interrupt context when the receive FIFO
/// has data. Runs with the synchronization domain held.
pub trait MidiInterruptSink: Send + Sync {
    fn on_receive_interrupt(&self, mma: &mut dyn MmaAccess);
}

/// Dispatch targets. Set and cleared only inside the synchronization domain.
#[derive(Default)]
struct Registrations {
    wave: Option<Arc<dyn WaveInterruptSink>>,
    midi: Option<Arc<dyn MidiInterruptSink>>,
}

/// ISR outcome, for interrupt-line sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    Handled,
    NotHandled,
}

// ============================================================================
// Hardware (inside the synchronization domain)
// ============================================================================

/// Card state reachable only with the synchronization domain held.
pub struct AdapterHardware<P: PortIo> {
    mux: BankMux<P>,
    cache: [u8; CTRL_REG_COUNT],
    power: DevicePowerState,
    id: CardId,
}

impl<P: PortIo> AdapterHardware<P> {
    fn new(mux: BankMux<P>, raw_id: u8) -> Self {
        let mut cache = [0u8; CTRL_REG_COUNT];
        cache[CTRL_CONTROL_ID as usize] = raw_id;
        Self {
            mux,
            cache,
            power: DevicePowerState::FullPower,
            id: CardId::decode(raw_id),
        }
    }

    pub fn base(&self) -> u16 {
        self.mux.base()
    }

    pub fn card_id(&self) -> CardId {
        self.id
    }

    pub fn power_state(&self) -> DevicePowerState {
        self.power
    }

    fn hardware_enabled(&self) -> bool {
        self.power.allows_hardware_access()
    }

    pub fn stall_us(&mut self, us: u32) {
        self.mux.stall_us(us);
    }

    /// Cache lookup. Out-of-range indices read as 0.
    pub fn read_control(&self, index: u8) -> u8 {
        self.cache.get(index as usize).copied().unwrap_or(0)
    }

    /// Update the cache, and the hardware when powered.
    ///
    /// A ready-poll timeout is not reported; the cache keeps the new value.
    pub fn write_control(&mut self, index: u8, value: u8) {
        let Some(slot) = self.cache.get_mut(index as usize) else {
            return;
        };
        *slot = value;

        if self.power.allows_hardware_access() {
            if let Err(e) = self.mux.write_register(index, value) {
                log::debug!("[ALG] control register {:#04x} write: {}", index, e);
            }
        }
    }

    /// Select the control bank and wait for it to accept commands.
    pub fn select_control_bank(&mut self) -> AudioResult<()> {
        if !self.hardware_enabled() {
            return Err(AudioError::PoweredOff);
        }
        self.mux.select_bank(Bank::Control);
        self.mux.await_ready()
    }

    /// Hand the shared port pair back to the FM synthesizer.
    pub fn select_fm_bank(&mut self) {
        if self.hardware_enabled() {
            self.mux.select_bank(Bank::Fm1);
        }
    }

    /// OPL3 register write. Addresses below 0x100 use bank 0 (+0/+1),
    /// the rest use bank 1 on the shared pair (+2/+3).
    pub fn write_fm(&mut self, address: u16, data: u8) {
        if !self.hardware_enabled() {
            return;
        }
        if address < 0x100 {
            self.mux.write_port(PORT_FM0_ADDRESS, address as u8);
            self.mux.stall_us(FM_WRITE_STALL_US);
            self.mux.write_port(PORT_FM0_DATA, data);
            self.mux.stall_us(FM_WRITE_STALL_US);
        } else {
            self.mux.select_bank(Bank::Fm1);
            self.mux.write_port(PORT_CONTROL_ADDRESS, (address & 0xFF) as u8);
            self.mux.stall_us(FM_WRITE_STALL_US);
            self.mux.write_port(PORT_CONTROL_DATA, data);
            self.mux.stall_us(FM_WRITE_STALL_US);
        }
    }

    /// Power transition.
    ///
    /// Entering full power commits the state first and then replays the
    /// mixer range from the cache, in index order. Same-state requests are
    /// no-ops.
    pub fn set_power_state(&mut self, state: DevicePowerState) {
        if state == self.power {
            return;
        }
        self.power = state;
        if state == DevicePowerState::FullPower {
            for index in MIXER_FIRST..=MIXER_LAST {
                let value = self.read_control(index);
                self.write_control(index, value);
            }
        }
    }

    /// Trigger the card to store the control registers in its EEPROM.
    pub fn save_to_eeprom(&mut self) -> AudioResult<()> {
        if !self.hardware_enabled() {
            return Err(AudioError::PoweredOff);
        }
        self.mux.select_bank(Bank::Control);
        let _ = self.mux.await_ready();
        self.mux.write_index(CTRL_CONTROL_ID);
        self.mux.write_data(EepromCommand::SAVE.bits());
        let _ = self.mux.await_ready();
        self.mux.select_bank(Bank::Fm1);
        Ok(())
    }

    /// Trigger an EEPROM restore and re-read every control register.
    pub fn restore_from_eeprom(&mut self) -> AudioResult<()> {
        if !self.hardware_enabled() {
            return Err(AudioError::PoweredOff);
        }
        self.mux.select_bank(Bank::Control);
        let _ = self.mux.await_ready();
        self.mux.write_index(CTRL_CONTROL_ID);
        self.mux.write_data(EepromCommand::RESTORE.bits());

        self.mux.stall_us(EEPROM_RESTORE_STALL_US);
        let _ = self.mux.await_ready();

        for index in 0..CTRL_REG_COUNT as u8 {
            self.mux.write_index(index);
            self.cache[index as usize] = self.mux.read_data();
        }
        self.mux.select_bank(Bank::Fm1);

        self.id = CardId::decode(self.cache[CTRL_CONTROL_ID as usize]);
        Ok(())
    }

    fn write_mixer_defaults(&mut self) {
        for default in MIXER_DEFAULTS.iter() {
            self.write_control(default.register, default.value);
        }
    }
}

impl<P: PortIo> MmaAccess for AdapterHardware<P> {
    fn read_mma(&mut self, register: u8) -> u8 {
        if !self.hardware_enabled() {
            return 0;
        }
        self.mux.write_port(PORT_MMA0_ADDRESS, register);
        self.mux.stall_us(MMA_WRITE_STALL_US);
        self.mux.read_port(PORT_MMA0_DATA)
    }

    fn write_mma(&mut self, register: u8, value: u8) -> bool {
        if !self.hardware_enabled() {
            return false;
        }
        self.mux.write_port(PORT_MMA0_ADDRESS, register);
        self.mux.stall_us(MMA_WRITE_STALL_US);
        self.mux.write_port(PORT_MMA0_DATA, value);
        self.mux.stall_us(MMA_WRITE_STALL_US);
        true
    }
}

struct Shared<P: PortIo> {
    hw: AdapterHardware<P>,
    slots: Registrations,
}

// ============================================================================
// Facade
// ============================================================================

#[cfg(feature = "stats")]
#[derive(Default)]
struct InterruptStats {
    handled: AtomicU64,
    not_handled: AtomicU64,
}

/// Shared hardware facade for one card.
pub struct AdapterCommon<P: PortIo> {
    shared: IrqMutex<Shared<P>>,
    store: Mutex<Option<Box<dyn MixerStore>>>,
    irq: u8,
    #[cfg(feature = "stats")]
    stats: InterruptStats,
}

impl<P: PortIo> AdapterCommon<P> {
    /// Probe the card and bring the control chip to a known state.
    ///
    /// Runs before the interrupt is connected, so the handshake needs no
    /// synchronization yet.
    pub fn init(
        io: P,
        resources: &ResourceList,
        store: Option<Box<dyn MixerStore>>,
    ) -> AudioResult<Self> {
        let (Some(base), Some(irq)) = (resources.io_base, resources.irq) else {
            log::warn!(
                "[ALG] insufficient resources: {} port ranges, {} interrupts",
                resources.port_range_count(),
                resources.interrupt_count()
            );
            return Err(AudioError::ConfigurationError);
        };

        log::info!("[ALG] probing card at {:#x}, IRQ {}", base, irq);
        let mut mux = BankMux::new(io, base);

        mux.select_bank(Bank::Control);
        if mux.await_ready().is_err() {
            mux.select_bank(Bank::Fm1);
            log::warn!("[ALG] control chip never became ready");
            return Err(AudioError::DeviceAbsent);
        }
        mux.write_index(CTRL_CONTROL_ID);
        let raw_id = mux.read_data();
        mux.select_bank(Bank::Fm1);

        let mut hw = AdapterHardware::new(mux, raw_id);
        let Some(model) = hw.id.model() else {
            log::warn!("[ALG] unknown card model {:#x}", hw.id.model_code);
            return Err(AudioError::DeviceAbsent);
        };
        log::info!(
            "[ALG] found {:?} (telephone: {}, surround: {}, SCSI: {})",
            model,
            hw.id.telephone,
            hw.id.surround,
            hw.id.scsi
        );

        let mut store = store;
        Self::control_reg_reset(&mut hw, &mut store);

        Ok(Self {
            shared: IrqMutex::new(Shared {
                hw,
                slots: Registrations::default(),
            }),
            store: Mutex::new(store),
            irq,
            #[cfg(feature = "stats")]
            stats: InterruptStats::default(),
        })
    }

    /// Restore the mixer from the store (or defaults) and clear the reserved register.
    fn control_reg_reset(hw: &mut AdapterHardware<P>, store: &mut Option<Box<dyn MixerStore>>) {
        let restored = match store.as_mut() {
            Some(store) => {
                persist::restore_mixer(store.as_mut(), |reg, value| hw.write_control(reg, value))
            }
            None => Err(AudioError::StoreFailure),
        };
        if restored.is_err() {
            log::info!("[ALG] no stored mixer settings, using defaults");
            hw.write_mixer_defaults();
        }
        hw.write_control(CTRL_RESERVED, RESERVED_VALUE);
    }

    // ========================================================================
    // Synchronization domain
    // ========================================================================

    /// Run `f` mutually exclusive with the interrupt handler.
    pub fn synchronize<R>(&self, f: impl FnOnce(&mut AdapterHardware<P>) -> R) -> R {
        let mut shared = self.shared.lock();
        f(&mut shared.hw)
    }

    pub fn read_control(&self, index: u8) -> u8 {
        self.synchronize(|hw| hw.read_control(index))
    }

    pub fn write_control(&self, index: u8, value: u8) {
        self.synchronize(|hw| hw.write_control(index, value))
    }

    pub fn write_fm(&self, address: u16, data: u8) {
        self.synchronize(|hw| hw.write_fm(address, data))
    }

    pub fn read_mma(&self, register: u8) -> u8 {
        self.synchronize(|hw| hw.read_mma(register))
    }

    pub fn write_mma(&self, register: u8, value: u8) -> bool {
        self.synchronize(|hw| hw.write_mma(register, value))
    }

    pub fn power_state(&self) -> DevicePowerState {
        self.synchronize(|hw| hw.power_state())
    }

    pub fn set_power_state(&self, state: DevicePowerState) {
        log::debug!("[ALG] power state -> {:?}", state);
        self.synchronize(|hw| hw.set_power_state(state))
    }

    pub fn save_to_eeprom(&self) -> AudioResult<()> {
        self.synchronize(|hw| hw.save_to_eeprom())
    }

    pub fn restore_from_eeprom(&self) -> AudioResult<()> {
        self.synchronize(|hw| hw.restore_from_eeprom())
    }

    pub fn card_id(&self) -> CardId {
        self.synchronize(|hw| hw.card_id())
    }

    pub fn base(&self) -> u16 {
        self.synchronize(|hw| hw.base())
    }

    pub fn irq(&self) -> u8 {
        self.irq
    }

    /// Flush the tracked mixer registers to the persistent store.
    pub fn save_mixer_settings(&self) -> AudioResult<()> {
        let cache = self.synchronize(|hw| hw.cache);
        let mut store = self.store.lock();
        match store.as_mut() {
            Some(store) => persist::save_mixer(store.as_mut(), |reg| cache[reg as usize]),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Registration slots
    // ========================================================================

    pub fn set_wave_sink(&self, sink: Option<Arc<dyn WaveInterruptSink>>) {
        self.shared.lock().slots.wave = sink;
    }

    pub fn set_midi_sink(&self, sink: Option<Arc<dyn MidiInterruptSink>>) {
        self.shared.lock().slots.midi = sink;
    }

    // ========================================================================
    // Interrupt Dispatcher
    // ========================================================================

    /// The card's interrupt service routine.
    pub fn service_interrupt(&self) -> InterruptOutcome {
        let mut guard = self.shared.lock();
        let Shared { hw, slots } = &mut *guard;

        let status = hw.mux.snapshot_status();
        if status.no_source_pending() {
            #[cfg(feature = "stats")]
            self.stats.not_handled.fetch_add(1, Ordering::Relaxed);
            return InterruptOutcome::NotHandled;
        }

        #[cfg(feature = "verbose_logging")]
        log::trace!("[ALG] ISR status {:#04x}", status.bits());

        if status.is_pending(ControlStatus::SMP_IRQ) {
            // Auto-clears both the PCM and MIDI-receive bits: read once.
            let mma = MmaStatus::from_bits_retain(hw.mux.read_port(PORT_MMA0_ADDRESS));

            if let Some(wave) = slots.wave.as_deref() {
                wave.on_sample_interrupt();
            }
            if mma.contains(MmaStatus::RRQ) {
                if let Some(midi) = slots.midi.as_deref() {
                    midi.on_receive_interrupt(hw);
                }
            }
        }

        if status.is_pending(ControlStatus::FM_IRQ) {
            let _ = hw.mux.read_port(PORT_FM0_ADDRESS);
        }

        #[cfg(feature = "stats")]
        self.stats.handled.fetch_add(1, Ordering::Relaxed);
        InterruptOutcome::Handled
    }

    /// (handled, not handled) interrupt counts.
    #[cfg(feature = "stats")]
    pub fn interrupt_counts(&self) -> (u64, u64) {
        (
            self.stats.handled.load(Ordering::Relaxed),
            self.stats.not_handled.load(Ordering::Relaxed),
        )
    }
}

impl<P: PortIo> Drop for AdapterCommon<P> {
    fn drop(&mut self) {
        if let Err(e) = self.save_mixer_settings() {
            log::warn!("[ALG] saving mixer settings failed: {}", e);
        }
    }
}
