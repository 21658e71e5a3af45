// ============================================================================
// src/io/audio/midi.rs - MIDI Transport Engine
// ============================================================================
//!
//! # MIDI ミニポート
//!
//! MMA 内蔵の MIDI UART を使った生バイトストリームの送受信。
//!
//! - 受信: ISR が受信 FIFO (16 バイト) を読み出してリングバッファへ積む。
//!   割り込み1回につき通知は最大1回
//! - 送信: 同期ドメイン内で最大16バイトを直接 FIFO へ書き込む。
//!   ソフトウェア送信キューは持たない
//!
//! リングバッファは ISR が唯一の生産者、ストリームの read が唯一の消費者。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use spin::Mutex;

use crate::error::{AudioError, AudioResult};
use crate::io::port::PortIo;
use crate::sync::ServiceGroup;

use super::adapter::{AdapterCommon, AdapterHardware, DevicePowerState, MidiInterruptSink, MmaAccess};
use super::regs::*;
use super::wave::KsState;

/// Receive ring capacity. One slot stays empty to tell full from empty.
pub const MIDI_RING_SIZE: usize = 256;

/// Bytes drained per interrupt (one hardware FIFO).
pub const MIDI_DRAIN_BUDGET: usize = MIDI_FIFO_SIZE;

/// Bytes written per transmit call (one hardware FIFO).
pub const MIDI_TX_CHUNK: usize = MIDI_FIFO_SIZE;

/// Consecutive zero-byte writes before a transmit fails for good.
pub const MIDI_TX_RETRY_LIMIT: u32 = 100;

// ============================================================================
// Ring Buffer
// ============================================================================

/// Lock-free single-producer/single-consumer byte ring.
pub struct MidiRingBuffer {
    buffer: [AtomicU8; MIDI_RING_SIZE],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl MidiRingBuffer {
    pub const fn new() -> Self {
        const ZERO: AtomicU8 = AtomicU8::new(0);
        Self {
            buffer: [ZERO; MIDI_RING_SIZE],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Producer side. Returns false and drops the byte when full.
    pub fn push(&self, byte: u8) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let next_tail = (tail + 1) % MIDI_RING_SIZE;

        if next_tail == self.head.load(Ordering::Acquire) {
            return false; // Full
        }

        self.buffer[tail].store(byte, Ordering::Relaxed);
        self.tail.store(next_tail, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<u8> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None; // Empty
        }

        let byte = self.buffer[head].load(Ordering::Relaxed);
        self.head.store((head + 1) % MIDI_RING_SIZE, Ordering::Release);
        Some(byte)
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + MIDI_RING_SIZE - head) % MIDI_RING_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        (self.tail.load(Ordering::Acquire) + 1) % MIDI_RING_SIZE
            == self.head.load(Ordering::Acquire)
    }

    /// Discard everything. Caller must exclude the producer.
    fn clear(&self) {
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }
}

impl Default for MidiRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Interrupt side
// ============================================================================

struct MidiShared {
    ring: MidiRingBuffer,
    capture_open: AtomicBool,
    capture_running: AtomicBool,
    service: ServiceGroup,
    dropped: AtomicU32,
}

impl MidiInterruptSink for MidiShared {
    fn on_receive_interrupt(&self, mma: &mut dyn MmaAccess) {
        let accept = self.capture_open.load(Ordering::Acquire)
            && self.capture_running.load(Ordering::Acquire);
        let mut new_bytes = false;

        for _ in 0..MIDI_DRAIN_BUDGET {
            let status = MmaStatus::from_bits_retain(mma.read_mma(MMA_STATUS));
            if !status.contains(MmaStatus::RRQ) {
                break;
            }
            let byte = mma.read_mma(MMA_MIDI_DATA);
            if !accept {
                continue;
            }
            if self.ring.push(byte) {
                new_bytes = true;
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "verbose_logging")]
                log::trace!("[ALG-MIDI] receive overflow, dropped {:#04x}", byte);
            }
        }

        if new_bytes {
            self.service.request();
        }
    }
}

/// Reset both UART halves, then release reset with receive interrupts enabled.
fn reset_and_configure<P: PortIo>(hw: &mut AdapterHardware<P>) -> bool {
    hw.write_mma(MMA_MIDI_CONTROL, MidiControl::RESET.bits())
        && hw.write_mma(MMA_MIDI_CONTROL, MidiControl::OPERATING.bits())
}

/// Read and discard whatever is left in the receive FIFO.
fn drain_stale<P: PortIo>(hw: &mut AdapterHardware<P>) -> usize {
    let mut drained = 0;
    while drained < MIDI_DRAIN_BUDGET {
        let status = MmaStatus::from_bits_retain(hw.read_mma(MMA_STATUS));
        if !status.contains(MmaStatus::RRQ) {
            break;
        }
        hw.read_mma(MMA_MIDI_DATA);
        drained += 1;
    }
    drained
}

// ============================================================================
// Miniport
// ============================================================================

#[derive(Default)]
struct OpenStreams {
    capture: bool,
    render: bool,
}

/// MIDI engine for one card.
pub struct MidiMiniport<'a, P: PortIo> {
    adapter: &'a AdapterCommon<P>,
    shared: Arc<MidiShared>,
    streams: Mutex<OpenStreams>,
    power: Mutex<DevicePowerState>,
}

impl<'a, P: PortIo> MidiMiniport<'a, P> {
    pub fn new(adapter: &'a AdapterCommon<P>) -> AudioResult<Self> {
        let drained = adapter.synchronize(|hw| {
            if !reset_and_configure(hw) {
                return Err(AudioError::PoweredOff);
            }
            Ok(drain_stale(hw))
        })?;
        if drained > 0 {
            log::debug!("[ALG-MIDI] discarded {} stale bytes", drained);
        }

        let shared = Arc::new(MidiShared {
            ring: MidiRingBuffer::new(),
            capture_open: AtomicBool::new(false),
            capture_running: AtomicBool::new(false),
            service: ServiceGroup::new(),
            dropped: AtomicU32::new(0),
        });
        adapter.set_midi_sink(Some(shared.clone()));

        log::info!("[ALG-MIDI] ready");
        Ok(Self {
            adapter,
            shared,
            streams: Mutex::new(OpenStreams::default()),
            power: Mutex::new(DevicePowerState::FullPower),
        })
    }

    /// Latch raised when new receive data is buffered.
    pub fn service_group(&self) -> &ServiceGroup {
        &self.shared.service
    }

    /// Bytes lost to receive-ring overflow.
    pub fn dropped_bytes(&self) -> u32 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> usize {
        self.shared.ring.len()
    }

    /// Deferred service. Buffered data is discarded while no capture
    /// stream is open.
    pub fn service(&self) {
        self.shared.service.take_pending();
        if !self.shared.capture_open.load(Ordering::Acquire) {
            self.adapter.synchronize(|_| self.shared.ring.clear());
        }
    }

    pub fn power_change_state(&self, new_state: DevicePowerState) {
        let mut power = self.power.lock();
        let old_state = *power;
        log::debug!("[ALG-MIDI] power {:?} -> {:?}", old_state, new_state);

        if new_state == DevicePowerState::FullPower {
            if old_state != DevicePowerState::FullPower {
                self.adapter.synchronize(|hw| reset_and_configure(hw));
            }
        } else if old_state == DevicePowerState::FullPower {
            self.adapter
                .write_mma(MMA_MIDI_CONTROL, MidiControl::MASK_ALL.bits());
        }
        *power = new_state;
    }

    /// Open a stream. At most one capture and one render stream.
    pub fn new_stream(&self, capture: bool) -> AudioResult<MidiStream<'_, 'a, P>> {
        let mut streams = self.streams.lock();
        let open = if capture {
            &mut streams.capture
        } else {
            &mut streams.render
        };
        if *open {
            log::debug!("[ALG-MIDI] too many {} streams", if capture { "capture" } else { "render" });
            return Err(AudioError::DeviceBusy);
        }
        *open = true;
        if capture {
            self.shared.capture_open.store(true, Ordering::Release);
        }

        Ok(MidiStream {
            miniport: self,
            capture,
            failed_tries: 0,
        })
    }
}

impl<P: PortIo> Drop for MidiMiniport<'_, P> {
    fn drop(&mut self) {
        self.adapter.synchronize(|hw| {
            hw.write_mma(MMA_MIDI_CONTROL, MidiControl::RESET_MASKED.bits());
            hw.write_mma(MMA_MIDI_CONTROL, MidiControl::MASK_ALL.bits());
        });
        self.adapter.set_midi_sink(None);
        log::debug!("[ALG-MIDI] unregistered");
    }
}

// ============================================================================
// Stream
// ============================================================================

pub struct MidiStream<'m, 'a, P: PortIo> {
    miniport: &'m MidiMiniport<'a, P>,
    capture: bool,
    failed_tries: u32,
}

impl<P: PortIo> MidiStream<'_, '_, P> {
    pub fn is_capture(&self) -> bool {
        self.capture
    }

    /// Capture streams get the receive latch; render streams have none.
    pub fn service_group(&self) -> Option<&ServiceGroup> {
        self.capture.then_some(&self.miniport.shared.service)
    }

    /// Only capture streams react. Stopping discards buffered input.
    pub fn set_state(&self, state: KsState) {
        if !self.capture {
            return;
        }
        let shared = &self.miniport.shared;
        let running = state == KsState::Run;
        shared.capture_running.store(running, Ordering::Release);
        if state == KsState::Stop {
            self.miniport.adapter.synchronize(|_| shared.ring.clear());
        }
    }

    /// Copy buffered input into `buffer`. Returns the byte count.
    pub fn read(&self, buffer: &mut [u8]) -> AudioResult<usize> {
        if !self.capture {
            return Err(AudioError::InvalidParameter);
        }
        let ring = &self.miniport.shared.ring;
        let mut count = 0;
        while count < buffer.len() {
            match ring.pop() {
                Some(byte) => {
                    buffer[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Push up to one FIFO's worth of bytes to the transmitter.
    ///
    /// Returns the number of bytes accepted. After
    /// [`MIDI_TX_RETRY_LIMIT`] consecutive calls that accept nothing the
    /// call fails with [`AudioError::IoDeviceError`].
    pub fn write(&mut self, data: &[u8]) -> AudioResult<usize> {
        if self.capture {
            return Err(AudioError::InvalidParameter);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let chunk = &data[..data.len().min(MIDI_TX_CHUNK)];
        let count = self.miniport.adapter.synchronize(|hw| {
            chunk
                .iter()
                .take_while(|byte| hw.write_mma(MMA_MIDI_DATA, **byte))
                .count()
        });

        if count == 0 {
            self.failed_tries += 1;
            if self.failed_tries >= MIDI_TX_RETRY_LIMIT {
                self.failed_tries = 0;
                log::warn!("[ALG-MIDI] transmitter not accepting data");
                return Err(AudioError::IoDeviceError);
            }
        } else {
            self.failed_tries = 0;
        }
        Ok(count)
    }
}

impl<P: PortIo> Drop for MidiStream<'_, '_, P> {
    fn drop(&mut self) {
        let mut streams = self.miniport.streams.lock();
        if self.capture {
            streams.capture = false;
            let shared = &self.miniport.shared;
            shared.capture_running.store(false, Ordering::Release);
            shared.capture_open.store(false, Ordering::Release);
        } else {
            streams.render = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::audio::adapter::{InterruptOutcome, ResourceList};
    use crate::sim::SimCard;
    use alloc::vec::Vec;

    fn setup(card: &SimCard) -> AdapterCommon<SimCard> {
        AdapterCommon::init(card.clone(), &ResourceList::new(DEFAULT_IO_BASE, 7, 1), None).unwrap()
    }

    #[test]
    fn test_ring_full_exactly_one_short_of_capacity() {
        let ring = MidiRingBuffer::new();
        for n in 0..MIDI_RING_SIZE - 1 {
            assert!(!ring.is_full());
            assert!(ring.push(n as u8));
        }
        assert!(ring.is_full());
        assert!(!ring.push(0xFF));
        assert_eq!(ring.len(), MIDI_RING_SIZE - 1);

        assert_eq!(ring.pop(), Some(0));
        assert!(ring.push(0xAA));
        assert!(ring.is_full());
    }

    #[test]
    fn test_ring_interleaved_never_passes_tail() {
        let ring = MidiRingBuffer::new();
        let mut expected = 0u8;
        let mut next = 0u8;
        for round in 0..1000usize {
            for _ in 0..(round % 7) {
                if ring.push(next) {
                    next = next.wrapping_add(1);
                }
            }
            for _ in 0..(round % 5) {
                match ring.pop() {
                    Some(byte) => {
                        assert_eq!(byte, expected);
                        expected = expected.wrapping_add(1);
                    }
                    None => assert!(ring.is_empty()),
                }
            }
            assert!(ring.len() < MIDI_RING_SIZE);
        }
    }

    #[test]
    fn test_init_resets_then_configures_and_drains() {
        let card = SimCard::new();
        let adapter = setup(&card);
        card.push_midi_rx(&[0xFE; 20]);
        card.clear_log();

        let _midi = MidiMiniport::new(&adapter).unwrap();
        assert_eq!(
            &card.mma_writes()[..2],
            [(MMA_MIDI_CONTROL, 0xF8), (MMA_MIDI_CONTROL, 0xD0)]
        );
        // bounded to one FIFO
        assert_eq!(card.midi_rx_len(), 4);
    }

    #[test]
    fn test_seventeen_bytes_signal_once() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        let stream = midi.new_stream(true).unwrap();
        stream.set_state(KsState::Run);

        let bytes: Vec<u8> = (0..17).collect();
        card.push_midi_rx(&bytes);
        while card.interrupt_asserted() {
            assert_eq!(adapter.service_interrupt(), InterruptOutcome::Handled);
        }

        assert_eq!(midi.buffered(), 17);
        assert_eq!(midi.dropped_bytes(), 0);
        assert_eq!(midi.service_group().signal_count(), 1);

        let mut out = [0u8; 32];
        assert_eq!(stream.read(&mut out), Ok(17));
        assert_eq!(&out[..17], &bytes[..]);
    }

    #[test]
    fn test_receive_discarded_unless_running() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();

        card.push_midi_rx(&[0x90, 0x40, 0x7F]);
        adapter.service_interrupt();
        assert_eq!(card.midi_rx_len(), 0);
        assert_eq!(midi.buffered(), 0);

        let stream = midi.new_stream(true).unwrap();
        stream.set_state(KsState::Pause);
        card.push_midi_rx(&[0x80]);
        adapter.service_interrupt();
        assert_eq!(midi.buffered(), 0);
        assert!(!midi.service_group().is_pending());
    }

    #[test]
    fn test_overflow_drops_without_backpressure() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        let stream = midi.new_stream(true).unwrap();
        stream.set_state(KsState::Run);

        card.push_midi_rx(&[0xF8; 300]);
        while card.interrupt_asserted() {
            adapter.service_interrupt();
        }
        assert_eq!(midi.buffered(), MIDI_RING_SIZE - 1);
        assert_eq!(midi.dropped_bytes(), 300 - (MIDI_RING_SIZE as u32 - 1));
    }

    #[test]
    fn test_stop_clears_buffer() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        let stream = midi.new_stream(true).unwrap();
        stream.set_state(KsState::Run);
        card.push_midi_rx(&[1, 2, 3]);
        adapter.service_interrupt();
        assert_eq!(midi.buffered(), 3);

        stream.set_state(KsState::Stop);
        assert_eq!(midi.buffered(), 0);
    }

    #[test]
    fn test_service_discards_without_capture_stream() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        let stream = midi.new_stream(true).unwrap();
        stream.set_state(KsState::Run);
        card.push_midi_rx(&[1, 2]);
        adapter.service_interrupt();

        midi.service();
        assert_eq!(midi.buffered(), 2);
        assert!(!midi.service_group().is_pending());

        drop(stream);
        midi.service();
        assert_eq!(midi.buffered(), 0);
    }

    #[test]
    fn test_stream_limits_and_direction_checks() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();

        let capture = midi.new_stream(true).unwrap();
        let mut render = midi.new_stream(false).unwrap();
        assert!(matches!(midi.new_stream(true), Err(AudioError::DeviceBusy)));
        assert!(matches!(midi.new_stream(false), Err(AudioError::DeviceBusy)));

        assert!(capture.service_group().is_some());
        assert!(render.service_group().is_none());
        assert_eq!(render.read(&mut [0u8; 4]), Err(AudioError::InvalidParameter));

        drop(render);
        render = midi.new_stream(false).unwrap();
        assert_eq!(render.write(&[0x90]), Ok(1));
    }

    #[test]
    fn test_capture_stream_cannot_write() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        let mut capture = midi.new_stream(true).unwrap();
        assert_eq!(capture.write(&[0x90]), Err(AudioError::InvalidParameter));
    }

    #[test]
    fn test_write_caps_at_one_fifo() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        let mut render = midi.new_stream(false).unwrap();

        let sysex: Vec<u8> = (0..40).collect();
        assert_eq!(render.write(&sysex), Ok(MIDI_TX_CHUNK));
        assert_eq!(card.take_midi_tx(), &sysex[..MIDI_TX_CHUNK]);
        assert_eq!(render.write(&[]), Ok(0));
    }

    #[test]
    fn test_hundredth_zero_byte_write_fails() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        let mut render = midi.new_stream(false).unwrap();

        adapter.set_power_state(DevicePowerState::Standby2);
        for _ in 0..MIDI_TX_RETRY_LIMIT - 1 {
            assert_eq!(render.write(&[0xF8]), Ok(0));
        }
        assert_eq!(render.write(&[0xF8]), Err(AudioError::IoDeviceError));
        // counter restarted
        assert_eq!(render.write(&[0xF8]), Ok(0));

        adapter.set_power_state(DevicePowerState::FullPower);
        assert_eq!(render.write(&[0xF8]), Ok(1));
        adapter.set_power_state(DevicePowerState::Standby2);
        for _ in 0..MIDI_TX_RETRY_LIMIT - 1 {
            assert_eq!(render.write(&[0xF8]), Ok(0));
        }
        assert_eq!(render.write(&[0xF8]), Err(AudioError::IoDeviceError));
    }

    #[test]
    fn test_power_cycle_masks_then_reconfigures() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        card.clear_log();

        midi.power_change_state(DevicePowerState::Standby1);
        adapter.set_power_state(DevicePowerState::Standby1);
        midi.power_change_state(DevicePowerState::Off);
        adapter.set_power_state(DevicePowerState::Off);
        assert_eq!(card.mma_writes(), [(MMA_MIDI_CONTROL, 0xD4)]);

        card.clear_log();
        adapter.set_power_state(DevicePowerState::FullPower);
        midi.power_change_state(DevicePowerState::FullPower);
        assert_eq!(
            card.mma_writes(),
            [(MMA_MIDI_CONTROL, 0xF8), (MMA_MIDI_CONTROL, 0xD0)]
        );
    }

    #[test]
    fn test_teardown_masks_and_unregisters() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let midi = MidiMiniport::new(&adapter).unwrap();
        card.clear_log();
        drop(midi);

        assert_eq!(
            card.mma_writes(),
            [(MMA_MIDI_CONTROL, 0xFC), (MMA_MIDI_CONTROL, 0xD4)]
        );
        card.push_midi_rx(&[0x90]);
        assert_eq!(adapter.service_interrupt(), InterruptOutcome::Handled);
        // nobody drained it
        assert_eq!(card.midi_rx_len(), 1);
    }
}
