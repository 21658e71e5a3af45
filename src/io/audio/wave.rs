// ============================================================================
// src/io/audio/wave.rs - Digital-Audio Streaming Engine
// ============================================================================
//!
//! # ウェーブミニポート
//!
//! MMA を使ったデジタルオーディオの再生/録音。
//!
//! ## 転送方式
//! - 8-bit: ISA DMA によるブロック転送。位置は DMA の残りカウントから求める
//! - 16-bit: FIFO 割り込みごとに遅延サービスがソフトウェアで最大128バイトを転送。
//!   再生はディザで12-bitに量子化、録音は受け取ったバイトをそのまま格納する
//!
//! ## 状態遷移
//! ```text
//! Stopped --> Paused --> Running
//!    ^          ^           |
//!    +----------+-----------+
//! ```
//! Acquire は Paused として扱う。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::error::{AudioError, AudioResult};
use crate::io::port::PortIo;
use crate::sync::ServiceGroup;

use super::adapter::{
    AdapterCommon, AdapterHardware, DevicePowerState, MmaAccess, ResourceList, WaveInterruptSink,
};
use super::dither::Dither;
use super::dma::DmaChannel;
use super::format::{self, DataRange, WaveFormat};
use super::regs::*;

/// First DMA buffer size tried at init.
pub const DMA_BUFFER_MAX: usize = 0x4000;

/// Smallest acceptable DMA buffer (half a page).
pub const DMA_BUFFER_MIN: usize = 0x800;

/// Sampling frequency before any stream is opened.
pub const INITIAL_SAMPLE_RATE: u32 = 44100;

const HUNDRED_NS_PER_SECOND: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Render,
    Capture,
}

/// State requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KsState {
    Stop,
    Acquire,
    Pause,
    Run,
}

/// State the stream is actually in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Paused,
    Running,
}

// ============================================================================
// Interrupt side
// ============================================================================

/// The part of the engine the ISR can reach.
struct WaveIsr {
    service: ServiceGroup,
    running: AtomicU32,
}

impl WaveInterruptSink for WaveIsr {
    fn on_sample_interrupt(&self) {
        if self.running.load(Ordering::Acquire) > 0 {
            self.service.request();
        }
    }
}

// ============================================================================
// Stream bookkeeping
// ============================================================================

struct StreamSlot {
    format: WaveFormat,
    rate: SampleRate,
    state: RunState,
    /// Software position; authoritative on the 16-bit path only.
    position: usize,
    buffer_size: usize,
    dither: Dither,
    notification_interval_ms: u32,
}

impl StreamSlot {
    fn new(format: WaveFormat, rate: SampleRate) -> Self {
        Self {
            format,
            rate,
            state: RunState::Stopped,
            position: 0,
            buffer_size: 0,
            dither: Dither::new(),
            notification_interval_ms: 0,
        }
    }

    fn data_format(&self) -> DataFormat {
        if self.format.is_16bit() {
            DataFormat::Bits12Packed2
        } else {
            DataFormat::Bits8
        }
    }

    fn bytes_per_frame(&self) -> u64 {
        1 << (self.format.is_stereo() as u32 + self.format.is_16bit() as u32)
    }

    /// Feed one FIFO's worth of dithered samples. Returns bytes written.
    fn fill_fifo<P: PortIo>(&mut self, hw: &mut AdapterHardware<P>, buffer: &[u8]) -> usize {
        let size = self.buffer_size.min(buffer.len()) & !1;
        if size == 0 {
            return 0;
        }
        let mut written = 0;
        while written < PCM_FIFO_SIZE {
            if self.position + 1 >= size {
                self.position = 0;
            }
            let sample = i16::from_le_bytes([buffer[self.position], buffer[self.position + 1]]);
            let quantized = self.dither.quantize(sample).to_le_bytes();
            hw.write_mma(MMA_PCM_DATA, quantized[0]);
            hw.write_mma(MMA_PCM_DATA, quantized[1]);

            self.position += 2;
            if self.position >= size {
                self.position = 0;
            }
            written += 2;
        }
        written
    }

    /// Move one FIFO's worth of captured bytes into the buffer verbatim.
    fn drain_fifo<P: PortIo>(&mut self, hw: &mut AdapterHardware<P>, buffer: &mut [u8]) -> usize {
        let size = self.buffer_size.min(buffer.len()) & !1;
        if size == 0 {
            return 0;
        }
        let mut read = 0;
        while read < PCM_FIFO_SIZE {
            if self.position + 1 >= size {
                self.position = 0;
            }
            buffer[self.position] = hw.read_mma(MMA_PCM_DATA);
            buffer[self.position + 1] = hw.read_mma(MMA_PCM_DATA);

            self.position += 2;
            if self.position >= size {
                self.position = 0;
            }
            read += 2;
        }
        read
    }
}

struct WaveCore {
    dma: Box<dyn DmaChannel>,
    render: Option<StreamSlot>,
    capture: Option<StreamSlot>,
    sampling_frequency: u32,
    power: DevicePowerState,
}

impl WaveCore {
    fn slot(&mut self, direction: Direction) -> &mut Option<StreamSlot> {
        match direction {
            Direction::Render => &mut self.render,
            Direction::Capture => &mut self.capture,
        }
    }

    fn other(&self, direction: Direction) -> Option<&StreamSlot> {
        match direction {
            Direction::Render => self.capture.as_ref(),
            Direction::Capture => self.render.as_ref(),
        }
    }

    fn any_open(&self) -> bool {
        self.render.is_some() || self.capture.is_some()
    }
}

// ============================================================================
// Miniport
// ============================================================================

/// Wave engine for one card.
pub struct WaveMiniport<'a, P: PortIo> {
    adapter: &'a AdapterCommon<P>,
    core: Mutex<WaveCore>,
    isr: Arc<WaveIsr>,
}

impl<'a, P: PortIo> WaveMiniport<'a, P> {
    /// Claim the DMA buffer, route IRQ/DMA on the card and register for
    /// interrupt dispatch.
    pub fn new(
        adapter: &'a AdapterCommon<P>,
        resources: &ResourceList,
        mut dma: Box<dyn DmaChannel>,
    ) -> AudioResult<Self> {
        let (Some(_), Some(irq), Some(dma_channel)) =
            (resources.io_base, resources.irq, resources.dma)
        else {
            log::warn!("[ALG-WAVE] port, IRQ and DMA resources are all required");
            return Err(AudioError::ConfigurationError);
        };

        let mut size = DMA_BUFFER_MAX;
        while dma.allocate_buffer(size).is_err() {
            size /= 2;
            if size < DMA_BUFFER_MIN {
                log::warn!("[ALG-WAVE] no DMA buffer available");
                return Err(AudioError::ResourceExhausted);
            }
        }
        log::debug!("[ALG-WAVE] DMA buffer: {} bytes", size);

        let routing = IrqDmaSelect::for_resources(dma_channel, irq);
        adapter.write_control(CTRL_IRQ_DMA0, routing.encode());

        let isr = Arc::new(WaveIsr {
            service: ServiceGroup::new(),
            running: AtomicU32::new(0),
        });
        adapter.set_wave_sink(Some(isr.clone()));

        log::info!("[ALG-WAVE] ready (IRQ {}, DMA {})", irq, dma_channel);
        Ok(Self {
            adapter,
            core: Mutex::new(WaveCore {
                dma,
                render: None,
                capture: None,
                sampling_frequency: INITIAL_SAMPLE_RATE,
                power: DevicePowerState::FullPower,
            }),
            isr,
        })
    }

    /// Latch signalled by the ISR; the platform schedules [`Self::service`] from it.
    pub fn service_group(&self) -> &ServiceGroup {
        &self.isr.service
    }

    pub fn sampling_frequency(&self) -> u32 {
        self.core.lock().sampling_frequency
    }

    pub fn buffer_size(&self) -> usize {
        self.core.lock().dma.buffer_size()
    }

    /// Streams keep their state across power transitions; only the level
    /// is recorded.
    pub fn power_change_state(&self, state: DevicePowerState) {
        let mut core = self.core.lock();
        log::debug!("[ALG-WAVE] power {:?} -> {:?}", core.power, state);
        core.power = state;
    }

    pub fn power_state(&self) -> DevicePowerState {
        self.core.lock().power
    }

    /// Access the cyclic buffer shared with the hardware.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(self.core.lock().dma.buffer_mut())
    }

    /// Best hardware format inside `range`, honouring an open stream's rate.
    pub fn data_range_intersection(&self, range: &DataRange) -> AudioResult<WaveFormat> {
        let core = self.core.lock();
        let pinned = core.any_open().then_some(core.sampling_frequency);
        format::intersect(range, pinned)
    }

    /// Open a stream. One per direction; both share one sample rate.
    pub fn new_stream(
        &self,
        direction: Direction,
        format: WaveFormat,
    ) -> AudioResult<WaveStream<'_, 'a, P>> {
        let mut core = self.core.lock();
        if core.slot(direction).is_some() {
            return Err(AudioError::DeviceBusy);
        }
        let rate = format.validate()?;
        if core.other(direction).is_some() && core.sampling_frequency != rate.hz() {
            log::debug!(
                "[ALG-WAVE] full duplex needs {} Hz, got {}",
                core.sampling_frequency,
                rate.hz()
            );
            return Err(AudioError::InvalidParameter);
        }

        core.sampling_frequency = rate.hz();
        *core.slot(direction) = Some(StreamSlot::new(format, rate));
        log::debug!("[ALG-WAVE] {:?} stream opened: {:?}", direction, format);

        Ok(WaveStream {
            miniport: self,
            direction,
        })
    }

    /// Deferred FIFO service for running 16-bit streams.
    ///
    /// Returns the number of bytes moved through the FIFO.
    pub fn service(&self) -> usize {
        if !self.isr.service.take_pending() {
            return 0;
        }
        let mut guard = self.core.lock();
        let WaveCore {
            dma,
            render,
            capture,
            ..
        } = &mut *guard;

        let mut moved = 0;
        if let Some(stream) = render
            .as_mut()
            .filter(|s| s.state == RunState::Running && s.format.is_16bit())
        {
            let buffer = dma.buffer_mut();
            moved += self.adapter.synchronize(|hw| stream.fill_fifo(hw, buffer));
        }
        if let Some(stream) = capture
            .as_mut()
            .filter(|s| s.state == RunState::Running && s.format.is_16bit())
        {
            let buffer = dma.buffer_mut();
            moved += self.adapter.synchronize(|hw| stream.drain_fifo(hw, buffer));
        }
        moved
    }

    fn set_running(&self, was: RunState, now: RunState) {
        match (was == RunState::Running, now == RunState::Running) {
            (false, true) => {
                self.isr.running.fetch_add(1, Ordering::AcqRel);
            }
            (true, false) => {
                self.isr.running.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
    }
}

impl<P: PortIo> Drop for WaveMiniport<'_, P> {
    fn drop(&mut self) {
        self.adapter.set_wave_sink(None);
        self.core.lock().dma.free_buffer();
        log::debug!("[ALG-WAVE] unregistered");
    }
}

// ============================================================================
// Stream
// ============================================================================

/// Handle to one open stream. Dropping it stops and closes the stream.
///
/// A live handle owns its direction's slot until it is dropped. Queries on
/// a missing slot report a stopped, empty stream; operations that act on
/// hardware return [`AudioError::StreamClosed`].
pub struct WaveStream<'m, 'a, P: PortIo> {
    miniport: &'m WaveMiniport<'a, P>,
    direction: Direction,
}

impl<P: PortIo> WaveStream<'_, '_, P> {
    fn with_slot<R>(
        &self,
        f: impl FnOnce(&mut WaveCore, &mut StreamSlot) -> R,
    ) -> AudioResult<R> {
        let mut core = self.miniport.core.lock();
        let mut slot = core.slot(self.direction).take();
        let result = slot.as_mut().map(|stream| f(&mut core, stream));
        *core.slot(self.direction) = slot;
        result.ok_or(AudioError::StreamClosed)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn format(&self) -> AudioResult<WaveFormat> {
        self.with_slot(|_, stream| stream.format)
    }

    pub fn run_state(&self) -> RunState {
        self.with_slot(|_, stream| stream.state).unwrap_or(RunState::Stopped)
    }

    /// Change the format of a stream that is not running.
    pub fn set_format(&self, format: WaveFormat) -> AudioResult<()> {
        let rate = format.validate()?;
        let direction = self.direction;
        self.with_slot(|core, stream| {
            if stream.state == RunState::Running {
                return Err(AudioError::DeviceBusy);
            }
            if core.other(direction).is_some() && core.sampling_frequency != rate.hz() {
                return Err(AudioError::InvalidParameter);
            }
            stream.format = format;
            stream.rate = rate;
            core.sampling_frequency = rate.hz();
            Ok(())
        })?
    }

    pub fn set_state(&self, requested: KsState) -> AudioResult<()> {
        let miniport = self.miniport;
        let direction = self.direction;
        let render = direction == Direction::Render;

        self.with_slot(|core, stream| {
            let was = stream.state;
            match requested {
                KsState::Run => {
                    if was != RunState::Running {
                        Self::start(miniport.adapter, core, stream, render);
                        stream.state = RunState::Running;
                    }
                }
                KsState::Acquire | KsState::Pause => {
                    if was == RunState::Running {
                        Self::pause(miniport.adapter, core, stream);
                    }
                    stream.state = RunState::Paused;
                }
                KsState::Stop => {
                    if was != RunState::Stopped {
                        Self::stop(miniport.adapter, core, stream);
                    }
                    stream.state = RunState::Stopped;
                }
            }
            miniport.set_running(was, stream.state);
            log::debug!("[ALG-WAVE] {:?}: {:?} -> {:?}", direction, was, stream.state);
        })
    }

    fn reset_engine<Q: PortIo>(hw: &mut AdapterHardware<Q>) {
        hw.write_mma(MMA_PLAYBACK, PlaybackControl::RESET);
        hw.stall_us(1);
        hw.write_mma(MMA_PLAYBACK, PlaybackControl::IDLE);
    }

    fn start(adapter: &AdapterCommon<P>, core: &mut WaveCore, stream: &mut StreamSlot, render: bool) {
        let format = if stream.format.is_16bit() {
            FormatControl::software_fed(DEFAULT_FIFO_THRESHOLD)
        } else {
            FormatControl::block_transfer(DEFAULT_FIFO_THRESHOLD)
        };
        adapter.synchronize(|hw| {
            Self::reset_engine(hw);
            hw.write_mma(MMA_FORMAT, format.encode());
        });

        if stream.format.is_16bit() {
            stream.position = 0;
            stream.buffer_size = core.dma.buffer_size();
            if render {
                let buffer = core.dma.buffer_mut();
                adapter.synchronize(|hw| stream.fill_fifo(hw, buffer));
            }
        } else {
            let size = core.dma.buffer_size();
            core.dma.start(size, render);
        }

        let control = PlaybackControl::start(stream.rate, render);
        adapter.write_mma(MMA_PLAYBACK, control.encode());
    }

    fn pause(adapter: &AdapterCommon<P>, core: &mut WaveCore, stream: &mut StreamSlot) {
        adapter.write_mma(MMA_PLAYBACK, PlaybackControl::IDLE);
        if !stream.format.is_16bit() {
            core.dma.stop();
        }
        let format = FormatControl::paused(stream.data_format(), DEFAULT_FIFO_THRESHOLD);
        adapter.write_mma(MMA_FORMAT, format.encode());
    }

    fn stop(adapter: &AdapterCommon<P>, core: &mut WaveCore, stream: &mut StreamSlot) {
        adapter.synchronize(|hw| {
            Self::reset_engine(hw);
            hw.write_mma(MMA_FORMAT, FormatControl::stopped().encode());
        });
        if !stream.format.is_16bit() {
            core.dma.stop();
        }
        stream.position = 0;
    }

    /// Byte offset into the cyclic buffer.
    pub fn position(&self) -> usize {
        self.with_slot(|core, stream| {
            if stream.format.is_16bit() {
                return stream.position;
            }
            let transfer_count = core.dma.transfer_count();
            if transfer_count == 0 {
                return 0;
            }
            match core.dma.read_counter() {
                0 => 0,
                remaining => transfer_count.saturating_sub(remaining),
            }
        })
        .unwrap_or(0)
    }

    /// Byte position to 100 ns units at the stream's rate.
    pub fn normalize_physical_position(&self, position: u64) -> u64 {
        self.with_slot(|_, stream| {
            (HUNDRED_NS_PER_SECOND / stream.bytes_per_frame() * position)
                / stream.rate.hz() as u64
        })
        .unwrap_or(0)
    }

    /// Fill with the format's silence value.
    pub fn silence(&self, buffer: &mut [u8]) {
        let is_16bit = self.with_slot(|_, stream| stream.format.is_16bit());
        let value = if is_16bit == Ok(true) { 0x00 } else { 0x80 };
        buffer.fill(value);
    }

    pub fn notification_interval_ms(&self) -> u32 {
        self.with_slot(|_, stream| stream.notification_interval_ms)
            .unwrap_or(0)
    }

    /// Record the notification interval; returns the framing size in bytes.
    pub fn set_notification_freq(&self, interval_ms: u32) -> usize {
        self.with_slot(|_, stream| {
            stream.notification_interval_ms = interval_ms;
            let frames = stream.rate.hz() as u64 * interval_ms as u64 / 1000;
            (stream.bytes_per_frame() * frames) as usize
        })
        .unwrap_or(0)
    }
}

impl<P: PortIo> Drop for WaveStream<'_, '_, P> {
    fn drop(&mut self) {
        if self.run_state() != RunState::Stopped {
            let _ = self.set_state(KsState::Stop);
        }
        self.miniport.core.lock().slot(self.direction).take();
        log::debug!("[ALG-WAVE] {:?} stream closed", self.direction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::audio::adapter::InterruptOutcome;
    use crate::sim::{SimCard, SimDma, SimDmaMonitor};
    use alloc::vec::Vec;

    fn resources() -> ResourceList {
        ResourceList::new(DEFAULT_IO_BASE, 7, 1)
    }

    fn setup(card: &SimCard) -> AdapterCommon<SimCard> {
        AdapterCommon::init(card.clone(), &resources(), None).unwrap()
    }

    fn wave<'a>(adapter: &'a AdapterCommon<SimCard>) -> (WaveMiniport<'a, SimCard>, SimDmaMonitor) {
        let dma = SimDma::new(DMA_BUFFER_MAX);
        let monitor = dma.monitor();
        let wave = WaveMiniport::new(adapter, &resources(), Box::new(dma)).unwrap();
        (wave, monitor)
    }

    fn interrupt(card: &SimCard, adapter: &AdapterCommon<SimCard>) {
        card.raise_pcm_request();
        assert_eq!(adapter.service_interrupt(), InterruptOutcome::Handled);
    }

    #[test]
    fn test_init_requires_dma_resource() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let no_dma = ResourceList {
            dma: None,
            ..resources()
        };
        let result = WaveMiniport::new(&adapter, &no_dma, Box::new(SimDma::new(DMA_BUFFER_MAX)));
        assert!(matches!(result, Err(AudioError::ConfigurationError)));
    }

    #[test]
    fn test_buffer_allocation_halves_until_it_fits() {
        let card = SimCard::new();
        let adapter = setup(&card);

        let wave = WaveMiniport::new(&adapter, &resources(), Box::new(SimDma::new(0x1800))).unwrap();
        assert_eq!(wave.buffer_size(), 0x1000);
        drop(wave);

        let tiny = WaveMiniport::new(&adapter, &resources(), Box::new(SimDma::new(0x400)));
        assert!(matches!(tiny, Err(AudioError::ResourceExhausted)));
    }

    #[test]
    fn test_init_routes_irq_and_dma() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let _wave = wave(&adapter);

        let expected = IrqDmaSelect::for_resources(1, 7).encode();
        assert_eq!(adapter.read_control(CTRL_IRQ_DMA0), expected);
        assert_eq!(card.control_register(CTRL_IRQ_DMA0), expected);
    }

    #[test]
    fn test_one_stream_per_direction() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);

        let _render = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 22050, 16)).unwrap();
        let again = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 22050, 16));
        assert!(matches!(again, Err(AudioError::DeviceBusy)));
    }

    #[test]
    fn test_full_duplex_shares_one_rate() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);

        let render = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 22050, 16)).unwrap();
        let conflicting = wave.new_stream(Direction::Capture, WaveFormat::pcm(1, 11025, 8));
        assert!(matches!(conflicting, Err(AudioError::InvalidParameter)));

        let range = DataRange::pcm(2, (8, 16), (8000, 48000));
        assert_eq!(wave.data_range_intersection(&range).map(|f| f.samples_per_sec), Ok(22050));
        let narrow = DataRange::pcm(2, (8, 16), (40000, 48000));
        assert_eq!(wave.data_range_intersection(&narrow), Err(AudioError::NoMatch));

        let capture = wave.new_stream(Direction::Capture, WaveFormat::pcm(1, 22050, 8)).unwrap();
        assert_eq!(
            render.set_format(WaveFormat::pcm(2, 44100, 16)),
            Err(AudioError::InvalidParameter)
        );
        assert_eq!(render.set_format(WaveFormat::pcm(1, 22050, 8)), Ok(()));

        drop(capture);
        assert_eq!(render.set_format(WaveFormat::pcm(2, 44100, 16)), Ok(()));
        assert_eq!(wave.sampling_frequency(), 44100);
        drop(render);
        assert_eq!(wave.data_range_intersection(&narrow).map(|f| f.samples_per_sec), Ok(44100));
    }

    #[test]
    fn test_invalid_format_rejected() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let result = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 48000, 16));
        assert!(matches!(result, Err(AudioError::InvalidParameter)));
    }

    #[test]
    fn test_8bit_run_pause_stop_sequences() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, dma) = wave(&adapter);
        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(1, 11025, 8)).unwrap();
        card.clear_log();

        stream.set_state(KsState::Run).unwrap();
        let go = PlaybackControl::start(SampleRate::Hz11025, true).encode();
        assert_eq!(
            card.mma_writes(),
            [
                (MMA_PLAYBACK, 0x80),
                (MMA_PLAYBACK, 0x00),
                (MMA_FORMAT, FormatControl::block_transfer(DEFAULT_FIFO_THRESHOLD).encode()),
                (MMA_PLAYBACK, go),
            ]
        );
        assert!(dma.is_running());
        assert!(dma.write_to_device());

        card.clear_log();
        stream.set_state(KsState::Pause).unwrap();
        assert_eq!(
            card.mma_writes(),
            [
                (MMA_PLAYBACK, 0x00),
                (MMA_FORMAT, FormatControl::paused(DataFormat::Bits8, DEFAULT_FIFO_THRESHOLD).encode()),
            ]
        );
        assert!(!dma.is_running());
        assert_eq!(stream.run_state(), RunState::Paused);

        card.clear_log();
        stream.set_state(KsState::Stop).unwrap();
        assert_eq!(
            card.mma_writes(),
            [(MMA_PLAYBACK, 0x80), (MMA_PLAYBACK, 0x00), (MMA_FORMAT, 0x02)]
        );
        assert_eq!(stream.run_state(), RunState::Stopped);
    }

    #[test]
    fn test_acquire_from_stop_is_paused_without_hardware() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let stream = wave.new_stream(Direction::Capture, WaveFormat::pcm(2, 44100, 16)).unwrap();
        card.clear_log();

        stream.set_state(KsState::Acquire).unwrap();
        assert_eq!(stream.run_state(), RunState::Paused);
        assert!(card.mma_writes().is_empty());
    }

    #[test]
    fn test_stop_on_stopped_stream_leaves_other_direction_running() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let capture = wave.new_stream(Direction::Capture, WaveFormat::pcm(2, 44100, 16)).unwrap();
        capture.set_state(KsState::Run).unwrap();
        let render = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 44100, 16)).unwrap();
        card.clear_log();

        render.set_state(KsState::Stop).unwrap();
        assert_eq!(render.run_state(), RunState::Stopped);
        assert!(card.mma_writes().is_empty());
        assert_eq!(capture.run_state(), RunState::Running);
        assert_ne!(card.mma_register(MMA_PLAYBACK), PlaybackControl::IDLE);
    }

    #[test]
    fn test_handle_without_slot_reports_closed() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let orphan = WaveStream {
            miniport: &wave,
            direction: Direction::Render,
        };
        card.clear_log();

        assert_eq!(orphan.set_state(KsState::Run), Err(AudioError::StreamClosed));
        assert_eq!(orphan.format(), Err(AudioError::StreamClosed));
        assert_eq!(orphan.run_state(), RunState::Stopped);
        assert_eq!(orphan.position(), 0);
        assert!(card.mma_writes().is_empty());
    }

    #[test]
    fn test_8bit_position_from_remaining_count() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, dma) = wave(&adapter);
        let stream = wave.new_stream(Direction::Capture, WaveFormat::pcm(2, 22050, 8)).unwrap();

        assert_eq!(stream.position(), 0);
        stream.set_state(KsState::Run).unwrap();
        assert!(!dma.write_to_device());
        dma.set_remaining(0x3000);
        assert_eq!(stream.position(), DMA_BUFFER_MAX - 0x3000);
        dma.set_remaining(0);
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_16bit_render_prefills_fifo_before_go() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, dma) = wave(&adapter);
        wave.with_buffer(|buffer| {
            for (i, chunk) in buffer.chunks_exact_mut(2).enumerate() {
                chunk.copy_from_slice(&(i as i16).wrapping_mul(100).to_le_bytes());
            }
        });
        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 44100, 16)).unwrap();
        card.clear_log();

        stream.set_state(KsState::Run).unwrap();
        let writes = card.mma_writes();
        assert_eq!(writes[2], (MMA_FORMAT, FormatControl::software_fed(DEFAULT_FIFO_THRESHOLD).encode()));
        let pcm = writes.iter().filter(|(r, _)| *r == MMA_PCM_DATA).count();
        assert_eq!(pcm, PCM_FIFO_SIZE);
        assert_eq!(writes.last().map(|w| w.0), Some(MMA_PLAYBACK));
        assert!(!dma.is_running());

        let out = card.take_pcm_out();
        assert_eq!(out.len(), PCM_FIFO_SIZE);
        for (i, sample) in out.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            assert_eq!(value & 0x0F, 0);
            assert!((value as i32 - i as i32 * 100).abs() <= 32);
        }
        assert_eq!(stream.position(), PCM_FIFO_SIZE);
    }

    #[test]
    fn test_16bit_render_service_wraps_position() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(1, 7350, 16)).unwrap();
        stream.set_state(KsState::Run).unwrap();

        let services = DMA_BUFFER_MAX / PCM_FIFO_SIZE - 1;
        for n in 0..services {
            interrupt(&card, &adapter);
            assert_eq!(wave.service(), PCM_FIFO_SIZE);
            assert_eq!(stream.position(), ((n + 2) * PCM_FIFO_SIZE) % DMA_BUFFER_MAX);
        }
        assert_eq!(stream.position(), 0);
        // no interrupt, no work
        assert_eq!(wave.service(), 0);
    }

    #[test]
    fn test_16bit_capture_stores_bytes_verbatim() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let stream = wave.new_stream(Direction::Capture, WaveFormat::pcm(2, 22050, 16)).unwrap();
        stream.set_state(KsState::Run).unwrap();
        assert_eq!(stream.position(), 0);

        let captured: Vec<u8> = (0..PCM_FIFO_SIZE as u32).map(|i| (i * 16) as u8).collect();
        card.push_pcm_in(&captured);
        interrupt(&card, &adapter);
        assert_eq!(wave.service(), PCM_FIFO_SIZE);

        wave.with_buffer(|buffer| assert_eq!(&buffer[..PCM_FIFO_SIZE], &captured[..]));
        assert_eq!(stream.position(), PCM_FIFO_SIZE);
    }

    #[test]
    fn test_interrupt_ignored_when_nothing_runs() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(1, 22050, 16)).unwrap();

        interrupt(&card, &adapter);
        assert!(!wave.service_group().is_pending());

        stream.set_state(KsState::Run).unwrap();
        interrupt(&card, &adapter);
        assert!(wave.service_group().is_pending());

        stream.set_state(KsState::Pause).unwrap();
        assert_eq!(wave.service(), 0);
    }

    #[test]
    fn test_position_math() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);

        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 44100, 16)).unwrap();
        assert_eq!(stream.normalize_physical_position(176_400), 10_000_000);
        assert_eq!(stream.set_notification_freq(10), 1764);
        assert_eq!(stream.notification_interval_ms(), 10);
        let mut buffer = [0xAAu8; 8];
        stream.silence(&mut buffer);
        assert_eq!(buffer, [0; 8]);
        drop(stream);

        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(1, 11025, 8)).unwrap();
        assert_eq!(stream.normalize_physical_position(11025), 10_000_000);
        assert_eq!(stream.set_notification_freq(20), 220);
        stream.silence(&mut buffer);
        assert_eq!(buffer, [0x80; 8]);
    }

    #[test]
    fn test_set_format_rejected_while_running() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, _) = wave(&adapter);
        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(1, 22050, 8)).unwrap();
        stream.set_state(KsState::Run).unwrap();
        assert_eq!(stream.set_format(WaveFormat::pcm(1, 22050, 16)), Err(AudioError::DeviceBusy));
    }

    #[test]
    fn test_dropping_running_stream_stops_hardware() {
        let card = SimCard::new();
        let adapter = setup(&card);
        let (wave, dma) = wave(&adapter);
        let stream = wave.new_stream(Direction::Render, WaveFormat::pcm(2, 22050, 8)).unwrap();
        stream.set_state(KsState::Run).unwrap();
        drop(stream);

        assert!(!dma.is_running());
        assert_eq!(card.mma_register(MMA_FORMAT), 0x02);
        interrupt(&card, &adapter);
        assert!(!wave.service_group().is_pending());
        assert!(wave.new_stream(Direction::Render, WaveFormat::pcm(2, 44100, 8)).is_ok());
    }
}
