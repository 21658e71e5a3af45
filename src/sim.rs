// ============================================================================
// src/sim.rs - Register-Level Card Model
// ============================================================================
//!
//! # カードモデル
//!
//! 実ハードウェアなしでドライバを動かすための、レジスタレベルの
//! Ad Lib Gold モデル ([`SimCard`]) と ISA DMA チャネルのモデル ([`SimDma`])。
//! クローンは同じ状態を共有するので、ドライバに渡した後もテスト側から観測できる。
//!
//! モデル化している振る舞い:
//! - +2 への 0xFF/0xFE 書き込みによるバンク切り替え
//! - ビジービット (指定回数、または常時)
//! - アクティブローの割り込みビット、読み出しでクリアされる MMA ステータス
//! - PCM/MIDI の FIFO、EEPROM の保存/復元コマンド

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{AudioError, AudioResult};
use crate::io::audio::dma::DmaChannel;
use crate::io::audio::regs::*;
use crate::io::port::PortIo;

/// One observed bus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read(u16, u8),
    Write(u16, u8),
    Stall(u32),
}

/// Power-on identity: Gold 2000, no options fitted.
pub const SIM_DEFAULT_ID: u8 = 0xE1;

struct CardState {
    base: u16,
    log: Vec<IoOp>,
    control_writes: Vec<(u8, u8)>,
    mma_writes: Vec<(u8, u8)>,

    bank: Bank,
    busy_reads: u32,
    stuck_busy: bool,

    id: u8,
    control_index: u8,
    control: [u8; CTRL_REG_COUNT],
    eeprom: [u8; CTRL_REG_COUNT],

    fm_index0: u8,
    fm_index1: u8,
    fm: [u8; 0x200],
    fm_timer: bool,

    mma_index: u8,
    mma: [u8; 0x10],
    pcm_request: bool,
    pcm_out: Vec<u8>,
    pcm_in: VecDeque<u8>,
    midi_rx: VecDeque<u8>,
    midi_tx: Vec<u8>,
}

impl CardState {
    fn new(base: u16) -> Self {
        Self {
            base,
            log: Vec::new(),
            control_writes: Vec::new(),
            mma_writes: Vec::new(),
            bank: Bank::Fm1,
            busy_reads: 0,
            stuck_busy: false,
            id: SIM_DEFAULT_ID,
            control_index: 0,
            control: [0; CTRL_REG_COUNT],
            eeprom: [0; CTRL_REG_COUNT],
            fm_index0: 0,
            fm_index1: 0,
            fm: [0; 0x200],
            fm_timer: false,
            mma_index: 0,
            mma: [0; 0x10],
            pcm_request: false,
            pcm_out: Vec::new(),
            pcm_in: VecDeque::new(),
            midi_rx: VecDeque::new(),
            midi_tx: Vec::new(),
        }
    }

    fn smp_pending(&self) -> bool {
        self.pcm_request || !self.midi_rx.is_empty()
    }

    fn control_status(&mut self) -> u8 {
        let busy = if self.stuck_busy {
            true
        } else if self.busy_reads > 0 {
            self.busy_reads -= 1;
            true
        } else {
            false
        };

        let mut status = ControlStatus::IRQ_MASK;
        if busy {
            status |= ControlStatus::SB;
        }
        if self.smp_pending() {
            status.remove(ControlStatus::SMP_IRQ);
        }
        if self.fm_timer {
            status.remove(ControlStatus::FM_IRQ);
        }
        status.bits()
    }

    fn mma_status(&mut self) -> u8 {
        let mut status = MmaStatus::empty();
        if self.pcm_request {
            status |= MmaStatus::PRQ;
        }
        if !self.midi_rx.is_empty() {
            status |= MmaStatus::RRQ;
        }
        self.pcm_request = false;
        status.bits()
    }

    fn read(&mut self, offset: u16) -> u8 {
        match offset {
            PORT_FM0_ADDRESS => {
                let status = if self.fm_timer { 0xC0 } else { 0x00 };
                self.fm_timer = false;
                status
            }
            PORT_CONTROL_ADDRESS => match self.bank {
                Bank::Control => self.control_status(),
                Bank::Fm1 => 0x00,
            },
            PORT_CONTROL_DATA => match self.bank {
                Bank::Control if self.control_index == CTRL_CONTROL_ID => self.id,
                Bank::Control => self
                    .control
                    .get(self.control_index as usize)
                    .copied()
                    .unwrap_or(0xFF),
                Bank::Fm1 => 0x00,
            },
            PORT_MMA0_ADDRESS => self.mma_status(),
            PORT_MMA0_DATA => match self.mma_index {
                MMA_STATUS => self.mma_status(),
                MMA_PCM_DATA => self.pcm_in.pop_front().unwrap_or(0),
                MMA_MIDI_DATA => self.midi_rx.pop_front().unwrap_or(0),
                index => self.mma[(index & 0x0F) as usize],
            },
            _ => 0xFF,
        }
    }

    fn write(&mut self, offset: u16, value: u8) {
        match offset {
            PORT_FM0_ADDRESS => self.fm_index0 = value,
            PORT_FM0_DATA => self.fm[self.fm_index0 as usize] = value,
            PORT_CONTROL_ADDRESS => {
                if value == Bank::Control.select_value() {
                    self.bank = Bank::Control;
                } else if value == Bank::Fm1.select_value() {
                    self.bank = Bank::Fm1;
                } else if self.bank == Bank::Control {
                    self.control_index = value;
                } else {
                    self.fm_index1 = value;
                }
            }
            PORT_CONTROL_DATA => match self.bank {
                Bank::Control => self.write_control(value),
                Bank::Fm1 => self.fm[0x100 + self.fm_index1 as usize] = value,
            },
            PORT_MMA0_ADDRESS => self.mma_index = value,
            PORT_MMA0_DATA => {
                self.mma_writes.push((self.mma_index, value));
                self.mma[(self.mma_index & 0x0F) as usize] = value;
                match self.mma_index {
                    MMA_PCM_DATA => self.pcm_out.push(value),
                    MMA_MIDI_DATA => self.midi_tx.push(value),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn write_control(&mut self, value: u8) {
        let index = self.control_index;
        self.control_writes.push((index, value));
        if index == CTRL_CONTROL_ID {
            let command = EepromCommand::from_bits_truncate(value);
            if command.contains(EepromCommand::SAVE) {
                self.eeprom = self.control;
            }
            if command.contains(EepromCommand::RESTORE) {
                self.control = self.eeprom;
            }
            return;
        }
        if let Some(slot) = self.control.get_mut(index as usize) {
            *slot = value;
        }
    }
}

/// Shared handle to a simulated card.
#[derive(Clone)]
pub struct SimCard {
    state: Arc<Mutex<CardState>>,
}

impl SimCard {
    pub fn new() -> Self {
        Self::with_base(DEFAULT_IO_BASE)
    }

    pub fn with_base(base: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState::new(base))),
        }
    }

    pub fn log(&self) -> Vec<IoOp> {
        self.state.lock().log.clone()
    }

    /// Forget every recorded operation.
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.log.clear();
        state.control_writes.clear();
        state.mma_writes.clear();
    }

    /// Control-register writes that reached the chip, in order.
    pub fn control_writes(&self) -> Vec<(u8, u8)> {
        self.state.lock().control_writes.clone()
    }

    /// MMA register writes, in order.
    pub fn mma_writes(&self) -> Vec<(u8, u8)> {
        self.state.lock().mma_writes.clone()
    }

    pub fn selected_bank(&self) -> Bank {
        self.state.lock().bank
    }

    pub fn card_id(&self) -> u8 {
        self.state.lock().id
    }

    pub fn set_card_id(&self, id: u8) {
        self.state.lock().id = id;
    }

    pub fn set_busy_reads(&self, reads: u32) {
        self.state.lock().busy_reads = reads;
    }

    pub fn set_stuck_busy(&self, stuck: bool) {
        self.state.lock().stuck_busy = stuck;
    }

    pub fn control_register(&self, index: u8) -> u8 {
        self.state.lock().control[index as usize]
    }

    pub fn set_control_register(&self, index: u8, value: u8) {
        self.state.lock().control[index as usize] = value;
    }

    pub fn fm_register(&self, address: u16) -> u8 {
        self.state.lock().fm[address as usize & 0x1FF]
    }

    pub fn mma_register(&self, index: u8) -> u8 {
        self.state.lock().mma[(index & 0x0F) as usize]
    }

    pub fn raise_fm_timer(&self) {
        self.state.lock().fm_timer = true;
    }

    /// Latch a PCM FIFO request (cleared by the next MMA status read).
    pub fn raise_pcm_request(&self) {
        self.state.lock().pcm_request = true;
    }

    pub fn interrupt_asserted(&self) -> bool {
        let state = self.state.lock();
        state.smp_pending() || state.fm_timer
    }

    /// Bytes written to the PCM FIFO.
    pub fn take_pcm_out(&self) -> Vec<u8> {
        core::mem::take(&mut self.state.lock().pcm_out)
    }

    pub fn push_pcm_in(&self, bytes: &[u8]) {
        self.state.lock().pcm_in.extend(bytes.iter().copied());
    }

    pub fn push_midi_rx(&self, bytes: &[u8]) {
        self.state.lock().midi_rx.extend(bytes.iter().copied());
    }

    pub fn midi_rx_len(&self) -> usize {
        self.state.lock().midi_rx.len()
    }

    pub fn take_midi_tx(&self) -> Vec<u8> {
        core::mem::take(&mut self.state.lock().midi_tx)
    }
}

impl Default for SimCard {
    fn default() -> Self {
        Self::new()
    }
}

impl PortIo for SimCard {
    fn read_u8(&mut self, port: u16) -> u8 {
        let mut state = self.state.lock();
        let value = match port.checked_sub(state.base) {
            Some(offset) if offset < IO_PORT_COUNT => state.read(offset),
            _ => 0xFF,
        };
        state.log.push(IoOp::Read(port, value));
        value
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        let mut state = self.state.lock();
        if let Some(offset) = port.checked_sub(state.base) {
            if offset < IO_PORT_COUNT {
                state.write(offset, value);
            }
        }
        state.log.push(IoOp::Write(port, value));
    }

    fn stall_us(&mut self, us: u32) {
        self.state.lock().log.push(IoOp::Stall(us));
    }
}

// ============================================================================
// DMA channel model
// ============================================================================

struct DmaState {
    max_buffer: usize,
    running: bool,
    write_to_device: bool,
    transfer_count: usize,
    remaining: usize,
    starts: u32,
    stops: u32,
}

/// Simulated slave DMA channel. The buffer is owned by the handle passed to
/// the driver; clones share only the control state.
pub struct SimDma {
    buffer: Vec<u8>,
    state: Arc<Mutex<DmaState>>,
}

impl SimDma {
    /// Channel whose allocator satisfies requests up to `max_buffer` bytes.
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            state: Arc::new(Mutex::new(DmaState {
                max_buffer,
                running: false,
                write_to_device: false,
                transfer_count: 0,
                remaining: 0,
                starts: 0,
                stops: 0,
            })),
        }
    }

    /// Observer sharing this channel's control state.
    pub fn monitor(&self) -> SimDmaMonitor {
        SimDmaMonitor {
            state: self.state.clone(),
        }
    }
}

/// Test-side view of a [`SimDma`].
#[derive(Clone)]
pub struct SimDmaMonitor {
    state: Arc<Mutex<DmaState>>,
}

impl SimDmaMonitor {
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn write_to_device(&self) -> bool {
        self.state.lock().write_to_device
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn stop_count(&self) -> u32 {
        self.state.lock().stops
    }

    /// Set the remaining-count register.
    pub fn set_remaining(&self, remaining: usize) {
        self.state.lock().remaining = remaining;
    }
}

impl DmaChannel for SimDma {
    fn allocate_buffer(&mut self, size: usize) -> AudioResult<()> {
        if size > self.state.lock().max_buffer {
            return Err(AudioError::ResourceExhausted);
        }
        self.buffer = vec![0; size];
        Ok(())
    }

    fn free_buffer(&mut self) {
        self.buffer = Vec::new();
    }

    fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn start(&mut self, size: usize, write_to_device: bool) {
        let mut state = self.state.lock();
        state.running = true;
        state.write_to_device = write_to_device;
        state.transfer_count = size;
        state.remaining = size;
        state.starts += 1;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        state.stops += 1;
    }

    fn transfer_count(&self) -> usize {
        self.state.lock().transfer_count
    }

    fn read_counter(&mut self) -> usize {
        self.state.lock().remaining
    }
}
