// ============================================================================
// src/io/audio/bank.rs - Register Bank Multiplexer
// ============================================================================
//!
//! # バンク切り替えプロトコル
//!
//! ベース+2/+3 のポートペアは「制御チップ」と「OPL3 バンク1」で共有される。
//! 制御レジスタへのアクセスは必ず
//! 制御バンク選択 → レディ待ち → インデックス → データ → 整定 → FM バンク復帰
//! の順で行い、戻る前に必ず FM バンクを選択し直す。

use crate::error::{AudioError, AudioResult};
use crate::io::port::PortIo;

use super::regs::{
    settle_for, Bank, ControlStatus, Settle, PORT_CONTROL_ADDRESS, PORT_CONTROL_DATA,
};

/// Status reads allowed before a ready poll gives up.
pub const READY_POLL_BUDGET: u32 = 1000;

/// Port window of one card plus the bank-switch handshake.
pub struct BankMux<P: PortIo> {
    io: P,
    base: u16,
}

impl<P: PortIo> BankMux<P> {
    pub fn new(io: P, base: u16) -> Self {
        Self { io, base }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    // ========================================================================
    // Raw port access
    // ========================================================================

    #[inline]
    pub fn read_port(&mut self, offset: u16) -> u8 {
        self.io.read_u8(self.base + offset)
    }

    #[inline]
    pub fn write_port(&mut self, offset: u16, value: u8) {
        self.io.write_u8(self.base + offset, value)
    }

    #[inline]
    pub fn stall_us(&mut self, us: u32) {
        self.io.stall_us(us)
    }

    // ========================================================================
    // Handshake primitives
    // ========================================================================

    /// One write to the shared address port.
    pub fn select_bank(&mut self, bank: Bank) {
        self.write_port(PORT_CONTROL_ADDRESS, bank.select_value());
    }

    /// Status byte; only meaningful while the control bank is selected.
    pub fn read_status(&mut self) -> ControlStatus {
        ControlStatus::from_bits_retain(self.read_port(PORT_CONTROL_ADDRESS))
    }

    /// Poll both busy flags until clear or the budget is spent.
    pub fn await_ready(&mut self) -> AudioResult<()> {
        for _ in 0..READY_POLL_BUDGET {
            if !self.read_status().is_busy() {
                return Ok(());
            }
        }
        Err(AudioError::Timeout)
    }

    pub fn write_index(&mut self, index: u8) {
        self.write_port(PORT_CONTROL_ADDRESS, index);
    }

    pub fn write_data(&mut self, value: u8) {
        self.write_port(PORT_CONTROL_DATA, value);
    }

    pub fn read_data(&mut self) -> u8 {
        self.read_port(PORT_CONTROL_DATA)
    }

    // ========================================================================
    // Composite sequences
    // ========================================================================

    /// Full control-register write handshake.
    ///
    /// The sequence always runs to completion and always restores the FM
    /// bank; a ready-poll timeout anywhere in it is reported afterwards.
    pub fn write_register(&mut self, index: u8, value: u8) -> AudioResult<()> {
        self.select_bank(Bank::Control);
        let ready = self.await_ready();
        self.write_index(index);
        self.write_data(value);

        let settled = match settle_for(index) {
            Settle::PollReady => self.await_ready(),
            Settle::Stall(us) => {
                self.stall_us(us);
                Ok(())
            }
            Settle::None => Ok(()),
        };

        self.select_bank(Bank::Fm1);
        ready.and(settled)
    }

    /// Read one control register straight from hardware.
    pub fn read_register(&mut self, index: u8) -> AudioResult<u8> {
        self.select_bank(Bank::Control);
        let ready = self.await_ready();
        if ready.is_err() {
            self.select_bank(Bank::Fm1);
            return Err(AudioError::Timeout);
        }
        self.write_index(index);
        let value = self.read_data();
        self.select_bank(Bank::Fm1);
        Ok(value)
    }

    /// Status snapshot for the interrupt dispatcher (select, read, restore).
    pub fn snapshot_status(&mut self) -> ControlStatus {
        self.select_bank(Bank::Control);
        let status = self.read_status();
        self.select_bank(Bank::Fm1);
        status
    }
}
