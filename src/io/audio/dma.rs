// ============================================================================
// src/io/audio/dma.rs - Slave Block-Transfer Channel
// ============================================================================
//!
//! # スレーブ DMA チャネル
//!
//! 8-bit ストリームはシステムメモリとカードの FIFO の間を
//! ISA DMA (8237) の自動初期化モードで転送する。
//! ウェーブエンジンは [`DmaChannel`] だけに依存し、
//! 位置は残りカウントレジスタから求める。

use crate::error::{AudioError, AudioResult};
use crate::io::port::PortIo;

/// Cyclic DMA buffer plus the transfer engine behind it.
pub trait DmaChannel: Send {
    /// Make a buffer of exactly `size` bytes available.
    fn allocate_buffer(&mut self, size: usize) -> AudioResult<()>;

    fn free_buffer(&mut self);

    fn buffer_size(&self) -> usize;

    /// The cyclic buffer shared with the client.
    fn buffer_mut(&mut self) -> &mut [u8];

    /// Start an auto-initialising transfer of `size` bytes.
    fn start(&mut self, size: usize, write_to_device: bool);

    fn stop(&mut self);

    /// Size of the transfer programmed by the last `start`.
    fn transfer_count(&self) -> usize;

    /// Bytes remaining in the current pass.
    fn read_counter(&mut self) -> usize;
}

// ============================================================================
// ISA 8237 (channels 0-3, 8-bit)
// ============================================================================

mod isa {
    pub const SINGLE_MASK: u16 = 0x0A;
    pub const MODE: u16 = 0x0B;
    pub const CLEAR_FLIP_FLOP: u16 = 0x0C;

    pub const MASK_ON: u8 = 0x04;
    pub const MODE_SINGLE: u8 = 0x40;
    pub const MODE_AUTO_INIT: u8 = 0x10;
    /// Memory -> device
    pub const MODE_READ: u8 = 0x08;
    /// Device -> memory
    pub const MODE_WRITE: u8 = 0x04;

    pub const PAGE_PORTS: [u16; 4] = [0x87, 0x83, 0x81, 0x82];

    pub const fn address_port(channel: u8) -> u16 {
        (channel as u16) * 2
    }

    pub const fn count_port(channel: u8) -> u16 {
        (channel as u16) * 2 + 1
    }
}

/// An ISA-reachable buffer: below 16 MiB and not crossing a 64 KiB page.
pub struct IsaDmaRegion {
    pub memory: &'static mut [u8],
    pub physical: u32,
}

/// 8-bit channel on the first 8237 controller.
pub struct IsaDmaChannel<P: PortIo> {
    io: P,
    channel: u8,
    region: IsaDmaRegion,
    size: usize,
    transfer_count: usize,
}

impl<P: PortIo> IsaDmaChannel<P> {
    /// `region` is the largest buffer the platform could reserve.
    pub fn new(io: P, channel: u8, region: IsaDmaRegion) -> AudioResult<Self> {
        if channel > 3 {
            return Err(AudioError::ConfigurationError);
        }
        Ok(Self {
            io,
            channel,
            region,
            size: 0,
            transfer_count: 0,
        })
    }

    fn fits_isa_window(&self, size: usize) -> bool {
        let start = self.region.physical as usize;
        let end = start + size;
        size <= self.region.memory.len()
            && end <= 0x0100_0000
            && (size == 0 || start >> 16 == (end - 1) >> 16)
    }
}

impl<P: PortIo> DmaChannel for IsaDmaChannel<P> {
    fn allocate_buffer(&mut self, size: usize) -> AudioResult<()> {
        if !self.fits_isa_window(size) {
            return Err(AudioError::ResourceExhausted);
        }
        self.size = size;
        Ok(())
    }

    fn free_buffer(&mut self) {
        self.size = 0;
    }

    fn buffer_size(&self) -> usize {
        self.size
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.region.memory[..self.size]
    }

    fn start(&mut self, size: usize, write_to_device: bool) {
        let size = size.min(self.size);
        if size == 0 {
            return;
        }
        let channel = self.channel;
        let address = self.region.physical;
        let count = (size - 1) as u16;
        let direction = if write_to_device {
            isa::MODE_READ
        } else {
            isa::MODE_WRITE
        };

        self.io.write_u8(isa::SINGLE_MASK, isa::MASK_ON | channel);
        self.io.write_u8(isa::CLEAR_FLIP_FLOP, 0);
        self.io.write_u8(
            isa::MODE,
            isa::MODE_SINGLE | isa::MODE_AUTO_INIT | direction | channel,
        );
        self.io.write_u8(isa::address_port(channel), address as u8);
        self.io.write_u8(isa::address_port(channel), (address >> 8) as u8);
        self.io
            .write_u8(isa::PAGE_PORTS[channel as usize], (address >> 16) as u8);
        self.io.write_u8(isa::CLEAR_FLIP_FLOP, 0);
        self.io.write_u8(isa::count_port(channel), count as u8);
        self.io.write_u8(isa::count_port(channel), (count >> 8) as u8);
        self.io.write_u8(isa::SINGLE_MASK, channel);

        self.transfer_count = size;
    }

    fn stop(&mut self) {
        self.io.write_u8(isa::SINGLE_MASK, isa::MASK_ON | self.channel);
    }

    fn transfer_count(&self) -> usize {
        self.transfer_count
    }

    fn read_counter(&mut self) -> usize {
        // Two reads through the flip-flop; retry until consecutive samples agree.
        let mut previous = None;
        for _ in 0..4 {
            self.io.write_u8(isa::CLEAR_FLIP_FLOP, 0);
            let low = self.io.read_u8(isa::count_port(self.channel)) as u16;
            let high = self.io.read_u8(isa::count_port(self.channel)) as u16;
            let count = (high << 8) | low;
            if previous == Some(count) {
                break;
            }
            previous = Some(count);
        }
        // Register holds remaining - 1; 0xFFFF means the pass is complete.
        match previous {
            Some(count) => (count.wrapping_add(1) as usize).min(self.transfer_count),
            None => 0,
        }
    }
}
