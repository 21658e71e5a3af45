// ============================================================================
// src/io/port.rs - ISA Port I/O Abstraction
// ============================================================================
//!
//! # ポートI/O
//!
//! ドライバ本体はすべてのハードウェアアクセスを [`PortIo`] 経由で行う。
//! ベアメタル x86_64 では `in`/`out` 命令、テストでは `sim` のモデルが実装する。

/// Byte-wide port access plus the short busy-wait stalls ISA timing needs.
pub trait PortIo: Send {
    fn read_u8(&mut self, port: u16) -> u8;

    fn write_u8(&mut self, port: u16, value: u8);

    /// Busy-wait for at least `us` microseconds.
    fn stall_us(&mut self, us: u32);
}

impl<P: PortIo + ?Sized> PortIo for alloc::boxed::Box<P> {
    fn read_u8(&mut self, port: u16) -> u8 {
        (**self).read_u8(port)
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        (**self).write_u8(port, value)
    }

    fn stall_us(&mut self, us: u32) {
        (**self).stall_us(us)
    }
}

/// POST診断ポート (書き込みは約1µsのISAバスサイクルを消費する)
#[cfg(target_arch = "x86_64")]
const IO_DELAY_PORT: u16 = 0x80;

/// Direct `in`/`out` port access on x86_64.
///
/// Constructing one is only meaningful at the privilege level that owns the
/// I/O permission bitmap; in user mode the first access faults.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Clone, Copy)]
pub struct X86PortIo;

#[cfg(target_arch = "x86_64")]
impl PortIo for X86PortIo {
    fn read_u8(&mut self, port: u16) -> u8 {
        let mut p: x86_64::instructions::port::Port<u8> =
            x86_64::instructions::port::Port::new(port);
        // SAFETY: ポート番号はカードに割り当てられたリソース範囲内
        unsafe { p.read() }
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        let mut p: x86_64::instructions::port::Port<u8> =
            x86_64::instructions::port::Port::new(port);
        // SAFETY: 同上
        unsafe { p.write(value) }
    }

    fn stall_us(&mut self, us: u32) {
        let mut delay: x86_64::instructions::port::PortWriteOnly<u8> =
            x86_64::instructions::port::PortWriteOnly::new(IO_DELAY_PORT);
        for _ in 0..us {
            // SAFETY: 0x80 はPOSTコード表示専用でデバイス状態に影響しない
            unsafe { delay.write(0) };
        }
    }
}
