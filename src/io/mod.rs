// ============================================================================
// I/O Subsystem Module
// ============================================================================
pub mod audio;
pub mod port;

pub use port::PortIo;
#[cfg(target_arch = "x86_64")]
pub use port::X86PortIo;
