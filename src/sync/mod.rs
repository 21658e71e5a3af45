// ============================================================================
// src/sync/mod.rs - 同期プリミティブ
// ISR と通常コードの間の排他、および遅延サービスへの通知
// ============================================================================

pub mod irq_mutex;
pub mod service;

pub use irq_mutex::{IrqMutex, IrqMutexGuard};
pub use service::ServiceGroup;
