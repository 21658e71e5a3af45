// ============================================================================
// src/sync/service.rs - 遅延サービス要求ラッチ
// ============================================================================
//!
//! ISR から低優先度の遅延サービス (FIFO の充填/排出) へ通知するためのラッチ。
//! 同じサービスが実行される前に何度要求されても、通知は1回に合体される。

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Coalescing "service requested" latch shared between an ISR and the
/// deferred service path.
pub struct ServiceGroup {
    pending: AtomicBool,
    signals: AtomicU32,
}

impl ServiceGroup {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            signals: AtomicU32::new(0),
        }
    }

    /// Request deferred service. Safe to call from interrupt context.
    ///
    /// Returns true if this call raised the signal, false if it merged into
    /// one that was already pending.
    pub fn request(&self) -> bool {
        let raised = !self.pending.swap(true, Ordering::AcqRel);
        if raised {
            self.signals.fetch_add(1, Ordering::Relaxed);
        }
        raised
    }

    /// Consume the pending request, if any.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of distinct signals raised since creation.
    pub fn signal_count(&self) -> u32 {
        self.signals.load(Ordering::Relaxed)
    }
}

impl Default for ServiceGroup {
    fn default() -> Self {
        Self::new()
    }
}
