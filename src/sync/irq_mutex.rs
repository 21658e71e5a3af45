// ============================================================================
// src/sync/irq_mutex.rs - 割り込み同期ドメイン
//
// 問題: 制御チップのバンク選択ラッチは ISR と通常コードで共有される
// → ISR がシーケンスの途中に割り込むとバンクが食い違う
//
// 解決: ロック取得時に割り込みを禁止し、ロック解放時に元の状態へ復元
//       ISR 自身も同じロックを取る (割り込み禁止中なので競合しない)
// ============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// RFLAGS.IF を保存して割り込みを禁止
///
/// # Returns
/// 元の割り込み有効状態 (true = 有効だった)
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
fn save_and_disable_interrupts() -> bool {
    use x86_64::instructions::interrupts;

    let was_enabled = interrupts::are_enabled();
    interrupts::disable();
    was_enabled
}

/// ホスト環境 (テスト) ではマスクすべきハードウェア割り込みがない
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
fn save_and_disable_interrupts() -> bool {
    false
}

/// 割り込みを復元（元々有効だった場合のみ有効化）
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        x86_64::instructions::interrupts::enable();
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
fn restore_interrupts(_was_enabled: bool) {}

/// 割り込み禁止Mutex
///
/// ロック取得時に自動的に割り込みを禁止し、
/// ロック解放時に元の状態に復元する。
///
/// # Usage
/// ```ignore
/// let domain = IrqMutex::new(state);
/// let mut guard = domain.lock();
/// guard.select_bank(Bank::Control);
/// // guard がドロップされると割り込みが復元される
/// ```
pub struct IrqMutex<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: IrqMutex は排他的アクセスを保証する
unsafe impl<T: ?Sized + Send> Sync for IrqMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for IrqMutex<T> {}

impl<T> IrqMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> IrqMutex<T> {
    /// ロックを取得
    ///
    /// 割り込みを禁止してからスピンロックを取得する。
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let irq_was_enabled = save_and_disable_interrupts();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        IrqMutexGuard {
            lock: self,
            irq_was_enabled,
        }
    }

    /// ロックを試行（失敗したら即座に返る）
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let irq_was_enabled = save_and_disable_interrupts();

        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(IrqMutexGuard {
                lock: self,
                irq_was_enabled,
            })
        } else {
            restore_interrupts(irq_was_enabled);
            None
        }
    }

    /// 排他参照からの直接アクセス (ロック不要)
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// ロック状態を確認（デバッグ用）
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// IrqMutex のガード
///
/// ドロップ時にロックを解放し、割り込み状態を復元する。
pub struct IrqMutexGuard<'a, T: ?Sized> {
    lock: &'a IrqMutex<T>,
    irq_was_enabled: bool,
}

impl<T: ?Sized> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: ロックを保持しているので安全にアクセス可能
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: ロックを保持しているので安全にアクセス可能
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for IrqMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        restore_interrupts(self.irq_was_enabled);
    }
}
