// ============================================================================
// src/io/audio/persist.rs - Mixer Persistence
// ============================================================================
//!
//! # ミキサー設定の永続化
//!
//! キー/値ストア (レジストリ相当) はドライバ外部のコラボレータで、
//! ここではドライバが呼び出すインターフェースとデフォルト値テーブルのみを定義する。
//! 1レジスタ = 1ワード (u32)。

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use hashbrown::HashMap;
use spin::Mutex;

use crate::error::{AudioError, AudioResult};

use super::regs::*;

/// One tracked mixer register and its compiled-in default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerDefault {
    pub key: &'static str,
    pub register: u8,
    pub value: u8,
}

const fn entry(key: &'static str, register: u8, value: u8) -> MixerDefault {
    MixerDefault {
        key,
        register,
        value,
    }
}

/// Defaults covering the mixer sub-range 0x04..=0x0F.
pub const MIXER_DEFAULTS: [MixerDefault; 12] = [
    entry("LeftMasterVol", CTRL_MASTER_VOL_LEFT, 0xD8),
    entry("RightMasterVol", CTRL_MASTER_VOL_RIGHT, 0xD8),
    entry("Bass", CTRL_BASS, 0xF6),
    entry("Treble", CTRL_TREBLE, 0xF6),
    entry("OutputMode", CTRL_OUTPUT_MODE, 0xC4),
    entry("LeftFMVol", CTRL_FM_VOL_LEFT, 0xC0),
    entry("RightFMVol", CTRL_FM_VOL_RIGHT, 0xC0),
    entry("LeftSampVol", CTRL_SAMP_VOL_LEFT, 0xC0),
    entry("RightSampVol", CTRL_SAMP_VOL_RIGHT, 0xC0),
    entry("LeftAuxVol", CTRL_AUX_VOL_LEFT, 0xC0),
    entry("RightAuxVol", CTRL_AUX_VOL_RIGHT, 0xC0),
    entry("MicVol", CTRL_MIC_VOL, 0x80),
];

/// Result of opening the settings key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOpen {
    /// First use: the key did not exist and was just created.
    Created,
    Existing,
}

/// Key/value store for mixer settings, keyed by register name.
pub trait MixerStore: Send {
    fn open(&mut self) -> AudioResult<StoreOpen>;

    /// `None` when the key has no value.
    fn query(&mut self, key: &str) -> Option<u32>;

    fn set(&mut self, key: &str, value: u32) -> AudioResult<()>;
}

/// Apply stored settings through `write`.
///
/// A freshly created store gets the whole default table. Otherwise each
/// register is queried, and any missing entry falls back to its default.
pub fn restore_mixer<F>(store: &mut dyn MixerStore, mut write: F) -> AudioResult<()>
where
    F: FnMut(u8, u8),
{
    match store.open()? {
        StoreOpen::Created => {
            log::info!("[ALG] mixer settings key created, writing defaults");
            for default in MIXER_DEFAULTS.iter() {
                write(default.register, default.value);
            }
        }
        StoreOpen::Existing => {
            for default in MIXER_DEFAULTS.iter() {
                let value = match store.query(default.key) {
                    Some(stored) => stored as u8,
                    None => {
                        log::debug!("[ALG] {} not stored, using default", default.key);
                        default.value
                    }
                };
                write(default.register, value);
            }
        }
    }
    Ok(())
}

/// Write every tracked register's cached value. Stops at the first failure.
pub fn save_mixer<F>(store: &mut dyn MixerStore, read: F) -> AudioResult<()>
where
    F: Fn(u8) -> u8,
{
    store.open()?;
    for default in MIXER_DEFAULTS.iter() {
        store
            .set(default.key, read(default.register) as u32)
            .map_err(|_| AudioError::StoreFailure)?;
    }
    Ok(())
}

// ============================================================================
// In-memory store
// ============================================================================

struct MemoryInner {
    values: HashMap<String, u32>,
    exists: bool,
    fail_open: bool,
    /// Number of further `set` calls that succeed before writes start failing.
    write_budget: Option<usize>,
    writes: usize,
}

/// Volatile [`MixerStore`]; clones share the same contents.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// A store whose key does not exist yet.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                values: HashMap::new(),
                exists: false,
                fail_open: false,
                write_budget: None,
                writes: 0,
            })),
        }
    }

    /// A store whose key already exists with the given values.
    pub fn with_values(values: &[(&str, u32)]) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            inner.exists = true;
            for (key, value) in values {
                inner.values.insert(key.to_string(), *value);
            }
        }
        store
    }

    #[cfg(any(test, feature = "sim"))]
    pub fn fail_open(&self, fail: bool) {
        self.inner.lock().fail_open = fail;
    }

    /// Let `count` more writes succeed, then fail every following one.
    #[cfg(any(test, feature = "sim"))]
    pub fn fail_writes_after(&self, count: usize) {
        self.inner.lock().write_budget = Some(count);
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.inner.lock().values.get(key).copied()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerStore for MemoryStore {
    fn open(&mut self) -> AudioResult<StoreOpen> {
        let mut inner = self.inner.lock();
        if inner.fail_open {
            return Err(AudioError::StoreFailure);
        }
        if inner.exists {
            Ok(StoreOpen::Existing)
        } else {
            inner.exists = true;
            Ok(StoreOpen::Created)
        }
    }

    fn query(&mut self, key: &str) -> Option<u32> {
        self.inner.lock().values.get(key).copied()
    }

    fn set(&mut self, key: &str, value: u32) -> AudioResult<()> {
        let mut inner = self.inner.lock();
        if let Some(budget) = inner.write_budget {
            if budget == 0 {
                return Err(AudioError::StoreFailure);
            }
            inner.write_budget = Some(budget - 1);
        }
        inner.writes += 1;
        inner.values.insert(key.to_string(), value);
        Ok(())
    }
}
