//! 統一エラーハンドリングモジュール
//!
//! ドライバ全体で使用されるエラー型。
//! 初期化時のエラーは致命的、ストリーム単位のエラーは呼び出し元へ同期的に返す。

use core::fmt;

/// ドライバ全体の統一エラー型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioError {
    /// 初期化に必要なリソース (ポート/IRQ/DMA) が不足
    ConfigurationError,
    /// カードの識別に失敗、または未知のモデル
    DeviceAbsent,
    /// ポーリングの反復上限に到達
    Timeout,
    /// 不正なフォーマットまたは要求
    InvalidParameter,
    /// 要求は正しいが、ハードウェアの能力と交差しない
    NoMatch,
    /// メモリ/バッファの確保に失敗
    ResourceExhausted,
    /// ストリーム数上限、または排他制約違反
    DeviceBusy,
    /// 送信が規定回数連続で失敗
    IoDeviceError,
    /// 電源状態によりハードウェア操作が拒否された
    PoweredOff,
    /// 永続ストアへの書き込み失敗
    StoreFailure,
    /// ストリームは既に閉じられている
    StreamClosed,
}

pub type AudioResult<T> = Result<T, AudioError>;

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::ConfigurationError => write!(f, "insufficient hardware resources"),
            AudioError::DeviceAbsent => write!(f, "device does not exist"),
            AudioError::Timeout => write!(f, "timed out waiting for hardware"),
            AudioError::InvalidParameter => write!(f, "invalid parameter"),
            AudioError::NoMatch => write!(f, "no matching format"),
            AudioError::ResourceExhausted => write!(f, "resources exhausted"),
            AudioError::DeviceBusy => write!(f, "device busy"),
            AudioError::IoDeviceError => write!(f, "I/O device error"),
            AudioError::PoweredOff => write!(f, "device powered off"),
            AudioError::StoreFailure => write!(f, "persistent store write failed"),
            AudioError::StreamClosed => write!(f, "stream closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_is_distinct_for_negotiation_failures() {
        assert_ne!(
            AudioError::NoMatch.to_string(),
            AudioError::InvalidParameter.to_string()
        );
        assert_eq!(AudioError::DeviceAbsent.to_string(), "device does not exist");
    }
}
