// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the UserFS bridge

use userfs_proto::WireError;

/// Wire status codes understood by both sides. Anything outside this table
/// is a remote-defined code and travels through the bridge untouched.
pub mod status {
    pub const OK: u32 = 0;
    pub const FAILED: u32 = 1;
    pub const NOT_READY: u32 = 2;
    pub const BAD_DATA: u32 = 3;
    pub const BAD_VALUE: u32 = 4;
    pub const NO_MEMORY: u32 = 5;
    pub const NOT_SUPPORTED: u32 = 6;
    pub const TIMED_OUT: u32 = 7;
    pub const LIMIT_EXCEEDED: u32 = 8;
}

/// Bridge error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Transport dead or pool disconnected; fails fast, never blocks.
    #[error("not ready")]
    NotReady,
    /// Unexpected reply type or malformed payload; never retried.
    #[error("bad data")]
    BadData,
    /// Addressing error: unknown volume, listener key or sync handle.
    #[error("bad value")]
    BadValue,
    #[error("no memory")]
    NoMemory,
    /// Operation absent from the negotiated capability set.
    #[error("not supported")]
    NotSupported,
    /// Bounded receives only; unbounded waits never time out.
    #[error("timed out")]
    TimedOut,
    /// Message larger than the connection-setup buffer size.
    #[error("message exceeds transport limit")]
    LimitExceeded,
    /// Status code returned by the remote filesystem, passed through
    /// unchanged.
    #[error("remote error {0}")]
    Remote(u32),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// The wire status code representing this error.
    pub fn to_status(&self) -> u32 {
        match self {
            BridgeError::NotReady => status::NOT_READY,
            BridgeError::BadData => status::BAD_DATA,
            BridgeError::BadValue => status::BAD_VALUE,
            BridgeError::NoMemory => status::NO_MEMORY,
            BridgeError::NotSupported => status::NOT_SUPPORTED,
            BridgeError::TimedOut => status::TIMED_OUT,
            BridgeError::LimitExceeded => status::LIMIT_EXCEEDED,
            BridgeError::Remote(code) => *code,
        }
    }
}

/// Turn a wire status into a result, preserving unknown codes verbatim.
pub fn check_status(status: u32) -> BridgeResult<()> {
    match status {
        status::OK => Ok(()),
        status::NOT_READY => Err(BridgeError::NotReady),
        status::BAD_DATA => Err(BridgeError::BadData),
        status::BAD_VALUE => Err(BridgeError::BadValue),
        status::NO_MEMORY => Err(BridgeError::NoMemory),
        status::NOT_SUPPORTED => Err(BridgeError::NotSupported),
        status::TIMED_OUT => Err(BridgeError::TimedOut),
        status::LIMIT_EXCEEDED => Err(BridgeError::LimitExceeded),
        code => Err(BridgeError::Remote(code)),
    }
}

/// The wire status to report for a host-side handler outcome.
pub fn result_status(result: &BridgeResult<()>) -> u32 {
    match result {
        Ok(()) => status::OK,
        Err(err) => err.to_status(),
    }
}

impl From<WireError> for BridgeError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::FrameTooLarge { .. } => BridgeError::LimitExceeded,
            WireError::Io(_) => BridgeError::NotReady,
            _ => BridgeError::BadData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_for_taxonomy() {
        for err in [
            BridgeError::NotReady,
            BridgeError::BadData,
            BridgeError::BadValue,
            BridgeError::NoMemory,
            BridgeError::NotSupported,
            BridgeError::TimedOut,
            BridgeError::LimitExceeded,
        ] {
            assert_eq!(check_status(err.to_status()), Err(err));
        }
    }

    #[test]
    fn test_unknown_status_passes_through() {
        assert_eq!(check_status(4711), Err(BridgeError::Remote(4711)));
        assert_eq!(BridgeError::Remote(4711).to_status(), 4711);
    }

    #[test]
    fn test_ok_status() {
        assert_eq!(check_status(status::OK), Ok(()));
    }
}
