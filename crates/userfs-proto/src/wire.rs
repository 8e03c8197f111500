// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Frame encoding for the UserFS wire protocol
//!
//! A frame is a `u32` little-endian length followed by the message bytes
//! (`u16` kind code plus SSZ payload). The length counts the message bytes
//! only, not the prefix itself.

use std::io::{self, Read, Write};

use crate::messages::{Message, MessageKind};

/// Size of the frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Errors produced while encoding or decoding wire frames.
#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("frame truncated")]
    Truncated,
    #[error("unknown message kind {0}")]
    UnknownKind(u16),
    #[error("malformed {kind:?} payload: {detail}")]
    Payload { kind: MessageKind, detail: String },
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Write one message as a length-prefixed frame.
///
/// Fails with [`WireError::FrameTooLarge`] before any bytes hit the wire if
/// the encoded message exceeds `limit`.
pub fn write_frame<W: Write>(writer: &mut W, message: &Message, limit: usize) -> Result<(), WireError> {
    let bytes = message.encode();
    if bytes.len() > limit {
        return Err(WireError::FrameTooLarge {
            size: bytes.len(),
            limit,
        });
    }
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame and decode the message inside it.
///
/// A peer announcing a frame larger than `limit` is treated as a protocol
/// violation; nothing past the prefix is read in that case.
pub fn read_frame<R: Read>(reader: &mut R, limit: usize) -> Result<Message, WireError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let size = u32::from_le_bytes(header) as usize;
    if size > limit {
        return Err(WireError::FrameTooLarge { size, limit });
    }
    let mut bytes = vec![0u8; size];
    reader.read_exact(&mut bytes)?;
    Message::decode(&bytes)
}
