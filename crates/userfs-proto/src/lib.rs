// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! UserFS Protocol — wire catalogue, framing and validation
//!
//! This crate defines the message catalogue exchanged between the host-side
//! bridge and a remote filesystem server, the length-prefixed frame format
//! carrying it, and logical validation for decoded messages.

pub mod messages;
pub mod validation;
pub mod wire;

// Re-export key types
pub use messages::{Message, MessageKind, STATUS_OK};
pub use validation::{validate_message, ValidationError};
pub use wire::{read_frame, write_frame, WireError, FRAME_HEADER_SIZE};
