// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logical schema validation for decoded UserFS messages
//!
//! SSZ decoding enforces structure; the checks here enforce the constraints
//! the encoding cannot express, before a message reaches the dispatcher.

use thiserror::Error;

use crate::messages::Message;

/// Longest accepted filesystem, entry, attribute or index name.
pub const MAX_NAME_LENGTH: usize = 255;

/// Validation error
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("schema validation failed: {0}")]
    Schema(String),
}

fn check_name(what: &str, name: &[u8]) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Schema(format!("{} must not be empty", what)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::Schema(format!(
            "{} exceeds {} bytes",
            what, MAX_NAME_LENGTH
        )));
    }
    if name.contains(&0) {
        return Err(ValidationError::Schema(format!(
            "{} contains a NUL byte",
            what
        )));
    }
    Ok(())
}

/// Validate a decoded message against its logical schema.
pub fn validate_message(message: &Message) -> Result<(), ValidationError> {
    match message {
        Message::Connect(request) => check_name("filesystem name", &request.fs_name),
        Message::Mount(request) => {
            if request.device.is_empty() {
                return Err(ValidationError::Schema("device must not be empty".into()));
            }
            Ok(())
        }
        Message::Lookup(request) | Message::RemoveDir(request) => {
            check_name("entry name", &request.name)
        }
        Message::Create(request) => check_name("entry name", &request.name),
        Message::CreateDir(request) => check_name("entry name", &request.name),
        Message::CreateAttr(request) => check_name("attribute name", &request.name),
        Message::OpenAttr(request) => check_name("attribute name", &request.name),
        Message::RemoveAttr(request) => check_name("attribute name", &request.name),
        Message::RenameAttr(request) => {
            check_name("attribute name", &request.from_name)?;
            check_name("attribute name", &request.to_name)
        }
        Message::CreateIndex(request) => check_name("index name", &request.name),
        Message::RemoveIndex(request) | Message::ReadIndexStat(request) => {
            check_name("index name", &request.name)
        }
        Message::OpenQuery(request) => {
            if request.query.is_empty() {
                return Err(ValidationError::Schema("query must not be empty".into()));
            }
            Ok(())
        }
        Message::ReadDir(request) if request.count == 0 => {
            Err(ValidationError::Schema("read-dir count must be non-zero".into()))
        }
        Message::ReadAttrDir(request) if request.count == 0 => {
            Err(ValidationError::Schema("read-dir count must be non-zero".into()))
        }
        Message::ReadIndexDir(request) | Message::ReadQuery(request) if request.count == 0 => {
            Err(ValidationError::Schema("read-dir count must be non-zero".into()))
        }
        // Replies and the remaining requests carry only fixed-width fields.
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ConnectRequest, EntryRequest, MountRequest, Caller, ReadDirRequest};

    #[test]
    fn test_connect_requires_fs_name() {
        let message = Message::Connect(ConnectRequest { fs_name: vec![] });
        assert!(validate_message(&message).is_err());
    }

    #[test]
    fn test_lookup_rejects_nul_and_overlong_names() {
        let nul = Message::Lookup(EntryRequest {
            volume: 1,
            dir: 1,
            name: b"bad\0name".to_vec(),
        });
        assert!(validate_message(&nul).is_err());

        let long = Message::Lookup(EntryRequest {
            volume: 1,
            dir: 1,
            name: vec![b'a'; MAX_NAME_LENGTH + 1],
        });
        assert!(validate_message(&long).is_err());

        let good = Message::Lookup(EntryRequest {
            volume: 1,
            dir: 1,
            name: b"fine".to_vec(),
        });
        assert!(validate_message(&good).is_ok());
    }

    #[test]
    fn test_mount_requires_device() {
        let message = Message::Mount(MountRequest {
            volume: 1,
            device: vec![],
            flags: 0,
            parameters: vec![],
            caller: Caller {
                pid: 1,
                uid: 0,
                gid: 0,
            },
        });
        assert!(validate_message(&message).is_err());
    }

    #[test]
    fn test_read_dir_requires_count() {
        let message = Message::ReadDir(ReadDirRequest {
            volume: 1,
            node: 1,
            cookie: 1,
            count: 0,
        });
        assert!(validate_message(&message).is_err());
    }
}
