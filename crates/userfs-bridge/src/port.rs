// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request port: one bidirectional message channel
//!
//! A port wraps one half of a Unix socketpair; the stream's two directions
//! are the channel's two one-way message queues, and the configured
//! `max_message_size` bounds the variable-length payload buffer negotiated
//! at connection setup. Messages travel as length-prefixed frames (see
//! `userfs_proto::wire`).
//!
//! Once any I/O on the stream fails, the port latches invalid: every later
//! send or receive fails fast with `NotReady`, it never silently retries.

use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;
use userfs_proto::{read_frame, write_frame, Message, WireError};

use crate::error::{BridgeError, BridgeResult};

pub struct RequestPort {
    stream: UnixStream,
    max_message_size: usize,
    // Owner tears the underlying stream down on close; a borrower does not.
    owner: bool,
    broken: AtomicBool,
}

impl RequestPort {
    /// Wrap an owned stream half. The peer process (or the test server)
    /// holds the other half.
    pub fn new(stream: UnixStream, max_message_size: usize) -> Self {
        Self {
            stream,
            max_message_size,
            owner: true,
            broken: AtomicBool::new(false),
        }
    }

    /// Create a connected pair of owner ports, one per side.
    pub fn pair(max_message_size: usize) -> std::io::Result<(RequestPort, RequestPort)> {
        let (local, remote) = UnixStream::pair()?;
        Ok((
            RequestPort::new(local, max_message_size),
            RequestPort::new(remote, max_message_size),
        ))
    }

    /// A borrower handle onto the same underlying stream. Closing the
    /// borrower does not tear the stream down.
    pub fn borrower(&self) -> std::io::Result<RequestPort> {
        Ok(Self {
            stream: self.stream.try_clone()?,
            max_message_size: self.max_message_size,
            owner: false,
            broken: AtomicBool::new(self.broken.load(Ordering::SeqCst)),
        })
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Whether the underlying queues are still valid.
    pub fn init_check(&self) -> BridgeResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(BridgeError::NotReady)
        } else {
            Ok(())
        }
    }

    /// Send one message. Oversized messages fail with `LimitExceeded`
    /// before any bytes are written.
    pub fn send(&self, message: &Message) -> BridgeResult<()> {
        self.init_check()?;
        match write_frame(&mut &self.stream, message, self.max_message_size) {
            Ok(()) => Ok(()),
            Err(WireError::FrameTooLarge { size, limit }) => {
                warn!(size, limit, "refusing oversized message");
                Err(BridgeError::LimitExceeded)
            }
            Err(WireError::Io(err)) => {
                warn!(error = %err, "port send failed, latching invalid");
                self.broken.store(true, Ordering::SeqCst);
                Err(BridgeError::NotReady)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Receive one message; `None` waits forever. A bounded wait that
    /// elapses returns `TimedOut` without invalidating the port.
    pub fn receive(&self, timeout: Option<Duration>) -> BridgeResult<Message> {
        self.init_check()?;
        if self.stream.set_read_timeout(timeout).is_err() {
            self.broken.store(true, Ordering::SeqCst);
            return Err(BridgeError::NotReady);
        }
        match read_frame(&mut &self.stream, self.max_message_size) {
            Ok(message) => Ok(message),
            Err(WireError::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Err(BridgeError::TimedOut)
            }
            Err(WireError::Io(err)) => {
                warn!(error = %err, "port receive failed, latching invalid");
                self.broken.store(true, Ordering::SeqCst);
                Err(BridgeError::NotReady)
            }
            Err(WireError::FrameTooLarge { size, limit }) => {
                // The peer announced a frame we will not buffer; the stream
                // position is now unrecoverable.
                warn!(size, limit, "peer announced oversized frame");
                self.broken.store(true, Ordering::SeqCst);
                Err(BridgeError::LimitExceeded)
            }
            Err(err) => {
                warn!(error = %err, "discarding malformed message");
                Err(BridgeError::BadData)
            }
        }
    }

    /// Write arbitrary bytes onto the stream, bypassing the frame encoder.
    #[cfg(test)]
    pub(crate) fn send_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        (&self.stream).write_all(bytes)
    }

    /// Invalidate the port. The owner also shuts the stream down, waking a
    /// peer blocked in receive.
    pub fn close(&self) {
        self.broken.store(true, Ordering::SeqCst);
        if self.owner {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}

impl std::fmt::Debug for RequestPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPort")
            .field("owner", &self.owner)
            .field("broken", &self.broken.load(Ordering::SeqCst))
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}
