// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request port pool with thread-affine reuse
//!
//! Many calling threads share a bounded set of ports. A thread that already
//! holds a port gets the *same* port back on a nested acquire; this is what
//! keeps the callback-while-blocked protocol deadlock free. Only the
//! outermost release returns the port to the free list.
//!
//! Exhaustion blocks until a port frees up; it is not an error. A dead port
//! is detected lazily at release time and poisons the whole pool: every
//! subsequent acquire fails fast with `NotReady` instead of blocking.
//! Fairness among blocked acquirers is arbitrary (condvar wake order);
//! FIFO ordering is deliberately not promised.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::port::RequestPort;

struct PortLease {
    port: Arc<RequestPort>,
    reuse_count: u32,
}

struct PoolState {
    free: Vec<Arc<RequestPort>>,
    used: HashMap<ThreadId, PortLease>,
    disconnected: bool,
}

pub struct RequestPortPool {
    state: Mutex<PoolState>,
    available: Condvar,
}

impl RequestPortPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: Vec::new(),
                used: HashMap::new(),
                disconnected: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Grow the pool. The port goes straight to the free list, leaving any
    /// lease the calling thread holds untouched; a port that is already
    /// dead poisons the pool right away.
    pub fn add(&self, port: RequestPort) {
        let port = Arc::new(port);
        let mut state = self.state.lock().unwrap();
        if port.init_check().is_err() {
            debug!("dead port added, disconnecting pool");
            state.disconnected = true;
            self.available.notify_all();
            return;
        }
        state.free.push(port);
        self.available.notify_one();
    }

    /// Acquire a port, blocking while the pool is exhausted.
    ///
    /// Re-entrant per thread: a nested acquire returns the port the thread
    /// already holds and bumps its reuse count.
    pub fn acquire(&self) -> BridgeResult<Arc<RequestPort>> {
        let thread_id = thread::current().id();
        let mut state = self.state.lock().unwrap();

        if let Some(lease) = state.used.get_mut(&thread_id) {
            lease.reuse_count += 1;
            return Ok(Arc::clone(&lease.port));
        }

        loop {
            if state.disconnected {
                return Err(BridgeError::NotReady);
            }
            if let Some(port) = state.free.pop() {
                state.used.insert(
                    thread_id,
                    PortLease {
                        port: Arc::clone(&port),
                        reuse_count: 1,
                    },
                );
                return Ok(port);
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Release a port acquired by this thread. Only the outermost release
    /// returns it to the free list; that is also when a dead port is
    /// noticed and the pool disconnects.
    pub fn release(&self, port: &Arc<RequestPort>) {
        let thread_id = thread::current().id();
        let mut state = self.state.lock().unwrap();

        let Some(lease) = state.used.get_mut(&thread_id) else {
            warn!("release from a thread holding no port");
            return;
        };
        if !Arc::ptr_eq(&lease.port, port) {
            warn!("release of a port this thread does not hold");
            return;
        }

        lease.reuse_count -= 1;
        if lease.reuse_count > 0 {
            return;
        }
        state.used.remove(&thread_id);

        if port.init_check().is_err() {
            debug!("dead port observed at release, disconnecting pool");
            state.disconnected = true;
            // Wake everyone so blocked acquirers fail fast.
            self.available.notify_all();
            return;
        }
        state.free.push(Arc::clone(port));
        self.available.notify_one();
    }

    /// Disconnect the pool explicitly (endpoint teardown). In-flight calls
    /// holding a port are unaffected; new acquisitions fail fast.
    pub fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.disconnected {
            state.disconnected = true;
            self.available.notify_all();
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.lock().unwrap().disconnected
    }

    /// Number of ports currently in the free list.
    pub fn free_ports(&self) -> usize {
        self.state.lock().unwrap().free.len()
    }

    /// Close every pooled port. Used on teardown to wake a peer blocked in
    /// receive; ports leased to in-flight calls are left alone.
    pub fn close_free_ports(&self) {
        let state = self.state.lock().unwrap();
        for port in &state.free {
            port.close();
        }
    }
}

impl Default for RequestPortPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope guard that releases a pooled port when dropped, so early returns
/// inside a volume operation cannot leak the lease.
pub struct PortReleaser<'a> {
    pool: &'a RequestPortPool,
    port: Arc<RequestPort>,
}

impl<'a> PortReleaser<'a> {
    pub fn new(pool: &'a RequestPortPool, port: Arc<RequestPort>) -> Self {
        Self { pool, port }
    }

    pub fn port(&self) -> &RequestPort {
        &self.port
    }
}

impl Drop for PortReleaser<'_> {
    fn drop(&mut self) {
        self.pool.release(&self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pool_with_ports(count: usize) -> (RequestPortPool, Vec<RequestPort>) {
        let pool = RequestPortPool::new();
        let mut remotes = Vec::new();
        for _ in 0..count {
            let (local, remote) = RequestPort::pair(1024).unwrap();
            pool.add(local);
            remotes.push(remote);
        }
        (pool, remotes)
    }

    #[test]
    fn test_add_flows_into_free_list() {
        let (pool, _remotes) = pool_with_ports(3);
        assert_eq!(pool.free_ports(), 3);
        assert!(!pool.is_disconnected());
    }

    #[test]
    fn test_add_leaves_existing_lease_alone() {
        let (pool, _remotes) = pool_with_ports(1);
        let held = pool.acquire().unwrap();

        let (extra, _extra_remote) = RequestPort::pair(1024).unwrap();
        pool.add(extra);
        assert_eq!(pool.free_ports(), 1);

        // The thread still holds its original port.
        let nested = pool.acquire().unwrap();
        assert!(Arc::ptr_eq(&held, &nested));
        pool.release(&nested);
        pool.release(&held);
        assert_eq!(pool.free_ports(), 2);
    }

    #[test]
    fn test_add_of_dead_port_disconnects_pool() {
        let pool = RequestPortPool::new();
        let (local, _remote) = RequestPort::pair(1024).unwrap();
        local.close();

        pool.add(local);
        assert!(pool.is_disconnected());
        assert_eq!(pool.acquire().unwrap_err(), BridgeError::NotReady);
    }

    #[test]
    fn test_reentrant_acquire_returns_same_port() {
        let (pool, _remotes) = pool_with_ports(2);

        let first = pool.acquire().unwrap();
        let free_after_first = pool.free_ports();
        let second = pool.acquire().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        // The nested acquire consumed nothing from the free list.
        assert_eq!(pool.free_ports(), free_after_first);

        // Only the outermost release frees the port.
        pool.release(&second);
        assert_eq!(pool.free_ports(), free_after_first);
        pool.release(&first);
        assert_eq!(pool.free_ports(), free_after_first + 1);
    }

    #[test]
    fn test_exhaustion_blocks_until_release() {
        let (pool, _remotes) = pool_with_ports(1);
        let pool = Arc::new(pool);

        let held = pool.acquire().unwrap();
        let acquired = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let pool = Arc::clone(&pool);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let port = pool.acquire().expect("waiter must eventually acquire");
                acquired.store(1, Ordering::SeqCst);
                pool.release(&port);
            })
        };

        // The waiter must block, not fail.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        pool.release(&held);
        waiter.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(pool.free_ports(), 1);
    }

    #[test]
    fn test_dead_port_disconnects_pool_at_release() {
        let (pool, _remotes) = pool_with_ports(2);

        let port = pool.acquire().unwrap();
        port.close();
        pool.release(&port);

        assert!(pool.is_disconnected());
        assert_eq!(pool.acquire().unwrap_err(), BridgeError::NotReady);
    }

    #[test]
    fn test_releaser_returns_port_on_drop() {
        let (pool, _remotes) = pool_with_ports(1);
        {
            let port = pool.acquire().unwrap();
            let _guard = PortReleaser::new(&pool, port);
            assert_eq!(pool.free_ports(), 0);
        }
        assert_eq!(pool.free_ports(), 1);
    }

    #[test]
    fn test_disconnect_wakes_blocked_acquirers() {
        let (pool, _remotes) = pool_with_ports(1);
        let pool = Arc::new(pool);
        let _held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire())
        };

        thread::sleep(Duration::from_millis(50));
        pool.disconnect();
        assert_eq!(waiter.join().unwrap().unwrap_err(), BridgeError::NotReady);
    }
}
