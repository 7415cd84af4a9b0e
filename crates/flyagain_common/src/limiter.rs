//! Process-wide connection limiter.
//!
//! First pipeline stage of every gateway: a total cap and a per-client-
//! address cap. A connection over either cap is accepted and immediately
//! closed by the caller. Counters are atomic; the address map is concurrent;
//! both decrement when the guard drops.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

pub struct ConnectionLimiter {
    max_total: usize,
    max_per_addr: usize,
    total: AtomicUsize,
    per_addr: DashMap<IpAddr, usize>,
}

impl ConnectionLimiter {
    pub fn new(max_total: usize, max_per_addr: usize) -> Arc<Self> {
        Arc::new(Self {
            max_total,
            max_per_addr,
            total: AtomicUsize::new(0),
            per_addr: DashMap::new(),
        })
    }

    /// Try to admit a connection from `addr`. `None` means over a cap and
    /// the socket must be closed right away.
    pub fn try_acquire(self: &Arc<Self>, addr: IpAddr) -> Option<ConnectionGuard> {
        let total = self.total.fetch_add(1, Ordering::SeqCst);
        if total >= self.max_total {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return None;
        }

        let mut entry = self.per_addr.entry(addr).or_insert(0);
        if *entry >= self.max_per_addr {
            drop(entry);
            self.total.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        *entry += 1;
        drop(entry);

        Some(ConnectionGuard {
            limiter: Arc::clone(self),
            addr,
        })
    }

    pub fn active_total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn release(&self, addr: IpAddr) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        if let Some(mut entry) = self.per_addr.get_mut(&addr) {
            *entry = entry.saturating_sub(1);
        }
        self.per_addr.remove_if(&addr, |_, count| *count == 0);
    }
}

/// RAII admission: dropping it releases both counters.
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
    addr: IpAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.release(self.addr);
    }
}
