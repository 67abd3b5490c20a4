//! TCP port allocation within a configured `[min, max]` range.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::net::TcpListener;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Allocated,
}

/// Allocates and releases TCP ports from a configured range.
///
/// Previously-allocated ports outside a newly configured range remain
/// recorded (so `Free` still works on them) but are never re-issued by
/// `Alloc`.
#[derive(Debug, Default)]
pub struct PortPool {
    min: u16,
    max: u16,
    ports: HashMap<u16, Slot>,
}

impl PortPool {
    #[must_use]
    pub fn new(min: u16, max: u16) -> Self {
        let mut pool = Self {
            min,
            max,
            ports: HashMap::new(),
        };
        pool.configure(min, max);
        pool
    }

    /// Replaces the configured range. Ports already recorded stay recorded.
    pub fn configure(&mut self, min: u16, max: u16) {
        self.min = min;
        self.max = max;
    }

    /// Allocates a port.
    ///
    /// If `preferred != 0` and it is both unallocated and OS-listenable,
    /// it is returned. Otherwise the range `[min, max]` is scanned
    /// ascending for the first unallocated, OS-listenable port.
    pub async fn alloc(&mut self, preferred: u16) -> CoreResult<u16> {
        if preferred != 0 && self.is_free(preferred) && Self::is_listenable(preferred).await {
            self.ports.insert(preferred, Slot::Allocated);
            return Ok(preferred);
        }

        for port in self.min..=self.max {
            if self.is_free(port) && Self::is_listenable(port).await {
                self.ports.insert(port, Slot::Allocated);
                return Ok(port);
            }
        }

        Err(CoreError::NoPortAvailable)
    }

    /// Releases a port. Idempotent; never fails.
    pub fn free(&mut self, port: u16) {
        self.ports.insert(port, Slot::Free);
    }

    fn is_free(&self, port: u16) -> bool {
        !matches!(self.ports.get(&port), Some(Slot::Allocated))
    }

    async fn is_listenable(port: u16) -> bool {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_within_range_ascending() {
        let mut pool = PortPool::new(20000, 20010);
        let p1 = pool.alloc(0).await.unwrap();
        assert!((20000..=20010).contains(&p1));
        let p2 = pool.alloc(0).await.unwrap();
        assert_ne!(p1, p2);
    }

    #[tokio::test]
    async fn free_then_alloc_is_fair_ascending() {
        let mut pool = PortPool::new(20100, 20110);
        let p1 = pool.alloc(0).await.unwrap();
        pool.free(p1);
        let p2 = pool.alloc(0).await.unwrap();
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn exhausted_range_fails() {
        let mut pool = PortPool::new(20200, 20200);
        let _p1 = pool.alloc(0).await.unwrap();
        let err = pool.alloc(0).await.unwrap_err();
        assert!(matches!(err, CoreError::NoPortAvailable));
    }

    #[tokio::test]
    async fn free_is_idempotent() {
        let mut pool = PortPool::new(20300, 20310);
        pool.free(20300);
        pool.free(20300);
    }
}
