//! Port Allocator: bind-probe TCP port availability, batch reservation.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::error::PortError;

const CONNECT_GUARD_TIMEOUT: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 10000,
            end: 20000,
        }
    }
}

pub struct PortAllocator {
    range: PortRange,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self { range }
    }

    /// Bind succeeds ⇒ available, subject to a short-timeout connect as a secondary guard
    /// (a bind can succeed on a port something is actively refusing new listeners on but
    /// still answering existing connections for, e.g. during a graceful restart).
    fn probe(port: u16) -> Option<TcpListener> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(addr).ok()?;
        if TcpStream::connect_timeout(&addr, CONNECT_GUARD_TIMEOUT).is_ok() {
            return None;
        }
        Some(listener)
    }

    fn scan_order(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = (self.range.start..=self.range.end).collect();
        ports.shuffle(&mut rand::thread_rng());
        ports
    }

    pub fn allocate_one(&self) -> Result<u16, PortError> {
        for port in self.scan_order() {
            if let Some(listener) = Self::probe(port) {
                drop(listener);
                return Ok(port);
            }
        }
        Err(PortError::NoFreePorts {
            start: self.range.start,
            end: self.range.end,
        })
    }

    /// Holds each provisional port's listener open until all `n` are secured, then drops
    /// them all at once right before returning. This is a best-effort batch reservation;
    /// callers must tolerate the race between this release and their own bind.
    pub fn allocate_batch(&self, n: usize) -> Result<Vec<u16>, PortError> {
        let mut held: Vec<(u16, TcpListener)> = Vec::with_capacity(n);
        for port in self.scan_order() {
            if held.len() == n {
                break;
            }
            if let Some(listener) = Self::probe(port) {
                held.push((port, listener));
            }
        }
        if held.len() < n {
            return Err(PortError::NoFreePorts {
                start: self.range.start,
                end: self.range.end,
            });
        }
        Ok(held.into_iter().map(|(p, _)| p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocate_one_returns_port_in_range() {
        let alloc = PortAllocator::new(PortRange {
            start: 40000,
            end: 40050,
        });
        let p = alloc.allocate_one().unwrap();
        assert!((40000..=40050).contains(&p));
    }

    #[test]
    fn allocate_batch_returns_distinct_ports() {
        let alloc = PortAllocator::new(PortRange {
            start: 41000,
            end: 41100,
        });
        let ports = alloc.allocate_batch(10).unwrap();
        let set: HashSet<_> = ports.iter().collect();
        assert_eq!(set.len(), ports.len());
    }

    #[test]
    fn allocate_batch_fails_when_range_too_small() {
        let alloc = PortAllocator::new(PortRange {
            start: 42000,
            end: 42002,
        });
        assert!(alloc.allocate_batch(100).is_err());
    }
}
