//! Ephemeral port bookkeeping for transfer sessions.
//!
//! Picking a random port per request is not enough: two live sessions could
//! draw the same one.  [`PortAllocator`] keeps the set of ports currently
//! leased behind a mutex and hands out [`PortLease`] guards that return their
//! port to the pool when dropped, whichever way the session ends.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

/// Port range used when none is configured.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 50000..=51000;

#[derive(Debug)]
struct PortPool {
    range: RangeInclusive<u16>,
    in_use: HashSet<u16>,
}

/// Shared, cloneable handle to the pool.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    pool: Arc<Mutex<PortPool>>,
}

/// Exclusive claim on one port.  Released on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    pool: Arc<Mutex<PortPool>>,
}

fn lock(pool: &Mutex<PortPool>) -> MutexGuard<'_, PortPool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            pool: Arc::new(Mutex::new(PortPool {
                range,
                in_use: HashSet::new(),
            })),
        }
    }

    /// Claim a free port, starting the search at a random point in the range.
    ///
    /// Returns `None` when every port in the range is leased.
    pub fn lease(&self) -> Option<PortLease> {
        let mut pool = lock(&self.pool);
        let (lo, hi) = (*pool.range.start(), *pool.range.end());
        if lo > hi {
            return None;
        }
        let span = u32::from(hi - lo) + 1;
        let offset = rand::thread_rng().gen_range(0..span);

        for step in 0..span {
            let port = lo + ((offset + step) % span) as u16;
            if pool.in_use.insert(port) {
                return Some(PortLease {
                    port,
                    pool: Arc::clone(&self.pool),
                });
            }
        }
        None
    }

    /// Number of ports currently leased.
    pub fn in_use(&self) -> usize {
        lock(&self.pool).in_use.len()
    }

    pub fn is_leased(&self, port: u16) -> bool {
        lock(&self.pool).in_use.contains(&port)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        lock(&self.pool).in_use.remove(&self.port);
        log::trace!("[ports] released {}", self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leases_stay_inside_range() {
        let ports = PortAllocator::new(40000..=40009);
        let leases: Vec<_> = (0..10).map(|_| ports.lease().unwrap()).collect();
        for lease in &leases {
            assert!((40000..=40009).contains(&lease.port()));
        }
    }

    #[test]
    fn live_leases_never_collide() {
        let ports = PortAllocator::new(40000..=40063);
        let leases: Vec<_> = (0..64).map(|_| ports.lease().unwrap()).collect();
        let distinct: HashSet<_> = leases.iter().map(PortLease::port).collect();
        assert_eq!(distinct.len(), 64);
        assert_eq!(ports.in_use(), 64);
    }

    #[test]
    fn exhausted_range_returns_none() {
        let ports = PortAllocator::new(40000..=40001);
        let _a = ports.lease().unwrap();
        let _b = ports.lease().unwrap();
        assert!(ports.lease().is_none());
    }

    #[test]
    fn dropping_a_lease_frees_its_port() {
        let ports = PortAllocator::new(40000..=40000);
        let lease = ports.lease().unwrap();
        assert!(ports.is_leased(40000));
        assert!(ports.lease().is_none());
        drop(lease);
        assert!(!ports.is_leased(40000));
        assert_eq!(ports.lease().map(|l| l.port()), Some(40000));
    }

    #[test]
    fn concurrent_leasing_is_exclusive() {
        let ports = PortAllocator::new(40000..=40199);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ports = ports.clone();
                std::thread::spawn(move || (0..25).map(|_| ports.lease().unwrap()).collect::<Vec<_>>())
            })
            .collect();
        let all: Vec<PortLease> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let distinct: HashSet<_> = all.iter().map(PortLease::port).collect();
        assert_eq!(distinct.len(), 200);
    }

    #[test]
    fn full_u16_range_does_not_overflow() {
        let ports = PortAllocator::new(0..=u16::MAX);
        assert!(ports.lease().is_some());
    }
}
