//! Bounded client pool with round-robin leases.

use crate::client::RpcClient;
use crate::config::RpcClientPoolConfig;
use parking_lot::RwLock;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A bounded set of independent clients.
///
/// Clients are created lazily up to `max_clients`; once at the cap,
/// `try_acquire` hands out existing clients round-robin. The vector only
/// grows.
pub struct RpcClientPool {
    config: RpcClientPoolConfig,
    clients: RwLock<Vec<Arc<RpcClient>>>,
    /// Creation slots claimed (CASed up before the push is visible).
    reserved: AtomicUsize,
    /// Published client count; always <= clients.len().
    size: AtomicUsize,
    /// Round-robin ticket counter.
    rr: AtomicUsize,
}

impl RpcClientPool {
    pub fn new(mut config: RpcClientPoolConfig) -> Self {
        if config.max_clients == 0 {
            config.max_clients = 1;
        }

        tracing::debug!(
            "client pool for {}:{} max_clients={}",
            config.host,
            config.port,
            config.max_clients
        );

        let capacity = config.max_clients.min(1024);
        Self {
            config,
            clients: RwLock::new(Vec::with_capacity(capacity)),
            reserved: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            rr: AtomicUsize::new(0),
        }
    }

    /// Number of clients created so far.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Acquires a lease: a new client while below the cap, otherwise an
    /// existing one chosen round-robin.
    pub fn try_acquire(&self) -> RpcClientLease {
        loop {
            if self.size.load(Ordering::Acquire) < self.config.max_clients {
                if let Some(index) = self.try_create_one() {
                    tracing::debug!("pool created client idx={}", index);
                    return self.lease(index);
                }
            }

            let size = self.size.load(Ordering::Acquire);
            if size == 0 {
                // Another task claimed the slot but has not published yet.
                std::hint::spin_loop();
                continue;
            }

            let ticket = self.rr.fetch_add(1, Ordering::AcqRel);
            let index = if size.is_power_of_two() {
                ticket & (size - 1)
            } else {
                ticket % size
            };
            return self.lease(index);
        }
    }

    fn try_create_one(&self) -> Option<usize> {
        loop {
            let current = self.reserved.load(Ordering::Acquire);
            if current >= self.config.max_clients {
                return None;
            }
            if self
                .reserved
                .compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                continue;
            }

            let client = Arc::new(RpcClient::new(self.config.client_config()));
            let index = {
                let mut clients = self.clients.write();
                clients.push(client);
                clients.len() - 1
            };
            self.size.fetch_add(1, Ordering::Release);
            return Some(index);
        }
    }

    fn lease(&self, index: usize) -> RpcClientLease {
        let clients = self.clients.read();
        RpcClientLease {
            client: clients[index].clone(),
            index,
        }
    }
}

/// A lease on a pooled client.
///
/// Holds a reference to the client; dropping the lease releases nothing
/// (pooled clients are multiplexed, not checked out).
pub struct RpcClientLease {
    client: Arc<RpcClient>,
    index: usize,
}

impl RpcClientLease {
    /// Index of the leased client within the pool.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Deref for RpcClientLease {
    type Target = RpcClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool_config(max_clients: usize) -> RpcClientPoolConfig {
        RpcClientPoolConfig::new("127.0.0.1", 45900, max_clients)
    }

    #[test]
    fn test_zero_max_clients_clamped() {
        let pool = RpcClientPool::new(pool_config(0));
        let lease = pool.try_acquire();
        assert_eq!(lease.index(), 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_grows_to_cap_then_round_robins() {
        let pool = RpcClientPool::new(pool_config(4));

        for expected in 0..4 {
            let lease = pool.try_acquire();
            assert_eq!(lease.index(), expected);
        }
        assert_eq!(pool.size(), 4);

        // At the cap: leases rotate over existing clients.
        let mut seen = HashSet::new();
        for _ in 0..8 {
            let lease = pool.try_acquire();
            assert!(lease.index() < 4);
            seen.insert(lease.index());
        }
        assert_eq!(pool.size(), 4);
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_round_robin_non_power_of_two() {
        let pool = RpcClientPool::new(pool_config(3));
        for _ in 0..3 {
            pool.try_acquire();
        }

        let indices: Vec<usize> = (0..6).map(|_| pool.try_acquire().index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_lease_outlives_acquire_scope() {
        let pool = RpcClientPool::new(pool_config(1));
        let lease = pool.try_acquire();
        assert!(!lease.is_connected());
    }

    #[test]
    fn test_concurrent_acquire_respects_cap() {
        let pool = Arc::new(RpcClientPool::new(pool_config(4)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                let lease = pool.try_acquire();
                lease.index()
            }));
        }
        for handle in handles {
            let index = handle.join().unwrap();
            assert!(index < 4);
        }
        assert_eq!(pool.size(), 4);
    }
}
