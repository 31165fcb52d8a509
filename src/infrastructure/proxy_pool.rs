//! Round-robin proxy rotation
//!
//! The endpoint order is shuffled once at construction so that several
//! crawler processes reading the same registry do not hammer the same proxy
//! in lockstep. After that the rotation is a plain atomic counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::domain::{Egress, ProxyEndpoint};

#[derive(Debug)]
pub struct ProxyPool {
    endpoints: Vec<Arc<ProxyEndpoint>>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    /// Builds a pool with a randomly shuffled rotation order.
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self::with_rng(endpoints, &mut fastrand::Rng::new())
    }

    /// Builds a pool shuffled by the given generator; seeded generators give
    /// a reproducible order.
    pub fn with_rng(endpoints: Vec<ProxyEndpoint>, rng: &mut fastrand::Rng) -> Self {
        let mut endpoints: Vec<_> = endpoints.into_iter().map(Arc::new).collect();
        rng.shuffle(&mut endpoints);

        if endpoints.is_empty() {
            info!("Proxy pool is empty, requests go out directly");
        } else {
            info!("Proxy pool loaded with {} endpoints", endpoints.len());
        }

        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    /// A pool that always answers [`Egress::Direct`].
    pub fn direct() -> Self {
        Self {
            endpoints: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next egress path in rotation.
    pub fn next(&self) -> Egress {
        if self.endpoints.is_empty() {
            return Egress::Direct;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        Egress::Proxy(Arc::clone(&self.endpoints[index]))
    }

    /// Endpoints in rotation order.
    pub fn endpoints(&self) -> impl Iterator<Item = &ProxyEndpoint> {
        self.endpoints.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn endpoints(n: u16) -> Vec<ProxyEndpoint> {
        (0..n)
            .map(|i| ProxyEndpoint::new(format!("10.0.0.{i}"), 3128 + i))
            .collect()
    }

    #[test]
    fn empty_pool_goes_direct() {
        let pool = ProxyPool::new(Vec::new());
        assert!(pool.next().is_direct());
        assert!(pool.next().is_direct());
        assert!(ProxyPool::direct().is_empty());
    }

    #[test]
    fn rotates_evenly_in_post_shuffle_order() {
        let pool = ProxyPool::with_rng(endpoints(3), &mut fastrand::Rng::with_seed(7));
        let order: Vec<ProxyEndpoint> = pool.endpoints().cloned().collect();

        let mut counts: HashMap<ProxyEndpoint, usize> = HashMap::new();
        for call in 0..9 {
            let Egress::Proxy(endpoint) = pool.next() else {
                panic!("non-empty pool returned direct egress");
            };
            assert_eq!(*endpoint, order[call % 3]);
            *counts.entry((*endpoint).clone()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&count| count == 3));
    }

    #[test]
    fn same_seed_same_order() {
        let a = ProxyPool::with_rng(endpoints(8), &mut fastrand::Rng::with_seed(42));
        let b = ProxyPool::with_rng(endpoints(8), &mut fastrand::Rng::with_seed(42));
        assert!(a.endpoints().eq(b.endpoints()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_rotation() {
        let pool = Arc::new(ProxyPool::new(endpoints(4)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    (0..100).map(|_| pool.next().to_string()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for egress in handle.await.unwrap() {
                *counts.entry(egress).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&count| count == 100));
    }
}
