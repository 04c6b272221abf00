//! Locality set with blind round-robin assignment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::locality::{Locality, LocalityId};
use crate::cluster::worker::WorkerNode;
use crate::config::ClusterConfig;
use crate::registry::FunctionRegistry;
use crate::sandbox::Sandbox;

/// The set was built without any locality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("locality set must contain at least one locality")]
pub struct EmptyLocalitySet;

/// Fixed, ordered sequence of localities established at startup.
///
/// A single shared cursor hands out localities in declared order and wraps
/// after the last one. Current load is ignored.
#[derive(Debug)]
pub struct LocalitySet {
    localities: Vec<Arc<dyn Locality>>,
    cursor: AtomicUsize,
}

impl LocalitySet {
    pub fn new(localities: Vec<Arc<dyn Locality>>) -> Result<Self, EmptyLocalitySet> {
        if localities.is_empty() {
            return Err(EmptyLocalitySet);
        }
        Ok(Self {
            localities,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Spawn `config.localities` in-process worker nodes sharing one registry.
    pub fn local(
        config: &ClusterConfig,
        registry: Arc<FunctionRegistry>,
        sandbox: Sandbox,
    ) -> Result<Self, EmptyLocalitySet> {
        let localities = (0..config.localities)
            .map(|i| {
                Arc::new(WorkerNode::new(
                    LocalityId::new(i as u32),
                    Arc::clone(&registry),
                    sandbox.clone(),
                    config.compute_slots,
                )) as Arc<dyn Locality>
            })
            .collect();
        Self::new(localities)
    }

    /// Assign the next locality.
    pub fn next(&self) -> Arc<dyn Locality> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.localities.len();
        Arc::clone(&self.localities[index])
    }

    pub fn len(&self) -> usize {
        self.localities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.localities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Locality>> {
        self.localities.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use wasmtime::Engine;

    fn set_of(n: usize) -> LocalitySet {
        let engine = Engine::default();
        let sandbox = Sandbox::with_engine(engine, &SandboxConfig::default());
        LocalitySet::local(
            &ClusterConfig {
                localities: n,
                compute_slots: 1,
            },
            Arc::new(FunctionRegistry::default()),
            sandbox,
        )
        .unwrap()
    }

    #[test]
    fn round_robin_visits_each_in_order_then_wraps() {
        let set = set_of(3);
        let picked: Vec<u32> = (0..7).map(|_| set.next().id().as_u32()).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_locality_always_chosen() {
        let set = set_of(1);
        for _ in 0..5 {
            assert_eq!(set.next().id(), LocalityId::new(0));
        }
    }

    #[test]
    fn empty_set_rejected() {
        assert_eq!(LocalitySet::new(Vec::new()).unwrap_err(), EmptyLocalitySet);
    }

    #[test]
    fn concurrent_assignment_is_balanced() {
        let set = Arc::new(set_of(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    (0..100).map(|_| set.next().id().as_u32()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = [0usize; 4];
        for handle in handles {
            for id in handle.join().unwrap() {
                counts[id as usize] += 1;
            }
        }
        assert_eq!(counts, [100, 100, 100, 100]);
    }
}
