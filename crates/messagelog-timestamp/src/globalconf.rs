//! Global configuration collaborator.
//!
//! Supplies the trusted TSAs and the digest algorithm. The batcher re-reads
//! it on every run so distribution updates take effect without a restart.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use messagelog_core::DigestAlgorithm;

use crate::tsa::TimestampAuthority;

/// Read-only view of the distributed global configuration.
pub trait GlobalConf: Send + Sync {
    /// Trusted TSAs, in preference order.
    fn timestamp_authorities(&self) -> Vec<Arc<dyn TimestampAuthority>>;

    /// Digest algorithm for new batches.
    fn digest_algorithm(&self) -> DigestAlgorithm;
}

/// Global configuration held in memory; replaceable at runtime.
pub struct StaticGlobalConf {
    inner: RwLock<Snapshot>,
}

struct Snapshot {
    tsas: Vec<Arc<dyn TimestampAuthority>>,
    algorithm: DigestAlgorithm,
}

impl StaticGlobalConf {
    pub fn new(tsas: Vec<Arc<dyn TimestampAuthority>>, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner: RwLock::new(Snapshot { tsas, algorithm }),
        }
    }

    /// Replace the TSA list.
    pub fn set_timestamp_authorities(&self, tsas: Vec<Arc<dyn TimestampAuthority>>) {
        self.write().tsas = tsas;
    }

    /// Replace the digest algorithm.
    pub fn set_digest_algorithm(&self, algorithm: DigestAlgorithm) {
        self.write().algorithm = algorithm;
    }

    // Each field is replaced whole, so a snapshot left behind by a panicking
    // writer is still consistent and the lock is recovered.
    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("global configuration lock poisoned; recovering it for an update");
            self.inner.clear_poison();
            poisoned.into_inner()
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("global configuration lock poisoned; reading the last snapshot");
            poisoned.into_inner()
        })
    }
}

impl GlobalConf for StaticGlobalConf {
    fn timestamp_authorities(&self) -> Vec<Arc<dyn TimestampAuthority>> {
        self.read().tsas.clone()
    }

    fn digest_algorithm(&self) -> DigestAlgorithm {
        self.read().algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsa::memory::MemoryTsa;

    #[test]
    fn test_updates_visible() {
        let conf = StaticGlobalConf::new(Vec::new(), DigestAlgorithm::Sha256);
        assert!(conf.timestamp_authorities().is_empty());

        conf.set_timestamp_authorities(vec![Arc::new(MemoryTsa::new("a")), Arc::new(MemoryTsa::new("b"))]);
        conf.set_digest_algorithm(DigestAlgorithm::Sha512);

        let names: Vec<String> = conf
            .timestamp_authorities()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(conf.digest_algorithm(), DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_updates_survive_poisoned_lock() {
        let conf = Arc::new(StaticGlobalConf::new(Vec::new(), DigestAlgorithm::Sha256));

        let holder = conf.clone();
        let crashed = std::thread::spawn(move || {
            let _guard = holder.inner.write().unwrap();
            panic!("writer crashed");
        })
        .join();
        assert!(crashed.is_err());
        assert!(conf.inner.is_poisoned());

        conf.set_digest_algorithm(DigestAlgorithm::Sha384);
        conf.set_timestamp_authorities(vec![Arc::new(MemoryTsa::new("after"))]);

        assert_eq!(conf.digest_algorithm(), DigestAlgorithm::Sha384);
        assert_eq!(conf.timestamp_authorities().len(), 1);
        assert!(!conf.inner.is_poisoned());
    }
}
