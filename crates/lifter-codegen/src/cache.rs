//! Emitted protocols keyed by content hash.
//!
//! Synthesis and emission are deterministic, so a protocol is fully
//! determined by the specification, the requirements, the target and the
//! emit options. The cache is for library callers that synthesize many
//! operations in one process; the `lifter` binary emits once per run and
//! does not use it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use lifter_ir::StructuralHash;

use crate::{EmitOptions, HybridProtocol};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub spec: StructuralHash,
    pub requirements: StructuralHash,
    target_bits: u64,
    /// The binding is part of the protocol, so it is part of the key.
    pub emit: EmitOptions,
}

impl CacheKey {
    pub fn new(spec: StructuralHash, requirements: StructuralHash, target: f64, emit: EmitOptions) -> Self {
        // 0.0 and -0.0 name the same target.
        let target = if target == 0.0 { 0.0 } else { target };
        Self {
            spec,
            requirements,
            target_bits: target.to_bits(),
            emit,
        }
    }

    pub fn target(&self) -> f64 {
        f64::from_bits(self.target_bits)
    }
}

#[derive(Debug, Default)]
pub struct ProtocolCache {
    entries: HashMap<CacheKey, Arc<HybridProtocol>>,
    hits: usize,
    misses: usize,
}

impl ProtocolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached protocol for `key`, computing and storing it on a miss.
    /// Failed computations are not cached.
    pub fn get_or_emit<E, F>(&mut self, key: CacheKey, compute: F) -> Result<Arc<HybridProtocol>, E>
    where
        F: FnOnce() -> Result<HybridProtocol, E>,
    {
        if let Some(existing) = self.entries.get(&key) {
            self.hits = self.hits.saturating_add(1);
            debug!(spec = %key.spec.short(), target = key.target(), "protocol cache hit");
            return Ok(existing.clone());
        }
        self.misses = self.misses.saturating_add(1);
        let protocol = Arc::new(compute()?);
        self.entries.insert(key, protocol.clone());
        Ok(protocol)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<HybridProtocol>> {
        self.entries.get(key).cloned()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emit, AgreementKind, EmitError};
    use lifter_engine::catalog::Catalog;
    use lifter_engine::pipeline::load_operation;
    use lifter_engine::requirements::Requirements;
    use lifter_engine::synthesis::{synthesize, SynthesisOptions};

    const MUTEX: &str = r#"
(operation mutex
  (domain time (t0 t1))
  (state holder lock)
  (update acquire holder acquire)
  (update release holder release)
  (predicate one-holder exclusion)
  (forall (t time) (one-holder holder t)))
"#;

    #[test]
    fn second_lookup_hits() {
        let op = load_operation(MUTEX, "mutex.lift").unwrap();
        let requirements = Requirements::default();
        let key = CacheKey::new(
            op.structural_hash(),
            requirements.structural_hash(),
            1.0,
            EmitOptions::default(),
        );
        let mut cache = ProtocolCache::new();
        let mut runs = 0;
        for _ in 0..2 {
            let protocol = cache
                .get_or_emit(key.clone(), || {
                    runs += 1;
                    let s = synthesize(
                        &op,
                        &Catalog::standard(),
                        &requirements,
                        1.0,
                        &SynthesisOptions::default(),
                    )
                    .map_err(|e| e.to_string())?;
                    emit(&s.decomposition, &EmitOptions::default()).map_err(|e| e.to_string())
                })
                .unwrap();
            assert!(protocol.is_coordination_free());
        }
        assert_eq!(runs, 1);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn failures_are_not_cached() {
        let mut cache = ProtocolCache::new();
        let key = CacheKey::new(
            StructuralHash([1; 32]),
            StructuralHash([2; 32]),
            0.5,
            EmitOptions::default(),
        );
        let err = cache
            .get_or_emit(key, || Err(EmitError::UnknownState("x".into())))
            .unwrap_err();
        assert!(matches!(err, EmitError::UnknownState(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn signed_zero_targets_share_a_key() {
        let (a, b) = (StructuralHash([0; 32]), StructuralHash([9; 32]));
        let key = |s, r, t| CacheKey::new(s, r, t, EmitOptions::default());
        assert_eq!(key(a, b, 0.0), key(a, b, -0.0));
        assert_ne!(key(a, b, 0.5), key(b, a, 0.5));
    }

    #[test]
    fn binding_options_split_the_key() {
        let (a, b) = (StructuralHash([0; 32]), StructuralHash([9; 32]));
        let broadcast = EmitOptions {
            primitive: AgreementKind::AtomicBroadcast,
            binding_name: None,
        };
        let named = EmitOptions {
            primitive: AgreementKind::Consensus,
            binding_name: Some("raft".into()),
        };
        let plain = CacheKey::new(a, b, 1.0, EmitOptions::default());
        assert_ne!(plain, CacheKey::new(a, b, 1.0, broadcast));
        assert_ne!(plain, CacheKey::new(a, b, 1.0, named));
    }
}
