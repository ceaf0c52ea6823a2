//! Resolution engine: runs property resolvers to a fixed point
//!
//! A resolver is a callback bound to a read set and a write set of property
//! ids. Whenever a property is set externally, every resolver whose read set
//! intersects the dirty properties runs, and any properties written during
//! the round trigger the next round. The loop ends when a round produces no
//! newly-dirty properties.
//!
//! Resolvers must be idempotent: invoked twice with unchanged inputs they
//! must produce unchanged outputs. That, plus the change-detecting store, is
//! what guarantees termination for well-formed graphs; ill-formed graphs hit
//! the round cap and fail with `ResolveError::Divergence`.

use super::errors::{PropError, ResolveError};
use super::property::{EdgeInfo, PropId, PropKey, PropValue, PropertyStore};
use tracing::trace;

/// Round cap factor: a well-behaved graph settles in far fewer rounds than
/// resolvers; anything past this bound is a cyclic or non-idempotent graph.
const MAX_ROUNDS_PER_RESOLVER: usize = 4;

type ResolverFn = Box<dyn FnMut(&mut PropertyStore) -> Result<(), PropError>>;

struct Resolver {
    inputs: Vec<PropId>,
    outputs: Vec<PropId>,
    func: ResolverFn,
}

/// Per-node resolution engine.
///
/// Owns the property store and the resolver list. Single-threaded and
/// re-entrant-unsafe by design: callers serialize all mutations externally,
/// and resolver callbacks must not call back into `set`/`resolve`.
pub struct ResolutionEngine {
    store: PropertyStore,
    resolvers: Vec<Resolver>,
}

impl ResolutionEngine {
    pub fn new() -> Self {
        Self {
            store: PropertyStore::new(),
            resolvers: Vec::new(),
        }
    }

    /// Register a property slot (starts invalid)
    pub fn register<T: PropValue>(&mut self, key: PropKey, edge: EdgeInfo) -> Result<(), PropError> {
        self.store.register::<T>(key, edge)
    }

    /// Register a property slot with an initial value
    pub fn register_with<T: PropValue>(
        &mut self,
        key: PropKey,
        edge: EdgeInfo,
        initial: T,
    ) -> Result<(), PropError> {
        self.store.register_with::<T>(key, edge, initial)
    }

    /// Add a resolver. Resolvers run in registration order within a round.
    ///
    /// `outputs` declares every property the callback may write; writes
    /// outside it are a contract violation. By convention a property should
    /// be the sole output of at most one resolver, except where a group of
    /// resolvers deliberately shares a write set (the cross-channel MTU
    /// resolvers do).
    pub fn add_resolver<F>(&mut self, inputs: Vec<PropId>, outputs: Vec<PropId>, func: F)
    where
        F: FnMut(&mut PropertyStore) -> Result<(), PropError> + 'static,
    {
        trace!(
            index = self.resolvers.len(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            "added resolver"
        );
        self.resolvers.push(Resolver {
            inputs,
            outputs,
            func: Box::new(func),
        });
    }

    /// Read a property value (`Ok(None)` if currently invalid)
    pub fn get<T: PropValue>(&self, key: PropKey, chan: usize) -> Result<Option<T>, PropError> {
        self.store.get::<T>(key, chan)
    }

    /// Set a property and resolve to a fixed point
    pub fn set<T: PropValue>(
        &mut self,
        key: PropKey,
        chan: usize,
        value: T,
    ) -> Result<(), ResolveError> {
        self.store.set(key, chan, value)?;
        self.resolve()
    }

    /// Construction-time settling pass: mark every property dirty and
    /// resolve once, so resolvers observe any initial values.
    pub fn init_props(&mut self) -> Result<(), ResolveError> {
        self.store.mark_all_dirty();
        self.resolve()
    }

    /// Run resolvers until no property changes.
    ///
    /// Each round drains the dirty list, then walks resolvers in
    /// registration order, invoking each one whose read set intersects the
    /// drained set exactly once. A resolver whose declared inputs are all
    /// invalid is skipped, so partially-configured channels never feed
    /// absent values into a callback.
    ///
    /// Fails with `Divergence` once the round count exceeds the cap; the
    /// store then holds the last materialized values plus a pending dirty
    /// list and must be treated as unreliable.
    pub fn resolve(&mut self) -> Result<(), ResolveError> {
        let max_rounds = self
            .resolvers
            .len()
            .saturating_mul(MAX_ROUNDS_PER_RESOLVER)
            .max(1);
        let mut rounds = 0;
        while self.store.has_dirty() {
            if rounds == max_rounds {
                return Err(ResolveError::Divergence { rounds });
            }
            let dirty = self.store.take_dirty();
            trace!(round = rounds, dirty = dirty.len(), "resolution round");
            for resolver in &mut self.resolvers {
                if !resolver.inputs.iter().any(|id| dirty.contains(id)) {
                    continue;
                }
                if !resolver.inputs.iter().any(|&id| self.store.is_valid(id)) {
                    trace!("skipping resolver with no valid inputs");
                    continue;
                }
                let marked_before = self.store.dirty_ids().len();
                (resolver.func)(&mut self.store)?;
                debug_assert!(
                    self.store.dirty_ids()[marked_before..]
                        .iter()
                        .all(|id| resolver.outputs.contains(id)),
                    "resolver wrote outside its declared output set"
                );
            }
            rounds += 1;
        }
        Ok(())
    }

    pub fn num_resolvers(&self) -> usize {
        self.resolvers.len()
    }

    pub fn num_props(&self) -> usize {
        self.store.num_props()
    }
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}
