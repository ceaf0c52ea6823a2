//! Typed per-channel property slots with validity and dirty tracking
//!
//! Properties are identified by (key, channel) and stored type-erased; all
//! typed access goes through `get`/`set`, which check the registered
//! `TypeId` at runtime before downcasting.

use super::errors::PropError;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use tracing::debug;

/// Enumerated property names exposed by a streaming channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// Amplitude scaling applied before fixed-point conversion
    Scaling,
    /// Sample rate in Hz (shared clock domain across the node)
    SampRate,
    /// Tick rate in Hz
    TickRate,
    /// Over-the-wire sample encoding (e.g. "sc16")
    Type,
    /// Maximum transfer unit in bytes
    Mtu,
}

/// Direction of the edge a property lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Edge a property is attached to: direction plus channel index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeInfo {
    pub direction: PortDirection,
    pub chan: usize,
}

/// Stable identity of a property slot: key plus channel index.
///
/// Resolvers reference properties by this identity, never by address, so
/// the store is free to use any backing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropId {
    pub key: PropKey,
    pub chan: usize,
}

impl PropId {
    pub fn new(key: PropKey, chan: usize) -> Self {
        Self { key, chan }
    }
}

/// Types storable in a property slot
pub trait PropValue: Any + Clone + PartialEq + 'static {}
impl<T: Any + Clone + PartialEq + 'static> PropValue for T {}

struct PropSlot {
    edge: EdgeInfo,
    type_id: TypeId,
    type_name: &'static str,
    /// Present iff the slot is valid. An invalid slot carries no readable
    /// value; typed reads return `Ok(None)`.
    value: Option<Box<dyn Any>>,
}

/// Registry of property slots for one node.
///
/// Single-threaded by contract: all operations run on the calling thread
/// with no internal locking. Writes are tracked in an ordered dirty list
/// that the resolution engine drains once per round; a write only dirties
/// the slot when the value actually changes, so "nothing newly dirty" is
/// exactly the fixed-point condition.
pub struct PropertyStore {
    slots: HashMap<PropId, PropSlot>,
    /// Registration order, used when every slot must be dirtied at once
    order: Vec<PropId>,
    /// Write order, deduplicated
    dirty: Vec<PropId>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            order: Vec::new(),
            dirty: Vec::new(),
        }
    }

    /// Register a property slot that starts invalid.
    /// Registering the same (key, chan) twice fails.
    pub fn register<T: PropValue>(&mut self, key: PropKey, edge: EdgeInfo) -> Result<(), PropError> {
        self.insert::<T>(key, edge, None)
    }

    /// Register a property slot with an initial value (starts valid)
    pub fn register_with<T: PropValue>(
        &mut self,
        key: PropKey,
        edge: EdgeInfo,
        initial: T,
    ) -> Result<(), PropError> {
        self.insert::<T>(key, edge, Some(Box::new(initial)))
    }

    fn insert<T: PropValue>(
        &mut self,
        key: PropKey,
        edge: EdgeInfo,
        value: Option<Box<dyn Any>>,
    ) -> Result<(), PropError> {
        let id = PropId::new(key, edge.chan);
        if self.slots.contains_key(&id) {
            return Err(PropError::Duplicate { key, chan: edge.chan });
        }
        debug!(?key, chan = edge.chan, "registered property");
        self.slots.insert(
            id,
            PropSlot {
                edge,
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                value,
            },
        );
        self.order.push(id);
        Ok(())
    }

    /// Read a property value. `Ok(None)` means the slot is registered but
    /// currently invalid (unset).
    pub fn get<T: PropValue>(&self, key: PropKey, chan: usize) -> Result<Option<T>, PropError> {
        let id = PropId::new(key, chan);
        let slot = self.slots.get(&id).ok_or(PropError::NotFound { key, chan })?;
        if slot.type_id != TypeId::of::<T>() {
            return Err(PropError::TypeMismatch {
                key,
                chan,
                stored: slot.type_name,
                requested: type_name::<T>(),
            });
        }
        Ok(slot
            .value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .cloned())
    }

    /// Write a property value, marking the slot valid. The slot is added to
    /// the dirty list only if the value actually changed (the first write to
    /// an invalid slot always counts as a change). Returns whether it did.
    pub fn set<T: PropValue>(
        &mut self,
        key: PropKey,
        chan: usize,
        value: T,
    ) -> Result<bool, PropError> {
        let id = PropId::new(key, chan);
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(PropError::NotFound { key, chan })?;
        if slot.type_id != TypeId::of::<T>() {
            return Err(PropError::TypeMismatch {
                key,
                chan,
                stored: slot.type_name,
                requested: type_name::<T>(),
            });
        }
        let unchanged = slot
            .value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .is_some_and(|current| *current == value);
        if unchanged {
            return Ok(false);
        }
        slot.value = Some(Box::new(value));
        self.mark_dirty(id);
        Ok(true)
    }

    /// Whether a slot currently holds a meaningful value.
    /// Unregistered ids count as invalid.
    pub fn is_valid(&self, id: PropId) -> bool {
        self.slots.get(&id).is_some_and(|s| s.value.is_some())
    }

    /// Edge info a property was registered with
    pub fn edge_info(&self, id: PropId) -> Option<EdgeInfo> {
        self.slots.get(&id).map(|s| s.edge)
    }

    /// Mark every registered slot dirty, in registration order.
    /// Used for the construction-time settling pass.
    pub fn mark_all_dirty(&mut self) {
        let ids: Vec<PropId> = self.order.clone();
        for id in ids {
            self.mark_dirty(id);
        }
    }

    fn mark_dirty(&mut self, id: PropId) {
        if !self.dirty.contains(&id) {
            self.dirty.push(id);
        }
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Drain the dirty list (write order, deduplicated)
    pub fn take_dirty(&mut self) -> Vec<PropId> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn dirty_ids(&self) -> &[PropId] {
        &self.dirty
    }

    pub fn num_props(&self) -> usize {
        self.slots.len()
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}
