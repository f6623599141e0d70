//! Deferred-mutation arena for per-room objects and clients
//!
//! Additions and deletions are staged and only become visible when
//! [`Container::apply_pending_changes`] runs at the top of a tick. IDs are
//! handed out immediately on `add`, so callers can reference an object before
//! it is committed.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

/// Object / client identifier, unique and monotonically increasing per container
pub type ObjectId = u64;

/// Client identifiers come from their own container
pub type ClientId = u64;

/// Errors from container lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    #[error("object ID '{0}' not found")]
    NotFound(ObjectId),
}

/// Committed map plus staged additions and deletions
#[derive(Debug)]
pub struct Container<T> {
    committed: BTreeMap<ObjectId, T>,
    pending_addition: Vec<(ObjectId, T)>,
    pending_delete: BTreeSet<ObjectId>,
    next_id: ObjectId,
}

impl<T> Container<T> {
    pub fn new() -> Self {
        Self {
            committed: BTreeMap::new(),
            pending_addition: Vec::new(),
            pending_delete: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Stage an insertion and return the ID it will be committed under
    pub fn add(&mut self, value: T) -> ObjectId {
        self.add_with(|_| value)
    }

    /// Like [`Container::add`], for values that need to know their own ID
    pub fn add_with<F>(&mut self, build: F) -> ObjectId
    where
        F: FnOnce(ObjectId) -> T,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.pending_addition.push((id, build(id)));
        id
    }

    /// Stage a removal
    pub fn delete(&mut self, id: ObjectId) {
        self.pending_delete.insert(id);
    }

    /// Stage removal of several IDs at once
    pub fn delete_all<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = ObjectId>,
    {
        self.pending_delete.extend(ids);
    }

    /// True only for committed entries
    pub fn exists(&self, id: ObjectId) -> bool {
        self.committed.contains_key(&id)
    }

    /// True if an addition for `id` is staged but not yet committed
    pub fn is_pending(&self, id: ObjectId) -> bool {
        self.pending_addition.iter().any(|(pending, _)| *pending == id)
    }

    pub fn get(&self, id: ObjectId) -> Result<&T, EntityError> {
        self.committed.get(&id).ok_or(EntityError::NotFound(id))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut T, EntityError> {
        self.committed.get_mut(&id).ok_or(EntityError::NotFound(id))
    }

    /// Staged value, used when a just-added entry has to be adjusted in the same tick
    pub fn get_pending_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.pending_addition
            .iter_mut()
            .find(|(pending, _)| *pending == id)
            .map(|(_, value)| value)
    }

    /// Committed entries, plus staged additions if `include_pending`
    pub fn count(&self, include_pending: bool) -> usize {
        let pending = if include_pending {
            self.pending_addition.len()
        } else {
            0
        };
        self.committed.len() + pending
    }

    /// The ID the next `add` will return; every ID below it has been issued
    pub fn next_id(&self) -> ObjectId {
        self.next_id
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.committed.iter().map(|(id, value)| (*id, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut T)> {
        self.committed.iter_mut().map(|(id, value)| (*id, value))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.committed.values()
    }

    /// Staged additions not yet committed
    pub fn pending_values(&self) -> impl Iterator<Item = &T> {
        self.pending_addition.iter().map(|(_, value)| value)
    }

    /// Commit staged changes: deletions first, then additions.
    ///
    /// A deletion staged for an entry that was never committed cancels the
    /// addition. Returns the values that were removed so the caller can
    /// release resources they hold (physics bodies).
    pub fn apply_pending_changes(&mut self) -> Vec<T> {
        let mut removed = Vec::with_capacity(self.pending_delete.len());
        for id in std::mem::take(&mut self.pending_delete) {
            if let Some(value) = self.committed.remove(&id) {
                removed.push(value);
            } else if let Some(index) = self.pending_addition.iter().position(|(p, _)| *p == id) {
                removed.push(self.pending_addition.remove(index).1);
            } else {
                warn!(object_id = id, "trying to delete non-existing object");
            }
        }
        for (id, value) in self.pending_addition.drain(..) {
            self.committed.insert(id, value);
        }
        removed
    }
}

impl<T> Default for Container<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_returns_monotonic_ids_before_commit() {
        let mut objects = Container::new();
        let a = objects.add("a");
        let b = objects.add("b");
        assert_eq!((a, b), (0, 1));
        assert!(!objects.exists(a));
        assert!(objects.is_pending(a));
        assert_eq!(objects.count(false), 0);
        assert_eq!(objects.count(true), 2);

        objects.apply_pending_changes();
        assert!(objects.exists(a));
        assert!(!objects.is_pending(a));
        assert_eq!(objects.get(b), Ok(&"b"));
    }

    #[test]
    fn deletions_apply_before_additions() {
        let mut objects = Container::new();
        let a = objects.add(1);
        objects.apply_pending_changes();

        objects.delete(a);
        let b = objects.add(2);
        assert!(objects.exists(a));

        let removed = objects.apply_pending_changes();
        assert_eq!(removed, vec![1]);
        assert!(!objects.exists(a));
        assert!(objects.exists(b));
    }

    #[test]
    fn apply_is_idempotent_without_new_changes() {
        let mut objects = Container::new();
        objects.add('x');
        objects.add('y');
        objects.apply_pending_changes();
        let before: Vec<_> = objects.iter().map(|(id, v)| (id, *v)).collect();

        assert!(objects.apply_pending_changes().is_empty());
        let after: Vec<_> = objects.iter().map(|(id, v)| (id, *v)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut objects = Container::new();
        let a = objects.add(());
        objects.apply_pending_changes();
        objects.delete(a);
        objects.apply_pending_changes();
        assert_eq!(objects.add(()), a + 1);
        assert_eq!(objects.next_id(), 2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let mut objects: Container<u8> = Container::new();
        assert_eq!(objects.get(7), Err(EntityError::NotFound(7)));
        assert_eq!(objects.get_mut(7), Err(EntityError::NotFound(7)));
    }

    #[test]
    fn deleting_staged_entry_cancels_addition() {
        let mut objects = Container::new();
        let a = objects.add_with(|id| id * 10);
        let b = objects.add_with(|id| id * 10);
        assert_eq!(objects.pending_values().copied().collect::<Vec<_>>(), vec![0, 10]);

        objects.delete(a);
        let removed = objects.apply_pending_changes();
        assert_eq!(removed, vec![0]);
        assert!(!objects.exists(a));
        assert_eq!(objects.get(b), Ok(&10));
    }

    #[test]
    fn delete_all_and_unknown_deletes() {
        let mut objects = Container::new();
        let ids: Vec<_> = (0..3).map(|n| objects.add(n)).collect();
        objects.apply_pending_changes();

        objects.delete_all(ids.iter().copied().chain([42]));
        let removed = objects.apply_pending_changes();
        assert_eq!(removed.len(), 3);
        assert_eq!(objects.count(true), 0);
    }
}
