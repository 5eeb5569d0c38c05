//! In-process relation catalog with per-relation locks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock, RwLock,
};
use serde::Serialize;
use tracing::trace;

use crate::admin::error::CheckError;
use crate::primitives::pager::PageStore;

/// Identifier of a relation in the [`Catalog`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a client session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct SessionId(pub u64);

/// What a relation is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelationKind {
    /// Base table.
    Table,
    /// Index over a table.
    Index,
}

/// Storage method of a relation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessMethod {
    /// Table storage.
    Heap,
    /// Generalized inverted index.
    Gin,
    /// Ordered B-tree index.
    Btree,
}

/// Durability class of a relation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Persistence {
    /// WAL-logged.
    Permanent,
    /// Not WAL-logged; contents are lost on crash and absent on standbys.
    Unlogged,
    /// Private to the owning session.
    Temporary {
        /// Session that created it.
        owner: SessionId,
    },
}

/// Catalog row for one relation.
#[derive(Clone)]
pub struct Relation {
    /// Identifier.
    pub id: RelationId,
    /// Name used in messages.
    pub name: String,
    /// Table or index.
    pub kind: RelationKind,
    /// Storage method.
    pub access_method: AccessMethod,
    /// Durability class.
    pub persistence: Persistence,
    /// False while an index build or drop is in flight.
    pub valid: bool,
    /// Table an index belongs to.
    pub heap: Option<RelationId>,
    /// Page store backing an index.
    pub store: Option<Arc<dyn PageStore>>,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("access_method", &self.access_method)
            .field("persistence", &self.persistence)
            .field("valid", &self.valid)
            .field("heap", &self.heap)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

struct Slot {
    relation: Relation,
    lock: Arc<RwLock<()>>,
}

/// Held relation lock; released on drop.
pub enum RelationLock {
    /// Shared lock, compatible with other shared holders.
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    /// Exclusive lock.
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
}

impl fmt::Debug for RelationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationLock::Shared(_) => f.write_str("RelationLock::Shared"),
            RelationLock::Exclusive(_) => f.write_str("RelationLock::Exclusive"),
        }
    }
}

/// Locks taken on an index and its table for one verification.
///
/// Dropping releases the index lock first, then the table lock.
pub struct CheckLocks {
    index: Relation,
    heap: Relation,
    _index_lock: RelationLock,
    _heap_lock: RelationLock,
}

impl CheckLocks {
    /// Catalog row of the index, read after its lock was taken.
    pub fn index(&self) -> &Relation {
        &self.index
    }

    /// Catalog row of the table.
    pub fn heap(&self) -> &Relation {
        &self.heap
    }
}

impl Drop for CheckLocks {
    fn drop(&mut self) {
        trace!(index = self.index.id.0, heap = self.heap.id.0, "catalog.unlock");
    }
}

/// Registry of tables and indexes.
pub struct Catalog {
    slots: RwLock<HashMap<RelationId, Slot>>,
    next_id: AtomicU32,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    fn insert(&self, relation: Relation) -> RelationId {
        let id = relation.id;
        self.slots.write().insert(
            id,
            Slot {
                relation,
                lock: Arc::new(RwLock::new(())),
            },
        );
        id
    }

    fn allocate_id(&self) -> RelationId {
        RelationId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a table.
    pub fn create_table(&self, name: impl Into<String>, persistence: Persistence) -> RelationId {
        let id = self.allocate_id();
        self.insert(Relation {
            id,
            name: name.into(),
            kind: RelationKind::Table,
            access_method: AccessMethod::Heap,
            persistence,
            valid: true,
            heap: None,
            store: None,
        })
    }

    /// Registers an index over `heap` backed by `store`.
    pub fn create_index(
        &self,
        name: impl Into<String>,
        heap: RelationId,
        access_method: AccessMethod,
        persistence: Persistence,
        store: Arc<dyn PageStore>,
    ) -> Result<RelationId, CheckError> {
        match self.relation(heap) {
            Some(table) if table.kind == RelationKind::Table => {}
            Some(table) => return Err(CheckError::ParentTableMissing { name: table.name }),
            None => return Err(CheckError::RelationNotFound(heap)),
        }
        let id = self.allocate_id();
        Ok(self.insert(Relation {
            id,
            name: name.into(),
            kind: RelationKind::Index,
            access_method,
            persistence,
            valid: true,
            heap: Some(heap),
            store: Some(store),
        }))
    }

    /// Snapshot of a relation's catalog row.
    pub fn relation(&self, id: RelationId) -> Option<Relation> {
        self.slots.read().get(&id).map(|slot| slot.relation.clone())
    }

    /// Looks a relation up by name.
    pub fn resolve(&self, name: &str) -> Option<RelationId> {
        self.slots
            .read()
            .values()
            .find(|slot| slot.relation.name == name)
            .map(|slot| slot.relation.id)
    }

    /// Table of an index, `None` when `id` is missing or not an index.
    pub fn index_heap(&self, id: RelationId) -> Option<RelationId> {
        self.slots
            .read()
            .get(&id)
            .filter(|slot| slot.relation.kind == RelationKind::Index)
            .and_then(|slot| slot.relation.heap)
    }

    /// Marks an index valid or invalid.
    pub fn set_valid(&self, id: RelationId, valid: bool) -> Result<(), CheckError> {
        self.update(id, |rel| rel.valid = valid)
    }

    /// Points an index at another table, as a drop and recreate would.
    pub fn set_index_heap(&self, id: RelationId, heap: Option<RelationId>) -> Result<(), CheckError> {
        self.update(id, |rel| rel.heap = heap)
    }

    /// Removes a relation, returning its last row.
    pub fn drop_relation(&self, id: RelationId) -> Option<Relation> {
        self.slots.write().remove(&id).map(|slot| slot.relation)
    }

    fn update(&self, id: RelationId, f: impl FnOnce(&mut Relation)) -> Result<(), CheckError> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(&id).ok_or(CheckError::RelationNotFound(id))?;
        f(&mut slot.relation);
        Ok(())
    }

    fn lock_handle(&self, id: RelationId) -> Result<Arc<RwLock<()>>, CheckError> {
        self.slots
            .read()
            .get(&id)
            .map(|slot| slot.lock.clone())
            .ok_or(CheckError::RelationNotFound(id))
    }

    /// Takes a shared lock, blocking while an exclusive holder exists.
    pub fn lock_shared(&self, id: RelationId) -> Result<RelationLock, CheckError> {
        let handle = self.lock_handle(id)?;
        trace!(relation = id.0, mode = "shared", "catalog.lock");
        Ok(RelationLock::Shared(handle.read_arc()))
    }

    /// Takes an exclusive lock.
    pub fn lock_exclusive(&self, id: RelationId) -> Result<RelationLock, CheckError> {
        let handle = self.lock_handle(id)?;
        trace!(relation = id.0, mode = "exclusive", "catalog.lock");
        Ok(RelationLock::Exclusive(handle.write_arc()))
    }

    /// Tries to take an exclusive lock without blocking.
    pub fn try_lock_exclusive(&self, id: RelationId) -> Result<Option<RelationLock>, CheckError> {
        let handle = self.lock_handle(id)?;
        Ok(handle.try_write_arc().map(RelationLock::Exclusive))
    }

    /// Locks the table of `index` and then the index itself in shared mode.
    ///
    /// The index-to-table mapping is read without a lock, so it is checked
    /// again once both locks are held.
    pub fn lock_for_check(&self, index: RelationId) -> Result<CheckLocks, CheckError> {
        let heap_id = self.index_heap(index);
        let heap_lock = match heap_id {
            Some(heap) => self.lock_shared(heap).ok(),
            None => None,
        };
        let index_lock = self.lock_shared(index)?;
        let index_rel = self
            .relation(index)
            .ok_or(CheckError::RelationNotFound(index))?;
        if index_rel.kind != RelationKind::Index {
            return Err(CheckError::NotAnIndex {
                name: index_rel.name,
            });
        }
        let (Some(heap_id), Some(heap_lock)) = (heap_id, heap_lock) else {
            return Err(CheckError::ParentTableMissing {
                name: index_rel.name,
            });
        };
        let heap_rel = match self.relation(heap_id) {
            Some(rel) if self.index_heap(index) == Some(heap_id) => rel,
            _ => {
                return Err(CheckError::ParentTableMissing {
                    name: index_rel.name,
                })
            }
        };
        Ok(CheckLocks {
            index: index_rel,
            heap: heap_rel,
            _index_lock: index_lock,
            _heap_lock: heap_lock,
        })
    }
}
