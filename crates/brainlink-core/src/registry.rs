// ── Observable registry ──
//
// Key -> materialized entity. Written only by the dispatcher, read by
// outbound handlers and consumers. A key is inserted at most once per
// session; a second insert is refused, never overwrites.

use brainlink_api::Key;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::sync::watch;

use crate::host::HostHandle;
use crate::observable::{EntityKind, Observable, ObservableState};

/// One materialized key.
#[derive(Debug, Clone)]
pub struct Entity {
    pub key: Key,
    pub name: String,
    pub kind: EntityKind,
    pub handle: HostHandle,
    pub observable: Observable,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn state(&self) -> ObservableState {
        self.observable.state()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} is already registered")]
pub struct DuplicateKey(pub Key);

pub struct Registry {
    entities: DashMap<Key, Entity>,
    /// Bumped on every insert, update and clear.
    version: watch::Sender<u64>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entities: DashMap::new(),
            version,
        }
    }

    pub fn insert(&self, entity: Entity) -> Result<(), DuplicateKey> {
        match self.entities.entry(entity.key) {
            MapEntry::Occupied(_) => Err(DuplicateKey(entity.key)),
            MapEntry::Vacant(slot) => {
                slot.insert(entity);
                self.bump_version();
                Ok(())
            }
        }
    }

    pub fn contains(&self, key: Key) -> bool {
        self.entities.contains_key(&key)
    }

    /// Run `f` against the entity for `key` while holding its shard lock.
    /// Do not call back into the registry from `f`.
    pub fn with_entity_mut<T>(&self, key: Key, f: impl FnOnce(&mut Entity) -> T) -> Option<T> {
        let result = self.entities.get_mut(&key).map(|mut entity| {
            let out = f(&mut entity);
            entity.updated_at = Utc::now();
            out
        });
        if result.is_some() {
            self.bump_version();
        }
        result
    }

    pub fn get(&self, key: Key) -> Option<Entity> {
        self.entities.get(&key).map(|e| e.value().clone())
    }

    /// All entities, ordered by key.
    pub fn snapshot(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.key);
        all
    }

    /// Empty the registry, returning the host handles that were in it.
    pub fn drain_handles(&self) -> Vec<HostHandle> {
        let keys: Vec<Key> = self.entities.iter().map(|e| *e.key()).collect();
        let handles = keys
            .into_iter()
            .filter_map(|k| self.entities.remove(&k))
            .map(|(_, entity)| entity.handle)
            .collect();
        self.bump_version();
        handles
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Receives the version counter on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}
