// ── Host collaborator ──
//
// The system that actually shows entities to users (a home-automation
// platform, a console, a test double). The core only asks it to create,
// update and remove things; it never learns how they are displayed.

use std::fmt;
use std::sync::Mutex;

use brainlink_api::Key;
use thiserror::Error;

use crate::observable::{EntityKind, ObservableState};

/// Opaque id the host hands back for a materialized entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostHandle(pub String);

impl fmt::Display for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the host needs to register a new entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    pub key: Key,
    pub kind: EntityKind,
    pub name: String,
    pub state: ObservableState,
}

impl EntitySpec {
    /// Stable id derived from the key, suitable as a host-side unique id.
    pub fn unique_id(&self) -> String {
        unique_id(self.key)
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("entity for {key} already exists on the host")]
    Duplicate { key: Key },

    #[error("host rejected the entity: {0}")]
    Rejected(String),
}

/// Registration surface of the host.
///
/// Calls are synchronous and made from the supervisor task; an
/// implementation that needs I/O should queue work rather than block.
pub trait EntityHost: Send + Sync {
    fn materialize(&self, spec: &EntitySpec) -> Result<HostHandle, HostError>;

    fn assign_area_and_tags(&self, handle: &HostHandle, area: Option<&str>) -> Result<(), HostError>;

    /// Remove every entity in `handles`. Called before each reconnect.
    fn remove_all(&self, handles: Vec<HostHandle>);

    fn render(&self, handle: &HostHandle, state: &ObservableState);
}

/// Host-side unique id for `key`, e.g. `brain_12_3`.
pub fn unique_id(key: Key) -> String {
    format!("brain_{}", key.to_string().replace(':', "_"))
}

// ── In-memory host ───────────────────────────────────────────────────

/// Recording host used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryHost {
    log: Mutex<MemoryLog>,
}

/// Everything a [`MemoryHost`] has been asked to do.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    pub materialized: Vec<EntitySpec>,
    pub rendered: Vec<(HostHandle, ObservableState)>,
    pub areas: Vec<(HostHandle, Option<String>)>,
    pub removed: Vec<HostHandle>,
    /// Handles currently registered.
    pub live: Vec<HostHandle>,
    /// Keys whose materialization should fail.
    pub reject: Vec<Key>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next materialization of `key` fail.
    pub fn reject(&self, key: Key) {
        self.with_log(|log| log.reject.push(key));
    }

    pub fn snapshot(&self) -> MemoryLog {
        self.with_log(|log| log.clone())
    }

    /// Last state rendered for `key`.
    pub fn last_state(&self, key: Key) -> Option<ObservableState> {
        let handle = HostHandle(unique_id(key));
        self.with_log(|log| {
            log.rendered
                .iter()
                .rev()
                .find(|(h, _)| *h == handle)
                .map(|(_, s)| s.clone())
        })
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut MemoryLog) -> T) -> T {
        let mut log = self
            .log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut log)
    }
}

impl EntityHost for MemoryHost {
    fn materialize(&self, spec: &EntitySpec) -> Result<HostHandle, HostError> {
        self.with_log(|log| {
            if let Some(pos) = log.reject.iter().position(|k| *k == spec.key) {
                log.reject.remove(pos);
                return Err(HostError::Rejected(format!("refused {}", spec.key)));
            }
            let handle = HostHandle(spec.unique_id());
            if log.live.contains(&handle) {
                return Err(HostError::Duplicate { key: spec.key });
            }
            log.live.push(handle.clone());
            log.materialized.push(spec.clone());
            Ok(handle)
        })
    }

    fn assign_area_and_tags(&self, handle: &HostHandle, area: Option<&str>) -> Result<(), HostError> {
        self.with_log(|log| log.areas.push((handle.clone(), area.map(str::to_owned))));
        Ok(())
    }

    fn remove_all(&self, handles: Vec<HostHandle>) {
        self.with_log(|log| {
            log.live.retain(|h| !handles.contains(h));
            log.removed.extend(handles);
        });
    }

    fn render(&self, handle: &HostHandle, state: &ObservableState) {
        self.with_log(|log| log.rendered.push((handle.clone(), state.clone())));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::observable::MeasurementClass;

    fn spec(key: Key) -> EntitySpec {
        EntitySpec {
            key,
            kind: EntityKind::Measurement(MeasurementClass::Temperature),
            name: "Room".into(),
            state: ObservableState::Measurement(Some(21.0)),
        }
    }

    #[test]
    fn unique_id_is_derived_from_key() {
        assert_eq!(spec(Key::new(12, 3, Some(1))).unique_id(), "brain_12_3_1");
    }

    #[test]
    fn memory_host_refuses_duplicates_until_removed() {
        let host = MemoryHost::new();
        let key = Key::new(12, 3, None);

        let handle = host.materialize(&spec(key)).unwrap();
        assert!(matches!(host.materialize(&spec(key)), Err(HostError::Duplicate { .. })));

        host.remove_all(vec![handle]);
        assert!(host.materialize(&spec(key)).is_ok());
    }

    #[test]
    fn memory_host_can_be_told_to_reject() {
        let host = MemoryHost::new();
        let key = Key::new(12, 3, None);
        host.reject(key);
        assert!(matches!(host.materialize(&spec(key)), Err(HostError::Rejected(_))));
        assert!(host.materialize(&spec(key)).is_ok());
    }
}
