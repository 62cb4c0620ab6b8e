// ── Update dispatcher ──
//
// Consumes filtered updates in arrival order. The first update for a
// key materializes an entity (when inference finds a kind); every
// update, including that first one, is then routed to the registered
// observable and rendered on the host.

use std::sync::Arc;

use brainlink_api::Update;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::host::{EntityHost, EntitySpec};
use crate::infer::{Inference, display_name, infer};
use crate::observable::Observable;
use crate::registry::{Entity, Registry};

/// What happened to one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reserved key (heartbeat, fault indicator, navigation).
    Filtered,
    /// First sighting, but no entity was created.
    Skipped,
    /// Announced as new although the key is already registered.
    Duplicate,
    Routed { materialized: bool },
    /// No entity for this key.
    Dropped,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    host: Arc<dyn EntityHost>,
    area: Option<String>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, host: Arc<dyn EntityHost>, area: Option<String>) -> Self {
        Self {
            registry,
            host,
            area,
        }
    }

    pub fn handle(&self, update: &Update) -> Disposition {
        let key = update.key;
        if !key.is_value() {
            return Disposition::Filtered;
        }

        let mut materialized = false;
        if update.is_new {
            if self.registry.contains(key) {
                error!(key = %key, "key announced as new but already registered; update dropped");
                return Disposition::Duplicate;
            }
            if !self.materialize(update) {
                return Disposition::Skipped;
            }
            materialized = true;
        }

        // Render outside the shard lock.
        let routed = self.registry.with_entity_mut(key, |entity| {
            entity.observable.apply_update(&update.entry.value);
            (entity.handle.clone(), entity.state())
        });

        match routed {
            Some((handle, state)) => {
                self.host.render(&handle, &state);
                Disposition::Routed { materialized }
            }
            None => {
                debug!(key = %key, "update for unknown key dropped");
                Disposition::Dropped
            }
        }
    }

    fn materialize(&self, update: &Update) -> bool {
        let key = update.key;
        let entry = &update.entry;

        let Some(meta) = entry.meta.as_ref() else {
            warn!(key = %key, "first update has no value metadata; skipped");
            return false;
        };

        let kind = match infer(entry, meta) {
            Inference::Matched(kind) => kind,
            Inference::Rejected(reason) => {
                warn!(key = %key, value = %entry.value, reason, "value rejected; skipped");
                return false;
            }
            Inference::Unmatched => {
                info!(
                    key = %key,
                    unit = ?meta.unit,
                    type_code = ?meta.type_code,
                    elements = meta.elements.len(),
                    edit = ?entry.edit,
                    "no entity kind for value; skipped"
                );
                return false;
            }
        };

        let observable = Observable::new(&kind, &entry.value, entry.screen_key);
        let name = display_name(update.screen_title.as_deref(), entry);
        let spec = EntitySpec {
            key,
            kind: kind.clone(),
            name: name.clone(),
            state: observable.state(),
        };

        let handle = match self.host.materialize(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                error!(key = %key, error = %e, "host failed to materialize entity");
                return false;
            }
        };

        let entity = Entity {
            key,
            name,
            kind,
            handle: handle.clone(),
            observable,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.registry.insert(entity) {
            error!(key = %key, error = %e, "entity registered twice");
            return false;
        }

        if let Err(e) = self.host.assign_area_and_tags(&handle, self.area.as_deref()) {
            warn!(key = %key, error = %e, "failed to assign area");
        }

        info!(key = %key, kind = %spec.kind, name = %spec.name, "entity materialized");
        true
    }
}
