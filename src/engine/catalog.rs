use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

// ── catalog collaborator surface ─────────────────────────
//
// Resources are pushed in by the catalog system; the engine owns their
// schedules and lifecycle, the catalog owns what they are.

impl Engine {
    pub async fn register_resource(
        &self,
        actor: Actor,
        id: Ulid,
        kind: ResourceKind,
    ) -> Result<(), EngineError> {
        if !actor.role.is_admin() {
            return Err(EngineError::Forbidden { required: Role::Admin });
        }
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let longest_label = match &kind {
            ResourceKind::Cubicle { .. } => 0,
            ResourceKind::Laptop { os, brand } => os.len().max(brand.len()),
            ResourceKind::BookCopy { title } => title.len(),
        };
        if longest_label > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("label too long"));
        }
        if self.resources.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceRegistered { id, kind: kind.clone() };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, kind);
        self.resources.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE)
            .set(self.resources.len() as f64);
        Ok(())
    }

    /// Flip a resource between `Available`, `Maintenance`, `Disabled`.
    /// Unchanged status is a no-op so repeated catalog pushes don't
    /// churn the WAL.
    pub async fn set_resource_status(
        &self,
        actor: Actor,
        id: Ulid,
        status: AdminStatus,
    ) -> Result<(), EngineError> {
        if !actor.role.is_admin() {
            return Err(EngineError::Forbidden { required: Role::Admin });
        }
        let rs_arc = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut rs = rs_arc.write_owned().await;
        if rs.status == status {
            return Ok(());
        }
        let event = Event::ResourceStatusChanged { id, status };
        self.persist_and_apply(&mut rs, &event).await
    }

    /// Remove a resource the catalog has retired. Refused while any
    /// non-terminal booking or open loan still references it, so
    /// history for live allocations can't be orphaned.
    pub async fn remove_resource(&self, actor: Actor, id: Ulid) -> Result<(), EngineError> {
        if !actor.role.is_admin() {
            return Err(EngineError::Forbidden { required: Role::Admin });
        }
        let rs_arc = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        // Held through the map removal: a racing reserve either commits
        // first (the scan below sees its live record) or re-checks map
        // membership under this lock and finds the resource gone.
        let rs = rs_arc.write_owned().await;
        if rs.active_loan.is_some() {
            return Err(EngineError::ResourceBusy(id));
        }
        for entry in self.bookings.iter() {
            let Ok(record) = entry.value().try_read() else {
                // write-locked record means a transition is in flight
                return Err(EngineError::ResourceBusy(id));
            };
            if record.resource_id == id && !record.state.is_terminal() {
                return Err(EngineError::ResourceBusy(id));
            }
        }

        let event = Event::ResourceRemoved { id };
        self.wal_append(&event).await?;
        self.resources.remove(&id);
        drop(rs);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE)
            .set(self.resources.len() as f64);
        Ok(())
    }
}
