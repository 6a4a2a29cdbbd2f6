//! Inbox routing: newly created items are assigned a destination folder
//! based on the uploading principal's roles.

use crate::access::{AccessResolver, ActionKind, Principal, RoleRegistry};
use crate::events::{Event, EventBus};
use crate::storage::{FolderProvider, ItemStore};
use crate::workflow::{ReviewCounter, SystemFolders};
use std::sync::Arc;
use uuid::Uuid;

pub struct InboxRouter {
    folders: Arc<dyn FolderProvider>,
    items: Arc<dyn ItemStore>,
    registry: Arc<RoleRegistry>,
    system: Arc<SystemFolders>,
    review: Arc<ReviewCounter>,
    events: EventBus,
}

impl InboxRouter {
    pub fn new(
        folders: Arc<dyn FolderProvider>,
        items: Arc<dyn ItemStore>,
        registry: Arc<RoleRegistry>,
        system: Arc<SystemFolders>,
        review: Arc<ReviewCounter>,
        events: EventBus,
    ) -> Self {
        Self {
            folders,
            items,
            registry,
            system,
            review,
            events,
        }
    }

    /// The folder this principal's uploads would land in: the first of their
    /// roles (in role order) with a configured inbox whose folder still
    /// exists, falling back to the needs-review folder. Superusers are never
    /// auto-routed.
    pub fn destination_for(&self, principal: &Principal) -> Option<Uuid> {
        if principal.superuser {
            return None;
        }
        for role in &principal.roles {
            if let Some(folder) = self.registry.inbox(role) {
                if self.folders.get(folder).is_some() {
                    return Some(folder);
                }
            }
        }
        self.system
            .needs_review()
            .filter(|id| self.folders.get(*id).is_some())
    }

    /// Route a newly created item. Returns the assigned folder, or `None`
    /// when the item stays unclassified; neither outcome is an error.
    ///
    /// An already-assigned item is returned unchanged, so re-entrant create
    /// hooks cannot double-route. A destination outside the workflow system
    /// folders requires `UploadTo`; a denial aborts routing entirely rather
    /// than falling through to needs-review.
    pub fn route_on_create(
        &self,
        item_id: Uuid,
        principal: &Principal,
        resolver: &AccessResolver,
    ) -> Option<Uuid> {
        let item = self.items.item(item_id)?;
        if item.folder_id.is_some() {
            return item.folder_id;
        }
        if principal.superuser {
            return None;
        }
        let destination = self.destination_for(principal)?;
        if !self.system.is_system_folder(destination)
            && !resolver.can_perform(principal, destination, ActionKind::UploadTo)
        {
            tracing::debug!(
                principal = %principal.id,
                %destination,
                "inbox destination denied, leaving item unclassified"
            );
            return None;
        }
        if let Err(err) = self.items.set_folder(item_id, Some(destination)) {
            tracing::warn!(item = %item_id, %err, "failed to assign routed item");
            return None;
        }
        if self.system.needs_review() == Some(destination) {
            self.review.invalidate();
        }
        self.events.send(Event::ItemRouted {
            item: item_id,
            folder: destination,
            principal: principal.id.clone(),
        });
        Some(destination)
    }
}
